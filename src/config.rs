//! # Engine Configuration
//!
//! Per-engine settings passed at construction. Every field has a default, so
//! a JSON file only needs to name the values it changes:
//!
//! ```json
//! { "end_of_test_timeout_ms": 20000, "peripheral_type": "SpirobankOxi" }
//! ```

use crate::constants::*;
use crate::error::ConfigError;
use crate::session::types::PeripheralType;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for a command response.
    #[serde(rename = "command_timeout_ms", with = "duration_ms")]
    pub command_timeout: Duration,
    /// Inactivity after which a collecting session is aborted.
    #[serde(rename = "end_of_test_timeout_ms", with = "duration_ms")]
    pub end_of_test_timeout: Duration,
    /// Longest gap between two firmware progress packets.
    #[serde(rename = "firmware_progress_timeout_ms", with = "duration_ms")]
    pub firmware_progress_timeout: Duration,
    /// Per-stream curve sample cap.
    pub max_curve_samples: usize,
    /// Checksum failures tolerated during one session.
    pub max_checksum_failures: u32,
    /// Connected peripheral model, copied into results.
    pub peripheral_type: PeripheralType,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            end_of_test_timeout: Duration::from_millis(DEFAULT_END_OF_TEST_TIMEOUT_MS),
            firmware_progress_timeout: Duration::from_millis(DEFAULT_FIRMWARE_PROGRESS_TIMEOUT_MS),
            max_curve_samples: DEFAULT_MAX_CURVE_SAMPLES,
            max_checksum_failures: DEFAULT_MAX_CHECKSUM_FAILURES,
            peripheral_type: PeripheralType::Undefined,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        log::debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("command_timeout_ms", self.command_timeout),
            ("end_of_test_timeout_ms", self.end_of_test_timeout),
            ("firmware_progress_timeout_ms", self.firmware_progress_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        if self.max_curve_samples == 0 {
            return Err(ConfigError::Invalid(
                "max_curve_samples must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.end_of_test_timeout, Duration::from_secs(15));
        assert_eq!(config.max_checksum_failures, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "command_timeout_ms": 500 }"#).unwrap();
        assert_eq!(config.command_timeout, Duration::from_millis(500));
        assert_eq!(config.max_curve_samples, DEFAULT_MAX_CURVE_SAMPLES);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "firmware_progress_timeout_ms": 0 }"#);
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }
}
