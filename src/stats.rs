//! # Engine Statistics
//!
//! Counters kept by each [`crate::device_engine::DeviceEngine`]. They are
//! plain values; take a copy with `engine.stats()` and serialize it for
//! monitoring.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};

/// Decode failures by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeErrorCounts {
    pub truncated: u64,
    pub length_mismatch: u64,
    pub checksum_mismatch: u64,
    pub unknown_tag: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub packets_received: u64,
    pub packets_decoded: u64,
    pub decode_errors: DecodeErrorCounts,
    pub housekeeping_packets: u64,
    pub commands_sent: u64,
    pub commands_matched: u64,
    pub command_timeouts: u64,
    pub sessions_armed: u64,
    pub sessions_completed: u64,
    pub sessions_aborted: u64,
    pub firmware_updates_started: u64,
    pub firmware_updates_failed: u64,
}

impl EngineStats {
    pub fn record_decode_error(&mut self, err: &DecodeError) {
        let counts = &mut self.decode_errors;
        match err {
            DecodeError::Truncated { .. } => counts.truncated += 1,
            DecodeError::LengthMismatch { .. } => counts.length_mismatch += 1,
            DecodeError::ChecksumMismatch { .. } => counts.checksum_mismatch += 1,
            DecodeError::UnknownTag(_) => counts.unknown_tag += 1,
        }
    }

    pub fn total_decode_errors(&self) -> u64 {
        let c = &self.decode_errors;
        c.truncated + c.length_mismatch + c.checksum_mismatch + c.unknown_tag
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
