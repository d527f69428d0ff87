//! # spirolink-rs - Telemetry Protocol Engine for BLE Spirometers and Oximeters
//!
//! The spirolink-rs crate implements the host side of the packet protocol
//! spoken by portable spirometry/oximetry peripherals. The BLE transport is
//! left to the caller: it hands every received notification to the engine
//! and writes whatever the engine emits back to the device.
//!
//! ## Features
//!
//! - Decode checksummed frames, resolving tag codes that the device reuses
//!   across test types
//! - Reassemble FVC, VC, MVV and oximetry sessions from streamed curve
//!   samples, multi-part result packets and terminal packets
//! - Build structured test results with ATS2015/ATS2019 blow quality
//!   classification
//! - Correlate commands with their responses, with deadlines
//! - Track firmware updates with a progress watchdog
//! - Run the engine synchronously with explicit timestamps, or on a tokio task
//!   through [`connection::EngineHandle`]
//!
//! ## Usage
//!
//! ```rust
//! use spirolink_rs::{DeviceEngine, EngineConfig, MockCommandSink, TestOutcome, TestType};
//! use std::sync::{Arc, Mutex};
//!
//! let mut engine = DeviceEngine::new(EngineConfig::default(), MockCommandSink::new());
//! let outcomes = Arc::new(Mutex::new(Vec::new()));
//! let seen = outcomes.clone();
//! engine.subscribe_to_results(move |outcome: &TestOutcome| {
//!     seen.lock().unwrap().push(outcome.clone());
//! });
//!
//! engine.arm_test(TestType::Fvc).unwrap();
//! // for each BLE notification:
//! // engine.on_packet_bytes(&notification)?;
//! ```

pub mod command;
pub mod config;
pub mod connection;
pub mod constants;
pub mod device_engine;
pub mod error;
pub mod firmware;
pub mod logging;
pub mod packet;
pub mod results;
pub mod session;
pub mod stats;
pub mod util;

pub use crate::error::{
    BuildError, CommandError, ConfigError, DecodeError, EngineError, ErrorKind, ProtocolError,
};
pub use crate::logging::{init_logger, log_error, log_info, log_warn};

pub use command::{ChannelSink, CommandOutcome, CommandSink, DeviceCommand, MockCommandSink};
pub use config::EngineConfig;
pub use connection::{spawn_engine, EngineHandle};
pub use device_engine::{DeviceEngine, TestOutcome};
pub use firmware::{FirmwareProgress, FirmwareUpdateState};
pub use packet::{decode, encode, PacketTag, RawPacket};
pub use results::{QualityAssessment, TestResult};
pub use session::{AtsStandard, PeripheralType, SessionState, SessionStateSnapshot, TestType};
pub use stats::EngineStats;
