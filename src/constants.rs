//! Spirometer Protocol Constants
//!
//! Wire codes and framing constants for the spirometry/oximetry peripheral
//! protocol. Tag codes follow the vendor SDK raw packet type table; several
//! codes are shared between unrelated packets and are only meaningful together
//! with the armed test type (see [`crate::packet::tag::resolve_tag`]).

// ----------------------------------------------------------------------------
// Framing
// ----------------------------------------------------------------------------

/// Size of the tag byte
pub const PACKET_TAG_SIZE: usize = 1;

/// Size of the little-endian payload length field
pub const PACKET_LENGTH_SIZE: usize = 2;

/// Size of the trailing checksum byte
pub const PACKET_CHECKSUM_SIZE: usize = 1;

/// Header (tag + length) size
pub const PACKET_HEADER_SIZE: usize = PACKET_TAG_SIZE + PACKET_LENGTH_SIZE;

/// Smallest valid packet: header plus checksum, empty payload
pub const PACKET_MIN_SIZE: usize = PACKET_HEADER_SIZE + PACKET_CHECKSUM_SIZE;

// ----------------------------------------------------------------------------
// Raw packet type codes
// ----------------------------------------------------------------------------

pub const COD_ON: u8 = 0x00;
pub const COD_VC: u8 = 0x02;
pub const COD_MVV: u8 = 0x04;
pub const COD_FVC: u8 = 0x08;
pub const COD_OXY: u8 = 0x20;

pub const COD_FVC_LAST_RT_2_P1: u8 = 0x31;
pub const COD_FVC_LAST_RT_2_P2: u8 = 0x32;
pub const COD_FVC_LAST_RT_2_P3: u8 = 0x33;
pub const COD_FVC_LAST_RT_2_P4: u8 = 0x34;
pub const COD_FVC_LAST_RT_2_P5: u8 = 0x35;
pub const COD_FVC_LAST_RT_2_P6: u8 = 0x36;

pub const COD_TEMPERATURE: u8 = 0x50;
/// Oximetry base results while an oximetry test is armed, battery level otherwise
pub const COD_OXY_RESULTS_BASE: u8 = 0x51;
pub const COD_BATTERY: u8 = 0x51;
pub const COD_OXY_RESULTS_BASE2: u8 = 0x52;

pub const COD_TX_CALIBRATION: u8 = 0x85;
pub const COD_CALIBRATION: u8 = 0x86;

pub const COD_VC_LAST_RT_P1: u8 = 0x91;
pub const COD_VC_LAST_RT_P2: u8 = 0x92;
pub const COD_VC_LAST_RT_P3: u8 = 0x93;
pub const COD_MVV_LAST_RT_P1: u8 = 0x94;

pub const COD_FVC_LAST_RT: u8 = 0xA2;
pub const COD_OXY_RESULTS: u8 = 0xD0;
pub const COD_INFO_FVC_LAST_RT_1: u8 = 0xD1;
/// Volume-time curve while a forced spirometry test is armed, erase echo otherwise
pub const COD_SPIRO_LAST_RT_VT: u8 = 0xD3;
pub const COD_ERASE: u8 = 0xD3;
pub const COD_TX_SETTING_DATE: u8 = 0xD6;
pub const COD_CURVE_10MS: u8 = 0xD8;
pub const COD_CURVE_10MS_FLOWS: u8 = 0xD9;

pub const COD_FW_UPDATE_PROGRESS: u8 = 0xE0;
pub const COD_FW_UPDATE_COMPLETE: u8 = 0xE1;
pub const COD_FW_UPDATE_ERROR: u8 = 0xE2;

pub const COD_VC_LAST_RT: u8 = 0xF2;
/// Oximetry stored curve while an oximetry test is armed, MVV terminal otherwise
pub const COD_OXY_RESULTS_CURVE: u8 = 0xF3;
pub const COD_MVV_LAST_RT: u8 = 0xF3;

// ----------------------------------------------------------------------------
// Payload record sizes
// ----------------------------------------------------------------------------

/// volume i16 + flow i16 + time u16
pub const FLOW_VOLUME_RECORD_SIZE: usize = 6;

/// volume i16 + time u16
pub const VOLUME_TIME_RECORD_SIZE: usize = 4;

/// spo2 u8 + bpm u8
pub const OXIMETRY_RECORD_SIZE: usize = 2;

/// Interval between two high resolution flow samples
pub const HIGH_RES_SAMPLE_INTERVAL_MS: u32 = 10;

// ----------------------------------------------------------------------------
// Realtime oximetry flags
// ----------------------------------------------------------------------------

pub const OXY_FLAG_FINGER_ON: u8 = 0x01;
pub const OXY_FLAG_SEARCHING_PULSE: u8 = 0x02;
pub const OXY_FLAG_DATA_VALID: u8 = 0x04;
pub const OXY_FLAG_BATTERY_LOW: u8 = 0x08;

// ----------------------------------------------------------------------------
// Defaults
// ----------------------------------------------------------------------------

/// Default command response deadline in milliseconds
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 3_000;

/// Default end-of-test inactivity timeout in milliseconds
pub const DEFAULT_END_OF_TEST_TIMEOUT_MS: u64 = 15_000;

/// Default firmware progress watchdog in milliseconds
pub const DEFAULT_FIRMWARE_PROGRESS_TIMEOUT_MS: u64 = 30_000;

/// Default per-stream curve sample cap
pub const DEFAULT_MAX_CURVE_SAMPLES: usize = 4_096;

/// Default number of checksum failures tolerated during one session
pub const DEFAULT_MAX_CHECKSUM_FAILURES: u32 = 3;
