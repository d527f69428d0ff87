//! # Utility Modules
//!
//! Hex helpers for captures and logs, and throttled packet logging.

pub mod hex;
pub mod logging;

pub use hex::{decode_capture_line, decode_hex, encode_hex, format_hex_compact, HexError};
pub use logging::{log_packet_hex, LogThrottle};
