//! # Hex Helpers
//!
//! Hex encoding for packet logs and the capture files read by the replay
//! tool. A capture holds one packet per line; `#` starts a comment and
//! blank lines are skipped.
//!
//! ```rust
//! use spirolink_rs::util::hex::{decode_capture_line, encode_hex};
//!
//! let bytes = decode_capture_line("00 00 00 00  # device on").unwrap();
//! assert_eq!(bytes, Some(vec![0x00, 0x00, 0x00, 0x00]));
//! assert_eq!(encode_hex(&[0xD3, 0x00]), "d300");
//! ```

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Decodes hex, ignoring whitespace and an optional `0x` prefix.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    let trimmed = hex_str.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let cleaned: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.is_empty() {
        return Err(HexError::EmptyString);
    }
    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }
    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// "d3 00 00 d3" style formatting for logs.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decodes one capture line. Comment-only and blank lines yield `None`.
pub fn decode_capture_line(line: &str) -> Result<Option<Vec<u8>>, HexError> {
    let content = match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    };
    if content.trim().is_empty() {
        return Ok(None);
    }
    decode_hex(content).map(Some)
}
