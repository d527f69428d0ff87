//! # Error Handling
//!
//! This module defines the error taxonomy of the telemetry engine. Decode
//! errors drop a single packet, protocol and build errors end the current
//! session, command errors are reported to the command issuer. None of them
//! is fatal to the engine.

use crate::packet::tag::PacketTag;
use crate::session::curve::SampleKind;
use crate::session::types::{ContinuationGroup, FieldId, TestType};
use thiserror::Error;

/// Errors produced while decoding a single packet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer is shorter than the frame it announces.
    #[error("Truncated packet: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The buffer holds more bytes than the announced frame.
    #[error("Length mismatch: frame is {declared} bytes, buffer holds {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// The trailing checksum does not match the frame contents.
    #[error("Invalid checksum: expected 0x{expected:02X}, calculated 0x{calculated:02X}")]
    ChecksumMismatch { expected: u8, calculated: u8 },

    /// The tag byte is not part of the protocol in the current context.
    #[error("Unknown packet tag: 0x{0:02X}")]
    UnknownTag(u8),
}

/// Protocol violations detected while a session or update is running.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Out of order packet {tag:?}: {detail}")]
    OutOfOrderPacket { tag: PacketTag, detail: String },

    #[error("Unexpected packet {tag:?} during {test_type:?} test")]
    UnexpectedTagForState { tag: PacketTag, test_type: TestType },

    #[error("Malformed payload for {tag:?}: {reason}")]
    MalformedPayload { tag: PacketTag, reason: String },
}

/// Errors raised when a completed session cannot be turned into a result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Missing field: {0:?}")]
    MissingField(FieldId),

    #[error("Empty curve: {0:?}")]
    EmptyCurve(SampleKind),

    #[error("No result layout for {0:?}")]
    UnsupportedTest(TestType),

    #[error("Missing parts: {received} of {expected} {group:?} parts received")]
    MissingParts {
        group: ContinuationGroup,
        received: u8,
        expected: u8,
    },
}

/// Errors reported to the issuer of a device command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// A command is already waiting for its response.
    #[error("Command busy: {pending:?} is still awaiting a response")]
    CommandBusy { pending: PacketTag },

    /// No matching response arrived before the deadline.
    #[error("Request timed out waiting for response to {command:?}")]
    TimedOut { command: PacketTag },

    /// The outbound sink refused the command bytes.
    #[error("Command sink error: {0}")]
    Sink(String),

    /// The connection driver stopped before the command completed.
    #[error("Connection closed")]
    Disconnected,
}

/// Errors returned by the upward engine API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A test session and a firmware update cannot run at the same time.
    #[error("Device busy")]
    DeviceBusy,

    #[error("Test not supported: {0:?}")]
    TestNotSupported(TestType),

    #[error("A {0:?} session is already active")]
    SessionActive(TestType),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Errors loading an [`crate::config::EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Why a session ended in the `Aborted` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    OutOfOrderPacket,
    UnexpectedTagForState,
    MalformedPayload,
    IncompleteResult(BuildError),
    ChecksumFailures,
    Timeout,
    AbortRequested,
}

impl From<&ProtocolError> for ErrorKind {
    fn from(err: &ProtocolError) -> Self {
        match err {
            ProtocolError::OutOfOrderPacket { .. } => ErrorKind::OutOfOrderPacket,
            ProtocolError::UnexpectedTagForState { .. } => ErrorKind::UnexpectedTagForState,
            ProtocolError::MalformedPayload { .. } => ErrorKind::MalformedPayload,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::OutOfOrderPacket => write!(f, "out of order packet"),
            ErrorKind::UnexpectedTagForState => write!(f, "unexpected packet for state"),
            ErrorKind::MalformedPayload => write!(f, "malformed payload"),
            ErrorKind::IncompleteResult(err) => write!(f, "incomplete result ({err})"),
            ErrorKind::ChecksumFailures => write!(f, "too many checksum failures"),
            ErrorKind::Timeout => write!(f, "end of test timeout"),
            ErrorKind::AbortRequested => write!(f, "aborted by operator"),
        }
    }
}
