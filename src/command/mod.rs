//! Device commands, response correlation and the outbound sink.

pub mod commands;
pub mod correlator;
pub mod sink;

pub use commands::{CheckState, CommandOutcome, DeviceCommand, ResponseType};
pub use correlator::{CommandCorrelator, CorrelationOutcome, PendingCommand};
pub use sink::{ChannelSink, CommandSink, MockCommandSink};
