//! Test session reassembly: state machine, curve streams and shared types.

pub mod curve;
pub mod machine;
pub mod types;

pub use curve::{CurveReassembler, FinalizedCurves, SampleBatch, SampleKind};
pub use machine::{RealtimeEvent, Session, SessionEvent, TestSessionMachine};
pub use types::{AtsStandard, FieldId, PeripheralType, SessionState, SessionStateSnapshot, TestType};
