//! # Test Session State Machine
//!
//! Drives one test from arming to result:
//!
//! ```text
//! Idle -> Armed(test) -> Collecting -> Finalizing -> Complete
//!            \______________\______________\-------> Aborted(reason)
//! ```
//!
//! The machine never blocks and never reads the clock itself; callers pass
//! the current [`Instant`] and poll [`TestSessionMachine::poll_timeout`] when
//! [`TestSessionMachine::next_deadline`] is due. Every transition that ends a
//! session is reported as a [`SessionEvent`].

use crate::config::EngineConfig;
use crate::error::{BuildError, EngineError, ErrorKind, ProtocolError};
use crate::packet::codec::RawPacket;
use crate::packet::payload::{parse_body, OximetryRealtime, PacketBody};
use crate::packet::tag::PacketTag;
use crate::results::builder::build;
use crate::results::model::TestResult;
use crate::session::curve::*;
use crate::session::types::*;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Accumulated state of one live test.
#[derive(Debug)]
pub struct Session {
    test_type: TestType,
    ats_standard: AtsStandard,
    device_type: PeripheralType,
    fields: FieldMap,
    curve: CurveReassembler,
    last_parts: HashMap<ContinuationGroup, u8>,
    checksum_failures: u32,
    last_activity: Instant,
}

impl Session {
    pub fn new(
        test_type: TestType,
        device_type: PeripheralType,
        max_curve_samples: usize,
        now: Instant,
    ) -> Self {
        Session {
            test_type,
            ats_standard: AtsStandard::Unset,
            device_type,
            fields: FieldMap::new(),
            curve: CurveReassembler::new(max_curve_samples),
            last_parts: HashMap::new(),
            checksum_failures: 0,
            last_activity: now,
        }
    }

    pub fn test_type(&self) -> TestType {
        self.test_type
    }

    pub fn ats_standard(&self) -> AtsStandard {
        self.ats_standard
    }

    pub fn device_type(&self) -> PeripheralType {
        self.device_type
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn field(&self, id: FieldId) -> Option<Scalar> {
        self.fields.get(&id).copied()
    }

    /// Stores a scalar; the ATS standard field also updates the session's
    /// quality ruleset.
    pub fn set_field(&mut self, id: FieldId, value: Scalar) {
        if id == FieldId::AtsStandard {
            self.ats_standard = AtsStandard::from_wire(value as i8);
        }
        self.fields.insert(id, value);
    }

    pub fn append_samples(&mut self, batch: &SampleBatch) -> Result<usize, CurveError> {
        self.curve.append(batch)
    }

    pub fn curve(&self) -> &CurveReassembler {
        &self.curve
    }

    pub fn into_curves(self) -> FinalizedCurves {
        self.curve.finalize()
    }

    /// Validates the order of a continuation part and records it.
    fn accept_part(&mut self, group: ContinuationGroup, part: u8) -> Result<(), String> {
        let expected = self.last_parts.get(&group).map_or(1, |last| last + 1);
        if part != expected {
            return Err(format!("part {part} of {group:?}, expected part {expected}"));
        }
        if part > group.part_count() {
            return Err(format!("{group:?} has only {} parts", group.part_count()));
        }
        self.last_parts.insert(group, part);
        Ok(())
    }

    /// Fails unless every part of the test's result group was received.
    fn check_parts(&self) -> Result<(), BuildError> {
        let Some(group) = ContinuationGroup::for_test(self.test_type) else {
            return Ok(());
        };
        let received = self.last_parts.get(&group).copied().unwrap_or(0);
        if received < group.part_count() {
            return Err(BuildError::MissingParts {
                group,
                received,
                expected: group.part_count(),
            });
        }
        Ok(())
    }
}

/// One sample or live value, published as it arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    FlowVolume(FlowVolumePoint),
    VolumeTime(VolumeTimePoint),
    Oximetry(OximetrySample),
    HighResFlow { index: usize, flow_ls: f32 },
    OximetryLive(OximetryRealtime),
}

/// Observable effects of feeding the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Realtime(RealtimeEvent),
    Completed(TestResult),
    Aborted { test_type: TestType, reason: ErrorKind },
}

/// Owns at most one [`Session`] and enforces the packet order of a test.
#[derive(Debug)]
pub struct TestSessionMachine {
    state: SessionState,
    session: Option<Session>,
    last_test: TestType,
    device_type: PeripheralType,
    end_of_test_timeout: Duration,
    max_curve_samples: usize,
    max_checksum_failures: u32,
}

impl TestSessionMachine {
    pub fn new(config: &EngineConfig) -> Self {
        TestSessionMachine {
            state: SessionState::Idle,
            session: None,
            last_test: TestType::None,
            device_type: config.peripheral_type,
            end_of_test_timeout: config.end_of_test_timeout,
            max_curve_samples: config.max_curve_samples,
            max_checksum_failures: config.max_checksum_failures,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    /// Test type used to resolve shared wire codes.
    pub fn context(&self) -> TestType {
        match &self.session {
            Some(session) => session.test_type,
            None => TestType::None,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Starts a new session. Firmware exclusivity is checked by the caller.
    pub fn arm(&mut self, test_type: TestType, now: Instant) -> Result<(), EngineError> {
        if !test_type.is_supported() {
            return Err(EngineError::TestNotSupported(test_type));
        }
        if self.state.is_live() {
            return Err(EngineError::SessionActive(self.last_test));
        }

        self.session = Some(Session::new(
            test_type,
            self.device_type,
            self.max_curve_samples,
            now,
        ));
        self.last_test = test_type;
        self.state = SessionState::Armed(test_type);
        log::info!("Armed {test_type:?} session");
        Ok(())
    }

    /// Feeds one decoded packet.
    pub fn on_packet(&mut self, packet: &RawPacket, now: Instant) -> Vec<SessionEvent> {
        let tag = packet.tag();
        let Some(session) = self.session.as_mut() else {
            log::debug!("Ignoring {tag:?} in state {:?}", self.state);
            return Vec::new();
        };
        let test_type = session.test_type;

        if !tag.belongs_to(test_type) {
            if matches!(self.state, SessionState::Armed(_)) || tag.owning_test().is_none() {
                log::debug!("Ignoring {tag:?} while {test_type:?} session is {:?}", self.state);
                return Vec::new();
            }
            return self.abort_with(ProtocolError::UnexpectedTagForState { tag, test_type });
        }

        // setup echoes are stored but leave an armed session waiting
        let armed = matches!(self.state, SessionState::Armed(_));
        if !(armed && tag.is_session_setup()) {
            session.last_activity = now;
            if armed {
                log::debug!("{test_type:?} session collecting");
                self.state = SessionState::Collecting;
            }
        }

        let body = match parse_body(packet) {
            Ok(body) => body,
            Err(err) => return self.abort_with(err),
        };

        if let Some((group, part)) = tag.continuation() {
            if let Err(detail) = session.accept_part(group, part) {
                return self.abort_with(ProtocolError::OutOfOrderPacket { tag, detail });
            }
        }

        match body {
            PacketBody::FlowVolume(points) => self.append(tag, SampleBatch::FlowVolume(points)),
            PacketBody::VolumeTime(points) => self.append(tag, SampleBatch::VolumeTime(points)),
            PacketBody::OximetryCurve(samples) => self.append(tag, SampleBatch::Oximetry(samples)),
            PacketBody::HighResFlows {
                start_index,
                flows_ls,
            } => self.append(
                tag,
                SampleBatch::HighResFlow {
                    start_index,
                    flows_ls,
                },
            ),
            PacketBody::OximetryRealtime(live) => {
                vec![SessionEvent::Realtime(RealtimeEvent::OximetryLive(live))]
            }
            PacketBody::HighResHeader { expected_samples } => {
                session.curve.set_expected_high_res(expected_samples);
                session.set_field(FieldId::HighResExpectedSamples, expected_samples as Scalar);
                Vec::new()
            }
            PacketBody::Fields(fields) => {
                for (id, value) in fields {
                    session.set_field(id, value);
                }
                Vec::new()
            }
            PacketBody::Terminal { declared_samples } => {
                if let Some(declared) = declared_samples {
                    session.set_field(FieldId::DeclaredSampleCount, declared as Scalar);
                }
                self.finalize()
            }
            other => {
                log::debug!("No session handling for {tag:?}: {other:?}");
                Vec::new()
            }
        }
    }

    /// Counts a checksum failure against the live session.
    pub fn on_checksum_failure(&mut self) -> Vec<SessionEvent> {
        let limit = self.max_checksum_failures;
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        session.checksum_failures += 1;
        if session.checksum_failures > limit {
            log::warn!(
                "{} checksum failures during {:?} session",
                session.checksum_failures,
                session.test_type
            );
            return self.abort(ErrorKind::ChecksumFailures);
        }
        Vec::new()
    }

    /// Aborts the live session. Does nothing when no session is live.
    pub fn abort(&mut self, reason: ErrorKind) -> Vec<SessionEvent> {
        let Some(session) = self.session.take() else {
            return Vec::new();
        };
        log::warn!("{:?} session aborted: {reason}", session.test_type);
        self.state = SessionState::Aborted(reason.clone());
        vec![SessionEvent::Aborted {
            test_type: session.test_type,
            reason,
        }]
    }

    /// Inactivity deadline of a collecting session.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (&self.state, &self.session) {
            (SessionState::Collecting, Some(session)) => {
                Some(session.last_activity + self.end_of_test_timeout)
            }
            _ => None,
        }
    }

    pub fn poll_timeout(&mut self, now: Instant) -> Vec<SessionEvent> {
        match self.next_deadline() {
            Some(deadline) if now >= deadline => self.abort(ErrorKind::Timeout),
            _ => Vec::new(),
        }
    }

    pub fn snapshot(&self) -> SessionStateSnapshot {
        let (ats_standard, fields_populated, counts) = match &self.session {
            Some(s) => (
                s.ats_standard,
                s.fields.len(),
                [
                    s.curve.len(SampleKind::FlowVolume),
                    s.curve.len(SampleKind::VolumeTime),
                    s.curve.len(SampleKind::Oximetry),
                    s.curve.len(SampleKind::HighResFlow),
                ],
            ),
            None => (AtsStandard::Unset, 0, [0; 4]),
        };
        SessionStateSnapshot {
            state: self.state.clone(),
            test_type: self.last_test,
            ats_standard,
            device_type: self.device_type,
            fields_populated,
            flow_volume_samples: counts[0],
            volume_time_samples: counts[1],
            oximetry_samples: counts[2],
            high_res_samples: counts[3],
        }
    }

    fn append(&mut self, tag: PacketTag, batch: SampleBatch) -> Vec<SessionEvent> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let first_high_res = session.curve.len(SampleKind::HighResFlow);
        let stored = match session.append_samples(&batch) {
            Ok(stored) => stored,
            Err(err) => {
                return self.abort_with(ProtocolError::OutOfOrderPacket {
                    tag,
                    detail: err.to_string(),
                })
            }
        };

        match batch {
            SampleBatch::FlowVolume(points) => points[..stored]
                .iter()
                .map(|p| SessionEvent::Realtime(RealtimeEvent::FlowVolume(*p)))
                .collect(),
            SampleBatch::VolumeTime(points) => points[..stored]
                .iter()
                .map(|p| SessionEvent::Realtime(RealtimeEvent::VolumeTime(*p)))
                .collect(),
            SampleBatch::Oximetry(samples) => samples[..stored]
                .iter()
                .map(|s| SessionEvent::Realtime(RealtimeEvent::Oximetry(*s)))
                .collect(),
            SampleBatch::HighResFlow { flows_ls, .. } => flows_ls[..stored]
                .iter()
                .enumerate()
                .map(|(i, flow)| {
                    SessionEvent::Realtime(RealtimeEvent::HighResFlow {
                        index: first_high_res + i,
                        flow_ls: *flow,
                    })
                })
                .collect(),
        }
    }

    fn finalize(&mut self) -> Vec<SessionEvent> {
        let Some(session) = self.session.take() else {
            return Vec::new();
        };
        let test_type = session.test_type;
        self.state = SessionState::Finalizing;

        if let Err(err) = session.check_parts() {
            log::warn!("{test_type:?} session aborted: {err}");
            let reason = ErrorKind::IncompleteResult(err);
            self.state = SessionState::Aborted(reason.clone());
            return vec![SessionEvent::Aborted { test_type, reason }];
        }

        if let Some(declared) = session.field(FieldId::DeclaredSampleCount) {
            let primary = match test_type {
                TestType::Oximetry => SampleKind::Oximetry,
                TestType::Vc | TestType::Mvv => SampleKind::VolumeTime,
                _ => SampleKind::FlowVolume,
            };
            let received = session.curve.len(primary);
            if declared as usize != received {
                log::warn!(
                    "{test_type:?} terminal declared {declared} samples, received {received}"
                );
            }
        }

        match build(session) {
            Ok(result) => {
                log::info!("{test_type:?} session complete");
                self.state = SessionState::Complete;
                vec![SessionEvent::Completed(result)]
            }
            Err(err) => {
                log::warn!("{test_type:?} session aborted: {err}");
                let reason = ErrorKind::IncompleteResult(err);
                self.state = SessionState::Aborted(reason.clone());
                vec![SessionEvent::Aborted { test_type, reason }]
            }
        }
    }

    fn abort_with(&mut self, err: ProtocolError) -> Vec<SessionEvent> {
        log::warn!("Protocol error: {err}");
        self.abort(ErrorKind::from(&err))
    }
}
