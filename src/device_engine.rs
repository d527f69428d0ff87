//! # Device Engine
//!
//! The per-connection entry point. A [`DeviceEngine`] owns the packet codec
//! context, the command correlator, the test session machine and the
//! firmware update machine of one peripheral, and publishes what happens to
//! registered subscribers.
//!
//! Every inbound packet goes through [`DeviceEngine::on_packet_bytes`]:
//!
//! 1. it is decoded in the context of the armed test;
//! 2. the correlator gets the first look and may complete the pending command;
//! 3. it is routed by tag to the housekeeping subscribers, the firmware
//!    machine or the session machine.
//!
//! The engine is synchronous and takes no locks. Time-dependent calls have an
//! `_at` variant taking an explicit [`Instant`]; whoever drives the engine
//! calls [`DeviceEngine::poll_timers`] once [`DeviceEngine::next_deadline`]
//! has passed (see [`crate::connection`] for a tokio driver).
//!
//! ```rust
//! use spirolink_rs::command::MockCommandSink;
//! use spirolink_rs::config::EngineConfig;
//! use spirolink_rs::device_engine::DeviceEngine;
//! use spirolink_rs::session::types::{SessionState, TestType};
//!
//! let mut engine = DeviceEngine::new(EngineConfig::default(), MockCommandSink::new());
//! engine.arm_test(TestType::Mvv).unwrap();
//! assert_eq!(engine.current_session_state().state, SessionState::Armed(TestType::Mvv));
//! ```

use crate::command::{
    CommandCorrelator, CommandOutcome, CommandSink, CorrelationOutcome, DeviceCommand,
};
use crate::config::EngineConfig;
use crate::error::{CommandError, DecodeError, EngineError, ErrorKind};
use crate::firmware::{FirmwareProgress, FirmwareUpdateMachine, FirmwareUpdateState};
use crate::log_warn_throttled;
use crate::packet::codec::{decode, RawPacket};
use crate::packet::payload::{parse_body, Housekeeping, PacketBody};
use crate::results::model::TestResult;
use crate::session::machine::{RealtimeEvent, SessionEvent, TestSessionMachine};
use crate::session::types::{SessionStateSnapshot, TestType};
use crate::stats::EngineStats;
use crate::util::logging::{log_packet_hex, LogThrottle};
use std::sync::Arc;
use std::time::Instant;

/// How a test session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TestOutcome {
    Completed(Arc<TestResult>),
    Failed { test_type: TestType, reason: ErrorKind },
}

type Subscribers<T> = Vec<Box<dyn FnMut(&T) + Send>>;

fn notify<T>(subscribers: &mut Subscribers<T>, value: &T) {
    for subscriber in subscribers.iter_mut() {
        subscriber(value);
    }
}

/// Protocol engine for one connected peripheral.
pub struct DeviceEngine<S: CommandSink> {
    config: EngineConfig,
    sink: S,
    correlator: CommandCorrelator,
    session: TestSessionMachine,
    firmware: FirmwareUpdateMachine,
    stats: EngineStats,
    decode_throttle: LogThrottle,
    result_subscribers: Subscribers<TestOutcome>,
    firmware_subscribers: Subscribers<FirmwareProgress>,
    command_subscribers: Subscribers<CommandOutcome>,
    housekeeping_subscribers: Subscribers<Housekeeping>,
    realtime_subscribers: Subscribers<RealtimeEvent>,
}

impl<S: CommandSink> DeviceEngine<S> {
    pub fn new(config: EngineConfig, sink: S) -> Self {
        DeviceEngine {
            session: TestSessionMachine::new(&config),
            firmware: FirmwareUpdateMachine::new(config.firmware_progress_timeout),
            correlator: CommandCorrelator::new(),
            stats: EngineStats::default(),
            decode_throttle: LogThrottle::new(1_000, 5),
            result_subscribers: Vec::new(),
            firmware_subscribers: Vec::new(),
            command_subscribers: Vec::new(),
            housekeeping_subscribers: Vec::new(),
            realtime_subscribers: Vec::new(),
            config,
            sink,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Sole ingestion point for packets delivered by the transport.
    pub fn on_packet_bytes(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        self.on_packet_bytes_at(bytes, Instant::now())
    }

    pub fn on_packet_bytes_at(&mut self, bytes: &[u8], now: Instant) -> Result<(), DecodeError> {
        self.stats.packets_received += 1;
        log_packet_hex("rx", bytes);

        let packet = match decode(bytes, self.session.context()) {
            Ok(packet) => packet,
            Err(err) => {
                self.stats.record_decode_error(&err);
                log_warn_throttled!(self.decode_throttle, "Dropping packet: {err}");
                if matches!(err, DecodeError::ChecksumMismatch { .. }) {
                    let events = self.session.on_checksum_failure();
                    self.dispatch(events);
                }
                return Err(err);
            }
        };
        self.stats.packets_decoded += 1;
        self.on_packet_at(&packet, now);
        Ok(())
    }

    fn on_packet_at(&mut self, packet: &RawPacket, now: Instant) {
        let tag = packet.tag();

        if let CorrelationOutcome::Matched(pending) = self.correlator.on_packet(packet) {
            self.stats.commands_matched += 1;
            let outcome = CommandOutcome::success(pending.command_tag, packet.clone());
            notify(&mut self.command_subscribers, &outcome);
        }

        if tag.is_housekeeping() {
            self.stats.housekeeping_packets += 1;
            match parse_body(packet) {
                Ok(PacketBody::Housekeeping(info)) => {
                    notify(&mut self.housekeeping_subscribers, &info)
                }
                Ok(other) => log::debug!("Unexpected housekeeping body {other:?}"),
                Err(err) => log::warn!("Dropping housekeeping packet: {err}"),
            }
        } else if tag.is_firmware() || self.firmware.is_in_progress() {
            if let Some(progress) = self.firmware.on_packet(packet, now) {
                if matches!(progress.status, FirmwareUpdateState::Error(_)) {
                    self.stats.firmware_updates_failed += 1;
                }
                notify(&mut self.firmware_subscribers, &progress);
            }
        } else if tag.is_command_echo() {
            log::debug!("{tag:?} echo received");
        } else {
            let events = self.session.on_packet(packet, now);
            self.dispatch(events);
        }
    }

    // ------------------------------------------------------------------
    // Test sessions
    // ------------------------------------------------------------------

    pub fn arm_test(&mut self, test_type: TestType) -> Result<(), EngineError> {
        self.arm_test_at(test_type, Instant::now())
    }

    pub fn arm_test_at(&mut self, test_type: TestType, now: Instant) -> Result<(), EngineError> {
        if self.firmware.is_in_progress() {
            log::warn!("Cannot arm {test_type:?}: firmware update in progress");
            return Err(EngineError::DeviceBusy);
        }
        self.session.arm(test_type, now)?;
        self.stats.sessions_armed += 1;
        Ok(())
    }

    /// Aborts the live session, if any.
    pub fn abort_test(&mut self) {
        let events = self.session.abort(ErrorKind::AbortRequested);
        self.dispatch(events);
    }

    pub fn current_session_state(&self) -> SessionStateSnapshot {
        self.session.snapshot()
    }

    // ------------------------------------------------------------------
    // Firmware updates
    // ------------------------------------------------------------------

    pub fn begin_firmware_update(&mut self) -> Result<(), EngineError> {
        self.begin_firmware_update_at(Instant::now())
    }

    pub fn begin_firmware_update_at(&mut self, now: Instant) -> Result<(), EngineError> {
        if self.session.is_live() {
            log::warn!("Cannot start firmware update: test session active");
            return Err(EngineError::DeviceBusy);
        }
        let progress = self.firmware.begin(now)?;
        self.stats.firmware_updates_started += 1;
        notify(&mut self.firmware_subscribers, &progress);
        Ok(())
    }

    pub fn abort_firmware_update(&mut self) {
        if let Some(progress) = self.firmware.abort() {
            self.stats.firmware_updates_failed += 1;
            notify(&mut self.firmware_subscribers, &progress);
        }
    }

    pub fn firmware_state(&self) -> FirmwareUpdateState {
        self.firmware.state()
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Writes a command and starts waiting for its response. Returns the
    /// response deadline.
    pub fn send_command(&mut self, command: &DeviceCommand) -> Result<Instant, EngineError> {
        self.send_command_at(command, Instant::now())
    }

    pub fn send_command_at(
        &mut self,
        command: &DeviceCommand,
        now: Instant,
    ) -> Result<Instant, EngineError> {
        let deadline = self
            .correlator
            .register(
                command.tag(),
                command.expected_responses(),
                self.config.command_timeout,
                now,
            )?
            .deadline;

        let bytes = command.encode();
        if let Err(err) = self.sink.write_command(&bytes) {
            self.correlator.cancel();
            log::warn!("Writing {:?} failed: {err}", command.tag());
            return Err(CommandError::Sink(err.to_string()).into());
        }
        log_packet_hex("tx", &bytes);
        self.stats.commands_sent += 1;
        Ok(deadline)
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Earliest pending deadline of the correlator, session or firmware update.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.correlator.next_deadline(),
            self.session.next_deadline(),
            self.firmware.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Fires every deadline that has passed. Each fires once.
    pub fn poll_timers(&mut self, now: Instant) {
        if let Some(pending) = self.correlator.poll_timeout(now) {
            self.stats.command_timeouts += 1;
            let outcome = CommandOutcome::timed_out(pending.command_tag);
            notify(&mut self.command_subscribers, &outcome);
        }

        let events = self.session.poll_timeout(now);
        self.dispatch(events);

        if let Some(progress) = self.firmware.poll_timeout(now) {
            self.stats.firmware_updates_failed += 1;
            notify(&mut self.firmware_subscribers, &progress);
        }
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    pub fn subscribe_to_results(&mut self, callback: impl FnMut(&TestOutcome) + Send + 'static) {
        self.result_subscribers.push(Box::new(callback));
    }

    pub fn subscribe_to_firmware_progress(
        &mut self,
        callback: impl FnMut(&FirmwareProgress) + Send + 'static,
    ) {
        self.firmware_subscribers.push(Box::new(callback));
    }

    pub fn subscribe_to_command_outcomes(
        &mut self,
        callback: impl FnMut(&CommandOutcome) + Send + 'static,
    ) {
        self.command_subscribers.push(Box::new(callback));
    }

    pub fn subscribe_to_housekeeping(
        &mut self,
        callback: impl FnMut(&Housekeeping) + Send + 'static,
    ) {
        self.housekeeping_subscribers.push(Box::new(callback));
    }

    pub fn subscribe_to_realtime(&mut self, callback: impl FnMut(&RealtimeEvent) + Send + 'static) {
        self.realtime_subscribers.push(Box::new(callback));
    }

    fn dispatch(&mut self, events: Vec<SessionEvent>) {
        for event in events {
            match event {
                SessionEvent::Realtime(sample) => notify(&mut self.realtime_subscribers, &sample),
                SessionEvent::Completed(result) => {
                    self.stats.sessions_completed += 1;
                    let outcome = TestOutcome::Completed(Arc::new(result));
                    notify(&mut self.result_subscribers, &outcome);
                }
                SessionEvent::Aborted { test_type, reason } => {
                    self.stats.sessions_aborted += 1;
                    let outcome = TestOutcome::Failed { test_type, reason };
                    notify(&mut self.result_subscribers, &outcome);
                }
            }
        }
    }
}

impl<S: CommandSink> std::fmt::Debug for DeviceEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEngine")
            .field("session", &self.session.state())
            .field("firmware", &self.firmware.state())
            .field("pending_command", &self.correlator.pending())
            .field("stats", &self.stats)
            .finish()
    }
}
