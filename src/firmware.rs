//! # Firmware Update Tracking
//!
//! Follows the progress of a firmware update the peripheral is performing.
//! The image transfer itself belongs to the transport; the engine only
//! watches the progress packets and guards against a stalled update.

use crate::error::EngineError;
use crate::packet::codec::RawPacket;
use crate::packet::payload::{parse_body, PacketBody};
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FirmwareFailure {
    /// No progress packet within the watchdog period.
    Stalled,
    /// The device reported an error code.
    Device(u8),
    Aborted,
}

impl std::fmt::Display for FirmwareFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FirmwareFailure::Stalled => write!(f, "no progress from device"),
            FirmwareFailure::Device(code) => write!(f, "device error 0x{code:02X}"),
            FirmwareFailure::Aborted => write!(f, "update aborted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FirmwareUpdateState {
    Idle,
    InProgress { progress: u8 },
    Complete,
    Error(FirmwareFailure),
}

/// Progress notification, shaped like the vendor progress callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirmwareProgress {
    pub progress: u8,
    pub status: FirmwareUpdateState,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct FirmwareUpdateMachine {
    state: FirmwareUpdateState,
    percent: u8,
    last_progress_at: Option<Instant>,
    progress_timeout: Duration,
}

impl FirmwareUpdateMachine {
    pub fn new(progress_timeout: Duration) -> Self {
        FirmwareUpdateMachine {
            state: FirmwareUpdateState::Idle,
            percent: 0,
            last_progress_at: None,
            progress_timeout,
        }
    }

    pub fn state(&self) -> FirmwareUpdateState {
        self.state
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self.state, FirmwareUpdateState::InProgress { .. })
    }

    /// Starts tracking an update. Session exclusivity is checked by the caller.
    pub fn begin(&mut self, now: Instant) -> Result<FirmwareProgress, EngineError> {
        if self.is_in_progress() {
            return Err(EngineError::DeviceBusy);
        }
        log::info!("Firmware update started");
        self.state = FirmwareUpdateState::InProgress { progress: 0 };
        self.percent = 0;
        self.last_progress_at = Some(now);
        Ok(self.progress())
    }

    /// Feeds a packet. Returns a notification when the update state changed.
    pub fn on_packet(&mut self, packet: &RawPacket, now: Instant) -> Option<FirmwareProgress> {
        let tag = packet.tag();
        if !self.is_in_progress() {
            if tag.is_firmware() {
                log::debug!("Ignoring {tag:?}, no firmware update in progress");
            }
            return None;
        }
        if !tag.is_firmware() {
            log::debug!("Ignoring {tag:?} during firmware update");
            return None;
        }

        match parse_body(packet) {
            Ok(PacketBody::FirmwareProgress(percent)) => {
                let progress = percent.min(100);
                log::debug!("Firmware update at {progress}%");
                self.state = FirmwareUpdateState::InProgress { progress };
                self.percent = progress;
                self.last_progress_at = Some(now);
            }
            Ok(PacketBody::FirmwareComplete) => {
                log::info!("Firmware update complete");
                self.state = FirmwareUpdateState::Complete;
                self.percent = 100;
                self.last_progress_at = None;
            }
            Ok(PacketBody::FirmwareError(code)) => {
                self.fail(FirmwareFailure::Device(code));
            }
            Ok(other) => {
                log::debug!("Unexpected firmware body {other:?}");
                return None;
            }
            Err(err) => {
                log::warn!("Dropping firmware packet: {err}");
                return None;
            }
        }
        Some(self.progress())
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            FirmwareUpdateState::InProgress { .. } => {
                self.last_progress_at.map(|at| at + self.progress_timeout)
            }
            _ => None,
        }
    }

    pub fn poll_timeout(&mut self, now: Instant) -> Option<FirmwareProgress> {
        match self.next_deadline() {
            Some(deadline) if now >= deadline => {
                self.fail(FirmwareFailure::Stalled);
                Some(self.progress())
            }
            _ => None,
        }
    }

    /// Aborts a running update. Does nothing otherwise.
    pub fn abort(&mut self) -> Option<FirmwareProgress> {
        if !self.is_in_progress() {
            return None;
        }
        self.fail(FirmwareFailure::Aborted);
        Some(self.progress())
    }

    /// Current progress as a notification.
    pub fn progress(&self) -> FirmwareProgress {
        let error = match self.state {
            FirmwareUpdateState::Error(failure) => Some(failure.to_string()),
            _ => None,
        };
        FirmwareProgress {
            progress: self.percent,
            status: self.state,
            error,
        }
    }

    fn fail(&mut self, failure: FirmwareFailure) {
        log::warn!("Firmware update failed at {}%: {failure}", self.percent);
        self.state = FirmwareUpdateState::Error(failure);
        self.last_progress_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::tag::PacketTag;

    fn machine() -> FirmwareUpdateMachine {
        FirmwareUpdateMachine::new(Duration::from_secs(30))
    }

    #[test]
    fn test_progress_then_complete() {
        let mut fw = machine();
        let now = Instant::now();
        fw.begin(now).unwrap();
        let update = fw
            .on_packet(&RawPacket::new(PacketTag::FirmwareProgress, vec![40]), now)
            .unwrap();
        assert_eq!(update.progress, 40);
        assert_eq!(update.status, FirmwareUpdateState::InProgress { progress: 40 });

        let done = fw
            .on_packet(&RawPacket::new(PacketTag::FirmwareComplete, Vec::new()), now)
            .unwrap();
        assert_eq!(done.status, FirmwareUpdateState::Complete);
        assert_eq!(done.progress, 100);
    }

    #[test]
    fn test_begin_twice_is_busy() {
        let mut fw = machine();
        fw.begin(Instant::now()).unwrap();
        assert_eq!(fw.begin(Instant::now()), Err(EngineError::DeviceBusy));
    }

    #[test]
    fn test_other_tags_ignored() {
        let mut fw = machine();
        let now = Instant::now();
        fw.begin(now).unwrap();
        assert!(fw
            .on_packet(&RawPacket::new(PacketTag::Battery, vec![50]), now)
            .is_none());
        assert!(fw.is_in_progress());
    }

    #[test]
    fn test_watchdog() {
        let mut fw = machine();
        let start = Instant::now();
        fw.begin(start).unwrap();
        fw.on_packet(
            &RawPacket::new(PacketTag::FirmwareProgress, vec![10]),
            start + Duration::from_secs(20),
        );
        assert!(fw.poll_timeout(start + Duration::from_secs(31)).is_none());

        let stalled = fw.poll_timeout(start + Duration::from_secs(50)).unwrap();
        assert_eq!(stalled.status, FirmwareUpdateState::Error(FirmwareFailure::Stalled));
        assert_eq!(stalled.progress, 10);
        assert!(stalled.error.is_some());
        assert!(fw.poll_timeout(start + Duration::from_secs(90)).is_none());
    }

    #[test]
    fn test_device_error_and_abort() {
        let mut fw = machine();
        let now = Instant::now();
        fw.begin(now).unwrap();
        let failed = fw
            .on_packet(&RawPacket::new(PacketTag::FirmwareError, vec![0x07]), now)
            .unwrap();
        assert_eq!(failed.status, FirmwareUpdateState::Error(FirmwareFailure::Device(7)));
        assert!(fw.abort().is_none());

        fw.begin(now).unwrap();
        assert!(fw.abort().is_some());
        assert!(fw.abort().is_none());
        assert_eq!(fw.state(), FirmwareUpdateState::Error(FirmwareFailure::Aborted));
    }
}
