//! # Command Correlator
//!
//! Pairs outgoing commands with their responses. The peripheral handles one
//! request at a time, so at most one command is pending; a second one is
//! refused with [`CommandError::CommandBusy`] rather than queued.
//!
//! ```rust
//! use spirolink_rs::command::correlator::{CommandCorrelator, CorrelationOutcome};
//! use spirolink_rs::packet::{PacketTag, RawPacket};
//! use std::time::{Duration, Instant};
//!
//! let mut correlator = CommandCorrelator::new();
//! let now = Instant::now();
//! correlator
//!     .register(PacketTag::Erase, &[PacketTag::Erase], Duration::from_secs(3), now)
//!     .unwrap();
//!
//! let echo = RawPacket::new(PacketTag::Erase, Vec::new());
//! assert!(matches!(correlator.on_packet(&echo), CorrelationOutcome::Matched(_)));
//! assert!(correlator.pending().is_none());
//! ```

use crate::error::CommandError;
use crate::packet::codec::RawPacket;
use crate::packet::tag::PacketTag;
use std::time::{Duration, Instant};

/// The command awaiting its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub command_tag: PacketTag,
    pub expected_response_tags: Vec<PacketTag>,
    pub issued_at: Instant,
    pub deadline: Instant,
}

impl PendingCommand {
    pub fn expects(&self, tag: PacketTag) -> bool {
        self.expected_response_tags.contains(&tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationOutcome {
    /// The packet answered the pending command, which is now cleared.
    Matched(PendingCommand),
    Unmatched,
}

#[derive(Debug, Default)]
pub struct CommandCorrelator {
    pending: Option<PendingCommand>,
}

impl CommandCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    /// Registers a command. Fails without touching the pending command if
    /// one is already outstanding.
    pub fn register(
        &mut self,
        command_tag: PacketTag,
        expected_response_tags: &[PacketTag],
        timeout: Duration,
        now: Instant,
    ) -> Result<&PendingCommand, CommandError> {
        if let Some(pending) = &self.pending {
            return Err(CommandError::CommandBusy {
                pending: pending.command_tag,
            });
        }
        log::debug!("Awaiting {expected_response_tags:?} for {command_tag:?} within {timeout:?}");
        Ok(self.pending.insert(PendingCommand {
            command_tag,
            expected_response_tags: expected_response_tags.to_vec(),
            issued_at: now,
            deadline: now + timeout,
        }))
    }

    pub fn on_packet(&mut self, packet: &RawPacket) -> CorrelationOutcome {
        match self.pending.take() {
            Some(pending) if pending.expects(packet.tag()) => {
                log::debug!("{:?} answered by {:?}", pending.command_tag, packet.tag());
                CorrelationOutcome::Matched(pending)
            }
            other => {
                self.pending = other;
                CorrelationOutcome::Unmatched
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Returns the pending command if its deadline has passed. A command
    /// times out exactly once.
    pub fn poll_timeout(&mut self, now: Instant) -> Option<PendingCommand> {
        match self.pending.take() {
            Some(pending) if now >= pending.deadline => {
                log::warn!("{:?} timed out without a response", pending.command_tag);
                Some(pending)
            }
            other => {
                self.pending = other;
                None
            }
        }
    }

    /// Drops the pending command, e.g. after a failed write.
    pub fn cancel(&mut self) -> Option<PendingCommand> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmatched_keeps_pending() {
        let mut correlator = CommandCorrelator::new();
        let now = Instant::now();
        correlator
            .register(PacketTag::On, &[PacketTag::On], Duration::from_secs(1), now)
            .unwrap();
        let battery = RawPacket::new(PacketTag::Battery, vec![80]);
        assert_eq!(correlator.on_packet(&battery), CorrelationOutcome::Unmatched);
        assert!(correlator.pending().is_some());
    }

    #[test]
    fn test_timeout_before_deadline() {
        let mut correlator = CommandCorrelator::new();
        let now = Instant::now();
        correlator
            .register(PacketTag::On, &[PacketTag::On], Duration::from_secs(1), now)
            .unwrap();
        assert!(correlator.poll_timeout(now).is_none());
        assert!(correlator
            .poll_timeout(now + Duration::from_secs(1))
            .is_some());
        assert!(correlator.next_deadline().is_none());
    }

    #[test]
    fn test_no_match_without_pending() {
        let mut correlator = CommandCorrelator::new();
        let on = RawPacket::new(PacketTag::On, Vec::new());
        assert_eq!(correlator.on_packet(&on), CorrelationOutcome::Unmatched);
    }
}
