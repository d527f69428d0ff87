//! Device commands and the outcome reported to their issuer.

use crate::constants::*;
use crate::packet::codec::{encode, RawPacket};
use crate::packet::tag::PacketTag;
use bytes::BytesMut;
use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Serialize;

/// Commands the engine can send to the peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Asks the device to announce itself with an `ON` packet.
    CheckReady,
    /// Writes flow sensor corrections, in tenths of a percent.
    TxCalibration { expiratory: i16, inspiratory: i16 },
    /// Sets the device clock.
    TxSettingDate(NaiveDateTime),
    /// Erases the stored tests.
    Erase,
}

impl DeviceCommand {
    pub fn tag(&self) -> PacketTag {
        match self {
            DeviceCommand::CheckReady => PacketTag::On,
            DeviceCommand::TxCalibration { .. } => PacketTag::TxCalibration,
            DeviceCommand::TxSettingDate(_) => PacketTag::TxSettingDate,
            DeviceCommand::Erase => PacketTag::Erase,
        }
    }

    /// Response tags that complete the command.
    pub fn expected_responses(&self) -> &'static [PacketTag] {
        match self {
            DeviceCommand::CheckReady => &[PacketTag::On],
            DeviceCommand::TxCalibration { .. } => &[PacketTag::Calibration],
            DeviceCommand::TxSettingDate(_) => &[PacketTag::TxSettingDate],
            DeviceCommand::Erase => &[PacketTag::Erase],
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        match self {
            DeviceCommand::CheckReady | DeviceCommand::Erase => Vec::new(),
            DeviceCommand::TxCalibration {
                expiratory,
                inspiratory,
            } => {
                let mut payload = expiratory.to_le_bytes().to_vec();
                payload.extend_from_slice(&inspiratory.to_le_bytes());
                payload
            }
            DeviceCommand::TxSettingDate(at) => {
                let mut payload = (at.year().clamp(0, u16::MAX as i32) as u16)
                    .to_le_bytes()
                    .to_vec();
                payload.extend_from_slice(&[
                    at.month() as u8,
                    at.day() as u8,
                    at.hour() as u8,
                    at.minute() as u8,
                    at.second() as u8,
                ]);
                payload
            }
        }
    }

    /// Wire bytes of the command.
    pub fn encode(&self) -> BytesMut {
        let code = match self {
            DeviceCommand::CheckReady => COD_ON,
            DeviceCommand::TxCalibration { .. } => COD_TX_CALIBRATION,
            DeviceCommand::TxSettingDate(_) => COD_TX_SETTING_DATE,
            DeviceCommand::Erase => COD_ERASE,
        };
        encode(code, &self.payload())
    }
}

/// Vendor response classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResponseType {
    NoResponse,
    ResponseSuccess,
    ResponseFailure,
}

/// Vendor check state reported alongside a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckState {
    Unknown = -1,
    Enabled = 0,
    Disabled = 1,
    RequestTimedOut = 2,
    FirmwareUpdateNeeded = 3,
    TestNotSupported = 4,
}

/// Final state of one issued command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command: PacketTag,
    pub response: ResponseType,
    pub check_state: CheckState,
    pub response_packet: Option<RawPacket>,
}

impl CommandOutcome {
    pub fn success(command: PacketTag, packet: RawPacket) -> Self {
        CommandOutcome {
            command,
            response: ResponseType::ResponseSuccess,
            check_state: CheckState::Enabled,
            response_packet: Some(packet),
        }
    }

    pub fn timed_out(command: PacketTag) -> Self {
        CommandOutcome {
            command,
            response: ResponseType::ResponseFailure,
            check_state: CheckState::RequestTimedOut,
            response_packet: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.response == ResponseType::ResponseSuccess
    }
}
