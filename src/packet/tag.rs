//! # Packet Tags
//!
//! Semantic packet tags and the context-dependent resolution of wire codes.
//!
//! The peripheral reuses some codes for unrelated packets (`0xD3`, `0x51`,
//! `0xF3`), so a tag is always resolved from the pair
//! `(armed test type, code byte)` and never from the byte alone.
//! The shared-code table still needs confirming against live device captures.

use crate::constants::*;
use crate::session::types::{ContinuationGroup, TestType};
use serde::Serialize;

/// Semantic packet tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PacketTag {
    On,
    Fvc,
    Vc,
    Mvv,
    Oxy,
    Calibration,
    TxCalibration,
    TxSettingDate,
    Erase,
    FvcLastRt,
    VcLastRt,
    MvvLastRt,
    OxyResults,
    InfoFvcLastRt1,
    FvcLastRt2P1,
    FvcLastRt2P2,
    FvcLastRt2P3,
    FvcLastRt2P4,
    FvcLastRt2P5,
    FvcLastRt2P6,
    SpiroLastRtVt,
    VcLastRtP1,
    VcLastRtP2,
    VcLastRtP3,
    MvvLastRtP1,
    OxyResultsBase,
    OxyResultsBase2,
    OxyResultsCurve,
    Curve10ms,
    Curve10msFlows,
    Temperature,
    Battery,
    FirmwareProgress,
    FirmwareComplete,
    FirmwareError,
}

impl PacketTag {
    /// Wire code of the tag.
    pub fn code(self) -> u8 {
        match self {
            PacketTag::On => COD_ON,
            PacketTag::Fvc => COD_FVC,
            PacketTag::Vc => COD_VC,
            PacketTag::Mvv => COD_MVV,
            PacketTag::Oxy => COD_OXY,
            PacketTag::Calibration => COD_CALIBRATION,
            PacketTag::TxCalibration => COD_TX_CALIBRATION,
            PacketTag::TxSettingDate => COD_TX_SETTING_DATE,
            PacketTag::Erase => COD_ERASE,
            PacketTag::FvcLastRt => COD_FVC_LAST_RT,
            PacketTag::VcLastRt => COD_VC_LAST_RT,
            PacketTag::MvvLastRt => COD_MVV_LAST_RT,
            PacketTag::OxyResults => COD_OXY_RESULTS,
            PacketTag::InfoFvcLastRt1 => COD_INFO_FVC_LAST_RT_1,
            PacketTag::FvcLastRt2P1 => COD_FVC_LAST_RT_2_P1,
            PacketTag::FvcLastRt2P2 => COD_FVC_LAST_RT_2_P2,
            PacketTag::FvcLastRt2P3 => COD_FVC_LAST_RT_2_P3,
            PacketTag::FvcLastRt2P4 => COD_FVC_LAST_RT_2_P4,
            PacketTag::FvcLastRt2P5 => COD_FVC_LAST_RT_2_P5,
            PacketTag::FvcLastRt2P6 => COD_FVC_LAST_RT_2_P6,
            PacketTag::SpiroLastRtVt => COD_SPIRO_LAST_RT_VT,
            PacketTag::VcLastRtP1 => COD_VC_LAST_RT_P1,
            PacketTag::VcLastRtP2 => COD_VC_LAST_RT_P2,
            PacketTag::VcLastRtP3 => COD_VC_LAST_RT_P3,
            PacketTag::MvvLastRtP1 => COD_MVV_LAST_RT_P1,
            PacketTag::OxyResultsBase => COD_OXY_RESULTS_BASE,
            PacketTag::OxyResultsBase2 => COD_OXY_RESULTS_BASE2,
            PacketTag::OxyResultsCurve => COD_OXY_RESULTS_CURVE,
            PacketTag::Curve10ms => COD_CURVE_10MS,
            PacketTag::Curve10msFlows => COD_CURVE_10MS_FLOWS,
            PacketTag::Temperature => COD_TEMPERATURE,
            PacketTag::Battery => COD_BATTERY,
            PacketTag::FirmwareProgress => COD_FW_UPDATE_PROGRESS,
            PacketTag::FirmwareComplete => COD_FW_UPDATE_COMPLETE,
            PacketTag::FirmwareError => COD_FW_UPDATE_ERROR,
        }
    }

    /// Continuation group and 1-based part number, for `_Pn` tags.
    pub fn continuation(self) -> Option<(ContinuationGroup, u8)> {
        use ContinuationGroup::*;
        Some(match self {
            PacketTag::FvcLastRt2P1 => (FvcLastRt2, 1),
            PacketTag::FvcLastRt2P2 => (FvcLastRt2, 2),
            PacketTag::FvcLastRt2P3 => (FvcLastRt2, 3),
            PacketTag::FvcLastRt2P4 => (FvcLastRt2, 4),
            PacketTag::FvcLastRt2P5 => (FvcLastRt2, 5),
            PacketTag::FvcLastRt2P6 => (FvcLastRt2, 6),
            PacketTag::VcLastRtP1 => (VcLastRt, 1),
            PacketTag::VcLastRtP2 => (VcLastRt, 2),
            PacketTag::VcLastRtP3 => (VcLastRt, 3),
            PacketTag::MvvLastRtP1 => (MvvLastRt, 1),
            _ => return None,
        })
    }

    /// Battery, temperature and device-on packets may arrive at any time.
    pub fn is_housekeeping(self) -> bool {
        matches!(self, PacketTag::On | PacketTag::Temperature | PacketTag::Battery)
    }

    pub fn is_firmware(self) -> bool {
        matches!(
            self,
            PacketTag::FirmwareProgress | PacketTag::FirmwareComplete | PacketTag::FirmwareError
        )
    }

    /// Command echoes that carry no session data.
    pub fn is_command_echo(self) -> bool {
        matches!(
            self,
            PacketTag::TxCalibration | PacketTag::TxSettingDate | PacketTag::Erase
        )
    }

    /// The test type whose packet set contains this tag, if it is a data tag.
    ///
    /// Forced spirometry tags report [`TestType::Fvc`] for the whole family.
    /// Calibration is shared by all test types and reports `None`.
    pub fn owning_test(self) -> Option<TestType> {
        match self {
            PacketTag::Fvc
            | PacketTag::Curve10ms
            | PacketTag::Curve10msFlows
            | PacketTag::SpiroLastRtVt
            | PacketTag::InfoFvcLastRt1
            | PacketTag::FvcLastRt2P1
            | PacketTag::FvcLastRt2P2
            | PacketTag::FvcLastRt2P3
            | PacketTag::FvcLastRt2P4
            | PacketTag::FvcLastRt2P5
            | PacketTag::FvcLastRt2P6
            | PacketTag::FvcLastRt => Some(TestType::Fvc),
            PacketTag::Vc
            | PacketTag::VcLastRtP1
            | PacketTag::VcLastRtP2
            | PacketTag::VcLastRtP3
            | PacketTag::VcLastRt => Some(TestType::Vc),
            PacketTag::Mvv | PacketTag::MvvLastRtP1 | PacketTag::MvvLastRt => Some(TestType::Mvv),
            PacketTag::Oxy
            | PacketTag::OxyResultsBase
            | PacketTag::OxyResultsBase2
            | PacketTag::OxyResultsCurve
            | PacketTag::OxyResults => Some(TestType::Oximetry),
            _ => None,
        }
    }

    /// Whether this tag is session input for `test_type`.
    pub fn belongs_to(self, test_type: TestType) -> bool {
        if self == PacketTag::Calibration {
            return test_type.is_supported();
        }
        match self.owning_test() {
            Some(TestType::Fvc) => test_type.is_forced_spirometry(),
            Some(owner) => owner == test_type,
            None => false,
        }
    }

    /// Scalar packets that configure a test rather than report on it.
    pub fn is_session_setup(self) -> bool {
        self == PacketTag::Calibration
    }

    /// Whether this tag ends a session of `test_type`.
    pub fn is_terminal_for(self, test_type: TestType) -> bool {
        match self {
            PacketTag::FvcLastRt => test_type.is_forced_spirometry(),
            PacketTag::VcLastRt => test_type == TestType::Vc,
            PacketTag::MvvLastRt => test_type == TestType::Mvv,
            PacketTag::OxyResults => test_type == TestType::Oximetry,
            _ => false,
        }
    }
}

/// Resolves a wire code to its semantic tag in the context of the armed test.
///
/// `context` is [`TestType::None`] when no session is live.
pub fn resolve_tag(context: TestType, code: u8) -> Option<PacketTag> {
    let tag = match code {
        COD_ON => PacketTag::On,
        COD_VC => PacketTag::Vc,
        COD_MVV => PacketTag::Mvv,
        COD_FVC => PacketTag::Fvc,
        COD_OXY => PacketTag::Oxy,
        COD_FVC_LAST_RT_2_P1 => PacketTag::FvcLastRt2P1,
        COD_FVC_LAST_RT_2_P2 => PacketTag::FvcLastRt2P2,
        COD_FVC_LAST_RT_2_P3 => PacketTag::FvcLastRt2P3,
        COD_FVC_LAST_RT_2_P4 => PacketTag::FvcLastRt2P4,
        COD_FVC_LAST_RT_2_P5 => PacketTag::FvcLastRt2P5,
        COD_FVC_LAST_RT_2_P6 => PacketTag::FvcLastRt2P6,
        COD_TEMPERATURE => PacketTag::Temperature,
        // 0x51
        COD_OXY_RESULTS_BASE if context == TestType::Oximetry => PacketTag::OxyResultsBase,
        COD_BATTERY => PacketTag::Battery,
        COD_OXY_RESULTS_BASE2 => PacketTag::OxyResultsBase2,
        COD_TX_CALIBRATION => PacketTag::TxCalibration,
        COD_CALIBRATION => PacketTag::Calibration,
        COD_VC_LAST_RT_P1 => PacketTag::VcLastRtP1,
        COD_VC_LAST_RT_P2 => PacketTag::VcLastRtP2,
        COD_VC_LAST_RT_P3 => PacketTag::VcLastRtP3,
        COD_MVV_LAST_RT_P1 => PacketTag::MvvLastRtP1,
        COD_FVC_LAST_RT => PacketTag::FvcLastRt,
        COD_OXY_RESULTS => PacketTag::OxyResults,
        COD_INFO_FVC_LAST_RT_1 => PacketTag::InfoFvcLastRt1,
        // 0xD3
        COD_SPIRO_LAST_RT_VT if context.is_forced_spirometry() => PacketTag::SpiroLastRtVt,
        COD_ERASE => PacketTag::Erase,
        COD_TX_SETTING_DATE => PacketTag::TxSettingDate,
        COD_CURVE_10MS => PacketTag::Curve10ms,
        COD_CURVE_10MS_FLOWS => PacketTag::Curve10msFlows,
        COD_FW_UPDATE_PROGRESS => PacketTag::FirmwareProgress,
        COD_FW_UPDATE_COMPLETE => PacketTag::FirmwareComplete,
        COD_FW_UPDATE_ERROR => PacketTag::FirmwareError,
        COD_VC_LAST_RT => PacketTag::VcLastRt,
        // 0xF3
        COD_OXY_RESULTS_CURVE if context == TestType::Oximetry => PacketTag::OxyResultsCurve,
        COD_MVV_LAST_RT => PacketTag::MvvLastRt,
        _ => return None,
    };
    Some(tag)
}
