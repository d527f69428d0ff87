//! Session level types shared by the state machine, the result builder and
//! the upward API.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Test types understood by the peripheral (vendor wire values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestType {
    None,
    Fvc,
    PeakFlowFev1,
    Oximetry,
    FtMonitor,
    FvcPlus,
    Vc,
    Ecg,
    Mvv,
}

impl TestType {
    /// Vendor wire value.
    pub fn code(self) -> i8 {
        match self {
            TestType::None => -1,
            TestType::Fvc => 0,
            TestType::PeakFlowFev1 => 1,
            TestType::Oximetry => 2,
            TestType::FtMonitor => 3,
            TestType::FvcPlus => 4,
            TestType::Vc => 5,
            TestType::Ecg => 6,
            TestType::Mvv => 7,
        }
    }

    pub fn from_code(code: i8) -> Option<Self> {
        Some(match code {
            -1 => TestType::None,
            0 => TestType::Fvc,
            1 => TestType::PeakFlowFev1,
            2 => TestType::Oximetry,
            3 => TestType::FtMonitor,
            4 => TestType::FvcPlus,
            5 => TestType::Vc,
            6 => TestType::Ecg,
            7 => TestType::Mvv,
            _ => return None,
        })
    }

    /// Forced expiration tests share the FVC packet set and result layout.
    pub fn is_forced_spirometry(self) -> bool {
        matches!(self, TestType::Fvc | TestType::PeakFlowFev1 | TestType::FvcPlus)
    }

    /// Whether the engine can reassemble a result for this test type.
    pub fn is_supported(self) -> bool {
        self.is_forced_spirometry()
            || matches!(self, TestType::Vc | TestType::Mvv | TestType::Oximetry)
    }
}

impl std::str::FromStr for TestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(TestType::None),
            "fvc" => Ok(TestType::Fvc),
            "peakflowfev1" | "peak-flow-fev1" | "pef" => Ok(TestType::PeakFlowFev1),
            "oximetry" | "oxy" => Ok(TestType::Oximetry),
            "ftmonitor" | "ft-monitor" => Ok(TestType::FtMonitor),
            "fvcplus" | "fvc-plus" => Ok(TestType::FvcPlus),
            "vc" => Ok(TestType::Vc),
            "ecg" => Ok(TestType::Ecg),
            "mvv" => Ok(TestType::Mvv),
            other => Err(format!("unknown test type: {other}")),
        }
    }
}

/// ATS quality ruleset the device reports for a spirometry result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AtsStandard {
    #[default]
    Unset,
    Ats2015,
    Ats2019,
}

impl AtsStandard {
    pub fn from_wire(value: i8) -> Self {
        match value {
            0 => AtsStandard::Ats2015,
            1 => AtsStandard::Ats2019,
            _ => AtsStandard::Unset,
        }
    }

    pub fn to_wire(self) -> i8 {
        match self {
            AtsStandard::Unset => -1,
            AtsStandard::Ats2015 => 0,
            AtsStandard::Ats2019 => 1,
        }
    }
}

/// Peripheral models known to the vendor SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PeripheralType {
    SpirobankSmart,
    SpirobankOxi,
    SpirobankNoxi,
    Smartone,
    SmartoneOxi,
    SmartoneNoxi,
    DigitalSpiro,
    SpirobankIISmart,
    #[default]
    Undefined,
}

/// Scalar values accumulated from result packets, in raw device units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldId {
    // Shared
    AtsStandard,
    CalibrationExpiratory,
    CalibrationInspiratory,
    DeclaredSampleCount,
    HighResExpectedSamples,

    // Forced spirometry
    Pef,
    Fev1,
    Fvc,
    Fev1FvcRatio,
    Fev6,
    Fef2575,
    ExtrapolatedVolume,
    PefTime,
    ForcedExpirationTime,
    Fivc,
    HesitationTime,
    InspirationTime,
    DeviceFlags,
    DeviceQualityCode,
    EndOfForcedExpiration,
    Fev05,
    Fev075,

    // Slow vital capacity
    Evc,
    Ivc,
    Ic,
    SlowExpInsTime,
    VcQualityCode,
    Irv,
    Erv,
    Tv,
    Mv,
    Rr,
    Ti,
    Te,
    TvTi,
    TiTtot,
    Sit,
    Set,

    // Maximum voluntary ventilation
    Mvv,

    // Oximetry
    Spo2Baseline,
    BpmBaseline,
    RecordingTime,
    AnalysisTime,
    EventsSpo2Below89,
    TachycardiaEvents,
    BradycardiaEvents,
    T90,
    T89,
    T88,
    T87,
    T5,
    T40,
    T120,
    DeltaIndex12s,
    AtrialFibrillation,
}

/// Raw device integer (cL, mL, ms, s, tenths).
pub type Scalar = i64;

/// Accumulated scalar fields of one session.
pub type FieldMap = BTreeMap<FieldId, Scalar>;

/// Continuation part groups; parts of a group must arrive P1, P2, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContinuationGroup {
    FvcLastRt2,
    VcLastRt,
    MvvLastRt,
}

impl ContinuationGroup {
    pub fn part_count(self) -> u8 {
        match self {
            ContinuationGroup::FvcLastRt2 => 6,
            ContinuationGroup::VcLastRt => 3,
            ContinuationGroup::MvvLastRt => 1,
        }
    }

    /// The group a result of `test_type` is delivered in.
    pub fn for_test(test_type: TestType) -> Option<Self> {
        match test_type {
            t if t.is_forced_spirometry() => Some(ContinuationGroup::FvcLastRt2),
            TestType::Vc => Some(ContinuationGroup::VcLastRt),
            TestType::Mvv => Some(ContinuationGroup::MvvLastRt),
            _ => None,
        }
    }
}

/// Test session state machine states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Armed(TestType),
    Collecting,
    Finalizing,
    Complete,
    Aborted(ErrorKind),
}

impl SessionState {
    /// Armed or collecting; a new session cannot be armed.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Armed(_) | SessionState::Collecting | SessionState::Finalizing
        )
    }
}

/// Immutable view of the session handed to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStateSnapshot {
    pub state: SessionState,
    pub test_type: TestType,
    pub ats_standard: AtsStandard,
    pub device_type: PeripheralType,
    pub fields_populated: usize,
    pub flow_volume_samples: usize,
    pub volume_time_samples: usize,
    pub oximetry_samples: usize,
    pub high_res_samples: usize,
}
