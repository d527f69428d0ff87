//! Result types handed to subscribers. Values are in physical units; curves
//! are immutable copies taken when the session finished.

use crate::results::quality::{BlowFlags, QualityAssessment};
use crate::session::curve::{FlowVolumePoint, HighResCurve, OximetrySample, VolumeTimePoint};
use crate::session::types::{AtsStandard, PeripheralType, TestType};
use serde::{Serialize, Serializer};

/// Duration split as the device app displays it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Hms {
    pub hours: u32,
    pub minutes: u8,
    pub seconds: u8,
}

impl Hms {
    pub fn from_seconds(total: u64) -> Self {
        Hms {
            hours: (total / 3_600) as u32,
            minutes: ((total % 3_600) / 60) as u8,
            seconds: (total % 60) as u8,
        }
    }

    pub fn total_seconds(&self) -> u64 {
        self.hours as u64 * 3_600 + self.minutes as u64 * 60 + self.seconds as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndOfForcedExpiration {
    PlateauReached,
    ExpiratoryTimeReached,
}

/// Flow sensor corrections echoed by the device, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Calibration {
    pub expiratory_pct: f32,
    pub inspiratory_pct: f32,
}

/// Metadata shared by every result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResultHeader {
    pub test_type: TestType,
    pub device_type: PeripheralType,
    pub ats_standard: AtsStandard,
    pub calibration: Option<Calibration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FvcResult {
    pub header: ResultHeader,
    pub pef_ls: f32,
    pub fev1_l: f32,
    pub fvc_l: f32,
    pub fev1_fvc_pct: f32,
    pub extrapolated_volume_l: f32,
    pub pef_time_s: f32,
    pub fev6_l: Option<f32>,
    pub fef2575_ls: Option<f32>,
    pub forced_expiration_time_s: Option<f32>,
    pub fivc_l: Option<f32>,
    pub hesitation_time_s: Option<f32>,
    pub inspiration_time_s: Option<f32>,
    pub fev05_l: Option<f32>,
    pub fev075_l: Option<f32>,
    pub end_of_forced_expiration: Option<EndOfForcedExpiration>,
    #[serde(serialize_with = "serialize_flags")]
    pub flags: BlowFlags,
    pub device_quality_code: Option<u8>,
    pub quality: QualityAssessment,
    pub flow_volume: Vec<FlowVolumePoint>,
    pub volume_time: Vec<VolumeTimePoint>,
    pub high_res: HighResCurve,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VcResult {
    pub header: ResultHeader,
    pub evc_l: f32,
    pub ivc_l: f32,
    pub ic_l: f32,
    pub slow_exp_ins_time_s: f32,
    pub quality_code: Option<u8>,
    pub irv_l: Option<f32>,
    pub erv_l: Option<f32>,
    pub tv_l: Option<f32>,
    pub mv_lmin: Option<f32>,
    pub rr: Option<f32>,
    pub ti_s: Option<f32>,
    pub te_s: Option<f32>,
    pub tv_ti: Option<f32>,
    pub ti_ttot: Option<f32>,
    pub sit: Option<f32>,
    pub set: Option<f32>,
    pub volume_time: Vec<VolumeTimePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MvvResult {
    pub header: ResultHeader,
    pub mvv_lmin: f32,
    pub volume_time: Vec<VolumeTimePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OximetryResult {
    pub header: ResultHeader,
    pub spo2_baseline_pct: u8,
    pub bpm_baseline: u8,
    pub spo2_mean_pct: f32,
    pub spo2_min_pct: u8,
    pub spo2_max_pct: u8,
    pub bpm_mean: f32,
    pub bpm_min: u8,
    pub bpm_max: u8,
    pub recording_time: Hms,
    pub analysis_time: Hms,
    pub t90: Hms,
    pub t89: Option<Hms>,
    pub t88: Option<Hms>,
    pub t87: Option<Hms>,
    pub t5: Option<Hms>,
    pub t40: Option<Hms>,
    pub t120: Option<Hms>,
    pub events_spo2_below_89: Option<u32>,
    pub tachycardia_events: Option<u32>,
    pub bradycardia_events: Option<u32>,
    pub delta_index_12s: Option<f32>,
    pub atrial_fibrillation: Option<bool>,
    pub samples: Vec<OximetrySample>,
}

/// A completed test.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum TestResult {
    Fvc(FvcResult),
    Vc(VcResult),
    Mvv(MvvResult),
    Oximetry(OximetryResult),
}

impl TestResult {
    pub fn header(&self) -> &ResultHeader {
        match self {
            TestResult::Fvc(r) => &r.header,
            TestResult::Vc(r) => &r.header,
            TestResult::Mvv(r) => &r.header,
            TestResult::Oximetry(r) => &r.header,
        }
    }

    pub fn test_type(&self) -> TestType {
        self.header().test_type
    }

    /// Number of samples of the primary curve.
    pub fn curve_len(&self) -> usize {
        match self {
            TestResult::Fvc(r) => r.flow_volume.len(),
            TestResult::Vc(r) => r.volume_time.len(),
            TestResult::Mvv(r) => r.volume_time.len(),
            TestResult::Oximetry(r) => r.samples.len(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn serialize_flags<S: Serializer>(flags: &BlowFlags, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(flags.bits())
}
