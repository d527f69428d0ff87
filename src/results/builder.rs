//! # Result Builder
//!
//! Converts a finished [`Session`] into a [`TestResult`]. The variant is
//! chosen from the session's test type, raw device integers are converted to
//! physical units here and nowhere else, and FVC-family results get a
//! quality classification under the ATS standard the device reported.

use crate::error::BuildError;
use crate::results::model::*;
use crate::results::quality::{classify, BlowFlags, QualityInputs};
use crate::session::curve::{OximetrySample, SampleKind};
use crate::session::machine::Session;
use crate::session::types::{FieldId, FieldMap, Scalar, TestType};

/// Builds the result of a finished session.
///
/// Fails with [`BuildError::MissingField`] when a required scalar never
/// arrived and with [`BuildError::EmptyCurve`] when an oximetry session
/// carried no stored samples.
pub fn build(session: Session) -> Result<TestResult, BuildError> {
    let header = ResultHeader {
        test_type: session.test_type(),
        device_type: session.device_type(),
        ats_standard: session.ats_standard(),
        calibration: calibration(session.fields()),
    };

    match session.test_type() {
        t if t.is_forced_spirometry() => build_fvc(header, session).map(TestResult::Fvc),
        TestType::Vc => build_vc(header, session).map(TestResult::Vc),
        TestType::Mvv => build_mvv(header, session).map(TestResult::Mvv),
        TestType::Oximetry => build_oximetry(header, session).map(TestResult::Oximetry),
        other => Err(BuildError::UnsupportedTest(other)),
    }
}

struct Fields<'a>(&'a FieldMap);

impl Fields<'_> {
    fn required(&self, id: FieldId) -> Result<Scalar, BuildError> {
        self.0.get(&id).copied().ok_or(BuildError::MissingField(id))
    }

    fn optional(&self, id: FieldId) -> Option<Scalar> {
        self.0.get(&id).copied()
    }

    /// Optional value divided into physical units.
    fn scaled(&self, id: FieldId, divisor: f32) -> Option<f32> {
        self.optional(id).map(|v| v as f32 / divisor)
    }

    fn hms(&self, id: FieldId) -> Option<Hms> {
        self.optional(id).map(|s| Hms::from_seconds(s.max(0) as u64))
    }
}

fn calibration(fields: &FieldMap) -> Option<Calibration> {
    let fields = Fields(fields);
    Some(Calibration {
        expiratory_pct: fields.scaled(FieldId::CalibrationExpiratory, 10.0)?,
        inspiratory_pct: fields.scaled(FieldId::CalibrationInspiratory, 10.0)?,
    })
}

fn build_fvc(header: ResultHeader, session: Session) -> Result<FvcResult, BuildError> {
    let f = Fields(session.fields());

    let pef = f.required(FieldId::Pef)?;
    let fev1 = f.required(FieldId::Fev1)?;
    let fvc = f.required(FieldId::Fvc)?;
    let ratio = f.required(FieldId::Fev1FvcRatio)?;
    let evol = f.required(FieldId::ExtrapolatedVolume)?;
    let pef_time = f.required(FieldId::PefTime)?;

    let flags = BlowFlags::from_bits_truncate(f.optional(FieldId::DeviceFlags).unwrap_or(0) as u8);
    let end_of_forced_expiration =
        f.optional(FieldId::EndOfForcedExpiration).and_then(|v| match v {
            0 => Some(EndOfForcedExpiration::PlateauReached),
            1 => Some(EndOfForcedExpiration::ExpiratoryTimeReached),
            _ => None,
        });

    let inputs = QualityInputs {
        fvc_cl: fvc,
        extrapolated_volume_ml: evol,
        pef_time_ms: pef_time,
        forced_expiration_time_ms: f.optional(FieldId::ForcedExpirationTime),
        fivc_cl: f.optional(FieldId::Fivc),
        hesitation_time_ms: f.optional(FieldId::HesitationTime),
        inspiration_time_ms: f.optional(FieldId::InspirationTime),
        flags,
        plateau_reached: end_of_forced_expiration == Some(EndOfForcedExpiration::PlateauReached),
    };
    let quality = classify(header.ats_standard, &inputs);

    let mut result = FvcResult {
        header,
        pef_ls: pef as f32 / 100.0,
        fev1_l: fev1 as f32 / 100.0,
        fvc_l: fvc as f32 / 100.0,
        fev1_fvc_pct: ratio as f32 / 10.0,
        extrapolated_volume_l: evol as f32 / 1000.0,
        pef_time_s: pef_time as f32 / 1000.0,
        fev6_l: f.scaled(FieldId::Fev6, 100.0),
        fef2575_ls: f.scaled(FieldId::Fef2575, 100.0),
        forced_expiration_time_s: f.scaled(FieldId::ForcedExpirationTime, 1000.0),
        fivc_l: f.scaled(FieldId::Fivc, 100.0),
        hesitation_time_s: f.scaled(FieldId::HesitationTime, 1000.0),
        inspiration_time_s: f.scaled(FieldId::InspirationTime, 1000.0),
        fev05_l: f.scaled(FieldId::Fev05, 100.0),
        fev075_l: f.scaled(FieldId::Fev075, 100.0),
        end_of_forced_expiration,
        flags,
        device_quality_code: f.optional(FieldId::DeviceQualityCode).map(|v| v as u8),
        quality,
        flow_volume: Vec::new(),
        volume_time: Vec::new(),
        high_res: Default::default(),
    };

    let curves = session.into_curves();
    result.flow_volume = curves.flow_volume;
    result.volume_time = curves.volume_time;
    result.high_res = curves.high_res;
    Ok(result)
}

fn build_vc(header: ResultHeader, session: Session) -> Result<VcResult, BuildError> {
    let f = Fields(session.fields());

    let mut result = VcResult {
        header,
        evc_l: f.required(FieldId::Evc)? as f32 / 100.0,
        ivc_l: f.required(FieldId::Ivc)? as f32 / 100.0,
        ic_l: f.required(FieldId::Ic)? as f32 / 100.0,
        slow_exp_ins_time_s: f.required(FieldId::SlowExpInsTime)? as f32 / 1000.0,
        quality_code: f.optional(FieldId::VcQualityCode).map(|v| v as u8),
        irv_l: f.scaled(FieldId::Irv, 1000.0),
        erv_l: f.scaled(FieldId::Erv, 1000.0),
        tv_l: f.scaled(FieldId::Tv, 1000.0),
        mv_lmin: f.scaled(FieldId::Mv, 10.0),
        rr: f.scaled(FieldId::Rr, 10.0),
        ti_s: f.scaled(FieldId::Ti, 100.0),
        te_s: f.scaled(FieldId::Te, 100.0),
        tv_ti: f.scaled(FieldId::TvTi, 100.0),
        ti_ttot: f.scaled(FieldId::TiTtot, 100.0),
        sit: f.scaled(FieldId::Sit, 100.0),
        set: f.scaled(FieldId::Set, 100.0),
        volume_time: Vec::new(),
    };

    result.volume_time = session.into_curves().volume_time;
    Ok(result)
}

fn build_mvv(header: ResultHeader, session: Session) -> Result<MvvResult, BuildError> {
    let mvv = Fields(session.fields()).required(FieldId::Mvv)?;
    Ok(MvvResult {
        header,
        mvv_lmin: mvv as f32 / 10.0,
        volume_time: session.into_curves().volume_time,
    })
}

fn build_oximetry(header: ResultHeader, session: Session) -> Result<OximetryResult, BuildError> {
    let f = Fields(session.fields());

    let spo2_baseline = f.required(FieldId::Spo2Baseline)?;
    let bpm_baseline = f.required(FieldId::BpmBaseline)?;
    let recording = f
        .hms(FieldId::RecordingTime)
        .ok_or(BuildError::MissingField(FieldId::RecordingTime))?;
    let analysis = f
        .hms(FieldId::AnalysisTime)
        .ok_or(BuildError::MissingField(FieldId::AnalysisTime))?;
    let t90 = f.hms(FieldId::T90).ok_or(BuildError::MissingField(FieldId::T90))?;

    let mut result = OximetryResult {
        header,
        spo2_baseline_pct: spo2_baseline as u8,
        bpm_baseline: bpm_baseline as u8,
        spo2_mean_pct: 0.0,
        spo2_min_pct: 0,
        spo2_max_pct: 0,
        bpm_mean: 0.0,
        bpm_min: 0,
        bpm_max: 0,
        recording_time: recording,
        analysis_time: analysis,
        t90,
        t89: f.hms(FieldId::T89),
        t88: f.hms(FieldId::T88),
        t87: f.hms(FieldId::T87),
        t5: f.hms(FieldId::T5),
        t40: f.hms(FieldId::T40),
        t120: f.hms(FieldId::T120),
        events_spo2_below_89: f.optional(FieldId::EventsSpo2Below89).map(|v| v as u32),
        tachycardia_events: f.optional(FieldId::TachycardiaEvents).map(|v| v as u32),
        bradycardia_events: f.optional(FieldId::BradycardiaEvents).map(|v| v as u32),
        delta_index_12s: f.scaled(FieldId::DeltaIndex12s, 100.0),
        atrial_fibrillation: f.optional(FieldId::AtrialFibrillation).map(|v| v != 0),
        samples: Vec::new(),
    };

    let samples = session.into_curves().oximetry;
    let spo2 = Stats::of(samples.iter().map(|s| s.spo2_pct))
        .ok_or(BuildError::EmptyCurve(SampleKind::Oximetry))?;
    let bpm = Stats::of(samples.iter().map(|s: &OximetrySample| s.heart_rate_bpm))
        .ok_or(BuildError::EmptyCurve(SampleKind::Oximetry))?;

    result.spo2_mean_pct = spo2.mean;
    result.spo2_min_pct = spo2.min;
    result.spo2_max_pct = spo2.max;
    result.bpm_mean = bpm.mean;
    result.bpm_min = bpm.min;
    result.bpm_max = bpm.max;
    result.samples = samples;
    Ok(result)
}

struct Stats {
    mean: f32,
    min: u8,
    max: u8,
}

impl Stats {
    fn of(values: impl Iterator<Item = u8>) -> Option<Stats> {
        let mut count = 0u64;
        let mut sum = 0u64;
        let mut min = u8::MAX;
        let mut max = u8::MIN;
        for v in values {
            count += 1;
            sum += v as u64;
            min = min.min(v);
            max = max.max(v);
        }
        (count > 0).then(|| Stats {
            mean: sum as f32 / count as f32,
            min,
            max,
        })
    }
}
