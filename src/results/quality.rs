//! # Blow Quality Classification
//!
//! Pure classification of a forced expiration manoeuvre. The rule set
//! depends on the ATS standard the device reported:
//!
//! - ATS 2019 checks the extended codes 8 to 12 first and falls back to the
//!   legacy rules, and additionally yields an operator instruction and an
//!   acceptability grade.
//! - ATS 2015 (and an unknown standard) only uses the legacy codes 0 to 6.
//!
//! All inputs are raw device units (cL, mL, ms).

use crate::session::types::AtsStandard;
use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// Manoeuvre flags reported in the fifth FVC result part.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct BlowFlags: u8 {
        /// Expiration started before a full inspiration.
        const EARLY_START = 0b0000_0001;
        const COUGH       = 0b0000_0010;
        const ABRUPT_END  = 0b0000_0100;
    }
}

/// Quality message codes (vendor numbering, 7 is unused).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityCode {
    DontHesitate = 0,
    BlowOutFaster = 1,
    BlowOutLonger = 2,
    AbruptEnd = 3,
    GoodBlow = 4,
    DontStartTooEarly = 5,
    AvoidCoughing = 6,
    HesitationAtMaxVolume = 8,
    SlowFilling = 9,
    LowFinalInspiration = 10,
    IncompleteInspirationPriorToFvc = 11,
    LowForcedExpirationVolume = 12,
}

impl QualityCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Codes only produced under ATS 2019.
    pub fn is_extended(self) -> bool {
        self.code() >= 8
    }
}

/// Operator instruction accompanying an ATS 2019 quality code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityInstruction {
    None = 0,
    RelaxButKeepPushing = 1,
    DrinkWaterBeforeNextBlow = 2,
    KeepGoingUntilCompletelyEmpty = 3,
    BlastOutImmediatelyWhenCompletelyFull = 4,
    BlastOutWhenCompletelyFull = 5,
    BreathInFasterBeforeBlastingOut = 6,
    BreathInBackToTheTopAfterEmptyingYourLungs = 7,
    FillLungsCompletelyBeforeBlastingOut = 8,
    TakeDeepestBreathPossibleAndKeepGoingUntilEmpty = 9,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AcceptabilityStatus {
    NotApplicable = 0,
    Acceptable = 1,
    NotAcceptable = 2,
    NotAcceptableAndUsable = 3,
    NotAcceptableAndNotUsable = 4,
}

/// Manoeuvre measurements the rules look at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QualityInputs {
    pub fvc_cl: i64,
    pub extrapolated_volume_ml: i64,
    pub pef_time_ms: i64,
    pub forced_expiration_time_ms: Option<i64>,
    pub fivc_cl: Option<i64>,
    pub hesitation_time_ms: Option<i64>,
    pub inspiration_time_ms: Option<i64>,
    pub flags: BlowFlags,
    pub plateau_reached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityAssessment {
    pub code: QualityCode,
    pub instruction: QualityInstruction,
    pub acceptability: AcceptabilityStatus,
}

const HESITATION_LIMIT_MS: i64 = 2_000;
const INSPIRATION_LIMIT_MS: i64 = 3_000;
const LOW_FVC_LIMIT_CL: i64 = 50;
const PEF_TIME_LIMIT_MS: i64 = 120;
const FET_LIMIT_MS: i64 = 6_000;

/// Classifies one manoeuvre.
pub fn classify(standard: AtsStandard, inputs: &QualityInputs) -> QualityAssessment {
    match standard {
        AtsStandard::Ats2019 => {
            let code = extended_code(inputs).unwrap_or_else(|| legacy_code(inputs));
            QualityAssessment {
                code,
                instruction: instruction_for(code),
                acceptability: acceptability_for(code),
            }
        }
        AtsStandard::Ats2015 | AtsStandard::Unset => QualityAssessment {
            code: legacy_code(inputs),
            instruction: QualityInstruction::None,
            acceptability: AcceptabilityStatus::NotApplicable,
        },
    }
}

fn extended_code(inputs: &QualityInputs) -> Option<QualityCode> {
    let fvc = inputs.fvc_cl;

    if inputs.hesitation_time_ms.is_some_and(|t| t > HESITATION_LIMIT_MS) {
        return Some(QualityCode::HesitationAtMaxVolume);
    }
    // FIVC - FVC > max(100 mL, 5 % FVC), in cL scaled by 100
    if let Some(fivc) = inputs.fivc_cl {
        if (fivc - fvc) * 100 > (10 * 100).max(fvc * 5) {
            return Some(QualityCode::IncompleteInspirationPriorToFvc);
        }
    }
    if inputs.inspiration_time_ms.is_some_and(|t| t > INSPIRATION_LIMIT_MS) {
        return Some(QualityCode::SlowFilling);
    }
    if fvc < LOW_FVC_LIMIT_CL {
        return Some(QualityCode::LowForcedExpirationVolume);
    }
    if let Some(fivc) = inputs.fivc_cl {
        if fivc * 10 < fvc * 9 {
            return Some(QualityCode::LowFinalInspiration);
        }
    }
    None
}

fn legacy_code(inputs: &QualityInputs) -> QualityCode {
    // eVol > max(150 mL, 5 % FVC), FVC converted to mL and scaled by 100
    if inputs.extrapolated_volume_ml * 100 > (150 * 100).max(inputs.fvc_cl * 10 * 5) {
        return QualityCode::DontHesitate;
    }
    if inputs.flags.contains(BlowFlags::EARLY_START) {
        return QualityCode::DontStartTooEarly;
    }
    if inputs.flags.contains(BlowFlags::COUGH) {
        return QualityCode::AvoidCoughing;
    }
    if inputs.pef_time_ms > PEF_TIME_LIMIT_MS {
        return QualityCode::BlowOutFaster;
    }
    if inputs.flags.contains(BlowFlags::ABRUPT_END) {
        return QualityCode::AbruptEnd;
    }
    if !inputs.plateau_reached
        && inputs
            .forced_expiration_time_ms
            .is_some_and(|fet| fet < FET_LIMIT_MS)
    {
        return QualityCode::BlowOutLonger;
    }
    QualityCode::GoodBlow
}

fn instruction_for(code: QualityCode) -> QualityInstruction {
    match code {
        QualityCode::GoodBlow => QualityInstruction::None,
        QualityCode::BlowOutLonger => QualityInstruction::RelaxButKeepPushing,
        QualityCode::AvoidCoughing => QualityInstruction::DrinkWaterBeforeNextBlow,
        QualityCode::AbruptEnd => QualityInstruction::KeepGoingUntilCompletelyEmpty,
        QualityCode::DontHesitate
        | QualityCode::BlowOutFaster
        | QualityCode::HesitationAtMaxVolume => {
            QualityInstruction::BlastOutImmediatelyWhenCompletelyFull
        }
        QualityCode::DontStartTooEarly => QualityInstruction::BlastOutWhenCompletelyFull,
        QualityCode::SlowFilling => QualityInstruction::BreathInFasterBeforeBlastingOut,
        QualityCode::LowFinalInspiration => {
            QualityInstruction::BreathInBackToTheTopAfterEmptyingYourLungs
        }
        QualityCode::IncompleteInspirationPriorToFvc => {
            QualityInstruction::FillLungsCompletelyBeforeBlastingOut
        }
        QualityCode::LowForcedExpirationVolume => {
            QualityInstruction::TakeDeepestBreathPossibleAndKeepGoingUntilEmpty
        }
    }
}

fn acceptability_for(code: QualityCode) -> AcceptabilityStatus {
    match code {
        QualityCode::GoodBlow => AcceptabilityStatus::Acceptable,
        QualityCode::BlowOutLonger | QualityCode::AbruptEnd | QualityCode::LowFinalInspiration => {
            AcceptabilityStatus::NotAcceptableAndUsable
        }
        _ => AcceptabilityStatus::NotAcceptableAndNotUsable,
    }
}
