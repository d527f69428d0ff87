//! Result model, builder and blow quality classification.

pub mod builder;
pub mod model;
pub mod quality;

pub use builder::build;
pub use model::{FvcResult, Hms, MvvResult, OximetryResult, TestResult, VcResult};
pub use quality::{
    classify, AcceptabilityStatus, QualityAssessment, QualityCode, QualityInstruction,
};
