//! Glucoloop - Decision core for a closed-loop insulin-delivery controller
//!
//! Glucoloop turns recent glucose readings, delivered insulin, and
//! carbohydrate entries into a bounded dose recommendation through a
//! deterministic pipeline: effect modeling → counteraction → carb
//! reconciliation → retrospective correction → glucose prediction → dose
//! correction.
//!
//! ## Modules
//!
//! - **carbs**: Absorption curves and observed-absorption reconciliation
//! - **glucose**: Sample types, counteraction, and momentum math
//! - **insulin**: Activity models, dose accounting, and dose correction
//! - **retrospective**: Proportional and PID correction strategies
//! - **prediction**: The per-tick pipeline and recommendation
//! - **fixture**: The JSON wire schema for inputs and golden files

pub mod carbs;
pub mod error;
pub mod fixture;
pub mod glucose;
pub mod insulin;
pub mod prediction;
pub mod retrospective;
pub mod timeline;
pub mod units;

pub use error::DecodeError;
pub use fixture::AlgorithmInputFixture;
pub use prediction::{run, AlgorithmInput, AlgorithmOutput, DoseRecommendation, RecommendationType};

// Core data-model exports
pub use glucose::{GlucoseEffect, GlucoseEffectVelocity, GlucoseSample, PredictedGlucoseValue};
pub use insulin::{InsulinCorrection, InsulinDose, InsulinType};
pub use units::{Quantity, Unit};

/// Glucoloop version embedded in CLI output
pub const GLUCOLOOP_VERSION: &str = env!("CARGO_PKG_VERSION");
