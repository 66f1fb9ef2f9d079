//! Insulin activity modeling, dose accounting, and dose correction.

pub mod dose_math;
pub mod model;
pub mod types;

pub use dose_math::{
    insulin_correction, AutomaticDoseRecommendation, BolusRecommendationNotice, InsulinCorrection,
    ManualBolusRecommendation, TempBasalRecommendation,
};
pub use model::{ExponentialInsulinModel, InsulinModel, InsulinType};
pub use types::{annotate_doses, dose_glucose_effects, InsulinDeliveryType, InsulinDose};
