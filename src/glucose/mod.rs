//! Glucose samples, effects, and the math over them.

pub mod math;
pub mod types;

pub use math::{
    combined_sums, counteraction_effects, decay_effect, linear_momentum_effect, predict_glucose,
    subtracting, DEFAULT_DELTA, MOMENTUM_DATA_INTERVAL, MOMENTUM_DURATION,
};
pub use types::{
    GlucoseChange, GlucoseEffect, GlucoseEffectVelocity, GlucoseSample, PredictedGlucoseValue,
};
