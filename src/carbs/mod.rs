//! Carbohydrate absorption modeling and observed-absorption reconciliation.

pub mod absorption;
pub mod status;

pub use absorption::{AbsorptionShape, CarbAbsorptionModel, LinearAbsorption, PiecewiseLinearAbsorption};
pub use status::{
    clamped_carbs_on_board, dynamic_carbs_on_board, dynamic_glucose_effects, map_to_statuses,
    AbsorbedCarbValue, CarbEntry, CarbStatus, CarbValue,
};

/// The default absorption time assigned to entries that do not declare one.
pub const DEFAULT_ABSORPTION_TIME: f64 = 3.0 * 3600.0;

/// The multiplier applied to the declared absorption time to determine the
/// maximum allowed absorption time (and thus the minimum absorption rate).
pub const DEFAULT_ABSORPTION_TIME_OVERRUN: f64 = 1.5;

/// How long after an entry's start before absorption is assumed to begin.
pub const DEFAULT_EFFECT_DELAY: f64 = 10.0 * 60.0;
