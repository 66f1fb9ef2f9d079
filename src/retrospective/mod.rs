//! Retrospective correction
//!
//! Folds recent unexplained glucose drift (the summed counteraction
//! discrepancies) back into the prediction as a decaying glucose effect. Two
//! interchangeable strategies: a proportional one and a
//! proportional-integral-differential one.

pub mod integral;
pub mod standard;

use chrono::{DateTime, Utc};

use crate::glucose::types::{GlucoseChange, GlucoseEffect};
use crate::units::Quantity;

pub use integral::IntegralRetrospectiveCorrection;
pub use standard::StandardRetrospectiveCorrection;

/// A strategy producing a correction glucose-effect curve from summed
/// discrepancies.
///
/// Implementations keep only a diagnostic cache of the last total correction;
/// the effect itself is a pure function of the arguments. If the most recent
/// discrepancy is older than `recency_interval` relative to the starting
/// glucose, the cache is cleared and no effect is returned.
pub trait RetrospectiveCorrection {
    fn compute_effect(
        &mut self,
        starting_date: DateTime<Utc>,
        starting_quantity: Quantity,
        summed_discrepancies: Option<&[GlucoseChange]>,
        recency_interval: f64,
        grouping_interval: f64,
    ) -> Vec<GlucoseEffect>;

    /// The most recently applied total correction, for diagnostics only.
    fn total_glucose_correction_effect(&self) -> Option<Quantity>;
}
