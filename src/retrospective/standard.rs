//! Proportional retrospective correction: the most recent summed discrepancy
//! decays linearly to zero over a fixed effect duration.

use chrono::{DateTime, Utc};

use crate::glucose::math::decay_effect;
use crate::glucose::types::{GlucoseChange, GlucoseEffect, GlucoseEffectVelocity};
use crate::glucose::DEFAULT_DELTA;
use crate::retrospective::RetrospectiveCorrection;
use crate::timeline::{seconds_between, TimelineValue};
use crate::units::{Quantity, Unit};

pub struct StandardRetrospectiveCorrection {
    effect_duration: f64,
    total_glucose_correction_effect: Option<Quantity>,
}

impl StandardRetrospectiveCorrection {
    pub fn new(effect_duration: f64) -> Self {
        StandardRetrospectiveCorrection {
            effect_duration,
            total_glucose_correction_effect: None,
        }
    }
}

impl RetrospectiveCorrection for StandardRetrospectiveCorrection {
    fn compute_effect(
        &mut self,
        starting_date: DateTime<Utc>,
        starting_quantity: Quantity,
        summed_discrepancies: Option<&[GlucoseChange]>,
        recency_interval: f64,
        grouping_interval: f64,
    ) -> Vec<GlucoseEffect> {
        // The last discrepancy must be recent, otherwise clear the effect
        let current = match summed_discrepancies.and_then(|d| d.last()) {
            Some(current)
                if seconds_between(starting_date, current.end_date()) <= recency_interval =>
            {
                current
            }
            _ => {
                self.total_glucose_correction_effect = None;
                return Vec::new();
            }
        };

        let unit = Unit::MilligramsPerDeciliter;
        let current_value = current.quantity.double_value(unit);
        self.total_glucose_correction_effect = Some(current.quantity);

        let discrepancy_time =
            seconds_between(current.end_date, current.start_date).max(grouping_interval);
        let velocity = Quantity::new(
            GlucoseEffectVelocity::PER_SECOND_UNIT,
            current_value / discrepancy_time,
        );

        decay_effect(
            starting_date,
            starting_quantity,
            velocity,
            self.effect_duration,
            DEFAULT_DELTA,
        )
    }

    fn total_glucose_correction_effect(&self) -> Option<Quantity> {
        self.total_glucose_correction_effect
    }
}
