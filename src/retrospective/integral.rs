//! Proportional-integral-differential retrospective correction
//!
//! Extends the proportional strategy with an integral term over a contiguous
//! run of same-signed discrepancies and an asymmetric differential term that
//! only ever dampens. Persistent discrepancies correct up to twice as hard
//! as a one-off, over a longer decay.

use chrono::{DateTime, Utc};

use crate::glucose::math::decay_effect;
use crate::glucose::types::{GlucoseChange, GlucoseEffect, GlucoseEffectVelocity};
use crate::glucose::DEFAULT_DELTA;
use crate::retrospective::RetrospectiveCorrection;
use crate::timeline::{seconds_between, TimelineValue};
use crate::units::{Quantity, Unit};

/// The look-back window scanned for a same-signed discrepancy run.
const RETROSPECTION_INTERVAL: f64 = 180.0 * 60.0;

/// The longest the correction effect is allowed to decay over.
const MAX_EFFECT_DURATION: f64 = 180.0 * 60.0;

/// Gain applied to the most recent discrepancy alone.
const CURRENT_DISCREPANCY_GAIN: f64 = 1.0;

/// Asymptotic gain reached when a discrepancy persists indefinitely.
const PERSISTENT_DISCREPANCY_GAIN: f64 = 2.0;

/// Time constant of the integral term's exponential forgetting.
const CORRECTION_TIME_CONSTANT: f64 = 60.0 * 60.0;

/// Gain on the differential term, applied only when the discrepancy is
/// shrinking.
const DIFFERENTIAL_GAIN: f64 = 2.0;

/// Discrepancies smaller than this, in mg/dL, break a run.
const NEGLIGIBLE_DISCREPANCY: f64 = 0.1;

pub struct IntegralRetrospectiveCorrection {
    effect_duration: f64,
    total_glucose_correction_effect: Option<Quantity>,
}

impl IntegralRetrospectiveCorrection {
    pub fn new(effect_duration: f64) -> Self {
        IntegralRetrospectiveCorrection {
            effect_duration,
            total_glucose_correction_effect: None,
        }
    }

    fn integral_forget() -> f64 {
        (-DEFAULT_DELTA / CORRECTION_TIME_CONSTANT).exp()
    }

    fn integral_gain() -> f64 {
        let forget = Self::integral_forget();
        ((1.0 - forget) / forget) * (PERSISTENT_DISCREPANCY_GAIN - CURRENT_DISCREPANCY_GAIN)
    }

    fn proportional_gain() -> f64 {
        CURRENT_DISCREPANCY_GAIN - Self::integral_gain()
    }

    /// The chronological run of same-signed discrepancies ending at the most
    /// recent one, bounded by the retrospection window. A sign change, a gap
    /// exceeding `recency_interval`, or a negligible magnitude breaks the
    /// run.
    fn discrepancy_run(
        discrepancies: &[GlucoseChange],
        recency_interval: f64,
    ) -> Vec<f64> {
        let unit = Unit::MilligramsPerDeciliter;
        let current = &discrepancies[discrepancies.len() - 1];
        let current_value = current.quantity.double_value(unit);

        let mut run = vec![current_value];
        let mut run_start = current;

        for discrepancy in discrepancies[..discrepancies.len() - 1].iter().rev() {
            let value = discrepancy.quantity.double_value(unit);
            let within_window = seconds_between(current.end_date(), discrepancy.end_date())
                <= RETROSPECTION_INTERVAL;
            let contiguous = seconds_between(run_start.end_date(), discrepancy.end_date())
                <= recency_interval;
            let same_sign = value * current_value > 0.0;

            if !within_window || !contiguous || !same_sign || value.abs() < NEGLIGIBLE_DISCREPANCY
            {
                break;
            }

            run.push(value);
            run_start = discrepancy;
        }

        run.reverse();
        run
    }
}

impl RetrospectiveCorrection for IntegralRetrospectiveCorrection {
    fn compute_effect(
        &mut self,
        starting_date: DateTime<Utc>,
        starting_quantity: Quantity,
        summed_discrepancies: Option<&[GlucoseChange]>,
        recency_interval: f64,
        grouping_interval: f64,
    ) -> Vec<GlucoseEffect> {
        let discrepancies = match summed_discrepancies {
            Some(d) if !d.is_empty() => d,
            _ => {
                self.total_glucose_correction_effect = None;
                return Vec::new();
            }
        };

        let current = &discrepancies[discrepancies.len() - 1];
        if seconds_between(starting_date, current.end_date()) > recency_interval {
            self.total_glucose_correction_effect = None;
            return Vec::new();
        }

        let unit = Unit::MilligramsPerDeciliter;
        let current_value = current.quantity.double_value(unit);

        let run = Self::discrepancy_run(discrepancies, recency_interval);

        // Integral term accumulated over the run with exponential forgetting;
        // each accumulated sample also extends the effect duration
        let forget = Self::integral_forget();
        let integral_gain = Self::integral_gain();
        let mut integral_correction = 0.0;
        let mut extended_duration = self.effect_duration - 2.0 * DEFAULT_DELTA;
        for value in &run {
            integral_correction = forget * integral_correction + integral_gain * value;
            extended_duration = (extended_duration + 2.0 * DEFAULT_DELTA).min(MAX_EFFECT_DURATION);
        }

        let proportional_correction = Self::proportional_gain() * current_value;

        // Differential term dampens only when the discrepancy is shrinking
        let differential_correction = if run.len() >= 2 {
            let differential = current_value - run[run.len() - 2];
            if differential < 0.0 {
                DIFFERENTIAL_GAIN * differential
            } else {
                0.0
            }
        } else {
            0.0
        };

        let total_correction =
            proportional_correction + integral_correction + differential_correction;
        self.total_glucose_correction_effect = Some(Quantity::new(unit, total_correction));

        // Rescale the velocity so the integrated effect stays bounded as the
        // decay duration extends
        let discrepancy_time =
            seconds_between(current.end_date, current.start_date).max(grouping_interval);
        let velocity_value =
            total_correction / discrepancy_time * (self.effect_duration / extended_duration);
        let velocity = Quantity::new(GlucoseEffectVelocity::PER_SECOND_UNIT, velocity_value);

        decay_effect(
            starting_date,
            starting_quantity,
            velocity,
            extended_duration,
            DEFAULT_DELTA,
        )
    }

    fn total_glucose_correction_effect(&self) -> Option<Quantity> {
        self.total_glucose_correction_effect
    }
}
