//! Insulin activity curves
//!
//! An insulin model maps elapsed time since delivery to the fraction of the
//! dose's glucose effect still to come. The exponential model is the only
//! concrete curve; the per-product presets differ only in duration, peak
//! activity time, and onset delay.

use serde::{Deserialize, Serialize};

use crate::timeline::minutes;

/// An insulin activity curve.
pub trait InsulinModel {
    /// The total duration of insulin activity, in seconds, including the
    /// onset delay.
    fn effect_duration(&self) -> f64;

    /// The fraction of total insulin effect remaining at `time` seconds
    /// after delivery. 1 at or before delivery, 0 at or past the effect
    /// duration, monotone non-increasing between.
    fn percent_effect_remaining(&self, time: f64) -> f64;
}

/// The closed set of insulin products selectable by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum InsulinType {
    #[default]
    Novolog,
    Humalog,
    Apidra,
    Fiasp,
    Lyumjev,
    Afrezza,
}

impl InsulinType {
    /// The exponential activity preset for this product.
    pub fn model(&self) -> ExponentialInsulinModel {
        match self {
            InsulinType::Novolog | InsulinType::Humalog | InsulinType::Apidra => {
                ExponentialInsulinModel::rapid_acting_adult()
            }
            InsulinType::Fiasp | InsulinType::Lyumjev => {
                ExponentialInsulinModel::new(minutes(360.0), minutes(55.0), minutes(10.0))
            }
            InsulinType::Afrezza => {
                ExponentialInsulinModel::new(minutes(300.0), minutes(29.0), minutes(10.0))
            }
        }
    }
}

/// An exponential insulin activity curve parameterized by total action
/// duration and time of peak activity, shifted by an onset delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialInsulinModel {
    pub action_duration: f64,
    pub peak_activity_time: f64,
    pub delay: f64,
}

impl ExponentialInsulinModel {
    pub fn new(action_duration: f64, peak_activity_time: f64, delay: f64) -> Self {
        ExponentialInsulinModel {
            action_duration,
            peak_activity_time,
            delay,
        }
    }

    /// The standard rapid-acting adult preset (novolog, humalog, apidra).
    pub fn rapid_acting_adult() -> Self {
        ExponentialInsulinModel::new(minutes(360.0), minutes(75.0), minutes(10.0))
    }

    fn time_constant(&self) -> f64 {
        self.peak_activity_time * (1.0 - self.peak_activity_time / self.action_duration)
            / (1.0 - 2.0 * self.peak_activity_time / self.action_duration)
    }
}

impl InsulinModel for ExponentialInsulinModel {
    fn effect_duration(&self) -> f64 {
        self.action_duration + self.delay
    }

    fn percent_effect_remaining(&self, time: f64) -> f64 {
        let time = time - self.delay;
        if time <= 0.0 {
            return 1.0;
        }
        if time >= self.action_duration {
            return 0.0;
        }

        let tau = self.time_constant();
        let a = 2.0 * tau / self.action_duration;
        let s = 1.0 / (1.0 - a + (1.0 + a) * (-self.action_duration / tau).exp());

        1.0 - s
            * (1.0 - a)
            * ((time.powi(2) / (tau * self.action_duration * (1.0 - a)) - time / tau - 1.0)
                * (-time / tau).exp()
                + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::hours;

    #[test]
    fn boundaries() {
        let model = ExponentialInsulinModel::rapid_acting_adult();
        assert_eq!(model.percent_effect_remaining(0.0), 1.0);
        assert_eq!(model.percent_effect_remaining(minutes(5.0)), 1.0);
        assert_eq!(model.percent_effect_remaining(model.effect_duration()), 0.0);
        assert_eq!(model.percent_effect_remaining(hours(12.0)), 0.0);
    }

    #[test]
    fn monotone_non_increasing() {
        let model = ExponentialInsulinModel::rapid_acting_adult();
        let mut previous = 1.0;
        for step in 0..=100 {
            let time = step as f64 * model.effect_duration() / 100.0;
            let remaining = model.percent_effect_remaining(time);
            assert!(
                remaining <= previous + 1e-12,
                "effect remaining increased at t={time}: {remaining} > {previous}"
            );
            previous = remaining;
        }
    }

    #[test]
    fn faster_presets_land_effect_sooner() {
        let adult = InsulinType::Novolog.model();
        let fiasp = InsulinType::Fiasp.model();
        // At two hours in, more of the faster insulin's effect has landed
        let t = hours(2.0);
        assert!(fiasp.percent_effect_remaining(t) < adult.percent_effect_remaining(t));
    }

    #[test]
    fn afrezza_duration_is_shorter() {
        let afrezza = InsulinType::Afrezza.model();
        assert_eq!(afrezza.action_duration, minutes(300.0));
        assert_eq!(afrezza.effect_duration(), minutes(310.0));
    }

    #[test]
    fn roughly_half_effect_remaining_past_peak() {
        let model = ExponentialInsulinModel::rapid_acting_adult();
        // A sanity anchor rather than an exact value: somewhere between the
        // peak and mid-duration, half the effect is still pending
        let remaining = model.percent_effect_remaining(hours(2.0));
        assert!(remaining > 0.3 && remaining < 0.7, "remaining was {remaining}");
    }
}
