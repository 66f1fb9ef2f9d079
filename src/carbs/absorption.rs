//! Carb absorption curves
//!
//! An absorption shape maps normalized elapsed time (elapsed divided by total
//! absorption time) to the normalized fraction of carbohydrates absorbed as
//! blood glucose. Shapes must be monotone non-decreasing, clamped to 0 below
//! t=0 and 1 above t=1, and expose a closed-form inverse and instantaneous
//! rate.

use serde::{Deserialize, Serialize};

/// The closed set of absorption models selectable by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum CarbAbsorptionModel {
    Linear,
    #[default]
    PiecewiseLinear,
}

impl CarbAbsorptionModel {
    pub fn shape(&self) -> &'static dyn AbsorptionShape {
        match self {
            CarbAbsorptionModel::Linear => &LinearAbsorption,
            CarbAbsorptionModel::PiecewiseLinear => &PiecewiseLinearAbsorption,
        }
    }
}

/// The normalized absorption curve and the gram-level helpers shared by all
/// shapes.
pub trait AbsorptionShape {
    /// The fraction of total carbohydrates absorbed at a fraction of the
    /// total absorption time.
    fn percent_absorption_at_percent_time(&self, percent_time: f64) -> f64;

    /// The inverse of `percent_absorption_at_percent_time`.
    fn percent_time_at_percent_absorption(&self, percent_absorption: f64) -> f64;

    /// The normalized instantaneous absorption rate at a fraction of the
    /// total absorption time.
    fn percent_rate_at_percent_time(&self, percent_time: f64) -> f64;

    /// Grams absorbed from `total` at `time` seconds into an absorption
    /// lasting `absorption_time` seconds.
    fn absorbed_carbs(&self, total: f64, time: f64, absorption_time: f64) -> f64 {
        total * self.percent_absorption_at_percent_time(time / absorption_time)
    }

    /// Grams not yet absorbed from `total` at `time` seconds in.
    fn unabsorbed_carbs(&self, total: f64, time: f64, absorption_time: f64) -> f64 {
        total * (1.0 - self.percent_absorption_at_percent_time(time / absorption_time))
    }

    /// The total absorption time implied by observing `percent_absorption`
    /// at `time` seconds in.
    fn absorption_time(&self, percent_absorption: f64, time: f64) -> f64 {
        let percent_time = self
            .percent_time_at_percent_absorption(percent_absorption)
            .max(f64::EPSILON);
        time / percent_time
    }

    /// The elapsed time needed to absorb `percent_absorption` at the modeled
    /// rate over `total_absorption_time`.
    fn time_to_absorb(&self, percent_absorption: f64, total_absorption_time: f64) -> f64 {
        self.percent_time_at_percent_absorption(percent_absorption) * total_absorption_time
    }
}

/// Linear absorption as a factor of reported duration.
pub struct LinearAbsorption;

impl AbsorptionShape for LinearAbsorption {
    fn percent_absorption_at_percent_time(&self, percent_time: f64) -> f64 {
        percent_time.clamp(0.0, 1.0)
    }

    fn percent_time_at_percent_absorption(&self, percent_absorption: f64) -> f64 {
        percent_absorption.clamp(0.0, 1.0)
    }

    fn percent_rate_at_percent_time(&self, percent_time: f64) -> f64 {
        if percent_time > 0.0 && percent_time <= 1.0 {
            1.0
        } else {
            0.0
        }
    }
}

/// Nonlinear absorption where the rate rises linearly from zero to a plateau
/// at `PERCENT_END_OF_RISE`, holds constant until `PERCENT_START_OF_FALL`,
/// then decays linearly to zero at the end of absorption. The cumulative
/// curve is therefore quadratic-linear-quadratic, and each phase inverts in
/// closed form.
pub struct PiecewiseLinearAbsorption;

impl PiecewiseLinearAbsorption {
    pub const PERCENT_END_OF_RISE: f64 = 0.15;
    pub const PERCENT_START_OF_FALL: f64 = 0.5;

    fn scale() -> f64 {
        2.0 / (1.0 + Self::PERCENT_START_OF_FALL - Self::PERCENT_END_OF_RISE)
    }
}

impl AbsorptionShape for PiecewiseLinearAbsorption {
    fn percent_absorption_at_percent_time(&self, percent_time: f64) -> f64 {
        let rise = Self::PERCENT_END_OF_RISE;
        let fall = Self::PERCENT_START_OF_FALL;
        let scale = Self::scale();

        match percent_time {
            t if t <= 0.0 => 0.0,
            t if t < rise => 0.5 * scale * t.powi(2) / rise,
            t if t < fall => scale * (t - 0.5 * rise),
            t if t < 1.0 => {
                scale
                    * (fall - 0.5 * rise
                        + (t - fall) * (1.0 - 0.5 * (t - fall) / (1.0 - fall)))
            }
            _ => 1.0,
        }
    }

    fn percent_time_at_percent_absorption(&self, percent_absorption: f64) -> f64 {
        let rise = Self::PERCENT_END_OF_RISE;
        let fall = Self::PERCENT_START_OF_FALL;
        let scale = Self::scale();

        match percent_absorption {
            a if a <= 0.0 => 0.0,
            a if a < 0.5 * scale * rise => (2.0 * rise * a / scale).sqrt(),
            a if a < scale * (fall - 0.5 * rise) => 0.5 * rise + a / scale,
            a if a < 1.0 => 1.0 - ((1.0 - fall) * (1.0 + fall - rise) * (1.0 - a)).sqrt(),
            _ => 1.0,
        }
    }

    fn percent_rate_at_percent_time(&self, percent_time: f64) -> f64 {
        let rise = Self::PERCENT_END_OF_RISE;
        let fall = Self::PERCENT_START_OF_FALL;
        let scale = Self::scale();

        match percent_time {
            t if t <= 0.0 => 0.0,
            t if t < rise => scale * t / rise,
            t if t < fall => scale,
            t if t < 1.0 => scale * ((1.0 - t) / (1.0 - fall)),
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shapes() -> Vec<&'static dyn AbsorptionShape> {
        vec![&LinearAbsorption, &PiecewiseLinearAbsorption]
    }

    #[test]
    fn endpoints_are_clamped() {
        for shape in shapes() {
            assert_eq!(shape.percent_absorption_at_percent_time(-0.5), 0.0);
            assert_eq!(shape.percent_absorption_at_percent_time(0.0), 0.0);
            assert_eq!(shape.percent_absorption_at_percent_time(1.0), 1.0);
            assert_eq!(shape.percent_absorption_at_percent_time(1.5), 1.0);
        }
    }

    #[test]
    fn absorption_is_monotone_non_decreasing() {
        for shape in shapes() {
            let mut previous = 0.0;
            for step in 0..=100 {
                let t = step as f64 / 100.0;
                let absorbed = shape.percent_absorption_at_percent_time(t);
                assert!(
                    absorbed >= previous,
                    "absorption decreased at t={t}: {absorbed} < {previous}"
                );
                previous = absorbed;
            }
        }
    }

    #[test]
    fn inverse_round_trips_within_tolerance() {
        for shape in shapes() {
            for step in 1..100 {
                let a = step as f64 / 100.0;
                let t = shape.percent_time_at_percent_absorption(a);
                let back = shape.percent_absorption_at_percent_time(t);
                assert!(
                    (back - a).abs() < 1e-10,
                    "round trip failed at a={a}: got {back}"
                );
            }
        }
    }

    #[test]
    fn piecewise_rate_plateaus_between_rise_and_fall() {
        let shape = PiecewiseLinearAbsorption;
        let scale = PiecewiseLinearAbsorption::scale();

        assert_eq!(shape.percent_rate_at_percent_time(0.2), scale);
        assert_eq!(shape.percent_rate_at_percent_time(0.4), scale);
        assert!(shape.percent_rate_at_percent_time(0.1) < scale);
        assert!(shape.percent_rate_at_percent_time(0.9) < scale);
        assert_eq!(shape.percent_rate_at_percent_time(1.0), 0.0);
    }

    #[test]
    fn absorbed_and_unabsorbed_are_complementary() {
        for shape in shapes() {
            let total = 60.0;
            let absorption_time = 3.0 * 3600.0;
            for step in 0..=10 {
                let time = step as f64 * absorption_time / 10.0;
                let absorbed = shape.absorbed_carbs(total, time, absorption_time);
                let unabsorbed = shape.unabsorbed_carbs(total, time, absorption_time);
                assert!((absorbed + unabsorbed - total).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn absorption_time_guards_against_zero_percent_time() {
        let shape = LinearAbsorption;
        let time = shape.absorption_time(0.0, 3600.0);
        assert!(time.is_finite());
        assert!(time > 0.0);
    }

    #[test]
    fn linear_absorbed_carbs_at_half_time() {
        let shape = LinearAbsorption;
        let absorbed = shape.absorbed_carbs(40.0, 5400.0, 10800.0);
        assert_eq!(absorbed, 20.0);
    }
}
