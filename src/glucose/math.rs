//! Glucose math
//!
//! Counteraction effect velocities (observed glucose change minus modeled
//! effect change), short-term linear momentum, decaying correction effects,
//! and the prediction merge that layers effect timelines onto a starting
//! glucose value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::glucose::types::{
    GlucoseChange, GlucoseEffect, GlucoseEffectVelocity, GlucoseSample, PredictedGlucoseValue,
};
use crate::timeline::{add_seconds, seconds_between, simulation_date_range};
use crate::units::{Quantity, Unit};

/// How much recent glucose history momentum is calculated from.
pub const MOMENTUM_DATA_INTERVAL: f64 = 15.0 * 60.0;

/// How far forward the momentum effect is projected.
pub const MOMENTUM_DURATION: f64 = 15.0 * 60.0;

/// The discretization interval of simulated effect timelines.
pub const DEFAULT_DELTA: f64 = 5.0 * 60.0;

/// The default clamp on momentum velocity, in mg/dL per minute, based on
/// physiologically plausible rates of change.
pub const MAX_MOMENTUM_VELOCITY_MGDL_PER_MIN: f64 = 4.0;

/// The minimum spacing between paired glucose samples in the counteraction
/// scan. Closer pairs amplify sensor noise into large velocities.
const MIN_COUNTERACTION_INTERVAL: f64 = 4.0 * 60.0;

/// Ordinary least-squares slope and intercept. Not suited for large datasets.
fn linear_regression(points: &[(f64, f64)]) -> (f64, f64) {
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;
    let count = points.len() as f64;

    for (x, y) in points {
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }

    let slope = (count * sum_xy - sum_x * sum_y) / (count * sum_x2 - sum_x * sum_x);
    let intercept = (sum_y * sum_x2 - sum_x * sum_xy) / (count * sum_x2 - sum_x * sum_x);

    (slope, intercept)
}

fn contains_calibrations(samples: &[GlucoseSample]) -> bool {
    samples.iter().any(|s| s.is_display_only)
}

fn has_single_provenance(samples: &[GlucoseSample]) -> bool {
    match samples.first() {
        Some(first) => samples
            .iter()
            .all(|s| s.provenance_identifier == first.provenance_identifier),
        None => true,
    }
}

/// Whether the samples are spaced closely enough, on average, to be treated
/// as one contiguous series.
fn is_continuous(samples: &[GlucoseSample], interval: f64) -> bool {
    match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => {
            seconds_between(last.start_date, first.start_date).abs()
                < interval * samples.len() as f64
        }
        _ => false,
    }
}

/// Calculates the short-term predicted momentum effect using linear
/// regression over recent samples.
///
/// Requires at least three continuous, single-provenance, non-calibration
/// samples; otherwise returns no effect. The regression slope is clamped to
/// `velocity_maximum` (defaults to 4 mg/dL/min).
pub fn linear_momentum_effect(
    samples: &[GlucoseSample],
    duration: f64,
    delta: f64,
    velocity_maximum: Option<Quantity>,
) -> Vec<GlucoseEffect> {
    let velocity_max = velocity_maximum.unwrap_or(Quantity::new(
        Unit::MilligramsPerDeciliterPerMinute,
        MAX_MOMENTUM_VELOCITY_MGDL_PER_MIN,
    ));

    if samples.len() < 3
        || !is_continuous(samples, DEFAULT_DELTA)
        || contains_calibrations(samples)
        || !has_single_provenance(samples)
    {
        return Vec::new();
    }

    let first = &samples[0];
    let last = &samples[samples.len() - 1];
    let (start_date, end_date) = simulation_date_range(last.start_date, duration, delta);

    let unit = Unit::MilligramsPerDeciliter;
    let points: Vec<(f64, f64)> = samples
        .iter()
        .map(|s| {
            (
                seconds_between(s.start_date, first.start_date),
                s.quantity.double_value(unit),
            )
        })
        .collect();

    let (slope, _intercept) = linear_regression(&points);

    if !slope.is_finite() {
        return Vec::new();
    }

    let limited_slope = slope.min(velocity_max.double_value(Unit::MilligramsPerDeciliterPerSecond));

    let mut values = Vec::new();
    let mut date = start_date;

    while date <= end_date {
        let value = seconds_between(date, last.start_date).max(0.0) * limited_slope;
        values.push(GlucoseEffect::new(date, Quantity::new(unit, value)));
        date = add_seconds(date, delta);
    }

    values
}

/// Calculates a timeline of effect velocities (glucose per time) observed in
/// glucose readings that counteract the modeled effects.
///
/// Samples are paired with the next sample at least four minutes later,
/// requiring identical provenance and neither endpoint flagged display-only.
/// Gaps are skipped, not interpolated. Both sequences must be in ascending
/// date order.
pub fn counteraction_effects(
    samples: &[GlucoseSample],
    effects: &[GlucoseEffect],
) -> Vec<GlucoseEffectVelocity> {
    let unit = Unit::MilligramsPerDeciliter;
    let mut velocities = Vec::new();

    if samples.is_empty() || effects.is_empty() {
        return velocities;
    }

    let mut effect_index = 0;

    let first_effect_start = effects[0].start_date;
    let start_idx = match samples.iter().position(|s| s.start_date >= first_effect_start) {
        Some(idx) => idx,
        None => return velocities,
    };

    let mut start_glucose_idx = start_idx;
    let mut end_glucose_idx = start_idx + 1;

    while end_glucose_idx < samples.len() {
        let start_glucose = &samples[start_glucose_idx];
        let end_glucose = &samples[end_glucose_idx];

        let glucose_change =
            end_glucose.quantity.double_value(unit) - start_glucose.quantity.double_value(unit);
        let time_interval = seconds_between(end_glucose.start_date, start_glucose.start_date);

        if time_interval <= MIN_COUNTERACTION_INTERVAL {
            end_glucose_idx += 1;
            continue;
        }

        let pair = (start_glucose_idx, end_glucose_idx);
        start_glucose_idx = end_glucose_idx;
        end_glucose_idx += 1;

        let (start_glucose, end_glucose) = (&samples[pair.0], &samples[pair.1]);

        if start_glucose.provenance_identifier != end_glucose.provenance_identifier
            || start_glucose.is_display_only
            || end_glucose.is_display_only
        {
            continue;
        }

        if effect_index >= effects.len() {
            break;
        }

        // Find the modeled effect values bracketing this glucose pair
        let mut start_effect: Option<&GlucoseEffect> = None;
        let mut end_effect: Option<&GlucoseEffect> = None;

        for effect in &effects[effect_index..] {
            if start_effect.is_none() && effect.start_date >= start_glucose.start_date {
                start_effect = Some(effect);
            } else if end_effect.is_none() && effect.start_date >= end_glucose.start_date {
                end_effect = Some(effect);
                break;
            }

            effect_index += 1;
        }

        let (start_effect_value, end_effect_value) = match (start_effect, end_effect) {
            (Some(s), Some(e)) => (s.quantity.double_value(unit), e.quantity.double_value(unit)),
            _ => break,
        };

        let effect_change = end_effect_value - start_effect_value;
        let discrepancy = glucose_change - effect_change;

        velocities.push(GlucoseEffectVelocity::new(
            start_glucose.start_date,
            end_glucose.start_date,
            Quantity::new(
                GlucoseEffectVelocity::PER_SECOND_UNIT,
                discrepancy / time_interval,
            ),
        ));
    }

    velocities
}

/// Calculates a timeline of predicted glucose effects from a starting value,
/// assuming an effect velocity that decays linearly to zero over `duration`.
///
/// The first value carries the starting glucose quantity; subsequent values
/// integrate the decaying velocity at `delta` resolution.
pub fn decay_effect(
    starting_date: DateTime<Utc>,
    starting_quantity: Quantity,
    rate: Quantity,
    duration: f64,
    delta: f64,
) -> Vec<GlucoseEffect> {
    let (start_date, end_date) = simulation_date_range(starting_date, duration, delta);

    let unit = Unit::MilligramsPerDeciliter;
    let intercept = rate.double_value(GlucoseEffectVelocity::PER_SECOND_UNIT);
    let decay_start_date = add_seconds(start_date, delta);
    let slope = -intercept / (duration - delta);

    let mut values = vec![GlucoseEffect::new(start_date, starting_quantity)];
    let mut last_value = starting_quantity.double_value(unit);
    let mut date = decay_start_date;

    while date <= end_date {
        let velocity = intercept + slope * seconds_between(date, decay_start_date);
        let value = last_value + velocity * delta;
        values.push(GlucoseEffect::new(date, Quantity::new(unit, value)));
        last_value = value;
        date = add_seconds(date, delta);
    }

    values
}

/// Linearly interpolates a cumulative effect timeline at `date`, clamping to
/// the endpoints outside its range.
fn interpolated_effect_value(effects: &[GlucoseEffect], date: DateTime<Utc>) -> f64 {
    let unit = Unit::MilligramsPerDeciliter;

    match effects {
        [] => 0.0,
        [only] => only.quantity.double_value(unit),
        _ => {
            let first = &effects[0];
            let last = &effects[effects.len() - 1];

            if date <= first.start_date {
                return first.quantity.double_value(unit);
            }
            if date >= last.start_date {
                return last.quantity.double_value(unit);
            }

            for pair in effects.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                if date >= a.start_date && date <= b.start_date {
                    let span = seconds_between(b.start_date, a.start_date);
                    if span <= 0.0 {
                        return b.quantity.double_value(unit);
                    }
                    let fraction = seconds_between(date, a.start_date) / span;
                    let av = a.quantity.double_value(unit);
                    let bv = b.quantity.double_value(unit);
                    return av + fraction * (bv - av);
                }
            }

            last.quantity.double_value(unit)
        }
    }
}

/// Subtracts a modeled cumulative effect timeline from a velocity timeline,
/// producing the residual velocities over the same intervals.
pub fn subtracting(
    velocities: &[GlucoseEffectVelocity],
    effects: &[GlucoseEffect],
) -> Vec<GlucoseEffectVelocity> {
    velocities
        .iter()
        .map(|velocity| {
            let interval = seconds_between(velocity.end_date, velocity.start_date);
            let effect_delta = interpolated_effect_value(effects, velocity.end_date)
                - interpolated_effect_value(effects, velocity.start_date);

            let residual = velocity
                .quantity
                .double_value(GlucoseEffectVelocity::PER_SECOND_UNIT)
                - effect_delta / interval;

            GlucoseEffectVelocity::new(
                velocity.start_date,
                velocity.end_date,
                Quantity::new(GlucoseEffectVelocity::PER_SECOND_UNIT, residual),
            )
        })
        .collect()
}

/// Sums adjacent effect velocities into trailing buckets of `duration`.
///
/// Each output change covers the window of velocities ending at its interval;
/// the last element is the most recent summed discrepancy.
pub fn combined_sums(velocities: &[GlucoseEffectVelocity], duration: f64) -> Vec<GlucoseChange> {
    let mut sums: Vec<GlucoseChange> = Vec::with_capacity(velocities.len());
    let mut last_valid_index = 0;

    for velocity in velocities {
        let effect = velocity.effect();
        let change = GlucoseChange {
            start_date: velocity.start_date,
            end_date: velocity.end_date,
            quantity: effect.quantity,
        };
        sums.push(change);

        let newest = sums.len() - 1;
        for index in last_valid_index..newest {
            if sums[index].start_date >= add_seconds(velocity.end_date, -duration) {
                sums[index].append(&change);
            } else {
                last_valid_index += 1;
            }
        }
    }

    sums
}

/// Merges cumulative effect timelines onto a starting glucose value,
/// optionally blending in a momentum effect.
///
/// Each effect timeline contributes its per-step deltas; the momentum effect
/// linearly hands off to the other effects across its own duration, starting
/// fully momentum-driven and ending fully model-driven.
pub fn predict_glucose(
    starting_date: DateTime<Utc>,
    starting_quantity: Quantity,
    momentum: &[GlucoseEffect],
    effects: &[&[GlucoseEffect]],
) -> Vec<PredictedGlucoseValue> {
    let unit = Unit::MilligramsPerDeciliter;
    let mut effect_values_at_date: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();

    for timeline in effects {
        let mut previous_effect_value = timeline
            .first()
            .map(|e| e.quantity.double_value(unit))
            .unwrap_or(0.0);

        for effect in *timeline {
            let value = effect.quantity.double_value(unit);
            *effect_values_at_date.entry(effect.start_date).or_insert(0.0) +=
                value - previous_effect_value;
            previous_effect_value = value;
        }
    }

    // Blend the momentum effect linearly into the rest of the effects. This
    // assumes the first momentum point occurs on or before the starting
    // glucose.
    if momentum.len() > 2 {
        let time_delta = seconds_between(momentum[1].start_date, momentum[0].start_date);
        let blend_count = (momentum.len() - 2) as f64;

        let momentum_offset = seconds_between(starting_date, momentum[0].start_date);

        let blend_slope = 1.0 / blend_count;
        let blend_offset = momentum_offset / time_delta * blend_slope;

        let mut previous_effect_value = momentum[0].quantity.double_value(unit);

        for (index, effect) in momentum.iter().enumerate() {
            let value = effect.quantity.double_value(unit);
            let effect_value_change = value - previous_effect_value;

            let split = ((momentum.len() - index) as f64 / blend_count - blend_slope
                + blend_offset)
                .clamp(0.0, 1.0);

            let model_delta = effect_values_at_date
                .get(&effect.start_date)
                .copied()
                .unwrap_or(0.0);
            let blended = (1.0 - split) * model_delta + split * effect_value_change;

            effect_values_at_date.insert(effect.start_date, blended);
            previous_effect_value = value;
        }
    }

    let mut prediction = vec![PredictedGlucoseValue {
        start_date: starting_date,
        quantity: starting_quantity,
    }];

    for (date, delta) in &effect_values_at_date {
        if *date <= starting_date {
            continue;
        }
        let last_value = prediction
            .last()
            .map(|p| p.quantity.double_value(unit))
            .unwrap_or(0.0);
        prediction.push(PredictedGlucoseValue {
            start_date: *date,
            quantity: Quantity::new(unit, last_value + delta),
        });
    }

    prediction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::minutes;
    use pretty_assertions::assert_eq;

    fn date(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn sample(start: DateTime<Utc>, mgdl: f64) -> GlucoseSample {
        GlucoseSample {
            start_date: start,
            quantity: Quantity::mgdl(mgdl),
            provenance_identifier: "cgm".to_string(),
            is_display_only: false,
            was_user_entered: false,
            trend_rate: None,
        }
    }

    fn sample_series(start: DateTime<Utc>, values: &[f64]) -> Vec<GlucoseSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| sample(add_seconds(start, i as f64 * DEFAULT_DELTA), *v))
            .collect()
    }

    #[test]
    fn momentum_from_rising_glucose_is_positive() {
        let start = date("2024-06-01T12:00:00Z");
        let samples = sample_series(start, &[100.0, 105.0, 110.0, 115.0]);

        let effects = linear_momentum_effect(&samples, MOMENTUM_DURATION, DEFAULT_DELTA, None);
        assert!(!effects.is_empty());

        // 1 mg/dL/min slope projected 15 minutes: final effect near 15 mg/dL
        let last = effects.last().unwrap();
        let value = last.quantity.double_value(Unit::MilligramsPerDeciliter);
        assert!((value - 15.0).abs() < 1.0, "value was {value}");
    }

    #[test]
    fn momentum_requires_three_samples() {
        let start = date("2024-06-01T12:00:00Z");
        let samples = sample_series(start, &[100.0, 105.0]);
        assert!(
            linear_momentum_effect(&samples, MOMENTUM_DURATION, DEFAULT_DELTA, None).is_empty()
        );
    }

    #[test]
    fn momentum_rejects_mixed_provenance() {
        let start = date("2024-06-01T12:00:00Z");
        let mut samples = sample_series(start, &[100.0, 105.0, 110.0, 115.0]);
        samples[2].provenance_identifier = "other-cgm".to_string();
        assert!(
            linear_momentum_effect(&samples, MOMENTUM_DURATION, DEFAULT_DELTA, None).is_empty()
        );
    }

    #[test]
    fn momentum_rejects_calibration_samples() {
        let start = date("2024-06-01T12:00:00Z");
        let mut samples = sample_series(start, &[100.0, 105.0, 110.0, 115.0]);
        samples[1].is_display_only = true;
        assert!(
            linear_momentum_effect(&samples, MOMENTUM_DURATION, DEFAULT_DELTA, None).is_empty()
        );
    }

    #[test]
    fn momentum_clamps_to_velocity_maximum() {
        let start = date("2024-06-01T12:00:00Z");
        // 10 mg/dL/min rise, twice the physiological clamp
        let samples = sample_series(start, &[100.0, 150.0, 200.0, 250.0]);

        let effects = linear_momentum_effect(&samples, MOMENTUM_DURATION, DEFAULT_DELTA, None);
        let last = effects.last().unwrap();
        let value = last.quantity.double_value(Unit::MilligramsPerDeciliter);
        // 4 mg/dL/min for 15 minutes
        assert!((value - 60.0).abs() < 1.0, "value was {value}");
    }

    #[test]
    fn counteraction_with_flat_effects_tracks_observed_change() {
        let start = date("2024-06-01T12:00:00Z");
        let samples = sample_series(start, &[100.0, 103.0, 106.0]);
        let effects: Vec<GlucoseEffect> = (0..4)
            .map(|i| {
                GlucoseEffect::new(add_seconds(start, i as f64 * DEFAULT_DELTA), Quantity::mgdl(0.0))
            })
            .collect();

        let velocities = counteraction_effects(&samples, &effects);
        assert_eq!(velocities.len(), 2);

        // 3 mg/dL over 5 minutes, unexplained by the flat modeled effect
        let v = velocities[0]
            .quantity
            .double_value(Unit::MilligramsPerDeciliterPerMinute);
        assert!((v - 0.6).abs() < 1e-9, "velocity was {v}");
    }

    #[test]
    fn counteraction_skips_display_only_pairs() {
        let start = date("2024-06-01T12:00:00Z");
        let mut samples = sample_series(start, &[100.0, 103.0, 106.0]);
        samples[1].is_display_only = true;
        let effects: Vec<GlucoseEffect> = (0..4)
            .map(|i| {
                GlucoseEffect::new(add_seconds(start, i as f64 * DEFAULT_DELTA), Quantity::mgdl(0.0))
            })
            .collect();

        let velocities = counteraction_effects(&samples, &effects);
        assert!(velocities.is_empty());
    }

    #[test]
    fn counteraction_nets_out_modeled_effect() {
        let start = date("2024-06-01T12:00:00Z");
        let samples = sample_series(start, &[100.0, 103.0]);
        // Modeled effect already explains 2 mg/dL of the rise
        let effects = vec![
            GlucoseEffect::new(start, Quantity::mgdl(0.0)),
            GlucoseEffect::new(add_seconds(start, DEFAULT_DELTA), Quantity::mgdl(2.0)),
        ];

        let velocities = counteraction_effects(&samples, &effects);
        assert_eq!(velocities.len(), 1);

        let discrepancy = velocities[0].effect();
        let value = discrepancy.quantity.double_value(Unit::MilligramsPerDeciliter);
        assert!((value - 1.0).abs() < 1e-9, "discrepancy was {value}");
    }

    #[test]
    fn decay_effect_starts_at_glucose_value_and_decays() {
        let start = date("2024-06-01T12:00:00Z");
        let rate = Quantity::new(Unit::MilligramsPerDeciliterPerMinute, 1.0);
        let effects = decay_effect(start, Quantity::mgdl(110.0), rate, minutes(60.0), DEFAULT_DELTA);

        assert_eq!(effects[0].quantity.double_value(Unit::MilligramsPerDeciliter), 110.0);
        assert_eq!(effects.len(), 13);

        // Velocity decays linearly, so each step contributes less than the last
        let unit = Unit::MilligramsPerDeciliter;
        let deltas: Vec<f64> = effects
            .windows(2)
            .map(|w| w[1].quantity.double_value(unit) - w[0].quantity.double_value(unit))
            .collect();
        for pair in deltas.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-9);
        }
    }

    #[test]
    fn subtracting_removes_modeled_effect_deltas() {
        let start = date("2024-06-01T12:00:00Z");
        let velocity = GlucoseEffectVelocity::new(
            start,
            add_seconds(start, 300.0),
            Quantity::new(Unit::MilligramsPerDeciliterPerSecond, 0.01),
        );
        let effects = vec![
            GlucoseEffect::new(start, Quantity::mgdl(0.0)),
            GlucoseEffect::new(add_seconds(start, 300.0), Quantity::mgdl(3.0)),
        ];

        let residual = subtracting(&[velocity], &effects);
        let value = residual[0].effect().quantity.double_value(Unit::MilligramsPerDeciliter);
        // 3 mg/dL observed minus 3 mg/dL modeled
        assert!(value.abs() < 1e-9, "residual was {value}");
    }

    #[test]
    fn combined_sums_accumulate_trailing_window() {
        let start = date("2024-06-01T12:00:00Z");
        let velocities: Vec<GlucoseEffectVelocity> = (0..4)
            .map(|i| {
                let s = add_seconds(start, i as f64 * DEFAULT_DELTA);
                GlucoseEffectVelocity::new(
                    s,
                    add_seconds(s, DEFAULT_DELTA),
                    Quantity::new(Unit::MilligramsPerDeciliterPerSecond, 1.0 / 300.0),
                )
            })
            .collect();

        let sums = combined_sums(&velocities, minutes(30.0));
        assert_eq!(sums.len(), 4);

        // Each velocity integrates to 1 mg/dL; the first bucket accumulates
        // everything within its trailing 30-minute window
        let first = sums[0].quantity.double_value(Unit::MilligramsPerDeciliter);
        assert!((first - 4.0).abs() < 1e-9, "first sum was {first}");
        let last = sums[3].quantity.double_value(Unit::MilligramsPerDeciliter);
        assert!((last - 1.0).abs() < 1e-9, "last sum was {last}");
    }

    #[test]
    fn predict_glucose_applies_effect_deltas_after_start() {
        let start = date("2024-06-01T12:00:00Z");
        let effects = vec![
            GlucoseEffect::new(start, Quantity::mgdl(0.0)),
            GlucoseEffect::new(add_seconds(start, 300.0), Quantity::mgdl(2.0)),
            GlucoseEffect::new(add_seconds(start, 600.0), Quantity::mgdl(5.0)),
        ];

        let prediction = predict_glucose(start, Quantity::mgdl(100.0), &[], &[&effects]);
        assert_eq!(prediction.len(), 3);
        assert_eq!(prediction[0].quantity.double_value(Unit::MilligramsPerDeciliter), 100.0);
        assert_eq!(prediction[1].quantity.double_value(Unit::MilligramsPerDeciliter), 102.0);
        assert_eq!(prediction[2].quantity.double_value(Unit::MilligramsPerDeciliter), 105.0);
    }

    #[test]
    fn predict_glucose_sums_multiple_timelines() {
        let start = date("2024-06-01T12:00:00Z");
        let rising = vec![
            GlucoseEffect::new(start, Quantity::mgdl(0.0)),
            GlucoseEffect::new(add_seconds(start, 300.0), Quantity::mgdl(4.0)),
        ];
        let falling = vec![
            GlucoseEffect::new(start, Quantity::mgdl(0.0)),
            GlucoseEffect::new(add_seconds(start, 300.0), Quantity::mgdl(-1.0)),
        ];

        let prediction =
            predict_glucose(start, Quantity::mgdl(100.0), &[], &[&rising, &falling]);
        assert_eq!(
            prediction[1].quantity.double_value(Unit::MilligramsPerDeciliter),
            103.0
        );
    }
}
