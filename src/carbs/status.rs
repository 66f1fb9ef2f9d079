//! Observed carb absorption
//!
//! Reconciles each carb entry's declared absorption against the absorption
//! observed from glucose counteraction, producing a `CarbStatus` that never
//! claims less than the minimum absorption guaranteed by the maximum allowed
//! absorption time, nor more than the entry total.

use chrono::{DateTime, Utc};

use crate::carbs::absorption::{AbsorptionShape, CarbAbsorptionModel};
use crate::carbs::{DEFAULT_ABSORPTION_TIME, DEFAULT_ABSORPTION_TIME_OVERRUN, DEFAULT_EFFECT_DELAY};
use crate::glucose::types::{GlucoseEffect, GlucoseEffectVelocity};
use crate::timeline::{
    add_seconds, closest_prior, date_ceiled_to_interval, date_floored_to_interval, seconds_between,
    AbsoluteScheduleValue, TimelineValue,
};
use crate::units::{Quantity, Unit};

/// A reported carbohydrate entry. Immutable once given to a computation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CarbEntry {
    pub quantity: Quantity,
    pub start_date: DateTime<Utc>,
    /// The declared absorption time, in seconds, if the user specified one.
    pub absorption_time: Option<f64>,
}

impl CarbEntry {
    pub fn grams(&self) -> f64 {
        self.quantity.double_value(Unit::Gram)
    }

    /// Grams still unabsorbed at `date` under the static model.
    pub fn carbs_on_board(
        &self,
        date: DateTime<Utc>,
        default_absorption_time: f64,
        delay: f64,
        shape: &dyn AbsorptionShape,
    ) -> f64 {
        let time = seconds_between(date, self.start_date);
        if time >= 0.0 {
            shape.unabsorbed_carbs(
                self.grams(),
                time - delay,
                self.absorption_time.unwrap_or(default_absorption_time),
            )
        } else {
            0.0
        }
    }

    /// Grams absorbed at `date` under the static model.
    pub fn absorbed_carbs(
        &self,
        date: DateTime<Utc>,
        absorption_time: f64,
        delay: f64,
        shape: &dyn AbsorptionShape,
    ) -> f64 {
        let time = seconds_between(date, self.start_date);
        shape.absorbed_carbs(self.grams(), time - delay, absorption_time)
    }
}

impl TimelineValue for CarbEntry {
    fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }
}

/// Grams of carbohydrate attributed over a date interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarbValue {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Grams.
    pub value: f64,
}

impl TimelineValue for CarbValue {
    fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    fn end_date(&self) -> DateTime<Utc> {
        self.end_date
    }
}

/// A quantity of carbs absorbed over a date interval, clamped within the
/// bounds the model allows.
#[derive(Debug, Clone, PartialEq)]
pub struct AbsorbedCarbValue {
    /// The quantity of carbs observed absorbing.
    pub observed: Quantity,
    /// The observed quantity clamped between the minimum guaranteed and the
    /// entry total.
    pub clamped: Quantity,
    /// The quantity entered as eaten.
    pub total: Quantity,
    /// The quantity expected to still absorb.
    pub remaining: Quantity,
    /// The interval over which absorption was observed.
    pub observed_start: DateTime<Utc>,
    pub observed_end: DateTime<Utc>,
    /// The predicted time, in seconds, for the remaining carbs to absorb.
    pub estimated_time_remaining: f64,
    /// The time, in seconds, required to absorb the observed carbs.
    pub time_to_absorb_observed_carbs: f64,
}

impl AbsorbedCarbValue {
    /// The total projected absorption interval.
    pub fn estimated_duration(&self) -> f64 {
        seconds_between(self.observed_end, self.observed_start) + self.estimated_time_remaining
    }

    /// Whether absorption is still in progress.
    pub fn is_active(&self) -> bool {
        self.estimated_time_remaining > 0.0
    }

    /// Observed absorption as a fraction of the total.
    pub fn observed_progress(&self) -> f64 {
        let total = self.total.double_value(Unit::Gram);
        if total > 0.0 {
            self.observed.double_value(Unit::Gram) / total
        } else {
            0.0
        }
    }
}

/// A carb entry paired with its reconciled absorption. Derived, never
/// mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct CarbStatus {
    pub entry: CarbEntry,
    pub absorption: AbsorbedCarbValue,
    /// The timeline of attributed grams, present only when observation kept
    /// pace with the minimum guaranteed absorption.
    pub observed_timeline: Option<Vec<CarbValue>>,
}

impl CarbStatus {
    /// Grams still unabsorbed at `date`, preferring the observed timeline
    /// and estimated remaining rate over the static model.
    pub fn dynamic_carbs_on_board(
        &self,
        date: DateTime<Utc>,
        delay: f64,
        shape: &dyn AbsorptionShape,
    ) -> f64 {
        if date < self.entry.start_date {
            return 0.0;
        }

        let total = self.absorption.total.double_value(Unit::Gram);
        (total - self.dynamic_absorbed_carbs(date, delay, shape)).max(0.0)
    }

    /// Grams absorbed at `date`: observed attribution through the
    /// observation window, then the remaining grams projected at the
    /// estimated remaining rate.
    pub fn dynamic_absorbed_carbs(
        &self,
        date: DateTime<Utc>,
        delay: f64,
        shape: &dyn AbsorptionShape,
    ) -> f64 {
        if date < self.entry.start_date {
            return 0.0;
        }

        let total = self.absorption.total.double_value(Unit::Gram);

        let timeline = match &self.observed_timeline {
            Some(timeline) if !timeline.is_empty() => timeline,
            _ => {
                // Observation lagged the guaranteed minimum; fall back to the
                // model over the estimated total duration
                let time = seconds_between(date, self.entry.start_date) - delay;
                return shape.absorbed_carbs(total, time, self.absorption.estimated_duration());
            }
        };

        let mut observed = 0.0;
        for value in timeline {
            if value.end_date <= date {
                observed += value.value;
            } else {
                if value.start_date < date {
                    let span = seconds_between(value.end_date, value.start_date);
                    if span > 0.0 {
                        observed += value.value * seconds_between(date, value.start_date) / span;
                    }
                }
                break;
            }
        }

        let observed_end = self.absorption.observed_end;
        if date > observed_end && self.absorption.estimated_time_remaining > 0.0 {
            let remaining = self.absorption.remaining.double_value(Unit::Gram);
            let time = seconds_between(date, observed_end);
            observed += shape.absorbed_carbs(
                remaining,
                time,
                self.absorption.estimated_time_remaining,
            );
        }

        observed.min(total)
    }
}

impl TimelineValue for CarbStatus {
    fn start_date(&self) -> DateTime<Utc> {
        self.entry.start_date
    }
}

/// Settings shared by the carb reconciliation pass.
#[derive(Debug, Clone)]
pub struct CarbModelSettings {
    pub absorption_model: CarbAbsorptionModel,
    /// Multiplier on the declared absorption time giving the maximum allowed
    /// absorption time.
    pub absorption_time_overrun: f64,
    /// Multiplier on the declared absorption time giving the initial assumed
    /// absorption time.
    pub initial_absorption_time_overrun: f64,
    pub default_absorption_time: f64,
    pub delay: f64,
    pub adaptive_absorption_rate_enabled: bool,
    /// Fraction of the initial absorption time to wait before the adaptive
    /// rate takes over, when enabled.
    pub adaptive_rate_standby_interval_fraction: f64,
}

impl Default for CarbModelSettings {
    fn default() -> Self {
        CarbModelSettings {
            absorption_model: CarbAbsorptionModel::PiecewiseLinear,
            absorption_time_overrun: DEFAULT_ABSORPTION_TIME_OVERRUN,
            initial_absorption_time_overrun: DEFAULT_ABSORPTION_TIME_OVERRUN,
            default_absorption_time: DEFAULT_ABSORPTION_TIME,
            delay: DEFAULT_EFFECT_DELAY,
            adaptive_absorption_rate_enabled: false,
            adaptive_rate_standby_interval_fraction: 0.2,
        }
    }
}

/// Aggregates the declared entry data, the absorption observed from glucose
/// counteraction, and the clamping bounds, to produce a `CarbStatus`.
pub struct CarbStatusBuilder {
    entry: CarbEntry,
    shape: &'static dyn AbsorptionShape,
    adaptive_absorption_rate_enabled: bool,
    adaptive_rate_standby_interval_fraction: f64,

    entry_grams: f64,
    /// The total glucose effect expected for this entry, in mg/dL.
    entry_effect: f64,
    /// mg/dL per gram.
    carbohydrate_sensitivity_factor: f64,
    initial_absorption_time: f64,
    max_absorption_time: f64,
    delay: f64,
    /// The maximum end date allowed for this entry's absorption.
    max_end_date: DateTime<Utc>,
    last_effect_date: DateTime<Utc>,

    observed_completion_date: Option<DateTime<Utc>>,
    observed_effect: f64,
    observed_timeline: Vec<CarbValue>,
}

impl CarbStatusBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entry: CarbEntry,
        carbohydrate_sensitivity_factor: f64,
        initial_absorption_time: f64,
        max_absorption_time: f64,
        delay: f64,
        last_effect_date: Option<DateTime<Utc>>,
        absorption_model: CarbAbsorptionModel,
        adaptive_absorption_rate_enabled: bool,
        adaptive_rate_standby_interval_fraction: f64,
    ) -> Self {
        let entry_grams = entry.grams();
        let max_end_date = add_seconds(entry.start_date, max_absorption_time + delay);
        let last_effect_date = max_end_date
            .min(last_effect_date.unwrap_or(entry.start_date).max(entry.start_date));

        CarbStatusBuilder {
            shape: absorption_model.shape(),
            adaptive_absorption_rate_enabled,
            adaptive_rate_standby_interval_fraction,
            entry_grams,
            entry_effect: entry_grams * carbohydrate_sensitivity_factor,
            carbohydrate_sensitivity_factor,
            initial_absorption_time,
            max_absorption_time,
            delay,
            max_end_date,
            last_effect_date,
            observed_completion_date: None,
            observed_effect: 0.0,
            observed_timeline: Vec::new(),
            entry,
        }
    }

    pub fn entry_start_date(&self) -> DateTime<Utc> {
        self.entry.start_date
    }

    pub fn max_end_date(&self) -> DateTime<Utc> {
        self.max_end_date
    }

    fn adaptive_rate_standby_interval(&self) -> f64 {
        self.initial_absorption_time * self.adaptive_rate_standby_interval_fraction
    }

    /// The minimum grams assumed absorbed at the last observation date: the
    /// model run at the slowest allowed rate, after the effect delay.
    fn min_predicted_grams(&self) -> f64 {
        let time = seconds_between(self.last_effect_date, self.entry.start_date) - self.delay;
        self.shape
            .absorbed_carbs(self.entry_grams, time, self.max_absorption_time)
    }

    fn observed_grams(&self) -> f64 {
        self.observed_effect / self.carbohydrate_sensitivity_factor
    }

    /// The effect remaining until 100% of the entry is observed, in mg/dL.
    pub fn remaining_effect(&self) -> f64 {
        (self.entry_effect - self.observed_effect).max(0.0)
    }

    fn observed_absorption_end(&self) -> DateTime<Utc> {
        self.observed_completion_date.unwrap_or(self.last_effect_date)
    }

    fn clamped_grams(&self) -> f64 {
        self.entry_grams
            .min(self.min_predicted_grams().max(self.observed_grams()))
    }

    fn percent_absorbed(&self) -> f64 {
        self.clamped_grams() / self.entry_grams
    }

    /// The time needed to absorb the observed grams. With the adaptive rate
    /// enabled and past the standby interval, this is simply the observation
    /// time; otherwise the static model's inverse applies. Clamped to the
    /// maximum absorption time.
    fn time_to_absorb_observed_carbs(&self) -> f64 {
        let time = seconds_between(self.last_effect_date, self.entry.start_date) - self.delay;
        if time <= 0.0 {
            return 0.0;
        }

        let time_to_absorb =
            if self.adaptive_absorption_rate_enabled && time > self.adaptive_rate_standby_interval() {
                time
            } else {
                self.shape
                    .time_to_absorb(self.percent_absorbed(), self.initial_absorption_time)
            };

        time_to_absorb.min(self.max_absorption_time)
    }

    /// The time needed for the remaining grams to absorb, never projecting
    /// total absorption past the maximum absorption time.
    fn estimated_time_remaining(&self) -> f64 {
        let time = seconds_between(self.last_effect_date, self.entry.start_date) - self.delay;
        if time <= 0.0 {
            return self.initial_absorption_time;
        }

        let not_to_exceed = (self.max_absorption_time - time).max(0.0);
        if not_to_exceed <= 0.0 {
            return 0.0;
        }

        let dynamic_time_remaining =
            if self.adaptive_absorption_rate_enabled && time > self.adaptive_rate_standby_interval() {
                // Extrapolate assuming the observed relative rate persists
                let dynamic_absorption_time =
                    self.shape.absorption_time(self.percent_absorbed(), time);
                dynamic_absorption_time - time
            } else {
                self.initial_absorption_time - self.time_to_absorb_observed_carbs()
            };

        dynamic_time_remaining.min(not_to_exceed)
    }

    /// The observed timeline, surfaced only when observation kept pace with
    /// the minimum guaranteed absorption.
    fn clamped_timeline(&self) -> Option<Vec<CarbValue>> {
        if self.observed_grams() >= self.min_predicted_grams() {
            Some(self.observed_timeline.clone())
        } else {
            None
        }
    }

    /// Increments the builder with the next glucose effect, in mg/dL.
    ///
    /// Must be called in ascending date order; effects starting before the
    /// entry are ignored.
    pub fn add_next_effect(&mut self, effect: f64, start: DateTime<Utc>, end: DateTime<Utc>) {
        if start < self.entry.start_date {
            return;
        }

        self.observed_effect += effect;

        if self.observed_completion_date.is_none() {
            // Record the timeline until 100% of the carbs are observed
            self.observed_timeline.push(CarbValue {
                start_date: start,
                end_date: end,
                value: effect / self.carbohydrate_sensitivity_factor,
            });

            if self.observed_effect + f32::EPSILON as f64 >= self.entry_effect {
                self.observed_completion_date = Some(end);
            }
        }
    }

    /// The modeled absorption rate, in grams per second, at `t` seconds
    /// after the entry start, under the current dynamic absorption time.
    pub fn absorption_rate_at_time(&self, t: f64) -> f64 {
        let observed_duration =
            seconds_between(self.observed_absorption_end(), self.entry.start_date);
        let dynamic_absorption_time =
            (observed_duration + self.estimated_time_remaining()).min(self.max_absorption_time);

        if dynamic_absorption_time <= 0.0 {
            return 0.0;
        }

        let percent_time = t / dynamic_absorption_time;
        let average_rate = self.entry_grams / dynamic_absorption_time;
        average_rate * self.shape.percent_rate_at_percent_time(percent_time)
    }

    /// The resulting status.
    pub fn result(&self) -> CarbStatus {
        let clamped = self.clamped_grams();
        let absorption = AbsorbedCarbValue {
            observed: Quantity::grams(self.observed_grams()),
            clamped: Quantity::grams(clamped),
            total: self.entry.quantity,
            remaining: Quantity::grams(self.entry_grams - clamped),
            observed_start: self.entry.start_date,
            observed_end: self.observed_absorption_end(),
            estimated_time_remaining: self.estimated_time_remaining(),
            time_to_absorb_observed_carbs: self.time_to_absorb_observed_carbs(),
        };

        CarbStatus {
            entry: self.entry.clone(),
            absorption,
            observed_timeline: self.clamped_timeline(),
        }
    }
}

/// Maps a sorted timeline of carb entries to their observed absorption,
/// driven by a chronological timeline of glucose effect velocities.
///
/// Velocities below zero are ignored (treated as insulin-driven). When
/// several entries are active for the same velocity sample, the positive
/// effect is apportioned in proportion to each entry's instantaneous modeled
/// absorption rate; leftover effect rolls onto the last active entry.
///
/// Panics if the sensitivity or carb-ratio schedule does not cover an entry
/// start date.
pub fn map_to_statuses(
    entries: &[CarbEntry],
    effect_velocities: &[GlucoseEffectVelocity],
    carb_ratio: &[AbsoluteScheduleValue<f64>],
    insulin_sensitivity: &[AbsoluteScheduleValue<Quantity>],
    settings: &CarbModelSettings,
) -> Vec<CarbStatus> {
    if entries.is_empty() {
        return Vec::new();
    }

    let glucose_unit = Unit::MilligramsPerDeciliter;
    let sensitivity_unit = Unit::MilligramsPerDeciliterPerUnit;
    let last_effect_date = effect_velocities.last().map(|v| v.end_date);

    let mut builders: Vec<CarbStatusBuilder> = entries
        .iter()
        .map(|entry| {
            let entry_carb_ratio = closest_prior(carb_ratio, entry.start_date)
                .unwrap_or_else(|| {
                    panic!(
                        "carb ratio timeline must cover carb entry start date {}",
                        entry.start_date
                    )
                });
            let entry_sensitivity = closest_prior(insulin_sensitivity, entry.start_date)
                .unwrap_or_else(|| {
                    panic!(
                        "insulin sensitivity timeline must cover carb entry start date {}",
                        entry.start_date
                    )
                });

            let declared = entry.absorption_time.unwrap_or(settings.default_absorption_time);

            CarbStatusBuilder::new(
                entry.clone(),
                entry_sensitivity.value.double_value(sensitivity_unit) / entry_carb_ratio.value,
                declared * settings.initial_absorption_time_overrun,
                declared * settings.absorption_time_overrun,
                settings.delay,
                last_effect_date,
                settings.absorption_model,
                settings.adaptive_absorption_rate_enabled,
                settings.adaptive_rate_standby_interval_fraction,
            )
        })
        .collect();

    for dx_effect in effect_velocities {
        if dx_effect.end_date <= dx_effect.start_date {
            continue;
        }

        // Entries whose absorption window overlaps this velocity sample.
        // Not necessarily contiguous, as max end dates vary between entries.
        let active: Vec<usize> = builders
            .iter()
            .enumerate()
            .filter(|(_, b)| {
                dx_effect.start_date < b.max_end_date()
                    && dx_effect.start_date >= b.entry_start_date()
            })
            .map(|(i, _)| i)
            .collect();

        // Ignore velocities < 0 when estimating carb absorption. These are
        // most likely the result of insulin absorption increases, such as
        // during activity.
        let mut effect_value = dx_effect
            .effect()
            .quantity
            .double_value(glucose_unit)
            .max(0.0);

        let mut total_rate: f64 = active
            .iter()
            .map(|&i| {
                let builder = &builders[i];
                let effect_time =
                    seconds_between(dx_effect.start_date, builder.entry_start_date());
                builder.absorption_rate_at_time(effect_time)
            })
            .sum();

        for (position, &index) in active.iter().enumerate() {
            let effect_time =
                seconds_between(dx_effect.start_date, builders[index].entry_start_date());
            let rate_at_effect_time = builders[index].absorption_rate_at_time(effect_time);

            let mut partial_effect_value = 0.0;
            if total_rate > 0.0 {
                partial_effect_value = builders[index]
                    .remaining_effect()
                    .min((rate_at_effect_time / total_rate) * effect_value);
                total_rate -= rate_at_effect_time;
                effect_value -= partial_effect_value;
            }

            builders[index].add_next_effect(
                partial_effect_value,
                dx_effect.start_date,
                dx_effect.end_date,
            );

            // Any remainder with no further entries to account it to counts
            // as overrun on the last active entry
            let is_last_active = position == active.len() - 1;
            if effect_value > f32::EPSILON as f64 && is_last_active {
                builders[index].add_next_effect(
                    effect_value,
                    dx_effect.start_date,
                    dx_effect.end_date,
                );
                effect_value = 0.0;
            }
        }

        // Leftover effect with no active entries is unattributed; whether it
        // should accrue to a phantom-meal bucket is unresolved upstream
        let _ = effect_value;
    }

    builders.iter().map(|b| b.result()).collect()
}

fn statuses_date_range(
    statuses: &[CarbStatus],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    default_absorption_time: f64,
    delay: f64,
    delta: f64,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    if statuses.is_empty() {
        return None;
    }

    if let (Some(start), Some(end)) = (start, end) {
        return Some((
            date_floored_to_interval(start, delta),
            date_ceiled_to_interval(end, delta),
        ));
    }

    let mut min_date = statuses[0].entry.start_date;
    let mut max_date = min_date;

    for status in statuses {
        if status.entry.start_date < min_date {
            min_date = status.entry.start_date;
        }

        let absorption_time = status
            .entry
            .absorption_time
            .unwrap_or(default_absorption_time);
        let end_date = add_seconds(status.entry.start_date, absorption_time + delay);
        if end_date > max_date {
            max_date = end_date;
        }
    }

    Some((
        date_floored_to_interval(start.unwrap_or(min_date), delta),
        date_ceiled_to_interval(end.unwrap_or(max_date), delta),
    ))
}

/// The carbs-on-board timeline across all statuses, honoring observed
/// absorption where available.
pub fn dynamic_carbs_on_board(
    statuses: &[CarbStatus],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    settings: &CarbModelSettings,
    delta: f64,
) -> Vec<CarbValue> {
    let range = statuses_date_range(
        statuses,
        start,
        end,
        settings.default_absorption_time,
        settings.delay,
        delta,
    );
    let (start_date, end_date) = match range {
        Some(range) => range,
        None => return Vec::new(),
    };

    let shape = settings.absorption_model.shape();
    let mut values = Vec::new();
    let mut date = start_date;

    while date <= end_date {
        let value: f64 = statuses
            .iter()
            .map(|s| s.dynamic_carbs_on_board(date, settings.delay, shape))
            .sum();
        values.push(CarbValue {
            start_date: date,
            end_date: date,
            value,
        });
        date = add_seconds(date, delta);
    }

    values
}

/// The glucose effect timeline from observed-and-projected carb absorption.
///
/// Panics if the sensitivity or carb-ratio schedule does not cover a status
/// start date.
pub fn dynamic_glucose_effects(
    statuses: &[CarbStatus],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    carb_ratio: &[AbsoluteScheduleValue<f64>],
    insulin_sensitivity: &[AbsoluteScheduleValue<Quantity>],
    settings: &CarbModelSettings,
    delta: f64,
) -> Vec<GlucoseEffect> {
    let range = statuses_date_range(
        statuses,
        start,
        end,
        settings.default_absorption_time,
        settings.delay,
        delta,
    );
    let (start_date, end_date) = match range {
        Some(range) => range,
        None => return Vec::new(),
    };

    let mgdl = Unit::MilligramsPerDeciliter;
    let shape = settings.absorption_model.shape();
    let mut values = Vec::new();
    let mut date = start_date;

    while date <= end_date {
        let value: f64 = statuses
            .iter()
            .map(|status| {
                let isf = closest_prior(insulin_sensitivity, status.entry.start_date)
                    .unwrap_or_else(|| {
                        panic!(
                            "insulin sensitivity timeline must cover carb status start date {}",
                            status.entry.start_date
                        )
                    });
                let cr = closest_prior(carb_ratio, status.entry.start_date).unwrap_or_else(|| {
                    panic!(
                        "carb ratio timeline must cover carb status start date {}",
                        status.entry.start_date
                    )
                });
                let csf = isf.value.double_value(Unit::MilligramsPerDeciliterPerUnit) / cr.value;

                csf * status.dynamic_absorbed_carbs(date, settings.delay, shape)
            })
            .sum();

        values.push(GlucoseEffect::new(date, Quantity::new(mgdl, value)));
        date = add_seconds(date, delta);
    }

    values
}

/// The quantity of carbs expected to still absorb at the last date of
/// observed absorption, across all statuses.
pub fn clamped_carbs_on_board(statuses: &[CarbStatus]) -> Option<CarbValue> {
    let first = statuses.first()?;

    let mut max_observed_end = first.absorption.observed_end;
    let mut remaining_total_grams = 0.0;

    for status in statuses {
        max_observed_end = max_observed_end.max(status.absorption.observed_end);
        remaining_total_grams += status.absorption.remaining.double_value(Unit::Gram);
    }

    Some(CarbValue {
        start_date: max_observed_end,
        end_date: max_observed_end,
        value: remaining_total_grams,
    })
}
