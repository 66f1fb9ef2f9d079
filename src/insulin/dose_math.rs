//! Insulin dose correction
//!
//! A single forward pass over the predicted glucose trajectory classifies it
//! as in range, above range, entirely below range, or below the suspend
//! threshold, and sizes the minimum insulin action that brings the
//! prediction to target. The decision is a closed union; callers handle all
//! four cases.

use chrono::{DateTime, Utc};

use crate::glucose::types::PredictedGlucoseValue;
use crate::insulin::model::InsulinModel;
use crate::timeline::{closest_prior, hours, seconds_between, AbsoluteScheduleValue, GlucoseRangeTimeline};
use crate::units::{Quantity, Unit};

/// The fraction of the insulin effect duration during which the correction
/// targets the range's lower bound before blending toward its average.
const TARGET_BLEND_INFLECTION: f64 = 0.5;

/// The correction decision for a glucose prediction.
#[derive(Debug, Clone, PartialEq)]
pub enum InsulinCorrection {
    /// The prediction stays within range; no correction is needed.
    InRange,
    /// The eventual prediction exceeds its range; `units` is the smallest
    /// positive correction sufficient for some prediction point.
    AboveRange {
        min: PredictedGlucoseValue,
        correcting: PredictedGlucoseValue,
        min_target: Quantity,
        units: f64,
    },
    /// Both the minimum and the eventual prediction fall below their range
    /// lower bounds; `units` is the (negative) correction at the minimum.
    EntirelyBelowRange {
        min: PredictedGlucoseValue,
        min_target: Quantity,
        units: f64,
    },
    /// Some prediction point falls below the suspend threshold. Overrides
    /// everything else.
    Suspend { min: PredictedGlucoseValue },
}

impl InsulinCorrection {
    fn units(&self) -> f64 {
        match self {
            InsulinCorrection::AboveRange { units, .. }
            | InsulinCorrection::EntirelyBelowRange { units, .. } => *units,
            InsulinCorrection::InRange | InsulinCorrection::Suspend { .. } => 0.0,
        }
    }

    /// Expresses the correction as a temp basal over `duration` seconds,
    /// relative to the scheduled neutral rate and clamped to
    /// `[0, max_basal_rate]`. A suspend decision always yields a zero rate.
    pub fn as_temp_basal(
        &self,
        neutral_basal_rate: f64,
        max_basal_rate: f64,
        duration: f64,
        rate_rounder: Option<&dyn Fn(f64) -> f64>,
    ) -> TempBasalRecommendation {
        let mut rate = self.units() / (duration / hours(1.0));
        match self {
            InsulinCorrection::Suspend { .. } => rate = 0.0,
            _ => rate += neutral_basal_rate,
        }

        rate = rate.max(0.0).min(max_basal_rate);
        if let Some(round) = rate_rounder {
            rate = round(rate).max(0.0).min(max_basal_rate);
        }

        TempBasalRecommendation {
            units_per_hour: rate,
            duration,
        }
    }

    /// Expresses the correction as a manual bolus clamped to
    /// `[0, max_bolus]`, with an advisory notice explaining a
    /// smaller-than-naive dose.
    pub fn as_manual_bolus(
        &self,
        max_bolus: f64,
        volume_rounder: Option<&dyn Fn(f64) -> f64>,
    ) -> ManualBolusRecommendation {
        let notice = match self {
            InsulinCorrection::Suspend { min } => {
                Some(BolusRecommendationNotice::GlucoseBelowSuspendThreshold { min_glucose: *min })
            }
            InsulinCorrection::EntirelyBelowRange { min, .. } => {
                Some(BolusRecommendationNotice::AllGlucoseBelowTarget { min_glucose: *min })
            }
            InsulinCorrection::AboveRange {
                min,
                min_target,
                units,
                ..
            } => {
                if *units > 0.0 && min.quantity < *min_target {
                    Some(BolusRecommendationNotice::PredictedGlucoseBelowTarget {
                        min_glucose: *min,
                    })
                } else {
                    None
                }
            }
            InsulinCorrection::InRange => Some(BolusRecommendationNotice::PredictedGlucoseInRange),
        };

        let mut amount = self.units().max(0.0).min(max_bolus);
        if let Some(round) = volume_rounder {
            amount = round(amount).max(0.0).min(max_bolus);
        }

        ManualBolusRecommendation { amount, notice }
    }

    /// The automatic partial-bolus volume: positive correction units scaled
    /// by `application_factor`, rounded, and clamped to `[0, max_bolus]`.
    pub fn as_partial_bolus(
        &self,
        application_factor: f64,
        max_bolus: f64,
        volume_rounder: Option<&dyn Fn(f64) -> f64>,
    ) -> f64 {
        let partial = self.units().max(0.0) * application_factor;
        let rounded = match volume_rounder {
            Some(round) => round(partial),
            None => partial,
        };
        rounded.max(0.0).min(max_bolus)
    }
}

/// A temporary basal rate recommendation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempBasalRecommendation {
    pub units_per_hour: f64,
    /// Seconds.
    pub duration: f64,
}

impl TempBasalRecommendation {
    /// The cancel recommendation: zero units for zero duration.
    pub fn cancel() -> Self {
        TempBasalRecommendation {
            units_per_hour: 0.0,
            duration: 0.0,
        }
    }
}

/// Why a bolus recommendation is smaller than the naive correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BolusRecommendationNotice {
    GlucoseBelowSuspendThreshold { min_glucose: PredictedGlucoseValue },
    AllGlucoseBelowTarget { min_glucose: PredictedGlucoseValue },
    PredictedGlucoseBelowTarget { min_glucose: PredictedGlucoseValue },
    PredictedGlucoseInRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManualBolusRecommendation {
    pub amount: f64,
    pub notice: Option<BolusRecommendationNotice>,
}

/// A combined automatic dosing recommendation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AutomaticDoseRecommendation {
    pub basal_adjustment: Option<TempBasalRecommendation>,
    pub bolus_units: f64,
}

/// The correction target as a function of elapsed insulin effect: the range
/// lower bound through the inflection, blending linearly to the range
/// average at full effect duration.
fn target_glucose_value(percent_effect_duration: f64, min_value: f64, max_value: f64) -> f64 {
    if percent_effect_duration <= TARGET_BLEND_INFLECTION {
        return min_value;
    }
    if percent_effect_duration >= 1.0 {
        return max_value;
    }

    let slope = (max_value - min_value) / (1.0 - TARGET_BLEND_INFLECTION);
    min_value + slope * (percent_effect_duration - TARGET_BLEND_INFLECTION)
}

/// The insulin sensitivity effected over `[date, end]`: for each schedule
/// segment overlapping the span, the fraction of insulin effect landing
/// within the segment times the segment's sensitivity.
///
/// Panics when the schedule does not cover the span.
fn effected_sensitivity(
    insulin_sensitivity: &[AbsoluteScheduleValue<Quantity>],
    model: &dyn InsulinModel,
    date: DateTime<Utc>,
    end: DateTime<Utc>,
) -> f64 {
    let unit = Unit::MilligramsPerDeciliterPerUnit;

    let covered = insulin_sensitivity
        .first()
        .map_or(false, |first| first.start_date <= date)
        && insulin_sensitivity
            .last()
            .map_or(false, |last| last.end_date >= end);
    if !covered {
        panic!("insulin sensitivity timeline must cover {date} through {end}");
    }

    insulin_sensitivity.iter().fold(0.0, |acc, segment| {
        let start = segment.start_date.max(date);
        let segment_end = segment.end_date.min(end);
        if segment_end <= start {
            return acc;
        }

        let percent_effected = model.percent_effect_remaining(seconds_between(start, date))
            - model.percent_effect_remaining(seconds_between(segment_end, date));
        acc + percent_effected * segment.value.double_value(unit)
    })
}

/// Classifies a glucose prediction and sizes the minimum correction.
///
/// The scan covers prediction points at or after `date` through one insulin
/// effect duration. Any point below `suspend_threshold` short-circuits to a
/// suspend decision.
///
/// Panics when the prediction is empty, does not extend through the insulin
/// effect duration, or a schedule does not cover a queried date; these are
/// caller contract violations.
pub fn insulin_correction(
    prediction: &[PredictedGlucoseValue],
    date: DateTime<Utc>,
    correction_range: &GlucoseRangeTimeline,
    suspend_threshold: Quantity,
    insulin_sensitivity: &[AbsoluteScheduleValue<Quantity>],
    model: &dyn InsulinModel,
) -> InsulinCorrection {
    let unit = Unit::MilligramsPerDeciliter;

    let last = prediction
        .last()
        .unwrap_or_else(|| panic!("prediction must not be empty"));
    if seconds_between(last.start_date, date) < model.effect_duration() {
        panic!(
            "prediction ending {} must cover the full insulin effect duration from {}",
            last.start_date, date
        );
    }

    let range_at = |at: DateTime<Utc>| {
        closest_prior(correction_range, at)
            .unwrap_or_else(|| panic!("correction range timeline must cover date {at}"))
            .value
    };

    let suspend_value = suspend_threshold.double_value(unit);

    let mut min_glucose: Option<PredictedGlucoseValue> = None;
    let mut eventual_glucose: Option<PredictedGlucoseValue> = None;
    let mut correcting_glucose: Option<PredictedGlucoseValue> = None;
    let mut min_correction_units: Option<f64> = None;

    for predicted in prediction {
        if predicted.start_date < date {
            continue;
        }
        let time = seconds_between(predicted.start_date, date);
        if time > model.effect_duration() {
            break;
        }

        let predicted_value = predicted.quantity.double_value(unit);

        // Highest priority: any point below the suspend threshold
        if predicted_value < suspend_value {
            return InsulinCorrection::Suspend { min: *predicted };
        }

        eventual_glucose = Some(*predicted);
        if min_glucose.map_or(true, |min| predicted.quantity < min.quantity) {
            min_glucose = Some(*predicted);
        }

        let range = range_at(predicted.start_date);
        let target = target_glucose_value(
            time / model.effect_duration(),
            range.lower_bound.double_value(unit),
            range.average_value(unit),
        );

        let sensitivity = effected_sensitivity(
            insulin_sensitivity,
            model,
            date,
            predicted.start_date,
        );
        let units = (predicted_value - target) / sensitivity.max(f64::EPSILON);

        // Track the most conservative sufficient dose, not the largest
        if units > 0.0 && min_correction_units.map_or(true, |min| units < min) {
            min_correction_units = Some(units);
            correcting_glucose = Some(*predicted);
        }
    }

    let (min_glucose, eventual_glucose) = match (min_glucose, eventual_glucose) {
        (Some(min), Some(eventual)) => (min, eventual),
        _ => panic!("prediction must extend beyond the correction date {date}"),
    };

    let min_range = range_at(min_glucose.start_date);
    let eventual_range = range_at(eventual_glucose.start_date);

    if min_glucose.quantity < min_range.lower_bound
        && eventual_glucose.quantity < eventual_range.lower_bound
    {
        // Corrections from below range aim for the range average outright
        let target = min_range.average_value(unit);
        let sensitivity =
            effected_sensitivity(insulin_sensitivity, model, date, min_glucose.start_date);
        let units =
            (min_glucose.quantity.double_value(unit) - target) / sensitivity.max(f64::EPSILON);

        return InsulinCorrection::EntirelyBelowRange {
            min: min_glucose,
            min_target: min_range.lower_bound,
            units,
        };
    }

    if eventual_glucose.quantity > eventual_range.upper_bound {
        if let (Some(units), Some(correcting)) = (min_correction_units, correcting_glucose) {
            return InsulinCorrection::AboveRange {
                min: min_glucose,
                correcting,
                min_target: eventual_range.lower_bound,
                units,
            };
        }
    }

    InsulinCorrection::InRange
}
