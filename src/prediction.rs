//! The control-loop pipeline
//!
//! One deterministic pass per control-loop tick: model insulin and carb
//! effects from history, derive counteraction and momentum, fold recent
//! unexplained drift back in through retrospective correction, merge into a
//! glucose prediction, and size a bounded dose recommendation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::carbs::status::{
    clamped_carbs_on_board, dynamic_glucose_effects, map_to_statuses, CarbModelSettings,
    CarbStatus, CarbValue,
};
use crate::carbs::{CarbAbsorptionModel, CarbEntry};
use crate::glucose::math::{
    combined_sums, counteraction_effects, linear_momentum_effect, predict_glucose, subtracting,
    DEFAULT_DELTA, MOMENTUM_DATA_INTERVAL, MOMENTUM_DURATION,
};
use crate::glucose::types::{
    GlucoseChange, GlucoseEffect, GlucoseEffectVelocity, GlucoseSample, PredictedGlucoseValue,
};
use crate::insulin::dose_math::{
    insulin_correction, AutomaticDoseRecommendation, InsulinCorrection, ManualBolusRecommendation,
    TempBasalRecommendation,
};
use crate::insulin::model::{InsulinModel, InsulinType};
use crate::insulin::types::{annotate_doses, dose_glucose_effects, InsulinDose};
use crate::timeline::{
    add_seconds, closest_prior, filter_date_range, seconds_between, AbsoluteScheduleValue,
    GlucoseRangeTimeline, TimelineValue,
};
use crate::retrospective::{
    IntegralRetrospectiveCorrection, RetrospectiveCorrection, StandardRetrospectiveCorrection,
};
use crate::units::{Quantity, Unit};

/// How stale the newest discrepancy may be before retrospective correction
/// is disabled.
pub const RECENCY_INTERVAL: f64 = 15.0 * 60.0;

/// The trailing window discrepancies are summed over.
pub const RETROSPECTIVE_CORRECTION_GROUPING_INTERVAL: f64 = 30.0 * 60.0;

/// How long the standard retrospective correction effect decays over.
pub const RETROSPECTIVE_CORRECTION_EFFECT_DURATION: f64 = 60.0 * 60.0;

/// The duration of a recommended temp basal.
pub const TEMP_BASAL_DURATION: f64 = 30.0 * 60.0;

/// The fraction of a computed bolus delivered automatically when no explicit
/// application factor is configured.
pub const DEFAULT_BOLUS_APPLICATION_FACTOR: f64 = 0.4;

/// The dosing surface the caller wants out of this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum RecommendationType {
    TempBasal,
    #[default]
    AutomaticBolus,
    ManualBolus,
}

/// Everything one control-loop tick consumes, assembled by the history and
/// settings providers.
#[derive(Debug, Clone)]
pub struct AlgorithmInput {
    pub prediction_start: DateTime<Utc>,
    pub glucose_history: Vec<GlucoseSample>,
    pub doses: Vec<InsulinDose>,
    pub carb_entries: Vec<CarbEntry>,
    /// U/hr.
    pub basal: Vec<AbsoluteScheduleValue<f64>>,
    pub sensitivity: Vec<AbsoluteScheduleValue<Quantity>>,
    /// g/U.
    pub carb_ratio: Vec<AbsoluteScheduleValue<f64>>,
    pub target: GlucoseRangeTimeline,
    pub suspend_threshold: Option<Quantity>,
    pub max_bolus: f64,
    pub max_basal_rate: f64,
    pub use_integral_retrospective_correction: bool,
    pub include_positive_velocity_and_rc: bool,
    pub use_mid_absorption_isf: bool,
    pub carb_absorption_model: CarbAbsorptionModel,
    pub recommendation_insulin_type: InsulinType,
    pub recommendation_type: RecommendationType,
    pub automatic_bolus_application_factor: Option<f64>,
    /// When set, a glucose jump larger than this between the two newest
    /// samples disables momentum for the tick.
    pub gradual_transitions_threshold: Option<Quantity>,
}

/// The dose recommendation for the tick, shaped by the requested
/// recommendation type.
#[derive(Debug, Clone, PartialEq)]
pub enum DoseRecommendation {
    TempBasal(TempBasalRecommendation),
    ManualBolus(ManualBolusRecommendation),
    Automatic(AutomaticDoseRecommendation),
}

/// The tick's outputs: the recommendation, the corrected prediction, and the
/// intermediate timelines for diagnostics.
#[derive(Debug, Clone)]
pub struct AlgorithmOutput {
    pub recommendation: DoseRecommendation,
    pub correction: InsulinCorrection,
    pub predicted_glucose: Vec<PredictedGlucoseValue>,
    pub carb_statuses: Vec<CarbStatus>,
    pub carbs_on_board: Option<CarbValue>,
    pub insulin_effects: Vec<GlucoseEffect>,
    pub counteraction_effects: Vec<GlucoseEffectVelocity>,
    pub carb_effects: Vec<GlucoseEffect>,
    pub retrospective_correction_effects: Vec<GlucoseEffect>,
    pub momentum_effects: Vec<GlucoseEffect>,
}

/// Rebuilds an effect timeline keeping only its non-positive per-step
/// deltas. Used to make momentum and retrospective correction strictly
/// conservative when positive contributions are excluded.
fn clamped_to_non_positive_deltas(effects: &[GlucoseEffect]) -> Vec<GlucoseEffect> {
    let unit = Unit::MilligramsPerDeciliter;
    let mut clamped = Vec::with_capacity(effects.len());
    let mut previous_input = 0.0;
    let mut value = 0.0;

    for (index, effect) in effects.iter().enumerate() {
        let input = effect.quantity.double_value(unit);
        if index == 0 {
            value = input;
        } else {
            value += (input - previous_input).min(0.0);
        }
        previous_input = input;
        clamped.push(GlucoseEffect::new(effect.start_date, Quantity::new(unit, value)));
    }

    clamped
}

/// Extends a prediction at its final value so it covers `end`, stepping on
/// the delta grid. Doseless ticks otherwise produce predictions shorter than
/// the insulin effect duration the correction scan requires.
fn padded_to(
    mut prediction: Vec<PredictedGlucoseValue>,
    end: DateTime<Utc>,
    delta: f64,
) -> Vec<PredictedGlucoseValue> {
    while let Some(last) = prediction.last().copied() {
        if last.start_date >= end {
            break;
        }
        prediction.push(PredictedGlucoseValue {
            start_date: add_seconds(last.start_date, delta),
            quantity: last.quantity,
        });
    }
    prediction
}

/// Runs one control-loop tick, anchored at `prediction_start`. A glucose
/// history that ends before the anchor disqualifies momentum and
/// retrospective correction through their recency windows rather than
/// shifting the tick backward.
///
/// Panics on caller contract violations: an empty glucose history, or
/// schedules that do not cover the dates the pipeline queries.
pub fn run(input: &AlgorithmInput) -> AlgorithmOutput {
    let latest_glucose = input
        .glucose_history
        .last()
        .unwrap_or_else(|| panic!("glucose history must not be empty"));

    let start_date = input.prediction_start;
    let model = input.recommendation_insulin_type.model();
    let prediction_end = add_seconds(start_date, model.effect_duration());

    // Insulin effects over the whole history window, through the prediction
    // horizon
    let annotated_doses = annotate_doses(&input.doses, &input.basal);
    let insulin_effects = dose_glucose_effects(
        &annotated_doses,
        &input.sensitivity,
        input.glucose_history.first().map(|s| s.start_date),
        Some(prediction_end),
        DEFAULT_DELTA,
        input.use_mid_absorption_isf,
    );

    // Glucose change unexplained by insulin, attributed to carb absorption
    let counteraction = counteraction_effects(&input.glucose_history, &insulin_effects);

    let carb_settings = CarbModelSettings {
        absorption_model: input.carb_absorption_model,
        ..CarbModelSettings::default()
    };
    let carb_statuses = map_to_statuses(
        &input.carb_entries,
        &counteraction,
        &input.carb_ratio,
        &input.sensitivity,
        &carb_settings,
    );
    let carb_effects = dynamic_glucose_effects(
        &carb_statuses,
        None,
        Some(prediction_end),
        &input.carb_ratio,
        &input.sensitivity,
        &carb_settings,
        DEFAULT_DELTA,
    );

    // What carbs still fail to explain becomes the retrospective discrepancy
    let discrepancies = subtracting(&counteraction, &carb_effects);
    let summed_discrepancies = filter_summed(
        &combined_sums(&discrepancies, RETROSPECTIVE_CORRECTION_GROUPING_INTERVAL),
        start_date,
    );

    let mut rc: Box<dyn RetrospectiveCorrection> = if input.use_integral_retrospective_correction {
        Box::new(IntegralRetrospectiveCorrection::new(
            RETROSPECTIVE_CORRECTION_EFFECT_DURATION,
        ))
    } else {
        Box::new(StandardRetrospectiveCorrection::new(
            RETROSPECTIVE_CORRECTION_EFFECT_DURATION,
        ))
    };
    let mut retrospective_effects = rc.compute_effect(
        start_date,
        latest_glucose.quantity,
        Some(&summed_discrepancies),
        RECENCY_INTERVAL,
        RETROSPECTIVE_CORRECTION_GROUPING_INTERVAL,
    );

    let mut momentum_effects = if momentum_allowed(input) {
        let momentum_window = filter_date_range(
            &input.glucose_history,
            add_seconds(start_date, -MOMENTUM_DATA_INTERVAL),
            start_date,
        )
        .into_iter()
        .cloned()
        .collect::<Vec<_>>();

        linear_momentum_effect(&momentum_window, MOMENTUM_DURATION, DEFAULT_DELTA, None)
    } else {
        Vec::new()
    };

    if !input.include_positive_velocity_and_rc {
        retrospective_effects = clamped_to_non_positive_deltas(&retrospective_effects);
        momentum_effects = clamped_to_non_positive_deltas(&momentum_effects);
    }

    let predicted_glucose = padded_to(
        predict_glucose(
            start_date,
            latest_glucose.quantity,
            &momentum_effects,
            &[&insulin_effects, &carb_effects, &retrospective_effects],
        ),
        prediction_end,
        DEFAULT_DELTA,
    );

    // Size the dose
    let suspend_threshold = input.suspend_threshold.unwrap_or_else(|| {
        closest_prior(&input.target, start_date)
            .unwrap_or_else(|| panic!("target timeline must cover date {start_date}"))
            .value
            .lower_bound
    });

    let correction = insulin_correction(
        &predicted_glucose,
        start_date,
        &input.target,
        suspend_threshold,
        &input.sensitivity,
        &model,
    );

    let neutral_basal_rate = closest_prior(&input.basal, start_date)
        .unwrap_or_else(|| panic!("basal rate timeline must cover date {start_date}"))
        .value;

    let recommendation = match input.recommendation_type {
        RecommendationType::TempBasal => DoseRecommendation::TempBasal(correction.as_temp_basal(
            neutral_basal_rate,
            input.max_basal_rate,
            TEMP_BASAL_DURATION,
            None,
        )),
        RecommendationType::ManualBolus => {
            DoseRecommendation::ManualBolus(correction.as_manual_bolus(input.max_bolus, None))
        }
        RecommendationType::AutomaticBolus => {
            let factor = input
                .automatic_bolus_application_factor
                .unwrap_or(DEFAULT_BOLUS_APPLICATION_FACTOR);
            DoseRecommendation::Automatic(AutomaticDoseRecommendation {
                basal_adjustment: None,
                bolus_units: correction.as_partial_bolus(factor, input.max_bolus, None),
            })
        }
    };

    AlgorithmOutput {
        recommendation,
        correction,
        predicted_glucose,
        carbs_on_board: clamped_carbs_on_board(&carb_statuses),
        carb_statuses,
        insulin_effects,
        counteraction_effects: counteraction,
        carb_effects,
        retrospective_correction_effects: retrospective_effects,
        momentum_effects,
    }
}

fn momentum_allowed(input: &AlgorithmInput) -> bool {
    let threshold = match input.gradual_transitions_threshold {
        Some(threshold) => threshold,
        None => return true,
    };

    let history = &input.glucose_history;
    if history.len() < 2 {
        return true;
    }

    let unit = Unit::MilligramsPerDeciliter;
    let jump = history[history.len() - 1].quantity.double_value(unit)
        - history[history.len() - 2].quantity.double_value(unit);
    jump.abs() <= threshold.double_value(unit)
}

/// Keeps summed discrepancies ending at or before the prediction start, so a
/// stale tail never masquerades as current drift.
fn filter_summed(summed: &[GlucoseChange], start_date: DateTime<Utc>) -> Vec<GlucoseChange> {
    summed
        .iter()
        .filter(|change| seconds_between(start_date, change.end_date()) >= 0.0)
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insulin::dose_math::BolusRecommendationNotice;
    use crate::timeline::{hours, minutes, GlucoseRange};
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

    fn flat_history(end: DateTime<Utc>, mgdl: f64, count: usize) -> Vec<GlucoseSample> {
        (0..count)
            .map(|i| {
                sample(
                    add_seconds(end, -((count - 1 - i) as f64) * DEFAULT_DELTA),
                    mgdl,
                )
            })
            .collect()
    }

    fn base_input(now: DateTime<Utc>) -> AlgorithmInput {
        let day_before = add_seconds(now, -hours(24.0));
        let day_after = add_seconds(now, hours(24.0));
        let schedule = |value: f64| {
            vec![AbsoluteScheduleValue {
                start_date: day_before,
                end_date: day_after,
                value,
            }]
        };

        AlgorithmInput {
            prediction_start: now,
            glucose_history: flat_history(now, 110.0, 13),
            doses: Vec::new(),
            carb_entries: Vec::new(),
            basal: schedule(1.0),
            sensitivity: vec![AbsoluteScheduleValue {
                start_date: day_before,
                end_date: day_after,
                value: Quantity::new(Unit::MilligramsPerDeciliterPerUnit, 50.0),
            }],
            carb_ratio: schedule(10.0),
            target: vec![AbsoluteScheduleValue {
                start_date: day_before,
                end_date: day_after,
                value: GlucoseRange::new(Quantity::mgdl(100.0), Quantity::mgdl(120.0)),
            }],
            suspend_threshold: Some(Quantity::mgdl(70.0)),
            max_bolus: 5.0,
            max_basal_rate: 5.0,
            use_integral_retrospective_correction: false,
            include_positive_velocity_and_rc: true,
            use_mid_absorption_isf: false,
            carb_absorption_model: CarbAbsorptionModel::PiecewiseLinear,
            recommendation_insulin_type: InsulinType::Novolog,
            recommendation_type: RecommendationType::AutomaticBolus,
            automatic_bolus_application_factor: None,
            gradual_transitions_threshold: None,
        }
    }

    #[test]
    fn quiet_history_stays_in_range_with_no_dose() {
        let now = date("2024-06-01T12:00:00Z");
        let output = run(&base_input(now));

        assert_eq!(output.correction, InsulinCorrection::InRange);
        match output.recommendation {
            DoseRecommendation::Automatic(ref auto) => {
                assert_eq!(auto.bolus_units, 0.0);
                assert!(auto.basal_adjustment.is_none());
            }
            ref other => panic!("expected automatic recommendation, got {other:?}"),
        }

        // Flat history, no effects: the prediction holds the current value
        let unit = Unit::MilligramsPerDeciliter;
        for value in &output.predicted_glucose {
            assert!((value.quantity.double_value(unit) - 110.0).abs() < 1.0);
        }

        // And it covers the full insulin effect duration
        let model = InsulinType::Novolog.model();
        let last = output.predicted_glucose.last().unwrap();
        assert!(seconds_between(last.start_date, now) >= model.effect_duration());
    }

    #[test]
    fn fresh_carbs_drive_a_positive_bolus() {
        let now = date("2024-06-01T12:00:00Z");
        let mut input = base_input(now);
        input.carb_entries = vec![CarbEntry {
            quantity: Quantity::grams(50.0),
            start_date: add_seconds(now, -minutes(5.0)),
            absorption_time: Some(hours(3.0)),
        }];

        let output = run(&input);

        match &output.correction {
            InsulinCorrection::AboveRange { units, .. } => assert!(*units > 0.0),
            other => panic!("expected aboveRange, got {other:?}"),
        }
        match output.recommendation {
            DoseRecommendation::Automatic(ref auto) => assert!(auto.bolus_units > 0.0),
            ref other => panic!("expected automatic recommendation, got {other:?}"),
        }

        // The projected carb effect raises the eventual prediction
        let unit = Unit::MilligramsPerDeciliter;
        let last = output.predicted_glucose.last().unwrap();
        assert!(last.quantity.double_value(unit) > 120.0);
    }

    #[test]
    fn low_glucose_suspends_and_zeroes_the_temp_basal() {
        let now = date("2024-06-01T12:00:00Z");
        let mut input = base_input(now);
        input.glucose_history = flat_history(now, 65.0, 13);
        input.recommendation_type = RecommendationType::TempBasal;

        let output = run(&input);

        assert!(matches!(output.correction, InsulinCorrection::Suspend { .. }));
        match output.recommendation {
            DoseRecommendation::TempBasal(ref basal) => {
                assert_eq!(basal.units_per_hour, 0.0);
            }
            ref other => panic!("expected temp basal, got {other:?}"),
        }
    }

    #[test]
    fn manual_bolus_carries_a_notice_when_in_range() {
        let now = date("2024-06-01T12:00:00Z");
        let mut input = base_input(now);
        input.recommendation_type = RecommendationType::ManualBolus;

        let output = run(&input);
        match output.recommendation {
            DoseRecommendation::ManualBolus(ref bolus) => {
                assert_eq!(bolus.amount, 0.0);
                assert_eq!(
                    bolus.notice,
                    Some(BolusRecommendationNotice::PredictedGlucoseInRange)
                );
            }
            ref other => panic!("expected manual bolus, got {other:?}"),
        }
    }

    #[test]
    fn rising_glucose_builds_momentum_into_the_prediction() {
        let now = date("2024-06-01T12:00:00Z");
        let mut input = base_input(now);
        // Steady rise of 5 mg/dL per 5 minutes
        input.glucose_history = (0..13)
            .map(|i| {
                sample(
                    add_seconds(now, -((12 - i) as f64) * DEFAULT_DELTA),
                    110.0 + 5.0 * i as f64 - 60.0,
                )
            })
            .collect();

        let output = run(&input);
        assert!(!output.momentum_effects.is_empty());

        // The near-term prediction continues the rise
        let unit = Unit::MilligramsPerDeciliter;
        let starting = output.predicted_glucose[0].quantity.double_value(unit);
        let near = output.predicted_glucose[1].quantity.double_value(unit);
        assert!(near > starting);
    }

    #[test]
    fn gradual_transitions_threshold_gates_momentum() {
        let now = date("2024-06-01T12:00:00Z");
        let mut input = base_input(now);
        let mut history = flat_history(now, 110.0, 13);
        // A 40 mg/dL jump in the newest sample
        history.last_mut().unwrap().quantity = Quantity::mgdl(150.0);
        input.glucose_history = history;
        input.gradual_transitions_threshold = Some(Quantity::mgdl(20.0));

        let output = run(&input);
        assert!(output.momentum_effects.is_empty());
    }

    #[test]
    fn excluding_positive_contributions_never_raises_the_prediction() {
        let now = date("2024-06-01T12:00:00Z");
        let mut input = base_input(now);
        // Rising history produces positive momentum and discrepancies
        input.glucose_history = (0..13)
            .map(|i| {
                sample(
                    add_seconds(now, -((12 - i) as f64) * DEFAULT_DELTA),
                    80.0 + 4.0 * i as f64,
                )
            })
            .collect();

        let mut inclusive = input.clone();
        inclusive.include_positive_velocity_and_rc = true;
        let mut conservative = input;
        conservative.include_positive_velocity_and_rc = false;

        let inclusive_out = run(&inclusive);
        let conservative_out = run(&conservative);

        let unit = Unit::MilligramsPerDeciliter;
        let eventual_inclusive = inclusive_out
            .predicted_glucose
            .last()
            .unwrap()
            .quantity
            .double_value(unit);
        let eventual_conservative = conservative_out
            .predicted_glucose
            .last()
            .unwrap()
            .quantity
            .double_value(unit);
        assert!(eventual_conservative <= eventual_inclusive + 1e-9);
    }

    #[test]
    fn stale_history_anchors_the_tick_on_prediction_start() {
        let now = date("2024-06-01T12:00:00Z");
        let mut input = base_input(now);
        // Newest sample is half an hour old
        input.glucose_history = flat_history(add_seconds(now, -minutes(30.0)), 110.0, 13);

        let output = run(&input);

        // The prediction starts at the requested anchor, not the stale
        // sample, and the recency-gated effects drop out
        assert_eq!(output.predicted_glucose[0].start_date, now);
        assert!(output.momentum_effects.is_empty());
        assert!(output.retrospective_correction_effects.is_empty());
        assert_eq!(output.correction, InsulinCorrection::InRange);
    }

    #[test]
    fn suspend_threshold_defaults_to_target_lower_bound() {
        let now = date("2024-06-01T12:00:00Z");
        let mut input = base_input(now);
        input.suspend_threshold = None;
        // 95 is below the 100 lower bound, which becomes the suspend floor
        input.glucose_history = flat_history(now, 95.0, 13);

        let output = run(&input);
        assert!(matches!(output.correction, InsulinCorrection::Suspend { .. }));
    }
}
