//! Insulin dose accounting
//!
//! Doses arrive from the pump history as delivered volumes. Basal doses are
//! meaningful only relative to the scheduled rate they deviate from, so they
//! are annotated against the basal schedule before any effect math runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::glucose::types::GlucoseEffect;
use crate::insulin::model::{InsulinModel, InsulinType};
use crate::timeline::{
    add_seconds, closest_prior, date_ceiled_to_interval, date_floored_to_interval, hours,
    seconds_between, AbsoluteScheduleValue, TimelineValue,
};
use crate::units::{Quantity, Unit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InsulinDeliveryType {
    Basal,
    Bolus,
}

/// A delivered insulin dose from the pump history.
#[derive(Debug, Clone, PartialEq)]
pub struct InsulinDose {
    pub delivery_type: InsulinDeliveryType,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Delivered insulin units.
    pub volume: f64,
    pub insulin_type: Option<InsulinType>,
    /// The scheduled basal rate this dose deviates from, in U/hr. Set by
    /// annotation; `None` until then.
    pub scheduled_basal_rate: Option<f64>,
}

impl InsulinDose {
    pub fn duration(&self) -> f64 {
        seconds_between(self.end_date, self.start_date)
    }

    /// Delivered units net of the scheduled neutral rate. Boluses count in
    /// full; basal doses count only their deviation from schedule.
    ///
    /// Panics when called on a basal dose that has not been annotated.
    pub fn net_units(&self) -> f64 {
        match self.delivery_type {
            InsulinDeliveryType::Bolus => self.volume,
            InsulinDeliveryType::Basal => {
                let scheduled_rate = self.scheduled_basal_rate.unwrap_or_else(|| {
                    panic!(
                        "basal dose starting {} must be annotated with its scheduled rate",
                        self.start_date
                    )
                });
                self.volume - scheduled_rate * self.duration() / hours(1.0)
            }
        }
    }

    fn model(&self) -> impl InsulinModel {
        self.insulin_type.unwrap_or_default().model()
    }
}

impl TimelineValue for InsulinDose {
    fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    fn end_date(&self) -> DateTime<Utc> {
        self.end_date
    }
}

/// Annotates basal doses with the scheduled rate in effect, splitting doses
/// that span a schedule boundary so each piece carries a single rate.
/// Boluses pass through unchanged.
///
/// Panics if the basal schedule does not cover a basal dose's span.
pub fn annotate_doses(
    doses: &[InsulinDose],
    basal: &[AbsoluteScheduleValue<f64>],
) -> Vec<InsulinDose> {
    let mut annotated = Vec::with_capacity(doses.len());

    for dose in doses {
        if dose.delivery_type == InsulinDeliveryType::Bolus {
            annotated.push(dose.clone());
            continue;
        }

        let total_duration = dose.duration();
        let segments: Vec<&AbsoluteScheduleValue<f64>> = basal
            .iter()
            .filter(|s| s.end_date > dose.start_date && s.start_date < dose.end_date)
            .collect();

        let covered = segments.first().map_or(false, |first| {
            first.start_date <= dose.start_date
                && segments.last().map_or(false, |last| last.end_date >= dose.end_date)
        });
        if !covered || total_duration <= 0.0 {
            panic!(
                "basal rate timeline must cover dose span {} to {}",
                dose.start_date, dose.end_date
            );
        }

        for segment in segments {
            let start = segment.start_date.max(dose.start_date);
            let end = segment.end_date.min(dose.end_date);
            let fraction = seconds_between(end, start) / total_duration;

            annotated.push(InsulinDose {
                delivery_type: dose.delivery_type,
                start_date: start,
                end_date: end,
                volume: dose.volume * fraction,
                insulin_type: dose.insulin_type,
                scheduled_basal_rate: Some(segment.value),
            });
        }
    }

    annotated
}

/// The fraction of a dose's effect landed by `date`, averaged over the
/// delivery interval at `delta` resolution. A dose shorter than `delta`
/// counts as an impulse at its start.
fn percent_effected(dose: &InsulinDose, model: &dyn InsulinModel, date: DateTime<Utc>, delta: f64) -> f64 {
    let span = dose.duration();
    if span <= delta {
        return 1.0 - model.percent_effect_remaining(seconds_between(date, dose.start_date));
    }

    let slice_count = (span / delta).ceil() as usize;
    let slice = span / slice_count as f64;

    (0..slice_count)
        .map(|i| {
            let slice_date = add_seconds(dose.start_date, (i as f64 + 0.5) * slice);
            1.0 - model.percent_effect_remaining(seconds_between(date, slice_date))
        })
        .sum::<f64>()
        / slice_count as f64
}

/// The cumulative glucose effect timeline of a dose history over an insulin
/// sensitivity schedule. Values are negative for net-positive insulin.
///
/// With `use_mid_absorption_isf` the sensitivity in effect at each effect
/// date applies; otherwise the sensitivity at each dose's start is fixed for
/// the dose's whole activity.
///
/// Panics if the sensitivity schedule does not cover a queried date.
pub fn dose_glucose_effects(
    doses: &[InsulinDose],
    insulin_sensitivity: &[AbsoluteScheduleValue<Quantity>],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    delta: f64,
    use_mid_absorption_isf: bool,
) -> Vec<GlucoseEffect> {
    if doses.is_empty() {
        return Vec::new();
    }

    let mut min_date = doses[0].start_date;
    let mut max_date = min_date;
    for dose in doses {
        min_date = min_date.min(dose.start_date);
        max_date = max_date.max(add_seconds(dose.end_date, dose.model().effect_duration()));
    }

    let start_date = date_floored_to_interval(start.unwrap_or(min_date), delta);
    let end_date = date_ceiled_to_interval(end.unwrap_or(max_date), delta);

    let sensitivity_unit = Unit::MilligramsPerDeciliterPerUnit;
    let isf_at = |date: DateTime<Utc>| -> f64 {
        closest_prior(insulin_sensitivity, date)
            .unwrap_or_else(|| {
                panic!("insulin sensitivity timeline must cover effect date {date}")
            })
            .value
            .double_value(sensitivity_unit)
    };

    let mut values = Vec::new();
    let mut date = start_date;

    while date <= end_date {
        let value: f64 = doses
            .iter()
            .map(|dose| {
                let isf = if use_mid_absorption_isf {
                    isf_at(date)
                } else {
                    isf_at(dose.start_date)
                };
                -dose.net_units() * isf * percent_effected(dose, &dose.model(), date, delta)
            })
            .sum();

        values.push(GlucoseEffect::new(
            date,
            Quantity::new(Unit::MilligramsPerDeciliter, value),
        ));
        date = add_seconds(date, delta);
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glucose::DEFAULT_DELTA;
    use crate::timeline::minutes;
    use pretty_assertions::assert_eq;

    fn date(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn bolus(start: DateTime<Utc>, units: f64) -> InsulinDose {
        InsulinDose {
            delivery_type: InsulinDeliveryType::Bolus,
            start_date: start,
            end_date: start,
            volume: units,
            insulin_type: None,
            scheduled_basal_rate: None,
        }
    }

    fn temp_basal(start: DateTime<Utc>, duration: f64, units: f64) -> InsulinDose {
        InsulinDose {
            delivery_type: InsulinDeliveryType::Basal,
            start_date: start,
            end_date: add_seconds(start, duration),
            volume: units,
            insulin_type: None,
            scheduled_basal_rate: None,
        }
    }

    fn isf_schedule(start: DateTime<Utc>, value: f64) -> Vec<AbsoluteScheduleValue<Quantity>> {
        vec![AbsoluteScheduleValue {
            start_date: add_seconds(start, -hours(24.0)),
            end_date: add_seconds(start, hours(24.0)),
            value: Quantity::new(Unit::MilligramsPerDeciliterPerUnit, value),
        }]
    }

    #[test]
    fn bolus_effect_converges_to_isf_drop() {
        let start = date("2024-06-01T12:00:00Z");
        let doses = [bolus(start, 1.0)];
        let effects = dose_glucose_effects(
            &doses,
            &isf_schedule(start, 50.0),
            None,
            None,
            DEFAULT_DELTA,
            false,
        );

        let unit = Unit::MilligramsPerDeciliter;
        assert_eq!(effects[0].quantity.double_value(unit), 0.0);
        let last = effects.last().unwrap().quantity.double_value(unit);
        assert!((last + 50.0).abs() < 1e-9, "final effect was {last}");

        // Cumulative effect only ever falls
        for pair in effects.windows(2) {
            assert!(pair[1].quantity.double_value(unit) <= pair[0].quantity.double_value(unit) + 1e-12);
        }
    }

    #[test]
    fn effect_is_zero_through_the_onset_delay() {
        let start = date("2024-06-01T12:00:00Z");
        let doses = [bolus(start, 2.0)];
        let effects = dose_glucose_effects(
            &doses,
            &isf_schedule(start, 50.0),
            None,
            None,
            DEFAULT_DELTA,
            false,
        );

        let unit = Unit::MilligramsPerDeciliter;
        // 10-minute delay: the first two 5-minute points carry no effect
        assert_eq!(effects[1].quantity.double_value(unit), 0.0);
        assert_eq!(effects[2].quantity.double_value(unit), 0.0);
        assert!(effects[4].quantity.double_value(unit) < 0.0);
    }

    #[test]
    fn annotation_splits_across_schedule_boundaries() {
        let start = date("2024-06-01T11:30:00Z");
        let boundary = date("2024-06-01T12:00:00Z");
        let basal = vec![
            AbsoluteScheduleValue {
                start_date: date("2024-06-01T00:00:00Z"),
                end_date: boundary,
                value: 1.0,
            },
            AbsoluteScheduleValue {
                start_date: boundary,
                end_date: date("2024-06-02T00:00:00Z"),
                value: 2.0,
            },
        ];

        // One hour of 3 U/hr straddling the boundary
        let doses = [temp_basal(start, hours(1.0), 3.0)];
        let annotated = annotate_doses(&doses, &basal);

        assert_eq!(annotated.len(), 2);
        assert_eq!(annotated[0].end_date, boundary);
        assert_eq!(annotated[0].scheduled_basal_rate, Some(1.0));
        assert_eq!(annotated[1].scheduled_basal_rate, Some(2.0));
        assert!((annotated[0].volume - 1.5).abs() < 1e-12);
        assert!((annotated[1].volume - 1.5).abs() < 1e-12);

        // Net units: (3 − 1) × 0.5h + (3 − 2) × 0.5h
        let net: f64 = annotated.iter().map(|d| d.net_units()).sum();
        assert!((net - 1.5).abs() < 1e-12);
    }

    #[test]
    fn suspended_basal_yields_negative_net_units() {
        let start = date("2024-06-01T12:00:00Z");
        let basal = vec![AbsoluteScheduleValue {
            start_date: date("2024-06-01T00:00:00Z"),
            end_date: date("2024-06-02T00:00:00Z"),
            value: 1.0,
        }];
        let doses = [temp_basal(start, minutes(30.0), 0.0)];
        let annotated = annotate_doses(&doses, &basal);

        assert!((annotated[0].net_units() + 0.5).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "must be annotated")]
    fn unannotated_basal_net_units_panics() {
        let start = date("2024-06-01T12:00:00Z");
        temp_basal(start, minutes(30.0), 0.5).net_units();
    }

    #[test]
    #[should_panic(expected = "must cover dose span")]
    fn annotation_panics_on_uncovered_dose() {
        let start = date("2024-06-01T12:00:00Z");
        let basal = vec![AbsoluteScheduleValue {
            start_date: add_seconds(start, minutes(10.0)),
            end_date: add_seconds(start, hours(6.0)),
            value: 1.0,
        }];
        annotate_doses(&[temp_basal(start, hours(1.0), 1.0)], &basal);
    }
}
