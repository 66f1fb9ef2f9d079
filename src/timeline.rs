//! Timeline primitives
//!
//! The pipeline is driven by chronologically ordered sequences of dated
//! values: glucose samples, effects, schedule entries. This module defines
//! the traits those values share, the piecewise schedule type, and the date
//! helpers used to discretize simulations onto a fixed delta grid.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::units::{Quantity, Unit};

/// A value anchored to a date interval. Instantaneous values report
/// `end_date == start_date`.
pub trait TimelineValue {
    fn start_date(&self) -> DateTime<Utc>;

    fn end_date(&self) -> DateTime<Utc> {
        self.start_date()
    }
}

/// A timeline value carrying a measured quantity.
pub trait SampleValue: TimelineValue {
    fn quantity(&self) -> Quantity;
}

/// Seconds in `m` minutes.
pub fn minutes(m: f64) -> f64 {
    m * 60.0
}

/// Seconds in `h` hours.
pub fn hours(h: f64) -> f64 {
    h * 3600.0
}

/// Signed seconds from `since` to `date`.
pub fn seconds_between(date: DateTime<Utc>, since: DateTime<Utc>) -> f64 {
    let delta = date.signed_duration_since(since);
    delta.num_milliseconds() as f64 / 1000.0
}

/// `date + secs`, at millisecond resolution.
pub fn add_seconds(date: DateTime<Utc>, secs: f64) -> DateTime<Utc> {
    date + Duration::milliseconds((secs * 1000.0).round() as i64)
}

/// Floors a date to a multiple of `interval` seconds since the Unix epoch.
pub fn date_floored_to_interval(date: DateTime<Utc>, interval: f64) -> DateTime<Utc> {
    let interval_ms = (interval * 1000.0).round() as i64;
    let ms = date.timestamp_millis();
    DateTime::from_timestamp_millis(ms - ms.rem_euclid(interval_ms))
        .unwrap_or(date)
}

/// Ceils a date to a multiple of `interval` seconds since the Unix epoch.
pub fn date_ceiled_to_interval(date: DateTime<Utc>, interval: f64) -> DateTime<Utc> {
    let interval_ms = (interval * 1000.0).round() as i64;
    let ms = date.timestamp_millis();
    let rem = ms.rem_euclid(interval_ms);
    let ceiled = if rem == 0 { ms } else { ms - rem + interval_ms };
    DateTime::from_timestamp_millis(ceiled).unwrap_or(date)
}

/// The delta-aligned simulation range for an effect anchored at `date`:
/// floored start through ceiled `date + duration`.
pub fn simulation_date_range(
    date: DateTime<Utc>,
    duration: f64,
    delta: f64,
) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        date_floored_to_interval(date, delta),
        date_ceiled_to_interval(add_seconds(date, duration), delta),
    )
}

/// Returns the closest element starting at or before `date`.
///
/// The slice must be ordered by start date ascending.
pub fn closest_prior<T: TimelineValue>(items: &[T], date: DateTime<Utc>) -> Option<&T> {
    let mut before = None;
    for item in items {
        if item.start_date() <= date {
            before = Some(item);
        } else {
            break;
        }
    }
    before
}

/// Returns the elements overlapping `[start, end]`. An element qualifies if
/// it merely overlaps the range; it need not lie strictly inside it.
pub fn filter_date_range<T: TimelineValue>(
    items: &[T],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<&T> {
    items
        .iter()
        .filter(|item| item.end_date() >= start && item.start_date() <= end)
        .collect()
}

/// One entry of a piecewise schedule: a value in effect over
/// `[start_date, end_date)`. Sequences are ordered by start date and assumed
/// contiguous and non-overlapping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsoluteScheduleValue<T> {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub value: T,
}

impl<T> TimelineValue for AbsoluteScheduleValue<T> {
    fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    fn end_date(&self) -> DateTime<Utc> {
        self.end_date
    }
}

/// A closed glucose range, as used by the correction-range schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlucoseRange {
    pub lower_bound: Quantity,
    pub upper_bound: Quantity,
}

impl GlucoseRange {
    pub fn new(lower_bound: Quantity, upper_bound: Quantity) -> Self {
        GlucoseRange {
            lower_bound,
            upper_bound,
        }
    }

    pub fn average_value(&self, unit: Unit) -> f64 {
        (self.lower_bound.double_value(unit) + self.upper_bound.double_value(unit)) / 2.0
    }
}

/// The correction-range schedule consumed by the dose-correction algorithm.
pub type GlucoseRangeTimeline = Vec<AbsoluteScheduleValue<GlucoseRange>>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn schedule() -> Vec<AbsoluteScheduleValue<f64>> {
        vec![
            AbsoluteScheduleValue {
                start_date: date("2024-01-01T00:00:00Z"),
                end_date: date("2024-01-01T06:00:00Z"),
                value: 1.0,
            },
            AbsoluteScheduleValue {
                start_date: date("2024-01-01T06:00:00Z"),
                end_date: date("2024-01-01T12:00:00Z"),
                value: 2.0,
            },
        ]
    }

    #[test]
    fn closest_prior_picks_entry_in_effect() {
        let entries = schedule();
        let hit = closest_prior(&entries, date("2024-01-01T07:30:00Z")).unwrap();
        assert_eq!(hit.value, 2.0);

        let hit = closest_prior(&entries, date("2024-01-01T00:00:00Z")).unwrap();
        assert_eq!(hit.value, 1.0);

        assert!(closest_prior(&entries, date("2023-12-31T23:59:00Z")).is_none());
    }

    #[test]
    fn filter_date_range_keeps_overlapping_entries() {
        let entries = schedule();
        let hits = filter_date_range(
            &entries,
            date("2024-01-01T05:00:00Z"),
            date("2024-01-01T07:00:00Z"),
        );
        assert_eq!(hits.len(), 2);

        let hits = filter_date_range(
            &entries,
            date("2024-01-01T13:00:00Z"),
            date("2024-01-01T14:00:00Z"),
        );
        assert!(hits.is_empty());
    }

    #[test]
    fn floor_and_ceil_to_five_minutes() {
        let delta = minutes(5.0);
        let d = date("2024-01-01T00:07:21Z");
        assert_eq!(date_floored_to_interval(d, delta), date("2024-01-01T00:05:00Z"));
        assert_eq!(date_ceiled_to_interval(d, delta), date("2024-01-01T00:10:00Z"));

        let aligned = date("2024-01-01T00:10:00Z");
        assert_eq!(date_ceiled_to_interval(aligned, delta), aligned);
    }

    #[test]
    fn range_average() {
        let range = GlucoseRange::new(Quantity::mgdl(100.0), Quantity::mgdl(120.0));
        assert_eq!(range.average_value(Unit::MilligramsPerDeciliter), 110.0);
    }
}
