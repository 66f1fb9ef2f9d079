//! Glucose value types
//!
//! Samples are read-only inputs from a CGM or manual entry. Effects and
//! effect velocities are derived deltas; a prediction is an ordered sequence
//! of glucose values with no provenance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timeline::{seconds_between, SampleValue, TimelineValue};
use crate::units::{Quantity, Unit};

/// A glucose reading as supplied by the history provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GlucoseSample {
    pub start_date: DateTime<Utc>,
    pub quantity: Quantity,
    /// Uniquely identifies the source of the sample.
    pub provenance_identifier: String,
    /// Whether the value was provided for visual consistency rather than an
    /// actual calibrated reading.
    pub is_display_only: bool,
    /// Whether the value was user entered, as opposed to a CGM value.
    pub was_user_entered: bool,
    /// The trend rate of the sample, if the source reported one.
    pub trend_rate: Option<Quantity>,
}

impl TimelineValue for GlucoseSample {
    fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }
}

impl SampleValue for GlucoseSample {
    fn quantity(&self) -> Quantity {
        self.quantity
    }
}

/// One point of a glucose prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictedGlucoseValue {
    pub start_date: DateTime<Utc>,
    pub quantity: Quantity,
}

impl TimelineValue for PredictedGlucoseValue {
    fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }
}

impl SampleValue for PredictedGlucoseValue {
    fn quantity(&self) -> Quantity {
        self.quantity
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictedGlucoseValueRep {
    start_date: DateTime<Utc>,
    quantity: f64,
    quantity_unit: String,
}

// Predictions serialize in mg/dL regardless of the unit used internally.
impl Serialize for PredictedGlucoseValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        PredictedGlucoseValueRep {
            start_date: self.start_date,
            quantity: self.quantity.double_value(Unit::MilligramsPerDeciliter),
            quantity_unit: Unit::MilligramsPerDeciliter.unit_string().to_string(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PredictedGlucoseValue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rep = PredictedGlucoseValueRep::deserialize(deserializer)?;
        let unit = match rep.quantity_unit.as_str() {
            "mmol/L" => Unit::MillimolesPerLiter,
            _ => Unit::MilligramsPerDeciliter,
        };
        Ok(PredictedGlucoseValue {
            start_date: rep.start_date,
            quantity: Quantity::new(unit, rep.quantity),
        })
    }
}

/// A cumulative glucose-unit delta at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlucoseEffect {
    pub start_date: DateTime<Utc>,
    pub quantity: Quantity,
}

impl GlucoseEffect {
    pub fn new(start_date: DateTime<Utc>, quantity: Quantity) -> Self {
        GlucoseEffect {
            start_date,
            quantity,
        }
    }
}

impl TimelineValue for GlucoseEffect {
    fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }
}

impl SampleValue for GlucoseEffect {
    fn quantity(&self) -> Quantity {
        self.quantity
    }
}

/// A glucose delta summed over a date interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlucoseChange {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub quantity: Quantity,
}

impl GlucoseChange {
    /// Extends this change with another, summing quantities and widening the
    /// interval.
    pub fn append(&mut self, other: &GlucoseChange) {
        let unit = Unit::MilligramsPerDeciliter;
        self.quantity = Quantity::new(
            unit,
            self.quantity.double_value(unit) + other.quantity.double_value(unit),
        );
        self.start_date = self.start_date.min(other.start_date);
        self.end_date = self.end_date.max(other.end_date);
    }
}

impl TimelineValue for GlucoseChange {
    fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    fn end_date(&self) -> DateTime<Utc> {
        self.end_date
    }
}

impl SampleValue for GlucoseChange {
    fn quantity(&self) -> Quantity {
        self.quantity
    }
}

/// The first derivative of a glucose effect: a glucose rate over an interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlucoseEffectVelocity {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub quantity: Quantity,
}

impl GlucoseEffectVelocity {
    pub const PER_SECOND_UNIT: Unit = Unit::MilligramsPerDeciliterPerSecond;

    pub fn new(start_date: DateTime<Utc>, end_date: DateTime<Utc>, quantity: Quantity) -> Self {
        GlucoseEffectVelocity {
            start_date,
            end_date,
            quantity,
        }
    }

    /// The integration of the velocity span: rate × duration, anchored at the
    /// end of the interval.
    pub fn effect(&self) -> GlucoseEffect {
        let duration = seconds_between(self.end_date, self.start_date);
        let per_second = self.quantity.double_value(Self::PER_SECOND_UNIT);

        GlucoseEffect::new(self.end_date, Quantity::mgdl(per_second * duration))
    }
}

impl TimelineValue for GlucoseEffectVelocity {
    fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    fn end_date(&self) -> DateTime<Utc> {
        self.end_date
    }
}

impl SampleValue for GlucoseEffectVelocity {
    fn quantity(&self) -> Quantity {
        self.quantity
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GlucoseEffectVelocityRep {
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    mgdl_per_second: f64,
}

impl Serialize for GlucoseEffectVelocity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        GlucoseEffectVelocityRep {
            start_date: self.start_date,
            end_date: self.end_date,
            mgdl_per_second: self.quantity.double_value(Self::PER_SECOND_UNIT),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GlucoseEffectVelocity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rep = GlucoseEffectVelocityRep::deserialize(deserializer)?;
        Ok(GlucoseEffectVelocity::new(
            rep.start_date,
            rep.end_date,
            Quantity::new(Self::PER_SECOND_UNIT, rep.mgdl_per_second),
        ))
    }
}
