//! Typed physical quantities with unit conversion
//!
//! Every value flowing through the pipeline is a `Quantity`: a double tagged
//! with a `Unit`. Conversions go through a fixed per-unit-pair factor table.
//! Converting between incompatible unit families is a programming error and
//! panics; it is never surfaced as a recoverable error.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Molar mass of blood glucose, used to derive the canonical
/// mg/dL <-> mmol/L conversion. The rounded 18.018 constant seen in some
/// clinical references is deliberately not used.
pub const MOLAR_MASS_BLOOD_GLUCOSE: f64 = 180.155_880_000_054_1;

const MGDL_PER_MMOLL: f64 = MOLAR_MASS_BLOOD_GLUCOSE / 10.0;

/// Units understood by the decision core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    Gram,
    GramsPerUnit,
    InternationalUnit,
    InternationalUnitsPerHour,
    MilligramsPerDeciliter,
    MilligramsPerDeciliterPerSecond,
    MilligramsPerDeciliterPerMinute,
    MilligramsPerDeciliterPerUnit,
    MillimolesPerLiter,
    MillimolesPerLiterPerSecond,
    MillimolesPerLiterPerMinute,
    MillimolesPerLiterPerUnit,
    Percent,
    Hour,
    Minute,
    Second,
}

impl Unit {
    /// The conversion factor from `self` to `to`, or `None` when the units
    /// belong to different families.
    pub fn conversion_factor(&self, to: Unit) -> Option<f64> {
        use Unit::*;

        if *self == to {
            return Some(1.0);
        }

        match (*self, to) {
            // Time
            (Second, Minute) => Some(1.0 / 60.0),
            (Minute, Second) => Some(60.0),
            (Minute, Hour) => Some(1.0 / 60.0),
            (Hour, Minute) => Some(60.0),
            (Second, Hour) => Some(1.0 / 3600.0),
            (Hour, Second) => Some(3600.0),

            // Glucose concentration
            (MilligramsPerDeciliter, MillimolesPerLiter) => Some(1.0 / MGDL_PER_MMOLL),
            (MillimolesPerLiter, MilligramsPerDeciliter) => Some(MGDL_PER_MMOLL),

            // Glucose concentration rates
            (MilligramsPerDeciliterPerSecond, MilligramsPerDeciliterPerMinute) => Some(60.0),
            (MilligramsPerDeciliterPerMinute, MilligramsPerDeciliterPerSecond) => Some(1.0 / 60.0),
            (MillimolesPerLiterPerSecond, MillimolesPerLiterPerMinute) => Some(60.0),
            (MillimolesPerLiterPerMinute, MillimolesPerLiterPerSecond) => Some(1.0 / 60.0),
            (MilligramsPerDeciliterPerSecond, MillimolesPerLiterPerSecond)
            | (MilligramsPerDeciliterPerMinute, MillimolesPerLiterPerMinute) => {
                Some(1.0 / MGDL_PER_MMOLL)
            }
            (MillimolesPerLiterPerSecond, MilligramsPerDeciliterPerSecond)
            | (MillimolesPerLiterPerMinute, MilligramsPerDeciliterPerMinute) => {
                Some(MGDL_PER_MMOLL)
            }
            (MilligramsPerDeciliterPerSecond, MillimolesPerLiterPerMinute) => {
                Some(60.0 / MGDL_PER_MMOLL)
            }
            (MillimolesPerLiterPerMinute, MilligramsPerDeciliterPerSecond) => {
                Some(MGDL_PER_MMOLL / 60.0)
            }
            (MilligramsPerDeciliterPerMinute, MillimolesPerLiterPerSecond) => {
                Some(1.0 / MGDL_PER_MMOLL / 60.0)
            }
            (MillimolesPerLiterPerSecond, MilligramsPerDeciliterPerMinute) => {
                Some(MGDL_PER_MMOLL * 60.0)
            }

            // Insulin sensitivity
            (MilligramsPerDeciliterPerUnit, MillimolesPerLiterPerUnit) => {
                Some(1.0 / MGDL_PER_MMOLL)
            }
            (MillimolesPerLiterPerUnit, MilligramsPerDeciliterPerUnit) => Some(MGDL_PER_MMOLL),

            _ => None,
        }
    }

    /// The serialization string for this unit.
    pub fn unit_string(&self) -> &'static str {
        match self {
            Unit::Gram => "g",
            Unit::GramsPerUnit => "g/U",
            Unit::InternationalUnit => "U",
            Unit::InternationalUnitsPerHour => "U/hr",
            Unit::MilligramsPerDeciliter => "mg/dL",
            Unit::MilligramsPerDeciliterPerSecond => "mg/dL·s",
            Unit::MilligramsPerDeciliterPerMinute => "mg/dL·min",
            Unit::MilligramsPerDeciliterPerUnit => "mg/dL·U",
            Unit::MillimolesPerLiter => "mmol/L",
            Unit::MillimolesPerLiterPerSecond => "mmol/L·s",
            Unit::MillimolesPerLiterPerMinute => "mmol/L·min",
            Unit::MillimolesPerLiterPerUnit => "mmol/L·U",
            Unit::Percent => "%",
            Unit::Hour => "hr",
            Unit::Minute => "min",
            Unit::Second => "s",
        }
    }
}

/// A value tagged with a physical unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quantity {
    pub unit: Unit,
    pub value: f64,
}

impl Quantity {
    pub fn new(unit: Unit, value: f64) -> Self {
        Quantity { unit, value }
    }

    /// Shorthand constructor for the most common unit in the core math.
    pub fn mgdl(value: f64) -> Self {
        Quantity::new(Unit::MilligramsPerDeciliter, value)
    }

    pub fn grams(value: f64) -> Self {
        Quantity::new(Unit::Gram, value)
    }

    /// Whether this quantity can be expressed in `unit`.
    pub fn is_compatible_with(&self, unit: Unit) -> bool {
        self.unit.conversion_factor(unit).is_some()
    }

    /// The value converted to `unit`.
    ///
    /// Panics when `unit` belongs to a different family; unit mismatches are
    /// caller bugs, not recoverable conditions.
    pub fn double_value(&self, unit: Unit) -> f64 {
        match self.unit.conversion_factor(unit) {
            Some(factor) => self.value * factor,
            None => panic!(
                "conversion error: {} is not compatible with {}",
                self.unit.unit_string(),
                unit.unit_string()
            ),
        }
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.double_value(self.unit)
    }
}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.value.partial_cmp(&other.double_value(self.unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn identity_conversion() {
        let q = Quantity::mgdl(120.0);
        assert_eq!(q.double_value(Unit::MilligramsPerDeciliter), 120.0);
    }

    #[test]
    fn glucose_round_trip_through_mmol() {
        let q = Quantity::mgdl(180.0);
        let mmol = q.double_value(Unit::MillimolesPerLiter);
        let back = Quantity::new(Unit::MillimolesPerLiter, mmol)
            .double_value(Unit::MilligramsPerDeciliter);
        assert!((back - 180.0).abs() < 1e-9);
        // ~9.99 mmol/L with the molar-mass-derived factor
        assert!((mmol - 9.991).abs() < 0.01);
    }

    #[test]
    fn velocity_per_second_to_per_minute() {
        let v = Quantity::new(Unit::MilligramsPerDeciliterPerSecond, 0.5);
        assert_eq!(v.double_value(Unit::MilligramsPerDeciliterPerMinute), 30.0);
    }

    #[test]
    fn time_conversions() {
        let h = Quantity::new(Unit::Hour, 2.0);
        assert_eq!(h.double_value(Unit::Minute), 120.0);
        assert_eq!(h.double_value(Unit::Second), 7200.0);
    }

    #[test]
    fn comparison_converts_units() {
        let a = Quantity::mgdl(180.0);
        let b = Quantity::new(Unit::MillimolesPerLiter, 5.0);
        assert!(a > b);
        assert!(b < a);
    }

    #[test]
    #[should_panic(expected = "not compatible")]
    fn incompatible_conversion_panics() {
        Quantity::grams(10.0).double_value(Unit::MilligramsPerDeciliter);
    }
}
