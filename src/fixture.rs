//! Fixture wire schema
//!
//! The JSON contract between the decision core and its history/settings
//! providers, also used for golden-file tests. All glucose-valued quantities
//! are serialized in mg/dL and dates in ISO-8601. Fields equal to their
//! documented default are omitted on encode and restored on decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::carbs::{CarbAbsorptionModel, CarbEntry};
use crate::error::DecodeError;
use crate::glucose::types::GlucoseSample;
use crate::insulin::model::InsulinType;
use crate::insulin::types::{InsulinDeliveryType, InsulinDose};
use crate::prediction::{AlgorithmInput, RecommendationType};
use crate::timeline::{hours, seconds_between, AbsoluteScheduleValue, GlucoseRange};
use crate::units::{Quantity, Unit};

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_true(value: &bool) -> bool {
    *value
}

fn default_true() -> bool {
    true
}

const DEFAULT_PROVENANCE: &str = "com.glucoloop.cgm";
const DEFAULT_INSULIN_TYPE: &str = "novolog";
const DEFAULT_RECOMMENDATION_TYPE: &str = "automaticBolus";

fn default_provenance() -> String {
    DEFAULT_PROVENANCE.to_string()
}

fn is_default_provenance(value: &String) -> bool {
    value == DEFAULT_PROVENANCE
}

fn default_insulin_type() -> String {
    DEFAULT_INSULIN_TYPE.to_string()
}

fn is_default_insulin_type(value: &String) -> bool {
    value == DEFAULT_INSULIN_TYPE
}

fn default_recommendation_type() -> String {
    DEFAULT_RECOMMENDATION_TYPE.to_string()
}

fn is_default_recommendation_type(value: &String) -> bool {
    value == DEFAULT_RECOMMENDATION_TYPE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureGlucoseSample {
    pub date: DateTime<Utc>,
    /// mg/dL.
    pub value: f64,
    #[serde(default = "default_provenance", skip_serializing_if = "is_default_provenance")]
    pub provenance_identifier: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_display_only: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub was_user_entered: bool,
    /// mg/dL per minute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureInsulinDose {
    pub delivery_type: InsulinDeliveryType,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Delivered units. One of `volume` or `rate` must be present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    /// U/hr, alternative to `volume` for basal segments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insulin_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureCarbEntry {
    pub start_date: DateTime<Utc>,
    pub grams: f64,
    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absorption_time: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureScheduleEntry {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureTargetEntry {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// mg/dL.
    pub lower_bound: f64,
    /// mg/dL.
    pub upper_bound: f64,
}

/// The full input contract of one control-loop tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmInputFixture {
    pub prediction_start: DateTime<Utc>,
    pub glucose_history: Vec<FixtureGlucoseSample>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub doses: Vec<FixtureInsulinDose>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub carb_entries: Vec<FixtureCarbEntry>,
    /// U/hr.
    pub basal: Vec<FixtureScheduleEntry>,
    /// mg/dL per unit.
    pub sensitivity: Vec<FixtureScheduleEntry>,
    /// g/U.
    pub carb_ratio: Vec<FixtureScheduleEntry>,
    pub target: Vec<FixtureTargetEntry>,
    /// mg/dL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_threshold: Option<f64>,
    pub max_bolus: f64,
    pub max_basal_rate: f64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub use_integral_retrospective_correction: bool,
    #[serde(
        rename = "includePositiveVelocityAndRC",
        default = "default_true",
        skip_serializing_if = "is_true"
    )]
    pub include_positive_velocity_and_rc: bool,
    #[serde(rename = "useMidAbsorptionISF", default, skip_serializing_if = "is_false")]
    pub use_mid_absorption_isf: bool,
    #[serde(
        default = "default_insulin_type",
        skip_serializing_if = "is_default_insulin_type"
    )]
    pub recommendation_insulin_type: String,
    #[serde(
        default = "default_recommendation_type",
        skip_serializing_if = "is_default_recommendation_type"
    )]
    pub recommendation_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automatic_bolus_application_factor: Option<f64>,
    /// mg/dL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradual_transitions_threshold: Option<f64>,
}

fn parse_insulin_type(value: &str) -> Result<InsulinType, DecodeError> {
    match value {
        "novolog" => Ok(InsulinType::Novolog),
        "humalog" => Ok(InsulinType::Humalog),
        "apidra" => Ok(InsulinType::Apidra),
        "fiasp" => Ok(InsulinType::Fiasp),
        "lyumjev" => Ok(InsulinType::Lyumjev),
        "afrezza" => Ok(InsulinType::Afrezza),
        other => Err(DecodeError::InvalidInsulinType(other.to_string())),
    }
}

fn parse_recommendation_type(value: &str) -> Result<RecommendationType, DecodeError> {
    match value {
        "tempBasal" => Ok(RecommendationType::TempBasal),
        "automaticBolus" => Ok(RecommendationType::AutomaticBolus),
        "manualBolus" => Ok(RecommendationType::ManualBolus),
        other => Err(DecodeError::InvalidRecommendationType(other.to_string())),
    }
}

fn schedule_values(
    entries: &[FixtureScheduleEntry],
) -> Vec<AbsoluteScheduleValue<f64>> {
    entries
        .iter()
        .map(|e| AbsoluteScheduleValue {
            start_date: e.start_date,
            end_date: e.end_date,
            value: e.value,
        })
        .collect()
}

impl AlgorithmInputFixture {
    pub fn from_json(json: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, DecodeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Converts the wire representation into the pipeline's native input.
    pub fn into_input(self) -> Result<AlgorithmInput, DecodeError> {
        let glucose_history = self
            .glucose_history
            .into_iter()
            .map(|s| GlucoseSample {
                start_date: s.date,
                quantity: Quantity::mgdl(s.value),
                provenance_identifier: s.provenance_identifier,
                is_display_only: s.is_display_only,
                was_user_entered: s.was_user_entered,
                trend_rate: s
                    .trend_rate
                    .map(|r| Quantity::new(Unit::MilligramsPerDeciliterPerMinute, r)),
            })
            .collect();

        let mut doses = Vec::with_capacity(self.doses.len());
        for dose in self.doses {
            let volume = match (dose.volume, dose.rate) {
                (Some(volume), _) => volume,
                (None, Some(rate)) => {
                    rate * seconds_between(dose.end_date, dose.start_date) / hours(1.0)
                }
                (None, None) => {
                    return Err(DecodeError::DoseVolumeMissing(dose.start_date.to_rfc3339()))
                }
            };
            let insulin_type = dose
                .insulin_type
                .as_deref()
                .map(parse_insulin_type)
                .transpose()?;

            doses.push(InsulinDose {
                delivery_type: dose.delivery_type,
                start_date: dose.start_date,
                end_date: dose.end_date,
                volume,
                insulin_type,
                scheduled_basal_rate: None,
            });
        }

        let carb_entries = self
            .carb_entries
            .into_iter()
            .map(|e| CarbEntry {
                quantity: Quantity::grams(e.grams),
                start_date: e.start_date,
                absorption_time: e.absorption_time,
            })
            .collect();

        let sensitivity = self
            .sensitivity
            .iter()
            .map(|e| AbsoluteScheduleValue {
                start_date: e.start_date,
                end_date: e.end_date,
                value: Quantity::new(Unit::MilligramsPerDeciliterPerUnit, e.value),
            })
            .collect();

        let target = self
            .target
            .iter()
            .map(|e| AbsoluteScheduleValue {
                start_date: e.start_date,
                end_date: e.end_date,
                value: GlucoseRange::new(
                    Quantity::mgdl(e.lower_bound),
                    Quantity::mgdl(e.upper_bound),
                ),
            })
            .collect();

        Ok(AlgorithmInput {
            prediction_start: self.prediction_start,
            glucose_history,
            doses,
            carb_entries,
            basal: schedule_values(&self.basal),
            sensitivity,
            carb_ratio: schedule_values(&self.carb_ratio),
            target,
            suspend_threshold: self.suspend_threshold.map(Quantity::mgdl),
            max_bolus: self.max_bolus,
            max_basal_rate: self.max_basal_rate,
            use_integral_retrospective_correction: self.use_integral_retrospective_correction,
            include_positive_velocity_and_rc: self.include_positive_velocity_and_rc,
            use_mid_absorption_isf: self.use_mid_absorption_isf,
            carb_absorption_model: CarbAbsorptionModel::PiecewiseLinear,
            recommendation_insulin_type: parse_insulin_type(&self.recommendation_insulin_type)?,
            recommendation_type: parse_recommendation_type(&self.recommendation_type)?,
            automatic_bolus_application_factor: self.automatic_bolus_application_factor,
            gradual_transitions_threshold: self
                .gradual_transitions_threshold
                .map(Quantity::mgdl),
        })
    }
}
