//! Error types for Glucoloop

use thiserror::Error;

/// Errors that can occur while decoding external inputs.
///
/// Only decode problems are recoverable. Contract violations inside the
/// pipeline (schedules not covering a queried date, a prediction too short
/// for the correction scan, incompatible unit conversions) indicate caller
/// bugs and panic instead.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Unknown insulin type: {0}")]
    InvalidInsulinType(String),

    #[error("Unknown recommendation type: {0}")]
    InvalidRecommendationType(String),

    #[error("Dose is missing a volume: {0}")]
    DoseVolumeMissing(String),
}
