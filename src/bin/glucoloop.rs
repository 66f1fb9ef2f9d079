//! Glucoloop CLI - Command-line interface for the Glucoloop decision core
//!
//! Commands:
//! - run: Run one control-loop tick over an input fixture
//! - validate: Validate an input fixture without running the pipeline
//! - schema: Print input fixture schema information

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use glucoloop::insulin::dose_math::BolusRecommendationNotice;
use glucoloop::{
    AlgorithmInputFixture, DecodeError, DoseRecommendation, PredictedGlucoseValue, GLUCOLOOP_VERSION,
};

/// Glucoloop - Decision core for a closed-loop insulin-delivery controller
#[derive(Parser)]
#[command(name = "glucoloop")]
#[command(version = GLUCOLOOP_VERSION)]
#[command(about = "Predict glucose and size a bounded dose recommendation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one control-loop tick over an input fixture
    Run {
        /// Input fixture path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,

        /// Include the predicted glucose curve in the report
        #[arg(long)]
        prediction: bool,

        /// Include the intermediate effect timelines in the report
        #[arg(long)]
        effects: bool,
    },

    /// Validate an input fixture without running the pipeline
    Validate {
        /// Input fixture path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print input fixture schema information
    Schema,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), GlucoloopCliError> {
    match cli.command {
        Commands::Run {
            input,
            output,
            output_format,
            prediction,
            effects,
        } => cmd_run(&input, &output, output_format, prediction, effects),

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Schema => cmd_schema(),
    }
}

fn read_input(input: &PathBuf) -> Result<String, GlucoloopCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn cmd_run(
    input: &PathBuf,
    output: &PathBuf,
    output_format: OutputFormat,
    prediction: bool,
    effects: bool,
) -> Result<(), GlucoloopCliError> {
    let input_data = read_input(input)?;

    let fixture = AlgorithmInputFixture::from_json(&input_data)?;
    let algorithm_input = fixture.into_input()?;
    let algorithm_output = glucoloop::run(&algorithm_input);

    let recommendation = match &algorithm_output.recommendation {
        DoseRecommendation::TempBasal(basal) => RecommendationReport {
            recommendation_type: "tempBasal".to_string(),
            units_per_hour: Some(basal.units_per_hour),
            duration: Some(basal.duration),
            bolus_units: None,
            notice: None,
        },
        DoseRecommendation::ManualBolus(bolus) => RecommendationReport {
            recommendation_type: "manualBolus".to_string(),
            units_per_hour: None,
            duration: None,
            bolus_units: Some(bolus.amount),
            notice: bolus.notice.as_ref().map(notice_code),
        },
        DoseRecommendation::Automatic(auto) => RecommendationReport {
            recommendation_type: "automaticBolus".to_string(),
            units_per_hour: auto.basal_adjustment.map(|b| b.units_per_hour),
            duration: auto.basal_adjustment.map(|b| b.duration),
            bolus_units: Some(auto.bolus_units),
            notice: None,
        },
    };

    let report = RunReport {
        version: GLUCOLOOP_VERSION.to_string(),
        recommendation,
        active_carbs_grams: algorithm_output.carbs_on_board.map(|cob| cob.value),
        predicted_glucose: if prediction {
            Some(algorithm_output.predicted_glucose.clone())
        } else {
            None
        },
        effects: if effects {
            Some(EffectsReport {
                insulin: algorithm_output.insulin_effects.len(),
                counteraction: algorithm_output.counteraction_effects.len(),
                carbs: algorithm_output.carb_effects.len(),
                retrospective_correction: algorithm_output.retrospective_correction_effects.len(),
                momentum: algorithm_output.momentum_effects.len(),
            })
        } else {
            None
        },
    };

    let output_data = match output_format {
        OutputFormat::Json => serde_json::to_string(&report)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(&report)?,
    };

    if output.to_string_lossy() == "-" {
        println!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_validate(input: &PathBuf, json: bool) -> Result<(), GlucoloopCliError> {
    let input_data = read_input(input)?;

    let result = AlgorithmInputFixture::from_json(&input_data).and_then(|f| f.into_input());

    let report = match &result {
        Ok(algorithm_input) => ValidationReport {
            valid: true,
            glucose_samples: algorithm_input.glucose_history.len(),
            doses: algorithm_input.doses.len(),
            carb_entries: algorithm_input.carb_entries.len(),
            error: None,
        },
        Err(e) => ValidationReport {
            valid: false,
            glucose_samples: 0,
            doses: 0,
            carb_entries: 0,
            error: Some(e.to_string()),
        },
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Valid:           {}", report.valid);
        println!("Glucose samples: {}", report.glucose_samples);
        println!("Doses:           {}", report.doses);
        println!("Carb entries:    {}", report.carb_entries);
        if let Some(ref error) = report.error {
            println!("\nError: {}", error);
        }
    }

    match result {
        Ok(_) => Ok(()),
        Err(e) => Err(GlucoloopCliError::ValidationFailed(e.to_string())),
    }
}

fn cmd_schema() -> Result<(), GlucoloopCliError> {
    println!("Input Fixture Schema");
    println!();
    println!("Top-level keys (camelCase, dates ISO-8601, glucose in mg/dL):");
    println!();
    println!("  predictionStart        - Date the tick is evaluated at");
    println!("  glucoseHistory         - [{{date, value, trendRate?}}], oldest first");
    println!("  doses                  - [{{deliveryType, startDate, endDate, volume|rate}}]");
    println!("  carbEntries            - [{{startDate, grams, absorptionTime?}}]");
    println!("  basal                  - Schedule of U/hr segments");
    println!("  sensitivity            - Schedule of mg/dL-per-unit segments");
    println!("  carbRatio              - Schedule of g/U segments");
    println!("  target                 - Schedule of {{lowerBound, upperBound}} ranges");
    println!("  suspendThreshold       - Optional; defaults to the target lower bound");
    println!("  maxBolus, maxBasalRate - Delivery limits");
    println!();
    println!("Optional flags (defaults in parentheses):");
    println!();
    println!("  useIntegralRetrospectiveCorrection (false)");
    println!("  includePositiveVelocityAndRC       (true)");
    println!("  useMidAbsorptionISF                (false)");
    println!("  recommendationInsulinType          (novolog)");
    println!("  recommendationType                 (automaticBolus)");
    println!("  automaticBolusApplicationFactor    (0.4)");
    println!("  gradualTransitionsThreshold        (unset)");
    println!();
    println!("Insulin types: novolog, humalog, apidra, fiasp, lyumjev, afrezza");
    println!("Recommendation types: tempBasal, automaticBolus, manualBolus");

    Ok(())
}

fn notice_code(notice: &BolusRecommendationNotice) -> String {
    match notice {
        BolusRecommendationNotice::GlucoseBelowSuspendThreshold { .. } => {
            "glucoseBelowSuspendThreshold".to_string()
        }
        BolusRecommendationNotice::AllGlucoseBelowTarget { .. } => {
            "allGlucoseBelowTarget".to_string()
        }
        BolusRecommendationNotice::PredictedGlucoseBelowTarget { .. } => {
            "predictedGlucoseBelowTarget".to_string()
        }
        BolusRecommendationNotice::PredictedGlucoseInRange => {
            "predictedGlucoseInRange".to_string()
        }
    }
}

// Error types

#[derive(Debug)]
enum GlucoloopCliError {
    Io(io::Error),
    Decode(DecodeError),
    Json(serde_json::Error),
    ValidationFailed(String),
}

impl From<io::Error> for GlucoloopCliError {
    fn from(e: io::Error) -> Self {
        GlucoloopCliError::Io(e)
    }
}

impl From<DecodeError> for GlucoloopCliError {
    fn from(e: DecodeError) -> Self {
        GlucoloopCliError::Decode(e)
    }
}

impl From<serde_json::Error> for GlucoloopCliError {
    fn from(e: serde_json::Error) -> Self {
        GlucoloopCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<GlucoloopCliError> for CliError {
    fn from(e: GlucoloopCliError) -> Self {
        match e {
            GlucoloopCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            GlucoloopCliError::Decode(e) => CliError {
                code: "DECODE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'glucoloop schema' for the fixture layout".to_string()),
            },
            GlucoloopCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            GlucoloopCliError::ValidationFailed(message) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message,
                hint: Some("Fix the fixture and retry".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct RunReport {
    version: String,
    recommendation: RecommendationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_carbs_grams: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    predicted_glucose: Option<Vec<PredictedGlucoseValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    effects: Option<EffectsReport>,
}

#[derive(serde::Serialize)]
struct RecommendationReport {
    recommendation_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    units_per_hour: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bolus_units: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notice: Option<String>,
}

#[derive(serde::Serialize)]
struct EffectsReport {
    insulin: usize,
    counteraction: usize,
    carbs: usize,
    retrospective_correction: usize,
    momentum: usize,
}

#[derive(serde::Serialize)]
struct ValidationReport {
    valid: bool,
    glucose_samples: usize,
    doses: usize,
    carb_entries: usize,
    error: Option<String>,
}
