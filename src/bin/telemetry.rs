//! Telemetry CLI - Command-line interface for Balance Telemetry
//!
//! Commands:
//! - convert: Regenerate binned artifacts from a raw capture
//! - migrate: Migrate a settings object to the current schema
//! - inspect: Summarize behavioral and reaction-time artifacts
//! - doctor: Diagnose configuration and environment

use clap::{ArgAction, Parser, Subcommand};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use balance_telemetry::grid::{BehaviorSnapshot, ReactionTimeSnapshot};
use balance_telemetry::measurement::DEFAULT_PLATFORM_RADIUS;
use balance_telemetry::settings::{CURRENT_SETTINGS_VERSION, LEGACY_SETTINGS_VERSION};
use balance_telemetry::{
    migrate, ConversionDriver, FilePersistence, MeasurementConfig, PersistenceService,
    SettingsBundle, SettingsKind, TelemetryError, PRODUCER_NAME, TELEMETRY_VERSION,
};

/// Telemetry - Behavioral measurement for ball-on-platform experiments
#[derive(Parser)]
#[command(name = "telemetry")]
#[command(version = TELEMETRY_VERSION)]
#[command(about = "Bin and inspect balancing-task telemetry", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Regenerate binned artifacts from a raw capture
    Convert {
        /// Raw capture CSV
        #[arg(short, long)]
        raw: PathBuf,

        /// Settings file providing the binning parameters
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Output summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Migrate a settings object to the current schema
    Migrate {
        /// Settings object JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Settings family, e.g. Hyperparameters
        #[arg(short, long)]
        kind: String,
    },

    /// Summarize behavioral and reaction-time artifacts
    Inspect {
        /// Behavioral data JSON
        #[arg(short, long)]
        behavior: PathBuf,

        /// Reaction-time data JSON
        #[arg(short, long)]
        reaction: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Check settings file
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), TelemetryCliError> {
    match cli.command {
        Commands::Convert { raw, settings, json } => cmd_convert(&raw, settings.as_deref(), json),

        Commands::Migrate { input, kind } => cmd_migrate(&input, &kind),

        Commands::Inspect {
            behavior,
            reaction,
            json,
        } => cmd_inspect(&behavior, reaction.as_deref(), json),

        Commands::Doctor { settings, json } => cmd_doctor(settings.as_deref(), json),
    }
}

fn load_settings(path: Option<&Path>) -> Result<SettingsBundle, TelemetryCliError> {
    match path {
        Some(path) => Ok(SettingsBundle::from_path(path)?),
        None => {
            log::info!("No settings file given, using default binning parameters");
            Ok(SettingsBundle::new())
        }
    }
}

fn cmd_convert(raw: &Path, settings: Option<&Path>, json: bool) -> Result<(), TelemetryCliError> {
    let bundle = load_settings(settings)?;
    let driver = ConversionDriver::new(FilePersistence::new(), &bundle);
    let summary = driver.convert(raw)?;

    if summary.rows == 0 {
        return Err(TelemetryCliError::NoRows);
    }

    if json {
        let report = serde_json::json!({
            "rows": summary.rows,
            "task_switches": summary.task_switches,
            "actions": summary.actions,
            "reaction_times": summary.reaction_times,
            "agents": summary.agents,
            "behavior": summary.behavior_path.display().to_string(),
            "reaction_time": summary.reaction_time_path.display().to_string(),
            "samples": summary.samples_path.display().to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Converted {} rows ({} task switches)", summary.rows, summary.task_switches);
        println!("{}", summary.progress);
        println!("Behavioral data: {}", summary.behavior_path.display());
        println!("Reaction times:  {}", summary.reaction_time_path.display());
        println!("Samples:         {}", summary.samples_path.display());
    }

    Ok(())
}

fn cmd_migrate(input: &Path, kind: &str) -> Result<(), TelemetryCliError> {
    let kind = SettingsKind::from_type_name(kind)?;
    let content = fs::read_to_string(input)?;

    let mut document = serde_json::Map::new();
    for settings in migrate(&content, kind)? {
        let mut value = settings.to_value()?;
        if let serde_json::Value::Object(object) = &mut value {
            object.insert("version".to_string(), CURRENT_SETTINGS_VERSION.into());
        }
        document.insert(settings.kind().type_name().to_string(), value);
    }

    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn cmd_inspect(behavior: &Path, reaction: Option<&Path>, json: bool) -> Result<(), TelemetryCliError> {
    let store = FilePersistence::new();
    let mut reports = Vec::new();

    let snapshot: BehaviorSnapshot = store.load_json(behavior)?;
    reports.push(GridReport {
        path: behavior.display().to_string(),
        kind: "behavior".to_string(),
        dimensions: vec![
            snapshot.len(),
            snapshot.first().map_or(0, Vec::len),
        ],
        unique_cells: snapshot.iter().flatten().map(|cell| cell.len()).sum(),
        total_count: snapshot
            .iter()
            .flatten()
            .flat_map(|cell| cell.values())
            .map(|entry| entry.count)
            .sum(),
    });

    if let Some(reaction) = reaction {
        let snapshot: ReactionTimeSnapshot = store.load_json(reaction)?;
        let first = snapshot.first();
        reports.push(GridReport {
            path: reaction.display().to_string(),
            kind: "reaction_time".to_string(),
            dimensions: vec![
                snapshot.len(),
                first.map_or(0, Vec::len),
                first.and_then(|d| d.first()).map_or(0, Vec::len),
            ],
            unique_cells: snapshot.iter().flatten().flatten().map(|cell| cell.len()).sum(),
            total_count: snapshot
                .iter()
                .flatten()
                .flatten()
                .flat_map(|cell| cell.values())
                .map(|entry| entry.count)
                .sum(),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            let dimensions: Vec<String> = report.dimensions.iter().map(usize::to_string).collect();
            println!("{} ({})", report.path, report.kind);
            println!("  Dimensions:   {} × sparse", dimensions.join(" × "));
            println!("  Unique cells: {}", report.unique_cells);
            println!("  Total count:  {}", report.total_count);
        }
    }

    Ok(())
}

fn cmd_doctor(settings: Option<&Path>, json: bool) -> Result<(), TelemetryCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "telemetry_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Telemetry version {}", TELEMETRY_VERSION),
    });

    checks.push(DoctorCheck {
        name: "settings_schema".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "Settings schema version {} (migrates version {})",
            CURRENT_SETTINGS_VERSION, LEGACY_SETTINGS_VERSION
        ),
    });

    let bundle = match settings {
        Some(path) => match SettingsBundle::from_path(path) {
            Ok(bundle) => {
                checks.push(DoctorCheck {
                    name: "settings".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Settings file {} valid", path.display()),
                });
                Some(bundle)
            }
            Err(TelemetryError::NotFound(_)) => {
                checks.push(DoctorCheck {
                    name: "settings".to_string(),
                    status: CheckStatus::Warning,
                    message: "Settings file does not exist".to_string(),
                });
                None
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "settings".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Invalid settings file: {}", e),
                });
                None
            }
        },
        None => Some(SettingsBundle::new()),
    };

    if let Some(bundle) = bundle {
        let config = MeasurementConfig::from_settings(&bundle, DEFAULT_PLATFORM_RADIUS);
        let check = match config.validate() {
            Ok(()) => DoctorCheck {
                name: "binning".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Behavioral grid {:?}, reaction-time grid {:?}",
                    config.behavior_dimensions(),
                    config.reaction_dimensions()
                ),
            },
            Err(e) => DoctorCheck {
                name: "binning".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        };
        checks.push(check);

        let scores_dir = config.naming().directory().to_path_buf();
        checks.push(DoctorCheck {
            name: "scores_directory".to_string(),
            status: CheckStatus::Ok,
            message: if scores_dir.is_dir() {
                format!("{} exists", scores_dir.display())
            } else {
                format!("{} will be created on first write", scores_dir.display())
            },
        });
    }

    let stdout_check = if atty::is(atty::Stream::Stdout) {
        DoctorCheck {
            name: "stdout".to_string(),
            status: CheckStatus::Ok,
            message: "stdout is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdout".to_string(),
            status: CheckStatus::Ok,
            message: "stdout is a pipe (JSON output recommended)".to_string(),
        }
    };
    checks.push(stdout_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: TELEMETRY_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Telemetry Doctor Report");
        println!("=======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(TelemetryCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Logging

/// Log filter for the `-v` count, used when `RUST_LOG` is unset
fn default_log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Route the library's `log` records through a stderr fmt subscriber
fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

// Error types

#[derive(Debug)]
enum TelemetryCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Telemetry(TelemetryError),
    NoRows,
    DoctorFailed,
}

impl From<io::Error> for TelemetryCliError {
    fn from(e: io::Error) -> Self {
        TelemetryCliError::Io(e)
    }
}

impl From<serde_json::Error> for TelemetryCliError {
    fn from(e: serde_json::Error) -> Self {
        TelemetryCliError::Json(e)
    }
}

impl From<TelemetryError> for TelemetryCliError {
    fn from(e: TelemetryError) -> Self {
        TelemetryCliError::Telemetry(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<TelemetryCliError> for CliError {
    fn from(e: TelemetryCliError) -> Self {
        match e {
            TelemetryCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            TelemetryCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            TelemetryCliError::Telemetry(e) => telemetry_error(e),
            TelemetryCliError::NoRows => CliError {
                code: "NO_ROWS".to_string(),
                message: "No rows found in raw capture".to_string(),
                hint: Some("Ensure the capture was written with raw data collection enabled".to_string()),
            },
            TelemetryCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

fn telemetry_error(e: TelemetryError) -> CliError {
    let (code, hint) = match &e {
        TelemetryError::InvalidConfiguration(_) => ("INVALID_CONFIGURATION", "Bin counts must be positive"),
        TelemetryError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
        TelemetryError::CsvError(_) => ("CSV_ERROR", "Check the raw capture columns"),
        TelemetryError::IoError(_) => ("IO_ERROR", "Check file paths and permissions"),
        TelemetryError::NotFound(_) => ("NOT_FOUND", "Check file paths"),
        TelemetryError::UnsupportedSchemaVersion { .. } => {
            ("UNSUPPORTED_VERSION", "Only settings versions 0 and 2 are supported")
        }
        TelemetryError::UnknownSettingsType(_) => ("UNKNOWN_SETTINGS_TYPE", "Run 'telemetry doctor' for the schema version"),
        TelemetryError::ShapeMismatch { .. } => {
            ("SHAPE_MISMATCH", "Use the binning parameters the data was collected with")
        }
    };

    CliError {
        code: code.to_string(),
        message: e.to_string(),
        hint: Some(hint.to_string()),
    }
}

// Report types

#[derive(serde::Serialize)]
struct GridReport {
    path: String,
    kind: String,
    dimensions: Vec<usize>,
    unique_cells: usize,
    total_count: u64,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_verbosity_maps_to_log_filter() {
        assert_eq!(default_log_filter(0), "warn");
        assert_eq!(default_log_filter(1), "info");
        assert_eq!(default_log_filter(2), "debug");
        assert_eq!(default_log_filter(7), "trace");
    }

    #[test]
    fn test_verbose_flag_is_global() {
        let cli = Cli::try_parse_from(["telemetry", "doctor", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(default_log_filter(cli.verbose), "debug");
    }
}
