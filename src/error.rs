//! Error types for balance telemetry

use thiserror::Error;

/// Errors that can occur while configuring, loading or persisting telemetry
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Version {version} of type {type_name} not implemented")]
    UnsupportedSchemaVersion { version: i64, type_name: String },

    #[error("Unknown settings type: {0}")]
    UnknownSettingsType(String),

    #[error("Shape of data does not match parameters: expected {expected}, found {found}")]
    ShapeMismatch { expected: String, found: String },
}
