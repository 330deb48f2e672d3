//! Experiment settings
//!
//! Settings files are versioned JSON. Every family of settings has a current
//! schema in [`types`]; [`migration`] resolves legacy payloads into those
//! schemas and [`bundle`] merges the results into one typed configuration.

pub mod bundle;
pub mod migration;
pub mod types;

pub use bundle::SettingsBundle;
pub use migration::{migrate, LEGACY_SETTINGS_VERSION};
pub use types::*;

use crate::error::TelemetryError;
use std::fmt;

/// Closed set of known settings families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingsKind {
    Hyperparameters,
    SupervisorSettings,
    BalancingTaskSettings,
    Ball3DAgentHumanCognitionSettings,
    ExperimentSettings,
    PerformanceMeasurementSettings,
    BehavioralDataCollectionSettings,
}

impl SettingsKind {
    pub const ALL: [SettingsKind; 7] = [
        SettingsKind::Hyperparameters,
        SettingsKind::SupervisorSettings,
        SettingsKind::BalancingTaskSettings,
        SettingsKind::Ball3DAgentHumanCognitionSettings,
        SettingsKind::ExperimentSettings,
        SettingsKind::PerformanceMeasurementSettings,
        SettingsKind::BehavioralDataCollectionSettings,
    ];

    /// Type name used as key in settings files
    pub fn type_name(&self) -> &'static str {
        match self {
            SettingsKind::Hyperparameters => "Hyperparameters",
            SettingsKind::SupervisorSettings => "SupervisorSettings",
            SettingsKind::BalancingTaskSettings => "BalancingTaskSettings",
            SettingsKind::Ball3DAgentHumanCognitionSettings => "Ball3DAgentHumanCognitionSettings",
            SettingsKind::ExperimentSettings => "ExperimentSettings",
            SettingsKind::PerformanceMeasurementSettings => "PerformanceMeasurementSettings",
            SettingsKind::BehavioralDataCollectionSettings => "BehavioralDataCollectionSettings",
        }
    }

    /// Resolve a type name. Legacy files use a lowercase first letter
    /// (`"hyperparameters"`), which is accepted as well.
    pub fn from_type_name(name: &str) -> Result<Self, TelemetryError> {
        let mut chars = name.chars();
        let normalized = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
            None => String::new(),
        };

        SettingsKind::ALL
            .into_iter()
            .find(|kind| kind.type_name() == normalized)
            .ok_or_else(|| TelemetryError::UnknownSettingsType(name.to_string()))
    }
}

impl fmt::Display for SettingsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// A current-schema settings object of any family
#[derive(Debug, Clone, PartialEq)]
pub enum Settings {
    Hyperparameters(Hyperparameters),
    Supervisor(SupervisorSettings),
    BalancingTask(BalancingTaskSettings),
    HumanCognition(Ball3DAgentHumanCognitionSettings),
    Experiment(ExperimentSettings),
    Performance(PerformanceMeasurementSettings),
    BehavioralData(BehavioralDataCollectionSettings),
}

impl Settings {
    pub fn kind(&self) -> SettingsKind {
        match self {
            Settings::Hyperparameters(_) => SettingsKind::Hyperparameters,
            Settings::Supervisor(_) => SettingsKind::SupervisorSettings,
            Settings::BalancingTask(_) => SettingsKind::BalancingTaskSettings,
            Settings::HumanCognition(_) => SettingsKind::Ball3DAgentHumanCognitionSettings,
            Settings::Experiment(_) => SettingsKind::ExperimentSettings,
            Settings::Performance(_) => SettingsKind::PerformanceMeasurementSettings,
            Settings::BehavioralData(_) => SettingsKind::BehavioralDataCollectionSettings,
        }
    }

    /// Deserialize `json` directly into the current schema of `kind`
    pub fn parse(kind: SettingsKind, json: &str) -> Result<Self, TelemetryError> {
        let settings = match kind {
            SettingsKind::Hyperparameters => Settings::Hyperparameters(serde_json::from_str(json)?),
            SettingsKind::SupervisorSettings => Settings::Supervisor(serde_json::from_str(json)?),
            SettingsKind::BalancingTaskSettings => {
                Settings::BalancingTask(serde_json::from_str(json)?)
            }
            SettingsKind::Ball3DAgentHumanCognitionSettings => {
                Settings::HumanCognition(serde_json::from_str(json)?)
            }
            SettingsKind::ExperimentSettings => Settings::Experiment(serde_json::from_str(json)?),
            SettingsKind::PerformanceMeasurementSettings => {
                Settings::Performance(serde_json::from_str(json)?)
            }
            SettingsKind::BehavioralDataCollectionSettings => {
                Settings::BehavioralData(serde_json::from_str(json)?)
            }
        };

        Ok(settings)
    }

    /// Serialize the inner object
    pub fn to_value(&self) -> Result<serde_json::Value, TelemetryError> {
        let value = match self {
            Settings::Hyperparameters(s) => serde_json::to_value(s)?,
            Settings::Supervisor(s) => serde_json::to_value(s)?,
            Settings::BalancingTask(s) => serde_json::to_value(s)?,
            Settings::HumanCognition(s) => serde_json::to_value(s)?,
            Settings::Experiment(s) => serde_json::to_value(s)?,
            Settings::Performance(s) => serde_json::to_value(s)?,
            Settings::BehavioralData(s) => serde_json::to_value(s)?,
        };

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_type_name() {
        assert_eq!(
            SettingsKind::from_type_name("hyperparameters").unwrap(),
            SettingsKind::Hyperparameters
        );
        assert_eq!(
            SettingsKind::from_type_name("BehavioralDataCollectionSettings").unwrap(),
            SettingsKind::BehavioralDataCollectionSettings
        );
        assert!(matches!(
            SettingsKind::from_type_name("CarSettings"),
            Err(TelemetryError::UnknownSettingsType(_))
        ));
        assert!(SettingsKind::from_type_name("").is_err());
    }

    #[test]
    fn test_parse_matches_kind() {
        for kind in SettingsKind::ALL {
            let settings = Settings::parse(kind, "{}").unwrap();
            assert_eq!(settings.kind(), kind);
        }
    }
}
