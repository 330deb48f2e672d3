//! Typed settings bundle
//!
//! A settings file maps type names to settings objects:
//!
//! ```json
//! {
//!   "Hyperparameters": { "version": 2, "tasks": ["BallAgent", "BallAgent"] },
//!   "SupervisorSettings": { "version": 2, "randomSupervisor": true }
//! }
//! ```
//!
//! Each entry is migrated to the current schema and merged into the bundle.
//! Since one legacy object may produce parts of several families, later
//! objects only override the fields they set to a non-default value.

use super::migration::migrate;
use super::types::*;
use super::{Settings, SettingsKind};
use crate::error::TelemetryError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SettingsBundle {
    pub hyperparameters: Hyperparameters,
    pub supervisor: SupervisorSettings,
    pub balancing_task: BalancingTaskSettings,
    pub human_cognition: Ball3DAgentHumanCognitionSettings,
    pub experiment: ExperimentSettings,
    pub performance: PerformanceMeasurementSettings,
    pub behavioral_data: BehavioralDataCollectionSettings,
}

impl SettingsBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a settings document, migrating every entry
    pub fn from_json(json: &str) -> Result<Self, TelemetryError> {
        let document: Map<String, Value> = serde_json::from_str(json)?;
        let mut bundle = Self::new();

        for (name, value) in &document {
            let kind = SettingsKind::from_type_name(name)?;
            for settings in migrate(&value.to_string(), kind)? {
                bundle.absorb(settings)?;
            }
        }

        Ok(bundle)
    }

    pub fn from_path(path: &Path) -> Result<Self, TelemetryError> {
        if !path.is_file() {
            return Err(TelemetryError::NotFound(path.display().to_string()));
        }

        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize the bundle as a current-schema settings document
    pub fn to_json(&self) -> Result<String, TelemetryError> {
        let mut document = Map::new();

        for settings in self.to_settings() {
            let mut value = settings.to_value()?;
            if let Value::Object(object) = &mut value {
                object.insert("version".to_string(), Value::from(CURRENT_SETTINGS_VERSION));
            }
            document.insert(settings.kind().type_name().to_string(), value);
        }

        Ok(serde_json::to_string_pretty(&document)?)
    }

    pub fn to_settings(&self) -> Vec<Settings> {
        vec![
            Settings::Hyperparameters(self.hyperparameters.clone()),
            Settings::Supervisor(self.supervisor.clone()),
            Settings::BalancingTask(self.balancing_task.clone()),
            Settings::HumanCognition(self.human_cognition.clone()),
            Settings::Experiment(self.experiment.clone()),
            Settings::Performance(self.performance.clone()),
            Settings::BehavioralData(self.behavioral_data.clone()),
        ]
    }

    /// Merge one settings object into the bundle
    pub fn absorb(&mut self, settings: Settings) -> Result<(), TelemetryError> {
        match settings {
            Settings::Hyperparameters(s) => merge_into(&mut self.hyperparameters, &s),
            Settings::Supervisor(s) => merge_into(&mut self.supervisor, &s),
            Settings::BalancingTask(s) => merge_into(&mut self.balancing_task, &s),
            Settings::HumanCognition(s) => merge_into(&mut self.human_cognition, &s),
            Settings::Experiment(s) => merge_into(&mut self.experiment, &s),
            Settings::Performance(s) => merge_into(&mut self.performance, &s),
            Settings::BehavioralData(s) => merge_into(&mut self.behavioral_data, &s),
        }
    }
}

/// Copy every field of `source` that differs from the type default into
/// `target`. Nested maps are merged key by key.
fn merge_into<T>(target: &mut T, source: &T) -> Result<(), TelemetryError>
where
    T: Serialize + DeserializeOwned + Default,
{
    let mut merged = serde_json::to_value(&*target)?;
    let source = serde_json::to_value(source)?;
    let defaults = serde_json::to_value(T::default())?;

    if let (Value::Object(merged_fields), Value::Object(source_fields)) = (&mut merged, source) {
        for (key, value) in source_fields {
            if defaults.get(&key) == Some(&value) {
                continue;
            }

            match (merged_fields.get_mut(&key), value) {
                (Some(Value::Object(existing)), Value::Object(entries)) => existing.extend(entries),
                (_, value) => {
                    merged_fields.insert(key, value);
                }
            }
        }
    }

    *target = serde_json::from_value(merged)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_bundle_merges_legacy_and_current_entries() {
        let json = r#"{
            "hyperparameters": {
                "ballAgentModelName": "x.asset",
                "agentChoice": "BallAgent",
                "numberOfPlatforms": 2,
                "decisionPeriod": 5
            },
            "SupervisorSettings": {
                "version": 0,
                "randomSupervisor": true,
                "decisionRequestIntervalInSeconds": 5.0,
                "globalDrag": 0.8
            },
            "BehavioralDataCollectionSettings": {
                "version": 2,
                "numberOfAreaBins_BehavioralData": 100
            }
        }"#;

        let bundle = SettingsBundle::from_json(json).unwrap();

        assert_eq!(bundle.hyperparameters.tasks, vec!["BallAgent", "BallAgent"]);
        assert_eq!(bundle.hyperparameters.task_models["BallAgent"], "x.asset");
        assert!(bundle.supervisor.random_supervisor);
        // one legacy object set the decision period, the other the drag
        assert_eq!(bundle.balancing_task.decision_period, 5);
        assert!((bundle.balancing_task.global_drag - 0.8).abs() < 0.0001);
        assert!(bundle.balancing_task.reset_platform_to_identity);
        assert_eq!(bundle.behavioral_data.number_of_area_bins, 100);
    }

    #[test]
    fn test_absorb_merges_task_models() {
        let mut bundle = SettingsBundle::new();
        let mut chess = Hyperparameters::default();
        chess
            .task_models
            .insert("ChessAgent".to_string(), "chess.onnx".to_string());
        chess.time_scale = 3.0;
        bundle.absorb(Settings::Hyperparameters(chess)).unwrap();

        let mut ball = Hyperparameters::default();
        ball.task_models
            .insert("BallAgent".to_string(), "x.asset".to_string());
        bundle.absorb(Settings::Hyperparameters(ball)).unwrap();

        assert_eq!(bundle.hyperparameters.task_models.len(), 2);
        assert_eq!(bundle.hyperparameters.task_models["ChessAgent"], "chess.onnx");
        // default fields of the later object leave earlier values alone
        assert!((bundle.hyperparameters.time_scale - 3.0).abs() < 0.0001);
    }

    #[test]
    fn test_unknown_family_fails() {
        let err = SettingsBundle::from_json(r#"{"CarSettings": {}}"#).unwrap_err();
        assert!(matches!(err, TelemetryError::UnknownSettingsType(name) if name == "CarSettings"));
    }

    #[test]
    fn test_bundle_file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");

        let mut bundle = SettingsBundle::new();
        bundle.supervisor.decision_request_interval_in_seconds = 4.0;
        bundle.behavioral_data.number_of_time_bins = 3;
        fs::write(&path, bundle.to_json().unwrap()).unwrap();

        let loaded = SettingsBundle::from_path(&path).unwrap();
        assert_eq!(loaded.behavioral_data.number_of_time_bins, 3);
        assert_eq!(loaded.supervisor.version, CURRENT_SETTINGS_VERSION);

        assert!(matches!(
            SettingsBundle::from_path(&temp_dir.path().join("missing.json")),
            Err(TelemetryError::NotFound(_))
        ));
    }
}
