//! Settings schema migration
//!
//! A settings payload declares its schema through an integer `version` field
//! (missing means 0). Version 2 payloads are read as-is; version 0 payloads are
//! the legacy monolithic layout and are split into several current objects.

use super::types::{
    BalancingTaskSettings, Ball3DAgentHumanCognitionSettingsV0, Hyperparameters,
    HyperparametersV0, SupervisorSettings, SupervisorSettingsV0, BALANCING_TASK_CLASS,
    CURRENT_SETTINGS_VERSION,
};
use super::{Settings, SettingsKind};
use crate::error::TelemetryError;
use serde::Deserialize;

/// Legacy schema version
pub const LEGACY_SETTINGS_VERSION: i32 = 0;

#[derive(Deserialize)]
struct VersionHeader {
    #[serde(default)]
    version: i64,
}

/// Resolve a settings payload of the given family into current-schema objects
pub fn migrate(json: &str, kind: SettingsKind) -> Result<Vec<Settings>, TelemetryError> {
    let header: VersionHeader = serde_json::from_str(json)?;

    match header.version {
        v if v == CURRENT_SETTINGS_VERSION as i64 => Ok(vec![Settings::parse(kind, json)?]),
        v if v == LEGACY_SETTINGS_VERSION as i64 => {
            log::info!("Migrating {} from version {} to {}", kind, v, CURRENT_SETTINGS_VERSION);
            legacy_to_current(json, kind)
        }
        v => Err(TelemetryError::UnsupportedSchemaVersion {
            version: v,
            type_name: kind.type_name().to_string(),
        }),
    }
}

fn legacy_to_current(json: &str, kind: SettingsKind) -> Result<Vec<Settings>, TelemetryError> {
    match kind {
        SettingsKind::Hyperparameters => hyperparameters_v0_to_current(json),
        SettingsKind::SupervisorSettings => supervisor_settings_v0_to_current(json),
        SettingsKind::Ball3DAgentHumanCognitionSettings => cognition_settings_v0_to_current(json),
        _ => match Settings::parse(kind, json) {
            Ok(settings) => Ok(vec![settings]),
            Err(e) => {
                log::debug!("Direct read of legacy {} failed: {}", kind, e);
                Err(TelemetryError::UnsupportedSchemaVersion {
                    version: LEGACY_SETTINGS_VERSION as i64,
                    type_name: kind.type_name().to_string(),
                })
            }
        },
    }
}

fn hyperparameters_v0_to_current(json: &str) -> Result<Vec<Settings>, TelemetryError> {
    let legacy: HyperparametersV0 = serde_json::from_str(json)?;

    let platforms = legacy.number_of_platforms.max(0) as usize;
    let mut hyperparameters = Hyperparameters {
        version: CURRENT_SETTINGS_VERSION,
        autonomous: legacy.autonomous,
        supervisor_model_name: legacy.supervisor_model_name,
        time_scale: legacy.time_scale,
        abc_simulation: legacy.abc_simulation,
        focus_agent_model_name: legacy.focus_agent_model_name,
        save_behavioral_data: legacy.save_behavioral_data,
        focus_active_task: legacy.focus_active_platform,
        hide_inactive_tasks: legacy.hide_inactive_platform,
        tasks: vec![legacy.agent_choice; platforms],
        ..Default::default()
    };

    if !legacy.train_ball_agent {
        hyperparameters
            .task_models
            .insert(BALANCING_TASK_CLASS.to_string(), legacy.ball_agent_model_name);
    }

    let task = BalancingTaskSettings {
        version: CURRENT_SETTINGS_VERSION,
        reset_platform_to_identity: legacy.reset_platform_to_identity,
        decision_period: legacy.decision_period,
        ..Default::default()
    };

    Ok(vec![
        Settings::Hyperparameters(hyperparameters),
        Settings::BalancingTask(task),
    ])
}

fn supervisor_settings_v0_to_current(json: &str) -> Result<Vec<Settings>, TelemetryError> {
    let legacy: SupervisorSettingsV0 = serde_json::from_str(json)?;

    let supervisor = SupervisorSettings {
        version: CURRENT_SETTINGS_VERSION,
        random_supervisor: legacy.random_supervisor,
        supervisor_choice: legacy.supervisor_choice,
        vector_observation_size: legacy.vector_observation_size,
        set_constant_decision_request_interval: legacy.set_constant_decision_request_interval,
        decision_request_interval_in_seconds: legacy.decision_request_interval_in_seconds,
        decision_request_interval_range_in_seconds: legacy
            .decision_request_interval_range_in_seconds,
        difficulty_increment_interval: legacy.difficulty_increment_interval,
        decision_period: legacy.decision_period,
        advance_notice_in_seconds: legacy.advance_notice_in_seconds,
    };

    let task = BalancingTaskSettings {
        version: CURRENT_SETTINGS_VERSION,
        global_drag: legacy.global_drag,
        use_negative_drag_difficulty: legacy.use_negative_drag_difficulty,
        ball_agent_difficulty: legacy.ball_agent_difficulty,
        ball_agent_difficulty_division_factor: legacy.ball_agent_difficulty_division_factor,
        ball_starting_radius: legacy.ball_starting_radius,
        reset_speed: legacy.reset_speed,
        reset_platform_to_identity: true,
        ..Default::default()
    };

    Ok(vec![
        Settings::Supervisor(supervisor),
        Settings::BalancingTask(task),
    ])
}

fn cognition_settings_v0_to_current(json: &str) -> Result<Vec<Settings>, TelemetryError> {
    let legacy: Ball3DAgentHumanCognitionSettingsV0 = serde_json::from_str(json)?;

    let mut cognition = legacy.settings;
    cognition.version = CURRENT_SETTINGS_VERSION;

    let hyperparameters = Hyperparameters {
        use_focus_agent: legacy.use_focus_agent,
        ..Default::default()
    };

    Ok(vec![
        Settings::HumanCognition(cognition),
        Settings::Hyperparameters(hyperparameters),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_legacy_hyperparameters_split() {
        let json = r#"{
            "version": 0,
            "autonomous": true,
            "timeScale": 2.5,
            "ballAgentModelName": "x.asset",
            "agentChoice": "BallAgent",
            "numberOfPlatforms": 3,
            "focusActivePlatform": true,
            "resetPlatformToIdentity": true,
            "decisionPeriod": 5
        }"#;

        let result = migrate(json, SettingsKind::Hyperparameters).unwrap();
        assert_eq!(result.len(), 2);

        let Settings::Hyperparameters(hyperparameters) = &result[0] else {
            panic!("expected hyperparameters first, got {:?}", result[0]);
        };
        assert_eq!(hyperparameters.task_models["BallAgent"], "x.asset");
        assert_eq!(hyperparameters.tasks, vec!["BallAgent"; 3]);
        assert!(hyperparameters.focus_active_task);
        assert!(hyperparameters.autonomous);
        assert!((hyperparameters.time_scale - 2.5).abs() < 0.0001);

        let Settings::BalancingTask(task) = &result[1] else {
            panic!("expected balancing task settings second, got {:?}", result[1]);
        };
        assert!(task.reset_platform_to_identity);
        assert_eq!(task.decision_period, 5);
    }

    #[test]
    fn test_legacy_hyperparameters_training_ball_agent_has_no_model() {
        let json = r#"{"ballAgentModelName": "x.asset", "trainBallAgent": true}"#;
        let result = migrate(json, SettingsKind::Hyperparameters).unwrap();

        let Settings::Hyperparameters(hyperparameters) = &result[0] else {
            panic!("expected hyperparameters");
        };
        assert!(hyperparameters.task_models.is_empty());
    }

    #[test]
    fn test_legacy_supervisor_split() {
        let json = r#"{
            "randomSupervisor": true,
            "decisionRequestIntervalInSeconds": 4.0,
            "decisionRequestIntervalRangeInSeconds": 2.0,
            "globalDrag": 0.3,
            "ballAgentDifficulty": 2,
            "ballAgentDifficultyDivisionFactor": 1.5,
            "resetSpeed": 8.0
        }"#;

        let result = migrate(json, SettingsKind::SupervisorSettings).unwrap();
        assert_eq!(result.len(), 2);

        let Settings::Supervisor(supervisor) = &result[0] else {
            panic!("expected supervisor settings");
        };
        assert!(supervisor.random_supervisor);
        assert!((supervisor.decision_request_interval_range_in_seconds - 2.0).abs() < 0.0001);

        let Settings::BalancingTask(task) = &result[1] else {
            panic!("expected balancing task settings");
        };
        assert!(task.reset_platform_to_identity);
        assert_eq!(task.ball_agent_difficulty, 2);
        assert!((task.ball_agent_difficulty_division_factor - 1.5).abs() < 1e-9);
        assert_eq!(task.base_class_name, "BallAgent");
    }

    #[test]
    fn test_legacy_cognition_moves_focus_flag() {
        let json = r#"{"version": 0, "numberOfSamples": 20, "useFocusAgent": true}"#;
        let result = migrate(json, SettingsKind::Ball3DAgentHumanCognitionSettings).unwrap();

        assert_eq!(result[0].kind(), SettingsKind::Ball3DAgentHumanCognitionSettings);
        let Settings::Hyperparameters(hyperparameters) = &result[1] else {
            panic!("expected hyperparameters");
        };
        assert!(hyperparameters.use_focus_agent);
    }

    #[test]
    fn test_current_version_reads_directly() {
        let json = r#"{"version": 2, "mode": "comparison"}"#;
        let result = migrate(json, SettingsKind::ExperimentSettings).unwrap();

        assert_eq!(result.len(), 1);
        let Settings::Experiment(experiment) = &result[0] else {
            panic!("expected experiment settings");
        };
        assert_eq!(experiment.mode, "comparison");
    }

    #[test]
    fn test_legacy_without_migration_reads_directly() {
        let json = r#"{"maxNumberEpisodes": 12}"#;
        let result = migrate(json, SettingsKind::PerformanceMeasurementSettings).unwrap();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_legacy_without_migration_and_bad_shape_fails() {
        let json = r#"{"maxNumberEpisodes": "many"}"#;
        let err = migrate(json, SettingsKind::PerformanceMeasurementSettings).unwrap_err();
        assert!(matches!(
            err,
            TelemetryError::UnsupportedSchemaVersion { version: 0, ref type_name }
                if type_name == "PerformanceMeasurementSettings"
        ));
    }

    #[test]
    fn test_unknown_version_fails() {
        let json = r#"{"version": 1}"#;
        let err = migrate(json, SettingsKind::SupervisorSettings).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Version 1 of type SupervisorSettings not implemented"
        );
    }
}
