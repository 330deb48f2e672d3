//! Settings schemas
//!
//! Current-schema settings (version 2) plus the legacy version 0 shapes that
//! only exist to be migrated. Field names follow the JSON configuration files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema version written by current tooling
pub const CURRENT_SETTINGS_VERSION: i32 = 2;

/// Base class name of the balancing task
pub const BALANCING_TASK_CLASS: &str = "BallAgent";

/// Experiment-wide hyperparameters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Hyperparameters {
    pub version: i32,
    pub autonomous: bool,
    pub supervisor_model_name: String,
    pub time_scale: f32,
    pub abc_simulation: bool,
    pub focus_agent_model_name: String,
    pub save_behavioral_data: bool,
    pub focus_active_task: bool,
    pub hide_inactive_tasks: bool,
    pub use_focus_agent: bool,
    /// One entry per task instance, e.g. `["BallAgent", "BallAgent"]`
    pub tasks: Vec<String>,
    /// Model path per task class
    pub task_models: BTreeMap<String, String>,
}

/// Legacy monolithic hyperparameters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HyperparametersV0 {
    pub version: i32,
    pub autonomous: bool,
    pub supervisor_model_name: String,
    pub time_scale: f32,
    pub abc_simulation: bool,
    pub focus_agent_model_name: String,
    pub save_behavioral_data: bool,
    pub decision_period: i32,
    pub focus_active_platform: bool,
    pub hide_inactive_platform: bool,
    pub reset_platform_to_identity: bool,
    pub number_of_platforms: i32,
    pub agent_choice: String,
    pub train_ball_agent: bool,
    pub train_supervisor: bool,
    pub ball_agent_model_name: String,
}

/// Task-switching supervisor configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SupervisorSettings {
    pub version: i32,
    pub random_supervisor: bool,
    pub supervisor_choice: String,
    pub vector_observation_size: i32,
    pub set_constant_decision_request_interval: bool,
    pub decision_request_interval_in_seconds: f32,
    pub decision_request_interval_range_in_seconds: f32,
    pub difficulty_increment_interval: i32,
    pub decision_period: i32,
    pub advance_notice_in_seconds: f32,
}

/// Legacy supervisor configuration that also carried balancing-task fields
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SupervisorSettingsV0 {
    pub version: i32,
    pub random_supervisor: bool,
    pub supervisor_choice: String,
    pub vector_observation_size: i32,
    pub set_constant_decision_request_interval: bool,
    pub decision_request_interval_in_seconds: f32,
    pub decision_request_interval_range_in_seconds: f32,
    pub difficulty_increment_interval: i32,
    pub decision_period: i32,
    pub advance_notice_in_seconds: f32,
    pub global_drag: f32,
    pub use_negative_drag_difficulty: bool,
    pub ball_agent_difficulty: i32,
    pub ball_agent_difficulty_division_factor: f64,
    pub ball_starting_radius: f32,
    pub reset_speed: f32,
}

/// Ball-on-platform task configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BalancingTaskSettings {
    pub version: i32,
    pub global_drag: f32,
    pub use_negative_drag_difficulty: bool,
    pub ball_agent_difficulty: i32,
    pub ball_agent_difficulty_division_factor: f64,
    pub ball_starting_radius: f32,
    pub reset_speed: f32,
    pub reset_platform_to_identity: bool,
    pub decision_period: i32,
    pub base_class_name: String,
}

impl Default for BalancingTaskSettings {
    fn default() -> Self {
        Self {
            version: 0,
            global_drag: 0.0,
            use_negative_drag_difficulty: false,
            ball_agent_difficulty: 0,
            ball_agent_difficulty_division_factor: 0.0,
            ball_starting_radius: 0.0,
            reset_speed: 0.0,
            reset_platform_to_identity: false,
            decision_period: 0,
            base_class_name: BALANCING_TASK_CLASS.to_string(),
        }
    }
}

/// Cognitive model of a simulated human ball agent
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Ball3DAgentHumanCognitionSettings {
    pub version: i32,
    pub number_of_bins: i32,
    pub show_belief_state: bool,
    pub number_of_samples: i32,
    pub sigma: f64,
    pub sigma_mean: f64,
    pub update_periode: f32,
    pub observation_probability: f64,
    pub constant_reaction_time: f64,
    pub old_distribution_persistence_time: f32,
    pub full_vision: bool,
}

/// Legacy cognition settings that also toggled the focus agent
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Ball3DAgentHumanCognitionSettingsV0 {
    #[serde(flatten)]
    pub settings: Ball3DAgentHumanCognitionSettings,
    pub use_focus_agent: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExperimentSettings {
    pub version: i32,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PerformanceMeasurementSettings {
    pub version: i32,
    pub max_number_episodes: i32,
    pub minimum_score_for_measurement: i32,
    pub file_name_for_scores: String,
    pub player_name: String,
}

/// Binning and collection parameters of the behavioral measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BehavioralDataCollectionSettings {
    pub version: i32,
    pub measure_performance: bool,
    pub collect_data_for_comparison: bool,
    pub update_existing_model_behavior: bool,
    pub is_raw_data_collected: bool,
    pub comparison_file_name: String,
    pub comparison_time_limit: i32,
    pub max_number_of_actions: i32,
    pub file_name_for_behavioral_data: String,
    #[serde(rename = "numberOfAreaBins_BehavioralData")]
    pub number_of_area_bins: i32,
    #[serde(rename = "numberOfBallVelocityBinsPerAxis_BehavioralData")]
    pub number_of_ball_velocity_bins_per_axis: i32,
    pub number_of_angle_bins_per_axis: i32,
    pub number_of_distance_bins: i32,
    #[serde(rename = "numberOfDistanceBins_velocity")]
    pub number_of_distance_bins_velocity: i32,
    pub number_of_action_bins_per_axis: i32,
    /// Only used with a random supervisor
    pub number_of_time_bins: i32,
}

impl Default for BehavioralDataCollectionSettings {
    fn default() -> Self {
        Self {
            version: 0,
            measure_performance: false,
            collect_data_for_comparison: false,
            update_existing_model_behavior: false,
            is_raw_data_collected: true,
            comparison_file_name: String::new(),
            comparison_time_limit: 30,
            max_number_of_actions: 0,
            file_name_for_behavioral_data: "behavioralData.json".to_string(),
            number_of_area_bins: 225,
            number_of_ball_velocity_bins_per_axis: 6,
            number_of_angle_bins_per_axis: 5,
            number_of_distance_bins: 12,
            number_of_distance_bins_velocity: 12,
            number_of_action_bins_per_axis: 5,
            number_of_time_bins: 0,
        }
    }
}
