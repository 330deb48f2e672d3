//! Behavioral measurement engine
//!
//! The engine bins the state of the active balancing task every tick and
//! accumulates the actions taken per cell. After each task switch it measures
//! the reaction time: the time until the action falls back into the cell's
//! usual action bin.
//!
//! Tick flow: raw capture → reaction-time accounting → behavioral accounting →
//! termination checks.

use crate::bins::{
    continuous_value_to_bin, continuous_value_to_bin_zero_based, coordinates_to_bin,
    range_vector_to_bin, OFF_PLATFORM,
};
use crate::error::TelemetryError;
use crate::grid::{
    BehaviorBinEntry, BehaviorBinKey, BehaviorGrid, BehaviorSnapshot, ComparisonMask,
    ReactionTimeBinEntry, ReactionTimeBinKey, ReactionTimeGrid, ReactionTimeSnapshot,
};
use crate::paths::{score_string, shorten_string, ArtifactNaming, SimulationPaths, SCORES_DIR};
use crate::persistence::PersistenceService;
use crate::settings::SettingsBundle;
use crate::signal::{Clock, ExitReason, ExitSignal};
use crate::types::{Action, AgentSnapshot, AgentState, RawSample, ReactionTimeSample, Vec3, Vec3d};
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::{Path, PathBuf};

/// Fixed simulation step in seconds
pub const DEFAULT_TICK_SECONDS: f64 = 0.02;

/// Platform radius of a task with the default scale of 10
pub const DEFAULT_PLATFORM_RADIUS: f32 = 5.0;

/// State type whose shortened name tags the artifact file names
pub const BALANCING_STATE_NAME: &str = "BallStateInformation";

/// Axis-aligned range of a binned vector quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorRange {
    pub min: Vec3,
    pub max: Vec3,
}

impl VectorRange {
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Per-axis extent
    pub fn extent(&self) -> Vec3 {
        (self.max - self.min).abs()
    }

    /// Distance between the min and max corners
    pub fn diagonal(&self) -> f32 {
        self.min.distance(self.max)
    }
}

/// Ball velocity range observed with the default platform parameters
pub const VELOCITY_RANGE: VectorRange =
    VectorRange::new(Vec3::new(-4.0, -11.0, -4.0), Vec3::new(4.0, 2.0, 4.0));

/// Platform euler angles, slightly widened so 0 and 360 stay inside
pub const ANGLE_RANGE: VectorRange =
    VectorRange::new(Vec3::new(-0.1, -0.1, -0.1), Vec3::new(360.1, 360.1, 360.1));

/// Actions in the (x, 0, z) plane; the zero y extent selects the 2-D encoding
pub const ACTION_RANGE: VectorRange =
    VectorRange::new(Vec3::new(-1.0, 0.0, -1.0), Vec3::new(1.0, 0.0, 1.0));

/// Parameters of one measurement run
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementConfig {
    /// Half the platform edge length
    pub platform_radius: f32,
    /// Number of platform cells; a perfect square
    pub area_bins: usize,
    pub angle_bins_per_axis: usize,
    pub velocity_bins_per_axis: usize,
    /// Bins for the ball distance between the two tasks at a switch
    pub distance_bins: usize,
    /// Bins for the ball velocity distance between the two tasks at a switch
    pub velocity_distance_bins: usize,
    pub action_bins_per_axis: usize,
    /// Bins for the time between task switches
    pub time_bins: usize,
    pub min_time: f32,
    pub max_time: f32,
    pub velocity_range: VectorRange,
    pub angle_range: VectorRange,
    pub action_range: VectorRange,
    /// Keep every tick as a raw row
    pub collect_raw_data: bool,
    /// Resume from previously saved grids
    pub update_existing_data: bool,
    /// Stop once the reference dataset stops yielding new matches
    pub collect_for_comparison: bool,
    /// Seconds without a new comparison match before stopping
    pub comparison_time_limit: f64,
    /// Stop after this many recorded actions, 0 for unlimited
    pub max_number_of_actions: u64,
    /// Stop after this many resolved reaction times
    pub sample_size: Option<u64>,
    pub tick_seconds: f64,
    /// Simulation speed factor applied to stopwatch readings
    pub time_scale: f64,
    /// Replay without live agents; no raw capture
    pub simulation: bool,
    /// Keep every resolved reaction time as a sample row
    pub abc_simulation: bool,
    pub simulation_id: i32,
    pub scores_root: PathBuf,
    /// Directory under `scores_root` encoding the supervisor setup
    pub score_dir: String,
    pub file_name: String,
    pub comparison_file_name: String,
    /// Tag of the binned state in artifact file names
    pub artifact_name: String,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            platform_radius: DEFAULT_PLATFORM_RADIUS,
            area_bins: 225,
            angle_bins_per_axis: 5,
            velocity_bins_per_axis: 6,
            distance_bins: 12,
            velocity_distance_bins: 12,
            action_bins_per_axis: 5,
            time_bins: 1,
            min_time: 0.0,
            max_time: 0.0,
            velocity_range: VELOCITY_RANGE,
            angle_range: ANGLE_RANGE,
            action_range: ACTION_RANGE,
            collect_raw_data: true,
            update_existing_data: false,
            collect_for_comparison: false,
            comparison_time_limit: 30.0,
            max_number_of_actions: 0,
            sample_size: None,
            tick_seconds: DEFAULT_TICK_SECONDS,
            time_scale: 1.0,
            simulation: false,
            abc_simulation: false,
            simulation_id: -1,
            scores_root: PathBuf::from(SCORES_DIR),
            score_dir: String::new(),
            file_name: String::new(),
            comparison_file_name: String::new(),
            artifact_name: shorten_string(BALANCING_STATE_NAME, 10),
        }
    }
}

impl MeasurementConfig {
    /// Derive the run parameters from loaded settings
    pub fn from_settings(bundle: &SettingsBundle, platform_radius: f32) -> Self {
        let data = &bundle.behavioral_data;
        let supervisor = &bundle.supervisor;
        let hyperparameters = &bundle.hyperparameters;

        let interval = supervisor.decision_request_interval_in_seconds;
        let (time_bins, min_time, max_time) = if supervisor.random_supervisor {
            let half_range = supervisor.decision_request_interval_range_in_seconds / 2.0;
            (
                to_count(data.number_of_time_bins),
                interval - half_range,
                interval + half_range,
            )
        } else {
            (1, interval, interval)
        };

        let time_scale = if hyperparameters.time_scale > 0.0 {
            hyperparameters.time_scale as f64
        } else {
            1.0
        };

        Self {
            platform_radius,
            area_bins: round_up_to_square(to_count(data.number_of_area_bins)),
            angle_bins_per_axis: to_count(data.number_of_angle_bins_per_axis),
            velocity_bins_per_axis: to_count(data.number_of_ball_velocity_bins_per_axis),
            distance_bins: to_count(data.number_of_distance_bins),
            velocity_distance_bins: to_count(data.number_of_distance_bins_velocity),
            action_bins_per_axis: to_count(data.number_of_action_bins_per_axis),
            time_bins,
            min_time,
            max_time,
            collect_raw_data: data.is_raw_data_collected || hyperparameters.abc_simulation,
            update_existing_data: data.update_existing_model_behavior,
            collect_for_comparison: data.collect_data_for_comparison,
            comparison_time_limit: data.comparison_time_limit as f64,
            max_number_of_actions: data.max_number_of_actions.max(0) as u64,
            time_scale,
            abc_simulation: hyperparameters.abc_simulation,
            score_dir: score_string(supervisor, hyperparameters),
            file_name: data.file_name_for_behavioral_data.clone(),
            comparison_file_name: data.comparison_file_name.clone(),
            ..Default::default()
        }
    }

    /// Reject configurations with an empty grid axis
    pub fn validate(&self) -> Result<(), TelemetryError> {
        let counts = [
            ("area_bins", self.area_bins),
            ("area_bins_per_axis", self.area_bins_per_axis()),
            ("angle_bins_per_axis", self.angle_bins_per_axis),
            ("velocity_bins_per_axis", self.velocity_bins_per_axis),
            ("distance_bins", self.distance_bins),
            ("velocity_distance_bins", self.velocity_distance_bins),
            ("action_bins_per_axis", self.action_bins_per_axis),
            ("time_bins", self.time_bins),
        ];

        for (name, count) in counts {
            if count == 0 {
                return Err(TelemetryError::InvalidConfiguration(format!(
                    "Parameter {} has value 0",
                    name
                )));
            }
        }

        if self.platform_radius.is_nan() || self.platform_radius <= 0.0 {
            return Err(TelemetryError::InvalidConfiguration(format!(
                "Platform radius must be positive, got {}",
                self.platform_radius
            )));
        }

        Ok(())
    }

    pub fn area_bins_per_axis(&self) -> usize {
        integer_sqrt(self.area_bins)
    }

    pub fn angle_bins(&self) -> usize {
        self.angle_bins_per_axis.pow(3)
    }

    pub fn velocity_bins(&self) -> usize {
        self.velocity_bins_per_axis.pow(3)
    }

    pub fn action_bins(&self) -> usize {
        self.action_bins_per_axis.pow(2)
    }

    /// Behavioral grid shape: area × angle × velocity
    pub fn behavior_dimensions(&self) -> [usize; 3] {
        [self.area_bins, self.angle_bins(), self.velocity_bins()]
    }

    /// Reaction-time grid shape: time × distance × angle distance × velocity distance
    pub fn reaction_dimensions(&self) -> [usize; 4] {
        [
            self.time_bins,
            self.distance_bins,
            self.angle_bins(),
            self.velocity_distance_bins,
        ]
    }

    pub fn naming(&self) -> ArtifactNaming {
        ArtifactNaming::new(&self.scores_root, &self.score_dir, &self.file_name)
    }

    pub fn comparison_naming(&self) -> ArtifactNaming {
        ArtifactNaming::new(&self.scores_root, &self.score_dir, &self.comparison_file_name)
    }

    /// Where the artifacts of this run are written on close
    pub fn targets(&self) -> ArtifactTargets {
        if self.abc_simulation {
            let paths = SimulationPaths::new(&self.scores_root, self.simulation_id, &self.file_name);
            return ArtifactTargets {
                behavior: paths.behavior,
                reaction_time: paths.reaction_time,
                raw: paths.raw,
                samples: paths.samples,
            };
        }

        let naming = self.naming();
        ArtifactTargets {
            behavior: naming.behavior(&self.artifact_name, &self.behavior_dimensions()),
            reaction_time: naming.reaction_time(&self.artifact_name, &self.reaction_dimensions()),
            raw: naming.raw(),
            samples: naming.directory().join(format!("{}sim.csv", naming.id())),
        }
    }
}

fn to_count(value: i32) -> usize {
    value.max(0) as usize
}

fn integer_sqrt(n: usize) -> usize {
    let mut root = (n as f64).sqrt() as usize;
    while root * root > n {
        root -= 1;
    }
    while (root + 1) * (root + 1) <= n {
        root += 1;
    }
    root
}

/// Smallest perfect square not below `n`
pub fn round_up_to_square(n: usize) -> usize {
    let root = integer_sqrt(n);
    if root * root == n {
        n
    } else {
        (root + 1) * (root + 1)
    }
}

/// Output files written when the engine closes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactTargets {
    pub behavior: PathBuf,
    pub reaction_time: PathBuf,
    pub raw: PathBuf,
    /// Reaction-time samples, only written in ABC simulation mode
    pub samples: PathBuf,
}

/// Progress of the reaction-time measurement after a task switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionState {
    /// No measurement in progress; behavioral data is collected
    Idle,
    /// A task switch happened and the first action is pending
    Active,
    /// The action after the switch was outside its usual bin
    Suspended,
}

/// Coverage report of a measurement run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementProgress {
    /// Percentage of behavioral cells observed at least once
    pub behavior_coverage: f64,
    /// Percentage of reaction-time cells observed at least once
    pub reaction_coverage: f64,
    /// Percentage of reference behavioral cells matched, in comparison mode
    pub behavior_comparison: Option<f64>,
    /// Percentage of reference reaction-time cells matched, in comparison mode
    pub reaction_comparison: Option<f64>,
    pub actions: u64,
    pub max_actions: u64,
}

impl fmt::Display for MeasurementProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.4} % Behavioral Data, {:.4} % Reaction Times",
            self.behavior_coverage, self.reaction_coverage
        )?;

        if let (Some(behavior), Some(reaction)) = (self.behavior_comparison, self.reaction_comparison) {
            write!(
                f,
                ", {:.4} % Comparison Data, {:.4} % Comparison Times",
                behavior, reaction
            )?;
        }

        if self.max_actions > 0 {
            write!(
                f,
                ", {:.4} % Actions Performed",
                self.actions as f64 / self.max_actions as f64 * 100.0
            )
        } else {
            write!(f, ", {} Actions Performed", self.actions)
        }
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    part as f64 / total as f64 * 100.0
}

/// Reference dataset of comparison mode with its match counters
struct Comparison {
    behavior: ComparisonMask,
    reaction: ComparisonMask,
    behavior_matched: usize,
    reaction_matched: usize,
    /// Seconds since the last new behavioral match
    behavior_idle: f64,
    /// Seconds since the last new reaction-time match
    reaction_idle: f64,
}

/// Stateful aggregation of behavioral data and reaction times
///
/// The engine is driven by one thread. Storage is touched only in [`new`]
/// (resume and comparison data) and when closing. Dropping an engine that was
/// not closed still writes its artifacts.
///
/// [`new`]: BehaviorStatsEngine::new
pub struct BehaviorStatsEngine<P: PersistenceService> {
    config: MeasurementConfig,
    targets: ArtifactTargets,
    store: P,
    exit: Box<dyn ExitSignal>,
    clock: Box<dyn Clock>,
    behavior: BehaviorGrid,
    reaction: ReactionTimeGrid,
    comparison: Option<Comparison>,
    state: ReactionState,
    action_count: u64,
    reaction_count: u64,
    suspended_count: u64,
    switch_count: u64,
    /// Seconds between the last two task switches, as reported by the supervisor
    time_between_switches: f64,
    /// Clock reading at the last task switch
    switch_started_ms: Option<f64>,
    last_action: Action,
    raw_samples: Vec<RawSample>,
    reaction_samples: Vec<ReactionTimeSample>,
    exit_requested: bool,
    closed: bool,
}

impl<P: PersistenceService> BehaviorStatsEngine<P> {
    /// Create an engine, loading resume and comparison data when configured
    pub fn new(
        config: MeasurementConfig,
        store: P,
        exit: Box<dyn ExitSignal>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, TelemetryError> {
        config.validate()?;

        // everything that can fail runs before the engine exists, so a failed
        // construction never reaches the flush in Drop
        let (behavior, reaction) = if config.update_existing_data {
            load_existing_data(&config, &store)?
        } else {
            empty_grids(&config)
        };

        let comparison = if config.collect_for_comparison {
            Some(load_comparison_data(&config, &store, &behavior, &reaction)?)
        } else {
            None
        };

        let engine = Self {
            targets: config.targets(),
            action_count: behavior.total_count(),
            behavior,
            reaction,
            config,
            store,
            exit,
            clock,
            comparison,
            state: ReactionState::Idle,
            reaction_count: 0,
            suspended_count: 0,
            switch_count: 0,
            time_between_switches: 0.0,
            switch_started_ms: None,
            last_action: Action::default(),
            raw_samples: Vec::new(),
            reaction_samples: Vec::new(),
            exit_requested: false,
            closed: false,
        };

        log::info!("{}", engine.progress());
        Ok(engine)
    }

    /// Override where artifacts are written on close
    pub fn with_targets(mut self, targets: ArtifactTargets) -> Self {
        self.targets = targets;
        self
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    pub fn targets(&self) -> &ArtifactTargets {
        &self.targets
    }

    pub fn behavior_grid(&self) -> &BehaviorGrid {
        &self.behavior
    }

    pub fn reaction_time_grid(&self) -> &ReactionTimeGrid {
        &self.reaction
    }

    pub fn state(&self) -> ReactionState {
        self.state
    }

    /// Number of actions recorded into the behavioral grid
    pub fn action_count(&self) -> u64 {
        self.action_count
    }

    /// Number of resolved reaction-time measurements
    pub fn reaction_count(&self) -> u64 {
        self.reaction_count
    }

    pub fn raw_samples(&self) -> &[RawSample] {
        &self.raw_samples
    }

    pub fn reaction_samples(&self) -> &[ReactionTimeSample] {
        &self.reaction_samples
    }

    /// Simulation speed applied to later stopwatch readings
    pub fn set_time_scale(&mut self, time_scale: f64) {
        self.config.time_scale = time_scale;
    }

    /// A task switch completed: start a reaction-time measurement
    pub fn on_task_switch(&mut self, time_between_switches: f64) {
        self.time_between_switches = time_between_switches;
        self.switch_started_ms = Some(self.clock.now_ms());
        self.suspended_count = 0;
        self.switch_count += 1;
        self.state = ReactionState::Active;
    }

    /// The episode ended: drop any measurement in progress
    pub fn on_episode_reset(&mut self, aborted: bool) {
        log::debug!("Episode reset (aborted: {})", aborted);
        self.time_between_switches = 0.0;
        self.state = ReactionState::Idle;
    }

    /// Process one tick of the active task
    ///
    /// Without an explicit `time_since_last_switch` (milliseconds) the
    /// stopwatch reading since the last switch, scaled by the current time
    /// scale, is used.
    pub fn collect(&mut self, action: Action, agent: &AgentState, time_since_last_switch: Option<f64>) {
        if let Some(comparison) = &mut self.comparison {
            comparison.behavior_idle += self.config.tick_seconds;
            comparison.reaction_idle += self.config.tick_seconds;
        }

        let time_since_last_switch = match time_since_last_switch {
            Some(time) => time,
            None => self.elapsed_since_switch(),
        };

        if self.config.collect_raw_data && !self.config.simulation {
            self.collect_raw_data(action, agent, time_since_last_switch);
        }

        self.collect_reaction_time(action, agent, time_since_last_switch);
        self.collect_behavioral_data(action, &agent.active);
        self.check_comparison_time_limit();
    }

    /// Coverage of both grids and of the comparison reference
    pub fn progress(&self) -> MeasurementProgress {
        let comparison = self.comparison.as_ref();

        MeasurementProgress {
            behavior_coverage: percentage(self.behavior.unique_cells(), self.behavior.capacity()),
            reaction_coverage: percentage(self.reaction.unique_cells(), self.reaction.capacity()),
            behavior_comparison: comparison
                .map(|c| percentage(c.behavior_matched, c.behavior.total())),
            reaction_comparison: comparison
                .map(|c| percentage(c.reaction_matched, c.reaction.total())),
            actions: self.action_count,
            max_actions: self.config.max_number_of_actions,
        }
    }

    /// Write all artifacts and consume the engine
    pub fn close(mut self) -> Result<(), TelemetryError> {
        let result = self.flush();
        self.closed = true;
        result
    }

    fn elapsed_since_switch(&self) -> f64 {
        let Some(started) = self.switch_started_ms else {
            return 0.0;
        };

        let elapsed = (self.clock.now_ms() - started) * self.config.time_scale;
        if elapsed == 0.0 && self.switch_count != 0 {
            log::warn!("Time since last switch is 0 although a switch occurred");
        }
        elapsed
    }

    fn collect_raw_data(&mut self, action: Action, agent: &AgentState, time_since_last_switch: f64) {
        let source = if self.switch_count != 0 {
            agent.previous.as_ref()
        } else {
            None
        };

        self.raw_samples.push(RawSample::capture(
            action,
            &agent.active,
            source,
            time_since_last_switch,
            self.time_between_switches,
        ));
    }

    fn area_bin(&self, agent: &AgentSnapshot) -> i32 {
        coordinates_to_bin(
            agent.position,
            self.config.platform_radius,
            self.config.area_bins_per_axis() as i32,
        )
    }

    fn behavior_key(&self, agent: &AgentSnapshot, area_bin: i32) -> BehaviorBinKey {
        let velocity = &self.config.velocity_range;
        let angle = &self.config.angle_range;

        BehaviorBinKey {
            area: area_bin as usize,
            angle: to_index(range_vector_to_bin(
                agent.angle,
                angle.extent(),
                self.config.angle_bins_per_axis as i32,
                angle.min,
            )),
            velocity: to_index(range_vector_to_bin(
                agent.velocity,
                velocity.extent(),
                self.config.velocity_bins_per_axis as i32,
                velocity.min,
            )),
        }
    }

    fn action_bin(&self, action: Vec3) -> i32 {
        let range = &self.config.action_range;
        range_vector_to_bin(
            action,
            range.extent(),
            self.config.action_bins_per_axis as i32,
            range.min,
        )
    }

    /// True when `action` falls into the same action bin as the cell's mean
    fn action_in_usual_range(&self, mean_action: Vec3, action: Action) -> bool {
        self.action_bin(mean_action) == self.action_bin(action.as_vec3())
    }

    fn collect_reaction_time(&mut self, action: Action, agent: &AgentState, time_since_last_switch: f64) {
        if self.state == ReactionState::Idle {
            return;
        }

        let area_bin = self.area_bin(&agent.active);
        if area_bin != OFF_PLATFORM {
            let key = self.behavior_key(&agent.active, area_bin);

            match self.behavior.get(key).map(BehaviorBinEntry::mean_action) {
                None => {
                    log::debug!("Discard reaction time measurement (no behavioral data available)");
                    self.state = ReactionState::Idle;
                    self.suspended_count = 0;
                }
                Some(mean) if self.action_in_usual_range(mean, action) && action != self.last_action => {
                    self.record_reaction_time(agent, time_since_last_switch);
                    self.reaction_count += 1;

                    if self.config.sample_size == Some(self.reaction_count) {
                        self.request_exit(ExitReason::SampleQuotaReached);
                    }

                    self.state = ReactionState::Idle;
                    self.suspended_count = 0;
                }
                Some(_) => {
                    log::debug!("Suspend reaction time measurement (action in unusual range)");
                    self.suspended_count += 1;
                    self.state = ReactionState::Suspended;
                }
            }
        }

        self.last_action = action;
    }

    fn reaction_key(&self, agent: &AgentState) -> ReactionTimeBinKey {
        let active = &agent.active;
        // before the first switch there is no previous task to measure against
        let previous = agent.previous.as_ref().unwrap_or(active);
        let diameter = self.config.platform_radius * 2.0;

        ReactionTimeBinKey {
            time: to_index(continuous_value_to_bin(
                self.time_between_switches as f32,
                self.config.min_time,
                self.config.max_time,
                self.config.time_bins as i32,
            )),
            distance: to_index(continuous_value_to_bin_zero_based(
                active.position.distance(previous.position),
                diameter,
                self.config.distance_bins as i32,
            )),
            angle: to_index(continuous_value_to_bin_zero_based(
                active.angle.distance(previous.angle),
                self.config.angle_range.diagonal(),
                self.config.angle_bins() as i32,
            )),
            velocity: to_index(continuous_value_to_bin_zero_based(
                active.velocity.distance(previous.velocity),
                diameter,
                self.config.velocity_distance_bins as i32,
            )),
        }
    }

    fn record_reaction_time(&mut self, agent: &AgentState, time_since_last_switch: f64) {
        log::debug!("Decision time: {}", time_since_last_switch);

        let key = self.reaction_key(agent);
        let is_new = !self.reaction.contains(key);

        if let Some(comparison) = &mut self.comparison {
            if is_new && comparison.reaction.contains_reaction(key) {
                comparison.reaction_idle = 0.0;
                comparison.reaction_matched += 1;
                log::debug!(
                    "{:.4} % Comparison Times",
                    percentage(comparison.reaction_matched, comparison.reaction.total())
                );
            }
        }

        match self.reaction.get_mut(key) {
            Some(entry) => {
                if !entry.accumulate(time_since_last_switch, self.suspended_count) {
                    log::error!("Reaction time overflow in cell {:?}, sample dropped", key);
                }
            }
            None => {
                self.reaction.insert(
                    key,
                    ReactionTimeBinEntry::new(time_since_last_switch, self.suspended_count),
                );
            }
        }

        if self.config.abc_simulation {
            self.reaction_samples.push(ReactionTimeSample {
                time: time_since_last_switch,
                suspended_reaction_time_count: self.suspended_count,
            });
        }
    }

    fn collect_behavioral_data(&mut self, action: Action, agent: &AgentSnapshot) {
        let area_bin = self.area_bin(agent);

        if area_bin != OFF_PLATFORM && self.state == ReactionState::Idle {
            let key = self.behavior_key(agent, area_bin);
            let is_new = !self.behavior.contains(key);

            if let Some(comparison) = &mut self.comparison {
                if is_new && comparison.behavior.contains_behavior(key) {
                    comparison.behavior_idle = 0.0;
                    comparison.behavior_matched += 1;
                    log::debug!(
                        "{:.4} % Comparison Data",
                        percentage(comparison.behavior_matched, comparison.behavior.total())
                    );
                }
            }

            let sample = Vec3d::from(action.as_vec3());
            match self.behavior.get_mut(key) {
                Some(entry) => {
                    if entry.accumulate(sample) {
                        self.action_count += 1;
                    } else {
                        log::error!("Action overflow in cell {:?}, sample dropped", key);
                    }
                }
                None => {
                    self.behavior.insert(key, BehaviorBinEntry::new(sample));
                    self.action_count += 1;
                }
            }
        }

        let max = self.config.max_number_of_actions;
        if max > 0 && self.action_count >= max {
            self.request_exit(ExitReason::MaxActionsReached);
        }
    }

    fn check_comparison_time_limit(&mut self) {
        let limit = self.config.comparison_time_limit;
        if limit <= 0.0 {
            return;
        }

        let exceeded = self
            .comparison
            .as_ref()
            .is_some_and(|c| c.behavior_idle > limit && c.reaction_idle > limit);

        if exceeded {
            self.request_exit(ExitReason::ComparisonTimeLimit);
        }
    }

    fn request_exit(&mut self, reason: ExitReason) {
        if self.exit_requested {
            return;
        }

        log::info!("Stopping measurement: {}", reason);
        self.exit_requested = true;
        self.exit.request_exit(reason);
    }

    fn flush(&mut self) -> Result<(), TelemetryError> {
        log::info!("{}", self.progress());
        log::info!("Total number of actions collected: {}", self.action_count);

        self.store
            .save_json(&self.targets.behavior, &self.behavior.to_snapshot())?;
        log::info!("Write behavioral data to {}", self.targets.behavior.display());

        self.store
            .save_json(&self.targets.reaction_time, &self.reaction.to_snapshot())?;
        log::info!("Write reaction time data to {}", self.targets.reaction_time.display());

        if !self.raw_samples.is_empty() {
            self.store.append_csv(&self.targets.raw, &self.raw_samples)?;
            self.raw_samples.clear();
        }

        if self.config.abc_simulation {
            self.store
                .write_csv(&self.targets.samples, &self.reaction_samples)?;
        }

        Ok(())
    }
}

impl<P: PersistenceService> Drop for BehaviorStatsEngine<P> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        if let Err(e) = self.flush() {
            log::error!("Failed to write measurement artifacts: {}", e);
        }
    }
}

fn empty_grids(config: &MeasurementConfig) -> (BehaviorGrid, ReactionTimeGrid) {
    let [areas, angles, velocities] = config.behavior_dimensions();
    let [times, distances, angle_distances, velocity_distances] = config.reaction_dimensions();

    (
        BehaviorGrid::new(areas, angles, velocities),
        ReactionTimeGrid::new(times, distances, angle_distances, velocity_distances),
    )
}

/// Grids saved by an earlier run, or empty ones when nothing was saved
fn load_existing_data<P: PersistenceService>(
    config: &MeasurementConfig,
    store: &P,
) -> Result<(BehaviorGrid, ReactionTimeGrid), TelemetryError> {
    let naming = config.naming();
    let name = &config.artifact_name;
    let [areas, angles, velocities] = config.behavior_dimensions();
    let [times, distances, angle_distances, velocity_distances] = config.reaction_dimensions();
    let (mut behavior, mut reaction) = empty_grids(config);

    let snapshot: Option<BehaviorSnapshot> = load_with_fallback(
        store,
        &naming.behavior(name, &config.behavior_dimensions()),
        &naming.legacy_behavior(),
    )?;
    if let Some(snapshot) = snapshot {
        behavior = BehaviorGrid::from_snapshot(&snapshot, areas, angles, velocities)?;
    }

    let snapshot: Option<ReactionTimeSnapshot> = load_with_fallback(
        store,
        &naming.reaction_time(name, &config.reaction_dimensions()),
        &naming.legacy_reaction_time(),
    )?;
    if let Some(snapshot) = snapshot {
        reaction = ReactionTimeGrid::from_snapshot(
            &snapshot,
            times,
            distances,
            angle_distances,
            velocity_distances,
        )?;
    }

    log::info!(
        "Resumed {} behavioral cells ({} actions) and {} reaction-time cells",
        behavior.unique_cells(),
        behavior.total_count(),
        reaction.unique_cells()
    );
    Ok((behavior, reaction))
}

/// Reference dataset named by the comparison file name
fn load_comparison_data<P: PersistenceService>(
    config: &MeasurementConfig,
    store: &P,
    behavior: &BehaviorGrid,
    reaction: &ReactionTimeGrid,
) -> Result<Comparison, TelemetryError> {
    let naming = config.comparison_naming();
    let name = &config.artifact_name;
    let [areas, angles, velocities] = config.behavior_dimensions();
    let [times, distances, angle_distances, velocity_distances] = config.reaction_dimensions();

    let behavior_snapshot: BehaviorSnapshot =
        store.load_json(&naming.behavior(name, &config.behavior_dimensions()))?;
    let reaction_snapshot: ReactionTimeSnapshot =
        store.load_json(&naming.reaction_time(name, &config.reaction_dimensions()))?;

    let behavior_mask =
        BehaviorGrid::from_snapshot(&behavior_snapshot, areas, angles, velocities)?.mask();
    let reaction_mask = ReactionTimeGrid::from_snapshot(
        &reaction_snapshot,
        times,
        distances,
        angle_distances,
        velocity_distances,
    )?
    .mask();

    Ok(Comparison {
        behavior_matched: behavior_mask.matched_behavior(behavior),
        reaction_matched: reaction_mask.matched_reaction(reaction),
        behavior: behavior_mask,
        reaction: reaction_mask,
        behavior_idle: 0.0,
        reaction_idle: 0.0,
    })
}

/// Bin indices from [`crate::bins`] are clamped and never negative
fn to_index(bin: i32) -> usize {
    bin.max(0) as usize
}

/// Load `primary`, falling back to `legacy`. Missing files are not an error.
fn load_with_fallback<P, T>(store: &P, primary: &Path, legacy: &Path) -> Result<Option<T>, TelemetryError>
where
    P: PersistenceService,
    T: DeserializeOwned,
{
    for path in [primary, legacy] {
        match store.load_json(path) {
            Ok(value) => {
                log::info!("Loaded existing data from {}", path.display());
                return Ok(Some(value));
            }
            Err(TelemetryError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }

    log::info!(
        "Could not load file {}. Continue with new behavioral data.",
        legacy.display()
    );
    Ok(None)
}
