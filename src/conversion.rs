//! Offline replay of raw captures
//!
//! A raw capture holds one [`RawSample`] per tick of a live run. Replaying it
//! through a fresh engine in simulation mode regenerates the binned artifacts,
//! which makes it possible to re-bin old captures under new parameters without
//! running the physical simulation again.

use crate::error::TelemetryError;
use crate::measurement::{
    BehaviorStatsEngine, MeasurementConfig, MeasurementProgress, DEFAULT_PLATFORM_RADIUS,
};
use crate::paths::ConversionPaths;
use crate::persistence::PersistenceService;
use crate::settings::SettingsBundle;
use crate::signal::{ExitFlag, SystemClock};
use crate::types::{AgentSnapshot, AgentState, RawSample};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Rows between two progress lines
pub const PROGRESS_INTERVAL: usize = 100;

/// Initial number of synthetic agent handles
pub const INITIAL_AGENT_POOL: usize = 2;

/// Assigns recorded agent identifiers to synthetic agent handles
///
/// Identifiers get handles in order of first appearance. The pool starts with
/// [`INITIAL_AGENT_POOL`] handles and grows when a capture contains more
/// distinct agents, e.g. after a stop and resume.
#[derive(Debug, Clone)]
pub struct AgentPool {
    handles: HashMap<i32, usize>,
    capacity: usize,
}

impl AgentPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            handles: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Handle of `id`, assigning the next free one on first sight
    pub fn handle(&mut self, id: i32) -> usize {
        if let Some(handle) = self.handles.get(&id) {
            return *handle;
        }

        let handle = self.handles.len();
        if handle >= self.capacity {
            self.capacity += 1;
            log::debug!("Agent pool grown to {} handles", self.capacity);
        }

        self.handles.insert(id, handle);
        handle
    }

    /// Number of handles available
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of distinct identifiers seen
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Snapshot of `agent` with its identifier replaced by the handle
    fn bind(&mut self, agent: AgentSnapshot) -> AgentSnapshot {
        AgentSnapshot {
            id: self.handle(agent.id) as i32,
            ..agent
        }
    }
}

impl Default for AgentPool {
    fn default() -> Self {
        Self::new(INITIAL_AGENT_POOL)
    }
}

/// Outcome of one replay
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionSummary {
    pub rows: usize,
    pub task_switches: usize,
    pub actions: u64,
    pub reaction_times: u64,
    /// Distinct agents in the capture
    pub agents: usize,
    pub progress: MeasurementProgress,
    pub behavior_path: PathBuf,
    pub reaction_time_path: PathBuf,
    pub samples_path: PathBuf,
}

/// Replays raw captures through a simulation-mode engine
pub struct ConversionDriver<P: PersistenceService + Clone> {
    store: P,
    config: MeasurementConfig,
}

impl<P: PersistenceService + Clone> ConversionDriver<P> {
    /// Driver using the binning parameters of `settings`
    pub fn new(store: P, settings: &SettingsBundle) -> Self {
        let config = MeasurementConfig {
            simulation: true,
            abc_simulation: true,
            collect_raw_data: true,
            sample_size: None,
            update_existing_data: false,
            ..MeasurementConfig::from_settings(settings, DEFAULT_PLATFORM_RADIUS)
        };

        Self { store, config }
    }

    /// Driver with an explicit engine configuration
    pub fn with_config(store: P, config: MeasurementConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    /// Replay the capture at `raw_path` and write the regenerated artifacts
    /// next to it
    pub fn convert(&self, raw_path: &Path) -> Result<ConversionSummary, TelemetryError> {
        let rows: Vec<RawSample> = self.store.read_csv(raw_path)?;
        let paths = ConversionPaths::from_raw(
            raw_path,
            &self.config.artifact_name,
            &self.config.behavior_dimensions(),
            &self.config.reaction_dimensions(),
            &self.store,
        );

        let exit = ExitFlag::new();
        let mut engine = BehaviorStatsEngine::new(
            self.config.clone(),
            self.store.clone(),
            Box::new(exit.clone()),
            Box::new(SystemClock::default()),
        )?;

        let mut targets = engine.targets().clone();
        targets.behavior = paths.behavior;
        targets.reaction_time = paths.reaction_time;
        targets.samples = paths.samples;
        engine = engine.with_targets(targets);

        let started = Instant::now();
        let mut pool = AgentPool::default();
        let mut previous_target: Option<i32> = None;
        let mut task_switches = 0;

        for (i, row) in rows.iter().enumerate() {
            let target = row.target();
            let time_between_switches = row.time_between_switches;

            if previous_target != Some(target.id) && time_between_switches != 0.0 {
                engine.on_task_switch(time_between_switches);
                task_switches += 1;
            }

            if time_between_switches == 0.0 {
                engine.on_episode_reset(false);
            }

            let previous = (row.time_since_last_switch != 0.0).then(|| pool.bind(row.source()));
            let state = AgentState::new(pool.bind(target), previous);
            engine.collect(row.action(), &state, Some(row.time_since_last_switch));

            previous_target = Some(target.id);

            if i % PROGRESS_INTERVAL == 0 {
                log::info!("{:.1}% Steps", i as f64 / rows.len() as f64 * 100.0);
            }

            if exit.is_set() {
                log::info!("Replay stopped after {} of {} rows", i + 1, rows.len());
                break;
            }
        }

        log::info!(
            "Conversion of {} rows took {:.1} s",
            rows.len(),
            started.elapsed().as_secs_f64()
        );

        let summary = ConversionSummary {
            rows: rows.len(),
            task_switches,
            actions: engine.action_count(),
            reaction_times: engine.reaction_count(),
            agents: pool.len(),
            progress: engine.progress(),
            behavior_path: engine.targets().behavior.clone(),
            reaction_time_path: engine.targets().reaction_time.clone(),
            samples_path: engine.targets().samples.clone(),
        };

        engine.close()?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{BehaviorGrid, BehaviorSnapshot, ReactionTimeGrid, ReactionTimeSnapshot};
    use crate::persistence::MemoryPersistence;
    use crate::types::{Action, ReactionTimeSample, Vec3};
    use pretty_assertions::assert_eq;

    fn small_config() -> MeasurementConfig {
        MeasurementConfig {
            area_bins: 4,
            angle_bins_per_axis: 1,
            velocity_bins_per_axis: 1,
            distance_bins: 2,
            velocity_distance_bins: 2,
            simulation: true,
            abc_simulation: true,
            file_name: "replay.csv".to_string(),
            ..Default::default()
        }
    }

    fn agent(id: i32, x: f32, z: f32) -> AgentSnapshot {
        AgentSnapshot {
            id,
            position: Vec3::new(x, 0.5, z),
            ..Default::default()
        }
    }

    fn row(
        action: Action,
        target: AgentSnapshot,
        source: Option<AgentSnapshot>,
        tsls: f64,
        tbs: f64,
    ) -> RawSample {
        RawSample::capture(action, &target, source.as_ref(), tsls, tbs)
    }

    #[test]
    fn test_agent_pool_assigns_in_order_and_grows() {
        let mut pool = AgentPool::default();
        assert!(pool.is_empty());

        assert_eq!(pool.handle(-91234), 0);
        assert_eq!(pool.handle(55), 1);
        assert_eq!(pool.handle(-91234), 0);
        assert_eq!(pool.capacity(), 2);

        assert_eq!(pool.handle(7), 2);
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_convert_replays_capture() {
        let mut store = MemoryPersistence::new();
        let raw_path = Path::new("Scores").join("run1raw.csv");

        let a = agent(4711, -2.0, -2.0);
        let b = agent(815, 2.0, 2.0);
        let rows = vec![
            // episode start, agent a steers with its usual action
            row(Action::new(0.1, 0.1), a, None, 0.0, 0.0),
            row(Action::new(0.1, 0.1), a, None, 0.0, 0.0),
            // switch to b, which has no behavioral data yet
            row(Action::new(0.1, 0.1), b, Some(a), 20.0, 3.0),
            row(Action::new(0.1, 0.1), b, Some(a), 40.0, 3.0),
            // switch back to a, the first changed action resolves
            row(Action::new(0.9, 0.9), a, Some(b), 20.0, 3.0),
            row(Action::new(0.05, 0.05), a, Some(b), 40.0, 3.0),
        ];
        store.append_csv(&raw_path, &rows).unwrap();

        let driver = ConversionDriver::with_config(store.clone(), small_config());
        let summary = driver.convert(&raw_path).unwrap();

        assert_eq!(summary.rows, 6);
        assert_eq!(summary.task_switches, 2);
        assert_eq!(summary.agents, 2);
        assert_eq!(summary.reaction_times, 1);
        assert_eq!(
            summary.behavior_path,
            Path::new("Scores").join("run1_bBSID4D1D1.json")
        );
        assert_eq!(summary.samples_path, Path::new("Scores").join("run1sim.csv"));

        let behavior: BehaviorSnapshot = store.load_json(&summary.behavior_path).unwrap();
        assert_eq!(behavior[0][0][&0].count, 3);
        assert_eq!(behavior[3][0][&0].count, 2);

        let reaction: ReactionTimeSnapshot = store.load_json(&summary.reaction_time_path).unwrap();
        let entry = reaction[0][1][0][&0];
        assert_eq!(entry.count, 1);
        assert_eq!(entry.suspended_count, 1);
        assert!((entry.time_sum - 40.0).abs() < 1e-9);

        let samples: Vec<ReactionTimeSample> = store.read_csv(&summary.samples_path).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].suspended_reaction_time_count, 1);

        // simulation mode never captures raw rows again
        let raw: Vec<RawSample> = store.read_csv(&raw_path).unwrap();
        assert_eq!(raw.len(), 6);
    }

    #[test]
    fn test_convert_keeps_existing_artifacts() {
        let mut store = MemoryPersistence::new();
        let raw_path = Path::new("Scores").join("run2raw.csv");
        store
            .append_csv(&raw_path, &[row(Action::default(), agent(1, 0.0, 0.0), None, 0.0, 0.0)])
            .unwrap();

        let existing = Path::new("Scores").join("run2_bBSID4D1D1.json");
        store.insert(existing.clone(), "[]");

        let driver = ConversionDriver::with_config(store.clone(), small_config());
        let summary = driver.convert(&raw_path).unwrap();

        assert_eq!(
            summary.behavior_path,
            Path::new("Scores").join("run2_bBSID4D1D1conv.json")
        );
        assert_eq!(store.contents(&existing).as_deref(), Some("[]"));
    }

    #[test]
    fn test_convert_missing_capture_fails() {
        let driver = ConversionDriver::with_config(MemoryPersistence::new(), small_config());
        assert!(matches!(
            driver.convert(Path::new("missing_raw.csv")),
            Err(TelemetryError::NotFound(_))
        ));
    }

    #[test]
    fn test_driver_from_settings_forces_simulation() {
        let mut settings = SettingsBundle::new();
        settings.behavioral_data.update_existing_model_behavior = true;
        settings.behavioral_data.collect_data_for_comparison = true;
        settings.behavioral_data.comparison_file_name = "reference_b.json".to_string();

        let driver = ConversionDriver::new(MemoryPersistence::new(), &settings);
        let config = driver.config();
        assert!(config.simulation);
        assert!(config.abc_simulation);
        assert!(!config.update_existing_data);
        // comparison settings pass through to the replay
        assert!(config.collect_for_comparison);
        assert_eq!(config.comparison_file_name, "reference_b.json");
        assert_eq!(config.sample_size, None);
        assert!((config.platform_radius - 5.0).abs() < 1e-6);
    }

    fn comparison_config() -> MeasurementConfig {
        MeasurementConfig {
            collect_for_comparison: true,
            comparison_time_limit: 0.05,
            comparison_file_name: "reference_b.json".to_string(),
            ..small_config()
        }
    }

    #[test]
    fn test_convert_stops_at_comparison_time_limit() {
        let config = comparison_config();
        let [areas, angles, velocities] = config.behavior_dimensions();
        let [t, d, a, v] = config.reaction_dimensions();
        let naming = config.comparison_naming();

        let mut store = MemoryPersistence::new();
        store
            .save_json(
                &naming.behavior(&config.artifact_name, &config.behavior_dimensions()),
                &BehaviorGrid::new(areas, angles, velocities).to_snapshot(),
            )
            .unwrap();
        store
            .save_json(
                &naming.reaction_time(&config.artifact_name, &config.reaction_dimensions()),
                &ReactionTimeGrid::new(t, d, a, v).to_snapshot(),
            )
            .unwrap();

        let raw_path = Path::new("Scores").join("run3raw.csv");
        let a = agent(1, -2.0, -2.0);
        let rows: Vec<RawSample> = (0..6)
            .map(|_| row(Action::new(0.1, 0.1), a, None, 0.0, 0.0))
            .collect();
        store.append_csv(&raw_path, &rows).unwrap();

        let driver = ConversionDriver::with_config(store.clone(), config);
        let summary = driver.convert(&raw_path).unwrap();

        // an empty reference is fully covered, so idle time alone ends the replay
        assert_eq!(summary.progress.behavior_comparison, Some(100.0));
        assert_eq!(summary.actions, 3);

        let behavior: BehaviorSnapshot = store.load_json(&summary.behavior_path).unwrap();
        assert_eq!(behavior[0][0][&0].count, 3);
    }

    #[test]
    fn test_convert_without_comparison_reference_fails() {
        let mut store = MemoryPersistence::new();
        let raw_path = Path::new("Scores").join("run4raw.csv");
        store
            .append_csv(&raw_path, &[row(Action::default(), agent(1, 0.0, 0.0), None, 0.0, 0.0)])
            .unwrap();

        let driver = ConversionDriver::with_config(store.clone(), comparison_config());
        assert!(matches!(
            driver.convert(&raw_path),
            Err(TelemetryError::NotFound(_))
        ));
        assert_eq!(store.paths(), vec![raw_path]);
    }
}
