//! Artifact file naming
//!
//! Artifacts live under `<scores root>/<score string>/`, where the score string
//! encodes the supervisor configuration and the task mix. File names encode the
//! grid dimensions so that data collected under different binning parameters
//! never merges silently.

use crate::persistence::PersistenceService;
use crate::settings::{Hyperparameters, SupervisorSettings};
use std::path::{Path, PathBuf};

/// Default directory for score artifacts, relative to the working directory
pub const SCORES_DIR: &str = "Scores";

/// File name used when none is configured
pub const DEFAULT_BEHAVIOR_FILE_NAME: &str = "behavioralData.json";

/// Directory name encoding the supervisor configuration and the task mix
///
/// `CD{T|F}DRI{interval}[R{range}]DII{increment}DP{period}{tasks}`, where the
/// range part is only present for a random supervisor.
pub fn score_string(supervisor: &SupervisorSettings, hyperparameters: &Hyperparameters) -> String {
    let constant = if supervisor.set_constant_decision_request_interval {
        'T'
    } else {
        'F'
    };

    let range = if supervisor.random_supervisor {
        format!("R{}", supervisor.decision_request_interval_range_in_seconds)
    } else {
        String::new()
    };

    let result = format!(
        "CD{}DRI{}{}DII{}DP{}{}",
        constant,
        supervisor.decision_request_interval_in_seconds,
        range,
        supervisor.difficulty_increment_interval,
        supervisor.decision_period,
        task_string(&hyperparameters.tasks)
    );

    result.replace(',', ".")
}

/// Shortened lowercase name plus count for every distinct task, in order of
/// first appearance
pub fn task_string(tasks: &[String]) -> String {
    let mut groups: Vec<(&str, usize)> = Vec::new();

    for task in tasks {
        match groups.iter_mut().find(|(name, _)| *name == task.as_str()) {
            Some((_, count)) => *count += 1,
            None => groups.push((task.as_str(), 1)),
        }
    }

    groups
        .into_iter()
        .map(|(name, count)| format!("{}{}", shorten_string(name, 20).to_lowercase(), count))
        .collect()
}

/// Abbreviate `input` to the initials of its words when it exceeds `max_length`
///
/// Words are capitalized runs (`Ball`), digit runs and lowercase runs.
pub fn shorten_string(input: &str, max_length: usize) -> String {
    if input.is_empty() || max_length == 0 {
        return String::new();
    }

    if input.chars().count() <= max_length {
        return input.to_string();
    }

    let chars: Vec<char> = input.chars().collect();
    let mut initials = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let end = if c.is_ascii_uppercase() {
            let run = run_end(&chars, i + 1, |c| c.is_ascii_lowercase());
            (run > i + 1).then_some(run)
        } else if c.is_ascii_digit() {
            Some(run_end(&chars, i, |c| c.is_ascii_digit()))
        } else if c.is_ascii_lowercase() {
            Some(run_end(&chars, i, |c| c.is_ascii_lowercase()))
        } else {
            None
        };

        match end {
            Some(end) => {
                initials.push(c);
                i = end;
            }
            None => i += 1,
        }
    }

    initials.chars().take(max_length).collect()
}

fn run_end(chars: &[char], start: usize, matches: impl Fn(char) -> bool) -> usize {
    let mut end = start;
    while end < chars.len() && matches(chars[end]) {
        end += 1;
    }
    end
}

/// `D{n}` for every grid dimension
pub fn dimension_string(dimensions: &[usize]) -> String {
    dimensions.iter().map(|d| format!("D{}", d)).collect()
}

/// Identifier part of a behavioral file name: everything before `_b`,
/// without extension
fn file_id(file_name: &str) -> String {
    let head = file_name.split("_b").next().unwrap_or_default();
    Path::new(head)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

/// Naming scheme for the artifacts of one measurement run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNaming {
    directory: PathBuf,
    id: String,
    extension: String,
}

impl ArtifactNaming {
    /// Naming under `scores_root/score_dir` for the configured file name
    pub fn new(scores_root: &Path, score_dir: &str, file_name: &str) -> Self {
        let file_name = if file_name.is_empty() {
            DEFAULT_BEHAVIOR_FILE_NAME
        } else {
            file_name
        };

        Self {
            directory: scores_root.join(score_dir),
            id: file_id(file_name),
            extension: file_extension(file_name),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `{id}_b{name}{D..}{ext}`
    pub fn behavior(&self, name: &str, dimensions: &[usize]) -> PathBuf {
        behavior_path(&self.directory, &self.id, name, dimensions, &self.extension)
    }

    /// `{id}_rt_{name}{D..}{ext}`
    pub fn reaction_time(&self, name: &str, dimensions: &[usize]) -> PathBuf {
        reaction_time_path(&self.directory, &self.id, name, dimensions, &self.extension)
    }

    /// `{id}_b{ext}`, written by older versions without configuration string
    pub fn legacy_behavior(&self) -> PathBuf {
        self.directory.join(format!("{}_b{}", self.id, self.extension))
    }

    /// `{id}_rt{ext}`
    pub fn legacy_reaction_time(&self) -> PathBuf {
        self.directory.join(format!("{}_rt{}", self.id, self.extension))
    }

    /// `{id}raw.csv`
    pub fn raw(&self) -> PathBuf {
        self.directory.join(format!("{}raw.csv", self.id))
    }
}

fn behavior_path(dir: &Path, id: &str, name: &str, dimensions: &[usize], ext: &str) -> PathBuf {
    dir.join(format!("{}_b{}{}{}", id, name, dimension_string(dimensions), ext))
}

fn reaction_time_path(dir: &Path, id: &str, name: &str, dimensions: &[usize], ext: &str) -> PathBuf {
    dir.join(format!("{}_rt_{}{}{}", id, name, dimension_string(dimensions), ext))
}

/// Paths of artifacts regenerated from a raw capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionPaths {
    pub behavior: PathBuf,
    pub reaction_time: PathBuf,
    pub samples: PathBuf,
}

impl ConversionPaths {
    /// Derive output paths next to `raw_path`. An output that already exists
    /// is not overwritten; the new file gets a `conv` suffix instead.
    pub fn from_raw<P: PersistenceService>(
        raw_path: &Path,
        name: &str,
        behavior_dimensions: &[usize],
        reaction_dimensions: &[usize],
        store: &P,
    ) -> Self {
        let dir = raw_path.parent().unwrap_or_else(|| Path::new(""));
        let file_name = raw_path
            .file_name()
            .map(|f| f.to_string_lossy().replace("raw", ""))
            .unwrap_or_default();
        let id = Path::new(&file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let behavior = avoid_existing(
            behavior_path(dir, &id, name, behavior_dimensions, ".json"),
            store,
        );
        let reaction_time = avoid_existing(
            reaction_time_path(dir, &id, name, reaction_dimensions, ".json"),
            store,
        );

        log::info!("Transform {} to {}", raw_path.display(), behavior.display());

        Self {
            behavior,
            reaction_time,
            samples: simulation_path(raw_path),
        }
    }
}

fn avoid_existing<P: PersistenceService>(path: PathBuf, store: &P) -> PathBuf {
    if !store.exists(&path) {
        return path;
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = file_extension(&path.to_string_lossy());
    let converted = path.with_file_name(format!("{}conv{}", stem, ext));

    log::info!(
        "Path {} already exists, converting to {} instead",
        path.display(),
        converted.display()
    );
    converted
}

/// Raw capture path with `raw` replaced by `sim`
pub fn simulation_path(raw_path: &Path) -> PathBuf {
    PathBuf::from(raw_path.to_string_lossy().replace("raw", "sim"))
}

/// Artifact paths of a simulation run identified by `simulation_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationPaths {
    pub behavior: PathBuf,
    pub reaction_time: PathBuf,
    pub samples: PathBuf,
    pub raw: PathBuf,
}

impl SimulationPaths {
    pub fn new(scores_root: &Path, simulation_id: i32, file_name: &str) -> Self {
        let file_name = if file_name.is_empty() {
            DEFAULT_BEHAVIOR_FILE_NAME
        } else {
            file_name
        };
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let json_name = format!("{}.json", stem);

        Self {
            behavior: scores_root.join(format!("{}behavior_{}", simulation_id, json_name)),
            reaction_time: scores_root.join(format!("{}rt_{}", simulation_id, json_name)),
            samples: scores_root.join(format!("{}{}.csv", simulation_id, stem)),
            raw: scores_root.join(format!("{}raw_{}.csv", simulation_id, stem)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use pretty_assertions::assert_eq;

    fn ball_tasks(n: usize) -> Hyperparameters {
        Hyperparameters {
            tasks: vec!["BallAgent".to_string(); n],
            ..Default::default()
        }
    }

    #[test]
    fn test_score_string() {
        let mut supervisor = SupervisorSettings {
            decision_request_interval_in_seconds: 5.0,
            decision_request_interval_range_in_seconds: 2.5,
            difficulty_increment_interval: 10,
            decision_period: 5,
            ..Default::default()
        };

        assert_eq!(
            score_string(&supervisor, &ball_tasks(2)),
            "CDFDRI5DII10DP5ballagent2"
        );

        supervisor.random_supervisor = true;
        supervisor.set_constant_decision_request_interval = true;
        assert_eq!(
            score_string(&supervisor, &ball_tasks(2)),
            "CDTDRI5R2.5DII10DP5ballagent2"
        );
    }

    #[test]
    fn test_task_string_groups_in_order() {
        let tasks = vec![
            "BallAgent".to_string(),
            "ChessAgent".to_string(),
            "BallAgent".to_string(),
        ];
        assert_eq!(task_string(&tasks), "ballagent2chessagent1");
    }

    #[test]
    fn test_shorten_string() {
        assert_eq!(shorten_string("BallAgent", 10), "BallAgent");
        assert_eq!(shorten_string("BallStateInformation", 10), "BSI");
        assert_eq!(shorten_string("Ball3DAgentHumanCognition", 10), "B3AHC");
        assert_eq!(shorten_string("abcdefghijklmnop", 10), "a");
        assert_eq!(shorten_string("", 10), "");
        assert_eq!(shorten_string("Anything", 0), "");
    }

    #[test]
    fn test_artifact_naming() {
        let naming = ArtifactNaming::new(Path::new("Scores"), "CDFDRI5DII0DP5ballagent2", "run1_b.json");
        let dir = Path::new("Scores").join("CDFDRI5DII0DP5ballagent2");

        assert_eq!(naming.id(), "run1");
        assert_eq!(naming.behavior("BSI", &[225, 125, 216]), dir.join("run1_bBSID225D125D216.json"));
        assert_eq!(
            naming.reaction_time("BSI", &[1, 12, 125, 12]),
            dir.join("run1_rt_BSID1D12D125D12.json")
        );
        assert_eq!(naming.legacy_behavior(), dir.join("run1_b.json"));
        assert_eq!(naming.legacy_reaction_time(), dir.join("run1_rt.json"));
        assert_eq!(naming.raw(), dir.join("run1raw.csv"));
    }

    #[test]
    fn test_default_file_name() {
        let naming = ArtifactNaming::new(Path::new("Scores"), "x", "");
        assert_eq!(naming.id(), "behavioralData");
    }

    #[test]
    fn test_conversion_paths_avoid_existing_files() {
        let store = MemoryPersistence::new();
        let raw = Path::new("Scores").join("run1raw.csv");

        let paths = ConversionPaths::from_raw(&raw, "", &[4, 1, 1], &[1, 1, 1, 1], &store);
        assert_eq!(paths.behavior, Path::new("Scores").join("run1_bD4D1D1.json"));
        assert_eq!(paths.reaction_time, Path::new("Scores").join("run1_rt_D1D1D1D1.json"));
        assert_eq!(paths.samples, Path::new("Scores").join("run1sim.csv"));

        store.insert(paths.behavior.clone(), "[]");
        let again = ConversionPaths::from_raw(&raw, "", &[4, 1, 1], &[1, 1, 1, 1], &store);
        assert_eq!(again.behavior, Path::new("Scores").join("run1_bD4D1D1conv.json"));
        assert_eq!(again.reaction_time, paths.reaction_time);
    }

    #[test]
    fn test_simulation_paths() {
        let paths = SimulationPaths::new(Path::new("Scores"), 7, "abc.csv");
        assert_eq!(paths.behavior, Path::new("Scores").join("7behavior_abc.json"));
        assert_eq!(paths.reaction_time, Path::new("Scores").join("7rt_abc.json"));
        assert_eq!(paths.samples, Path::new("Scores").join("7abc.csv"));
    }
}
