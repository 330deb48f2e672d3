//! Persistence collaborator
//!
//! The engine touches storage only at construction (resume / comparison
//! loading) and at close (saving artifacts). JSON holds the binned grids and
//! CSV holds per-tick raw samples and reaction-time samples.

use crate::error::TelemetryError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Key-value JSON/CSV storage addressed by path
pub trait PersistenceService {
    /// True when something is stored at `path`
    fn exists(&self, path: &Path) -> bool;

    /// Load a JSON document. Fails with [`TelemetryError::NotFound`] when absent.
    fn load_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, TelemetryError>;

    /// Store a JSON document, replacing any previous content
    fn save_json<T: Serialize>(&mut self, path: &Path, value: &T) -> Result<(), TelemetryError>;

    /// Append rows to a CSV file, writing the header only when the file is new
    fn append_csv<T: Serialize>(&mut self, path: &Path, rows: &[T]) -> Result<(), TelemetryError>;

    /// Replace a CSV file with the given rows
    fn write_csv<T: Serialize>(&mut self, path: &Path, rows: &[T]) -> Result<(), TelemetryError>;

    /// Read every row of a CSV file with a header line
    fn read_csv<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>, TelemetryError>;
}

/// Filesystem-backed persistence
#[derive(Debug, Clone, Copy, Default)]
pub struct FilePersistence;

impl FilePersistence {
    pub fn new() -> Self {
        Self
    }

    fn ensure_parent(path: &Path) -> Result<(), TelemetryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                log::info!(
                    "Directory {} not found, create new directory.",
                    parent.display()
                );
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

impl PersistenceService for FilePersistence {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn load_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, TelemetryError> {
        if !path.is_file() {
            return Err(TelemetryError::NotFound(path.display().to_string()));
        }

        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    fn save_json<T: Serialize>(&mut self, path: &Path, value: &T) -> Result<(), TelemetryError> {
        Self::ensure_parent(path)?;

        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, value)?;
        Ok(())
    }

    fn append_csv<T: Serialize>(&mut self, path: &Path, rows: &[T]) -> Result<(), TelemetryError> {
        Self::ensure_parent(path)?;

        let has_content = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(!has_content)
            .from_writer(file);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_csv<T: Serialize>(&mut self, path: &Path, rows: &[T]) -> Result<(), TelemetryError> {
        Self::ensure_parent(path)?;

        let mut writer = csv::Writer::from_path(path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn read_csv<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>, TelemetryError> {
        if !path.is_file() {
            return Err(TelemetryError::NotFound(path.display().to_string()));
        }

        let mut reader = csv::Reader::from_path(path)?;
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            rows.push(row?);
        }
        Ok(rows)
    }
}

/// In-memory persistence keeping documents as text
///
/// Clones share the same storage, so a caller can hand one clone to an engine
/// and inspect the written artifacts through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    files: Rc<RefCell<BTreeMap<PathBuf, String>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw text stored at `path`
    pub fn contents(&self, path: &Path) -> Option<String> {
        self.files.borrow().get(path).cloned()
    }

    /// Store raw text at `path`
    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        self.files.borrow_mut().insert(path.into(), contents.into());
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.borrow().keys().cloned().collect()
    }

    fn csv_text<T: Serialize>(rows: &[T], headers: bool) -> Result<String, TelemetryError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(headers)
            .from_writer(Vec::new());
        for row in rows {
            writer.serialize(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| TelemetryError::IoError(e.into_error()))?;
        String::from_utf8(bytes)
            .map_err(|e| TelemetryError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }
}

impl PersistenceService for MemoryPersistence {
    fn exists(&self, path: &Path) -> bool {
        self.files.borrow().contains_key(path)
    }

    fn load_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, TelemetryError> {
        let files = self.files.borrow();
        let text = files
            .get(path)
            .ok_or_else(|| TelemetryError::NotFound(path.display().to_string()))?;
        Ok(serde_json::from_str(text)?)
    }

    fn save_json<T: Serialize>(&mut self, path: &Path, value: &T) -> Result<(), TelemetryError> {
        let text = serde_json::to_string(value)?;
        self.insert(path, text);
        Ok(())
    }

    fn append_csv<T: Serialize>(&mut self, path: &Path, rows: &[T]) -> Result<(), TelemetryError> {
        let mut files = self.files.borrow_mut();
        let existing = files.entry(path.to_path_buf()).or_default();
        let text = Self::csv_text(rows, existing.is_empty())?;
        existing.push_str(&text);
        Ok(())
    }

    fn write_csv<T: Serialize>(&mut self, path: &Path, rows: &[T]) -> Result<(), TelemetryError> {
        let text = Self::csv_text(rows, true)?;
        self.insert(path, text);
        Ok(())
    }

    fn read_csv<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>, TelemetryError> {
        let files = self.files.borrow();
        let text = files
            .get(path)
            .ok_or_else(|| TelemetryError::NotFound(path.display().to_string()))?;

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            rows.push(row?);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, AgentSnapshot, RawSample, ReactionTimeSample, Vec3};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn make_row(id: i32, t: f64) -> RawSample {
        let target = AgentSnapshot {
            id,
            position: Vec3::new(1.0, 0.5, -1.0),
            velocity: Vec3::new(0.1, 0.0, 0.2),
            angle: Vec3::new(359.0, 0.0, 2.0),
        };
        RawSample::capture(Action::new(0.3, -0.4), &target, None, t, 1000.0)
    }

    #[test]
    fn test_file_csv_append_writes_single_header() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("1raw.csv");
        let mut store = FilePersistence::new();

        store.append_csv(&path, &[make_row(1, 0.0)]).unwrap();
        store.append_csv(&path, &[make_row(2, 20.0), make_row(2, 40.0)]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("ActionZ").count(), 1);

        let rows: Vec<RawSample> = store.read_csv(&path).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], make_row(2, 40.0));
    }

    #[test]
    fn test_file_json_round_trip_and_missing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scores").join("x_b.json");
        let mut store = FilePersistence::new();

        assert!(matches!(
            store.load_json::<Vec<u32>>(&path),
            Err(TelemetryError::NotFound(_))
        ));

        store.save_json(&path, &vec![1u32, 2, 3]).unwrap();
        assert!(store.exists(&path));
        assert_eq!(store.load_json::<Vec<u32>>(&path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_memory_store_shared_between_clones() {
        let store = MemoryPersistence::new();
        let mut writer = store.clone();
        let path = Path::new("rt.csv");

        writer
            .write_csv(
                path,
                &[ReactionTimeSample {
                    time: 312.5,
                    suspended_reaction_time_count: 4,
                }],
            )
            .unwrap();

        let text = store.contents(path).unwrap();
        assert!(text.starts_with("Time,SuspendedReactionTimeCount"));

        let rows: Vec<ReactionTimeSample> = store.read_csv(path).unwrap();
        assert_eq!(rows[0].suspended_reaction_time_count, 4);
    }

    #[test]
    fn test_memory_csv_append() {
        let mut store = MemoryPersistence::new();
        let path = Path::new("raw.csv");
        store.append_csv(path, &[make_row(1, 0.0)]).unwrap();
        store.append_csv(path, &[make_row(1, 20.0)]).unwrap();

        let rows: Vec<RawSample> = store.read_csv(path).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
