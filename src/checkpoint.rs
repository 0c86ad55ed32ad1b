//! Durable migration progress, one JSON document per town root.
//!
//! The checkpoint lives at `<town_root>/.migration-checkpoint.json`. Every
//! save goes through a temporary sibling file that is flushed and renamed
//! over the real one, so a reader sees either the previous document or the
//! new one, never a torn write.
//!
//! The store does not check that a loaded checkpoint belongs to the formula
//! or town root being run. That comparison is done by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::CheckpointError;
use crate::formula::Formula;

/// Checkpoint file name inside the town root.
pub const CHECKPOINT_FILE: &str = ".migration-checkpoint.json";

/// Lifecycle of a single step: `pending → running → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Recorded state of one formula step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRun {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Full command output. Never truncated.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    /// Failure description, only set while `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRun {
    pub fn pending(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            output: String::new(),
            error: None,
        }
    }

    /// Enter `running`, discarding whatever a previous attempt left behind.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = StepStatus::Running;
        self.started_at = Some(now);
        self.completed_at = None;
        self.output.clear();
        self.error = None;
    }

    pub fn mark_completed(&mut self, output: String, now: DateTime<Utc>) {
        self.status = StepStatus::Completed;
        self.completed_at = Some(now);
        self.output = output;
        self.error = None;
    }

    pub fn mark_failed(&mut self, error: String, output: String, now: DateTime<Utc>) {
        self.status = StepStatus::Failed;
        self.completed_at = Some(now);
        self.output = output;
        self.error = Some(error);
    }
}

/// Progress of one formula run against one town root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationCheckpoint {
    pub formula_version: u32,
    pub town_root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Keyed by step id. Execution order comes from the formula, not this map.
    pub steps: BTreeMap<String, StepRun>,
}

impl MigrationCheckpoint {
    /// Start a fresh checkpoint with `started_at` set to now.
    pub fn new(formula_version: u32, town_root: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            formula_version,
            town_root: town_root.into(),
            started_at: now,
            updated_at: now,
            steps: BTreeMap::new(),
        }
    }

    pub fn step(&self, id: &str) -> Option<&StepRun> {
        self.steps.get(id)
    }

    /// Fetch a step record, inserting a pending one if the step is new.
    pub fn step_entry(&mut self, id: &str, title: &str) -> &mut StepRun {
        let run = self
            .steps
            .entry(id.to_string())
            .or_insert_with(|| StepRun::pending(id, title));
        if run.title.is_empty() {
            run.title = title.to_string();
        }
        run
    }

    pub fn step_status(&self, id: &str) -> StepStatus {
        self.steps.get(id).map(|s| s.status).unwrap_or_default()
    }

    pub fn is_step_completed(&self, id: &str) -> bool {
        self.step_status(id) == StepStatus::Completed
    }

    /// Steps left in `running`, which after a load means a previous run died mid-step.
    pub fn running_steps(&self) -> Vec<&StepRun> {
        self.steps
            .values()
            .filter(|s| s.status == StepStatus::Running)
            .collect()
    }

    pub fn completed_count(&self) -> usize {
        self.steps
            .values()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    pub fn failed_step(&self) -> Option<&StepRun> {
        self.steps.values().find(|s| s.status == StepStatus::Failed)
    }

    /// True when every step the formula defines is `completed`.
    pub fn is_complete_for(&self, formula: &Formula) -> bool {
        formula.steps.iter().all(|s| self.is_step_completed(&s.id))
    }
}

/// Loads and saves the checkpoint for a single town root.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(town_root: impl AsRef<Path>) -> Self {
        Self {
            path: checkpoint_path(town_root.as_ref()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Persist `checkpoint`, refreshing its `updated_at`.
    ///
    /// `started_at` is written as given. The in-memory value is only durable
    /// once this returns `Ok`.
    pub fn save(&self, checkpoint: &mut MigrationCheckpoint) -> Result<(), CheckpointError> {
        checkpoint.updated_at = Utc::now().max(checkpoint.started_at);

        let mut data =
            serde_json::to_vec_pretty(checkpoint).map_err(CheckpointError::Serialize)?;
        data.push(b'\n');

        write_atomic(&self.path, &data).map_err(|source| CheckpointError::Write {
            path: self.path.clone(),
            source,
        })?;

        debug!(
            path = %self.path.display(),
            steps = checkpoint.steps.len(),
            "Saved migration checkpoint"
        );
        Ok(())
    }

    /// Read the checkpoint back.
    ///
    /// A missing file is reported as [`CheckpointError::NotFound`]; an empty
    /// or malformed file as [`CheckpointError::Parse`].
    pub fn load(&self) -> Result<MigrationCheckpoint, CheckpointError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound {
                    path: self.path.clone(),
                });
            }
            Err(source) => {
                return Err(CheckpointError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_str(&content).map_err(|source| CheckpointError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Like [`Self::load`], but a missing checkpoint is `Ok(None)`.
    pub fn load_optional(&self) -> Result<Option<MigrationCheckpoint>, CheckpointError> {
        match self.load() {
            Ok(cp) => Ok(Some(cp)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete the checkpoint. Returns whether a file was removed.
    pub fn remove(&self) -> Result<bool, CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CheckpointError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Location of the checkpoint file for `town_root`.
pub fn checkpoint_path(town_root: &Path) -> PathBuf {
    town_root.join(CHECKPOINT_FILE)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;

    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(format!(".tmp-{}", std::process::id()));
    let tmp_path = parent.join(tmp_name);

    let result = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
        return result;
    }

    // Make the rename itself durable.
    #[cfg(unix)]
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}
