//! Reconciling a loaded checkpoint with the run about to start.
//!
//! The checkpoint store accepts whatever is on disk. This module decides what
//! that record means for the current formula and town root: which steps to
//! skip, which to replay, and which recorded facts disagree with the run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::checkpoint::{MigrationCheckpoint, StepStatus};
use crate::formula::Formula;

/// A way in which a loaded checkpoint disagrees with the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckpointAnomaly {
    /// Checkpoint was written by a different formula version.
    FormulaVersion { checkpoint: u32, formula: u32 },
    /// Checkpoint records a different town root than the one being migrated.
    TownRoot {
        checkpoint: PathBuf,
        current: PathBuf,
    },
    /// Checkpoint has a step the formula no longer defines.
    UnknownStep { id: String },
}

impl fmt::Display for CheckpointAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointAnomaly::FormulaVersion {
                checkpoint,
                formula,
            } => write!(
                f,
                "checkpoint formula version {} differs from formula version {}",
                checkpoint, formula
            ),
            CheckpointAnomaly::TownRoot {
                checkpoint,
                current,
            } => write!(
                f,
                "checkpoint town root {} differs from {}",
                checkpoint.display(),
                current.display()
            ),
            CheckpointAnomaly::UnknownStep { id } => {
                write!(f, "checkpoint step '{}' is not in the formula", id)
            }
        }
    }
}

/// What to do when a checkpoint does not match the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Refuse to execute anything
    #[default]
    Abort,
    /// Carry on and report the anomalies
    Continue,
}

impl fmt::Display for MismatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchPolicy::Abort => write!(f, "abort"),
            MismatchPolicy::Continue => write!(f, "continue"),
        }
    }
}

impl std::str::FromStr for MismatchPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(MismatchPolicy::Abort),
            "continue" => Ok(MismatchPolicy::Continue),
            _ => anyhow::bail!(
                "Invalid mismatch policy '{}'. Valid values: abort, continue",
                s
            ),
        }
    }
}

/// How the orchestrator treats a step given its recorded status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDisposition {
    /// Already completed; never touched again
    Skip,
    /// Not attempted yet
    Run,
    /// Found `running`: a previous run died inside it, so it runs again from scratch
    Replay,
    /// Found `failed`: attempted again
    Retry,
}

impl StepDisposition {
    pub fn for_status(status: StepStatus) -> Self {
        match status {
            StepStatus::Completed => StepDisposition::Skip,
            StepStatus::Pending => StepDisposition::Run,
            StepStatus::Running => StepDisposition::Replay,
            StepStatus::Failed => StepDisposition::Retry,
        }
    }
}

impl fmt::Display for StepDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepDisposition::Skip => write!(f, "skip"),
            StepDisposition::Run => write!(f, "run"),
            StepDisposition::Replay => write!(f, "replay"),
            StepDisposition::Retry => write!(f, "retry"),
        }
    }
}

/// Compare a loaded checkpoint against the formula and town root of this run.
pub fn detect_anomalies(
    checkpoint: &MigrationCheckpoint,
    formula: &Formula,
    town_root: &Path,
) -> Vec<CheckpointAnomaly> {
    let mut anomalies = Vec::new();

    if checkpoint.formula_version != formula.version {
        anomalies.push(CheckpointAnomaly::FormulaVersion {
            checkpoint: checkpoint.formula_version,
            formula: formula.version,
        });
    }

    if checkpoint.town_root != town_root {
        anomalies.push(CheckpointAnomaly::TownRoot {
            checkpoint: checkpoint.town_root.clone(),
            current: town_root.to_path_buf(),
        });
    }

    for id in checkpoint.steps.keys() {
        if !formula.has_step(id) {
            anomalies.push(CheckpointAnomaly::UnknownStep { id: id.clone() });
        }
    }

    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::StepRun;
    use crate::formula::FormulaStep;

    fn formula(version: u32) -> Formula {
        Formula {
            name: "test".into(),
            version,
            description: String::new(),
            steps: vec![
                FormulaStep::new("detect", "Detect", ""),
                FormulaStep::new("backup", "Backup", ""),
            ],
        }
    }

    #[test]
    fn test_matching_checkpoint_has_no_anomalies() {
        let mut cp = MigrationCheckpoint::new(1, "/town");
        cp.steps
            .insert("detect".into(), StepRun::pending("detect", "Detect"));
        assert!(detect_anomalies(&cp, &formula(1), Path::new("/town")).is_empty());
    }

    #[test]
    fn test_version_mismatch_detected() {
        let cp = MigrationCheckpoint::new(99, "/town");
        let anomalies = detect_anomalies(&cp, &formula(1), Path::new("/town"));
        assert_eq!(
            anomalies,
            vec![CheckpointAnomaly::FormulaVersion {
                checkpoint: 99,
                formula: 1
            }]
        );
    }

    #[test]
    fn test_town_root_mismatch_detected() {
        let cp = MigrationCheckpoint::new(1, "/some/other/town");
        let anomalies = detect_anomalies(&cp, &formula(1), Path::new("/town"));
        assert_eq!(anomalies.len(), 1);
        assert!(matches!(anomalies[0], CheckpointAnomaly::TownRoot { .. }));
        assert!(anomalies[0].to_string().contains("/some/other/town"));
    }

    #[test]
    fn test_trailing_slash_is_not_a_mismatch() {
        let cp = MigrationCheckpoint::new(1, "/town/");
        assert!(detect_anomalies(&cp, &formula(1), Path::new("/town")).is_empty());
    }

    #[test]
    fn test_unknown_step_detected() {
        let mut cp = MigrationCheckpoint::new(1, "/town");
        cp.steps
            .insert("old-step".into(), StepRun::pending("old-step", ""));
        let anomalies = detect_anomalies(&cp, &formula(1), Path::new("/town"));
        assert_eq!(
            anomalies,
            vec![CheckpointAnomaly::UnknownStep {
                id: "old-step".into()
            }]
        );
    }

    #[test]
    fn test_disposition_for_status() {
        assert_eq!(
            StepDisposition::for_status(StepStatus::Completed),
            StepDisposition::Skip
        );
        assert_eq!(
            StepDisposition::for_status(StepStatus::Running),
            StepDisposition::Replay
        );
        assert_eq!(
            StepDisposition::for_status(StepStatus::Failed),
            StepDisposition::Retry
        );
        assert_eq!(
            StepDisposition::for_status(StepStatus::Pending),
            StepDisposition::Run
        );
    }

    #[test]
    fn test_mismatch_policy_parse() {
        assert_eq!(
            "abort".parse::<MismatchPolicy>().unwrap(),
            MismatchPolicy::Abort
        );
        assert_eq!(
            "CONTINUE".parse::<MismatchPolicy>().unwrap(),
            MismatchPolicy::Continue
        );
        assert!("ignore".parse::<MismatchPolicy>().is_err());
        assert_eq!(MismatchPolicy::default(), MismatchPolicy::Abort);
    }
}
