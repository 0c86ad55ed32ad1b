//! Typed error hierarchy for the migration engine.
//!
//! Three top-level enums cover the three subsystems:
//! - `CheckpointError` — loading and saving the on-disk checkpoint
//! - `FormulaError` — reading and validating formula definitions
//! - `MigrationError` — orchestrator failures surfaced to the caller

use std::path::PathBuf;
use thiserror::Error;

use crate::orchestrator::CheckpointAnomaly;

/// Errors from the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// No checkpoint exists yet. Expected on the first run of a formula.
    #[error("No migration checkpoint at {path}")]
    NotFound { path: PathBuf },

    #[error("Error parsing checkpoint {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize checkpoint: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CheckpointError {
    /// True when the failure only means "never started".
    pub fn is_not_found(&self) -> bool {
        matches!(self, CheckpointError::NotFound { .. })
    }
}

/// Errors from loading a formula definition.
#[derive(Debug, Error)]
pub enum FormulaError {
    #[error("Failed to read formula file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse formula {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid formula: {0}")]
    Invalid(String),

    #[error("Formula step id '{0}' is defined more than once")]
    DuplicateStep(String),
}

/// Errors from a migration run.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Step {step} failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("Checkpoint does not match this run: {}", describe_anomalies(.0))]
    CheckpointMismatch(Vec<CheckpointAnomaly>),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Formula(#[from] FormulaError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn describe_anomalies(anomalies: &[CheckpointAnomaly]) -> String {
    anomalies
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
