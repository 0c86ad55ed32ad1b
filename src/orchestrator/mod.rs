pub mod runner;
pub mod state;

pub use runner::{
    DEFAULT_OUTPUT_PREVIEW_CHARS, MigrationRunner, RunOptions, RunOutcome, RunReport, StepPlan,
};
pub use state::{CheckpointAnomaly, MismatchPolicy, StepDisposition, detect_anomalies};
