use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointStore, MigrationCheckpoint, StepStatus};
use crate::errors::MigrationError;
use crate::executor::{CommandExecutor, CommandFailure, ExecContext};
use crate::formula::{Formula, FormulaStep};
use crate::orchestrator::state::{
    CheckpointAnomaly, MismatchPolicy, StepDisposition, detect_anomalies,
};
use crate::ui::MigrationUI;
use crate::util::truncate_output;

/// Characters of command output shown in logs and on the terminal.
pub const DEFAULT_OUTPUT_PREVIEW_CHARS: usize = 400;

const COMMAND_PREVIEW_CHARS: usize = 60;

/// Knobs for a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub mismatch_policy: MismatchPolicy,
    pub output_preview_chars: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mismatch_policy: MismatchPolicy::Abort,
            output_preview_chars: DEFAULT_OUTPUT_PREVIEW_CHARS,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every formula step is completed.
    Completed,
    /// Execution stopped at the first failing step.
    Failed { step_id: String, error: String },
}

/// Everything a caller needs to know about a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Final checkpoint, as persisted.
    pub checkpoint: MigrationCheckpoint,
    pub outcome: RunOutcome,
    /// Steps executed by this run, in order. Includes a failed step.
    pub executed: Vec<String>,
    /// Steps skipped because an earlier run completed them.
    pub skipped: Vec<String>,
    /// Steps found `running` and executed again from scratch.
    pub replayed: Vec<String>,
    /// Anomalies tolerated under [`MismatchPolicy::Continue`].
    pub anomalies: Vec<CheckpointAnomaly>,
    /// True when no checkpoint existed before this run.
    pub fresh: bool,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    /// Convert a failed outcome into [`MigrationError::StepFailed`].
    pub fn into_result(self) -> Result<MigrationCheckpoint, MigrationError> {
        match self.outcome {
            RunOutcome::Completed => Ok(self.checkpoint),
            RunOutcome::Failed { step_id, error } => Err(MigrationError::StepFailed {
                step: step_id,
                message: error,
            }),
        }
    }
}

/// What a run would do with one step, without doing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPlan {
    pub id: String,
    pub title: String,
    pub status: StepStatus,
    pub disposition: StepDisposition,
    pub commands: Vec<String>,
}

/// Drives a formula against a town root, checkpointing every transition.
pub struct MigrationRunner {
    formula: Formula,
    town_root: PathBuf,
    store: CheckpointStore,
    executor: Arc<dyn CommandExecutor>,
    options: RunOptions,
    ui: Option<Arc<MigrationUI>>,
}

impl MigrationRunner {
    pub fn new(
        formula: Formula,
        town_root: impl AsRef<Path>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        let town_root = town_root.as_ref().to_path_buf();
        Self {
            store: CheckpointStore::new(&town_root),
            formula,
            town_root,
            executor,
            options: RunOptions::default(),
            ui: None,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_ui(mut self, ui: Arc<MigrationUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Describe what [`Self::run`] would do, step by step, without executing anything.
    ///
    /// Anomalies are returned alongside the plan regardless of the mismatch policy.
    pub fn plan(&self) -> Result<(Vec<StepPlan>, Vec<CheckpointAnomaly>), MigrationError> {
        let existing = self.store.load_optional()?;
        let anomalies = existing
            .as_ref()
            .map(|cp| detect_anomalies(cp, &self.formula, &self.town_root))
            .unwrap_or_default();

        let town_root = self.town_root.to_string_lossy();
        let plan = self
            .formula
            .steps
            .iter()
            .map(|step| {
                let status = existing
                    .as_ref()
                    .map(|cp| cp.step_status(&step.id))
                    .unwrap_or_default();
                StepPlan {
                    id: step.id.clone(),
                    title: step.title.clone(),
                    status,
                    disposition: StepDisposition::for_status(status),
                    commands: step.commands(&town_root),
                }
            })
            .collect();

        Ok((plan, anomalies))
    }

    /// Run the formula, resuming from the checkpoint on disk if there is one.
    pub async fn run(&self) -> Result<RunReport, MigrationError> {
        let existing = self.store.load_optional()?;
        self.run_from(existing).await
    }

    /// Run the formula starting from `existing`, or from scratch when `None`.
    ///
    /// Returns `Err` only when nothing could be attempted or a checkpoint
    /// write failed. A failing step is reported through [`RunOutcome::Failed`].
    pub async fn run_from(
        &self,
        existing: Option<MigrationCheckpoint>,
    ) -> Result<RunReport, MigrationError> {
        let fresh = existing.is_none();
        let (mut checkpoint, anomalies) = match existing {
            None => {
                info!(
                    formula = %self.formula.name,
                    version = self.formula.version,
                    town_root = %self.town_root.display(),
                    "Starting new migration"
                );
                let mut checkpoint =
                    MigrationCheckpoint::new(self.formula.version, &self.town_root);
                self.store.save(&mut checkpoint)?;
                (checkpoint, Vec::new())
            }
            Some(checkpoint) => {
                let anomalies = detect_anomalies(&checkpoint, &self.formula, &self.town_root);
                self.check_anomalies(&anomalies)?;
                info!(
                    formula = %self.formula.name,
                    completed = checkpoint.completed_count(),
                    total = self.formula.steps.len(),
                    "Resuming migration from checkpoint"
                );
                (checkpoint, anomalies)
            }
        };

        let mut outcome = RunOutcome::Completed;
        let mut executed = Vec::new();
        let mut skipped = Vec::new();
        let mut replayed = Vec::new();

        for (index, step) in self.formula.steps.iter().enumerate() {
            let disposition = StepDisposition::for_status(checkpoint.step_status(&step.id));

            match disposition {
                StepDisposition::Skip => {
                    info!(step = %step.id, "Skipping completed step");
                    if let Some(ref ui) = self.ui {
                        ui.skip_step(&step.id, &step.title);
                    }
                    skipped.push(step.id.clone());
                    continue;
                }
                StepDisposition::Replay => {
                    warn!(
                        step = %step.id,
                        "Step was left running by a previous run; executing it again"
                    );
                    replayed.push(step.id.clone());
                }
                StepDisposition::Retry => {
                    info!(step = %step.id, "Retrying previously failed step");
                }
                StepDisposition::Run => {}
            }

            executed.push(step.id.clone());

            if let Some(failure) = self
                .run_step(&mut checkpoint, index + 1, step, disposition)
                .await?
            {
                outcome = RunOutcome::Failed {
                    step_id: step.id.clone(),
                    error: failure.message,
                };
                break;
            }
        }

        if let Some(ref ui) = self.ui {
            ui.finish(outcome == RunOutcome::Completed);
        }
        match &outcome {
            RunOutcome::Completed => info!(
                executed = executed.len(),
                skipped = skipped.len(),
                "Migration complete"
            ),
            RunOutcome::Failed { step_id, error } => {
                error!(step = %step_id, "Migration stopped: {}", error)
            }
        }

        Ok(RunReport {
            checkpoint,
            outcome,
            executed,
            skipped,
            replayed,
            anomalies,
            fresh,
        })
    }

    fn check_anomalies(&self, anomalies: &[CheckpointAnomaly]) -> Result<(), MigrationError> {
        if anomalies.is_empty() {
            return Ok(());
        }
        for anomaly in anomalies {
            warn!(policy = %self.options.mismatch_policy, "Checkpoint mismatch: {}", anomaly);
        }
        match self.options.mismatch_policy {
            MismatchPolicy::Abort => Err(MigrationError::CheckpointMismatch(anomalies.to_vec())),
            MismatchPolicy::Continue => {
                if let Some(ref ui) = self.ui {
                    for anomaly in anomalies {
                        ui.show_anomaly(&anomaly.to_string());
                    }
                }
                Ok(())
            }
        }
    }

    /// Execute one step and persist its outcome. `Ok(Some(_))` means the step failed.
    async fn run_step(
        &self,
        checkpoint: &mut MigrationCheckpoint,
        index: usize,
        step: &FormulaStep,
        disposition: StepDisposition,
    ) -> Result<Option<CommandFailure>, MigrationError> {
        let commands = step.commands(&self.town_root.to_string_lossy());
        let start = Instant::now();

        // A stale `running` entry from an unknown or out-of-order step would
        // leave two steps running at once.
        for stale in checkpoint.steps.values_mut() {
            if stale.status == StepStatus::Running && stale.id != step.id {
                warn!(step = %stale.id, "Resetting stale running step to pending");
                stale.status = StepStatus::Pending;
            }
        }

        checkpoint
            .step_entry(&step.id, &step.title)
            .mark_running(Utc::now());
        self.store.save(checkpoint)?;

        info!(step = %step.id, commands = commands.len(), "Running step: {}", step.title);
        if let Some(ref ui) = self.ui {
            ui.start_step(
                index,
                &step.id,
                &step.title,
                disposition == StepDisposition::Replay,
            );
        }

        let ctx = ExecContext::new(&self.town_root, &step.id);
        match self.execute_commands(&commands, &ctx).await {
            Ok(output) => {
                checkpoint
                    .step_entry(&step.id, &step.title)
                    .mark_completed(output, Utc::now());
                self.store.save(checkpoint)?;
                let elapsed_ms = start.elapsed().as_millis() as u64;
                info!(step = %step.id, elapsed_ms, "Step completed");
                if let Some(ref ui) = self.ui {
                    ui.step_completed(&step.id, start.elapsed());
                }
                Ok(None)
            }
            Err(failure) => {
                let preview = truncate_output(&failure.output, self.options.output_preview_chars);
                checkpoint.step_entry(&step.id, &step.title).mark_failed(
                    failure.message.clone(),
                    failure.output.clone(),
                    Utc::now(),
                );
                self.store.save(checkpoint)?;
                error!(step = %step.id, output = %preview, "Step failed: {}", failure.message);
                if let Some(ref ui) = self.ui {
                    ui.step_failed(&step.id, &failure.message, &preview);
                }
                Ok(Some(failure))
            }
        }
    }

    /// Run commands in order, concatenating their output. Stops at the first failure.
    async fn execute_commands(
        &self,
        commands: &[String],
        ctx: &ExecContext,
    ) -> Result<String, CommandFailure> {
        let mut output = String::new();
        let total = commands.len();

        for (i, command) in commands.iter().enumerate() {
            let first_line = command.lines().next().unwrap_or_default();
            let preview = truncate_output(first_line, COMMAND_PREVIEW_CHARS);
            debug!(step = %ctx.step_id, "Command {}/{}: {}", i + 1, total, preview);
            if let Some(ref ui) = self.ui {
                ui.start_command(i + 1, total, &preview);
            }

            match self.executor.execute(command, ctx).await {
                Ok(out) => {
                    if let Some(ref ui) = self.ui {
                        ui.command_output(&truncate_output(
                            &out,
                            self.options.output_preview_chars,
                        ));
                    }
                    output.push_str(&out);
                }
                Err(failure) => {
                    output.push_str(&failure.output);
                    let message = if total > 1 {
                        format!("command {}/{} failed: {}", i + 1, total, failure.message)
                    } else {
                        failure.message
                    };
                    return Err(CommandFailure::new(message, output));
                }
            }
        }

        Ok(output)
    }
}
