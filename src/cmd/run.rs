//! Formula execution: `townmig run` and `townmig run --dry-run`.

use anyhow::Result;
use console::style;
use std::path::Path;
use std::sync::Arc;

use super::super::{Cli, LogFormat};
use super::load_config;

pub async fn cmd_run(cli: &Cli, town_root: &Path, allow_mismatch: bool) -> Result<()> {
    use townmig::errors::MigrationError;
    use townmig::orchestrator::{MigrationRunner, RunOutcome};
    use townmig::ui::MigrationUI;

    let config = load_config(cli, town_root, allow_mismatch)?;
    let formula = config.load_formula()?;

    let ui = if cli.log_format == LogFormat::Text && console::Term::stderr().is_term() {
        let ui = Arc::new(MigrationUI::new(
            formula.steps.len() as u64,
            config.verbose,
        ));
        ui.print_header(
            &formula.name,
            formula.version,
            &config.town_root.display().to_string(),
        );
        Some(ui)
    } else {
        None
    };

    let mut runner = MigrationRunner::new(formula, &config.town_root, Arc::new(config.executor()))
        .with_options(config.run_options());
    if let Some(ui) = ui {
        runner = runner.with_ui(ui);
    }

    let report = runner.run().await.map_err(|e| match e {
        MigrationError::CheckpointMismatch(_) => anyhow::Error::new(e).context(
            "Checkpoint belongs to a different run. Pass --allow-mismatch to continue anyway, \
             or run 'townmig reset' to start over",
        ),
        other => other.into(),
    })?;

    println!();
    for anomaly in &report.anomalies {
        println!("{} {}", style("warning:").yellow().bold(), anomaly);
    }
    if !report.replayed.is_empty() {
        println!(
            "Replayed interrupted step(s): {}",
            report.replayed.join(", ")
        );
    }
    println!(
        "Executed {} step(s), skipped {} already completed",
        report.executed.len(),
        report.skipped.len()
    );

    match &report.outcome {
        RunOutcome::Completed => {
            println!("{}", style("Migration complete.").green().bold());
            println!("Checkpoint kept at {}", config.checkpoint_file.display());
        }
        RunOutcome::Failed { step_id, .. } => {
            println!(
                "{} Fix the problem and run 'townmig run' again to resume from step '{}'.",
                style("Migration stopped.").red().bold(),
                step_id
            );
        }
    }
    println!();

    report.into_result()?;
    Ok(())
}

/// Print what `run` would do without executing or saving anything.
pub fn cmd_plan(cli: &Cli, town_root: &Path, allow_mismatch: bool) -> Result<()> {
    use townmig::orchestrator::{MigrationRunner, MismatchPolicy, StepDisposition};

    let config = load_config(cli, town_root, allow_mismatch)?;
    let formula = config.load_formula()?;

    println!();
    println!(
        "Dry run: {} v{} against {}",
        style(&formula.name).yellow().bold(),
        formula.version,
        config.town_root.display()
    );
    println!();

    let runner = MigrationRunner::new(formula, &config.town_root, Arc::new(config.executor()))
        .with_options(config.run_options());
    let (plan, anomalies) = runner.plan()?;

    if !anomalies.is_empty() {
        for anomaly in &anomalies {
            println!("{} {}", style("warning:").yellow().bold(), anomaly);
        }
        if config.mismatch_policy == MismatchPolicy::Abort {
            println!(
                "{}",
                style("A real run would abort before executing anything.").red()
            );
        }
        println!();
    }

    for (i, step) in plan.iter().enumerate() {
        let action = match step.disposition {
            StepDisposition::Skip => style("skip".to_string()).dim(),
            StepDisposition::Replay => style("replay".to_string()).yellow(),
            StepDisposition::Retry => style("retry".to_string()).yellow(),
            StepDisposition::Run => style("run".to_string()).green(),
        };
        println!(
            "{:>2}. {} - {} [{}] ({})",
            i + 1,
            style(&step.id).bold(),
            step.title,
            step.status,
            action
        );
        if step.disposition == StepDisposition::Skip {
            continue;
        }
        if step.commands.is_empty() {
            println!("      {}", style("(no commands)").dim());
        }
        for command in &step.commands {
            for line in command.lines() {
                println!("      {} {}", style("│").dim(), line);
            }
            println!();
        }
    }

    Ok(())
}
