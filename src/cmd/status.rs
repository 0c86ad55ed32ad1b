//! Checkpoint inspection and reset: `townmig status`, `townmig reset`, `townmig steps`.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::super::Cli;
use super::load_config;

pub fn cmd_status(cli: &Cli, town_root: &Path) -> Result<()> {
    use townmig::checkpoint::{CheckpointStore, StepStatus};
    use townmig::orchestrator::detect_anomalies;
    use townmig::ui::icons::{CHECK, CROSS, REPLAY, SKIP};
    use townmig::util::truncate_output;

    let config = load_config(cli, town_root, false)?;
    let formula = config.load_formula()?;
    let store = CheckpointStore::new(&config.town_root);

    println!();
    println!("Migration Status");
    println!("================");
    println!();
    println!("Formula:   {} v{}", formula.name, formula.version);
    println!("Town root: {}", config.town_root.display());

    let Some(checkpoint) = store.load_optional()? else {
        println!();
        println!("Not started (no checkpoint at {})", store.path().display());
        println!();
        println!("Run 'townmig run' to start the migration.");
        println!();
        return Ok(());
    };

    println!(
        "Started:   {}",
        checkpoint.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "Updated:   {}",
        checkpoint.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "Progress:  {}/{} steps completed",
        formula
            .steps
            .iter()
            .filter(|s| checkpoint.is_step_completed(&s.id))
            .count(),
        formula.steps.len()
    );
    println!();

    for step in &formula.steps {
        let run = checkpoint.step(&step.id);
        let status = run.map(|r| r.status).unwrap_or_default();
        let icon = match status {
            StepStatus::Completed => CHECK.to_string(),
            StepStatus::Failed => CROSS.to_string(),
            StepStatus::Running => REPLAY.to_string(),
            StepStatus::Pending => SKIP.to_string(),
        };
        println!(
            "{}{} - {} [{}]",
            icon,
            style(&step.id).bold(),
            step.title,
            status
        );

        let Some(run) = run else { continue };
        if let Some(started) = run.started_at {
            print!("      started {}", started.format("%Y-%m-%d %H:%M:%S"));
            match run.completed_at {
                Some(done) => println!(", finished {}", done.format("%Y-%m-%d %H:%M:%S")),
                None => println!(),
            }
        }
        if status == StepStatus::Running {
            println!(
                "      {}",
                style("interrupted; the next run executes this step again").yellow()
            );
        }
        if let Some(ref error) = run.error {
            println!("      {} {}", style("error:").red(), error);
        }
        if !run.output.is_empty() && (cli.verbose || status == StepStatus::Failed) {
            let preview = truncate_output(run.output.trim_end(), config.output_preview_chars);
            for line in preview.lines() {
                println!("      {} {}", style("│").dim(), line);
            }
        }
    }

    let anomalies = detect_anomalies(&checkpoint, &formula, &config.town_root);
    if !anomalies.is_empty() {
        println!();
        println!("Checkpoint mismatches:");
        for anomaly in &anomalies {
            println!("  - {}", anomaly);
        }
    }

    println!();
    if checkpoint.is_complete_for(&formula) {
        println!("{}", style("Migration complete.").green().bold());
    } else {
        println!("Run 'townmig run' to continue.");
    }
    println!();
    Ok(())
}

pub fn cmd_reset(cli: &Cli, town_root: &Path, force: bool) -> Result<()> {
    use dialoguer::Confirm;
    use townmig::checkpoint::CheckpointStore;

    let config = load_config(cli, town_root, false)?;
    let store = CheckpointStore::new(&config.town_root);

    if !store.exists() {
        println!("No checkpoint at {}", store.path().display());
        return Ok(());
    }

    if !force {
        let confirm = Confirm::new()
            .with_prompt(
                "This deletes all migration progress; completed steps will run again. Are you sure?",
            )
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    store.remove()?;
    println!("Reset complete");
    Ok(())
}

pub fn cmd_steps(cli: &Cli, town_root: &Path) -> Result<()> {
    let config = load_config(cli, town_root, false)?;
    let formula = config.load_formula()?;
    let town_root = config.town_root.to_string_lossy();

    println!();
    println!(
        "{} v{} ({} steps)",
        style(&formula.name).bold(),
        formula.version,
        formula.steps.len()
    );
    if !formula.description.trim().is_empty() {
        println!("{}", style(formula.description.trim()).dim());
    }
    println!();

    for (i, step) in formula.steps.iter().enumerate() {
        let commands = step.commands(&town_root);
        println!(
            "{:>2}. {} - {} ({} command{})",
            i + 1,
            style(&step.id).bold(),
            step.title,
            commands.len(),
            if commands.len() == 1 { "" } else { "s" }
        );
        if cli.verbose {
            for command in &commands {
                for line in command.lines() {
                    println!("      {} {}", style("│").dim(), line);
                }
            }
        }
    }
    println!();
    Ok(())
}
