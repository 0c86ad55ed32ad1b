use crate::ui::icons::{CHECK, CLOCK, CROSS, REPLAY, RUNNING, SKIP, SPARKLE, WARNING};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal UI for a migration run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Step bar: how many formula steps are done (completed or skipped)
/// - Command bar: spinner showing the command currently executing
///
/// Output goes through `MultiProgress` so log lines do not tear the bars.
pub struct MigrationUI {
    multi: MultiProgress,
    step_bar: ProgressBar,
    command_bar: ProgressBar,
    verbose: bool,
}

impl MigrationUI {
    /// Create the UI sized for `total_steps` formula steps.
    ///
    /// With `verbose` set, each command's output preview is printed as it finishes.
    pub fn new(total_steps: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let step_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let step_bar = multi.add(ProgressBar::new(total_steps));
        step_bar.set_style(step_style);
        step_bar.set_prefix("  Steps");

        let command_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let command_bar = multi.add(ProgressBar::new_spinner());
        command_bar.set_style(command_style);
        command_bar.set_prefix("Command");

        Self {
            multi,
            step_bar,
            command_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn print_header(&self, formula: &str, version: u32, town_root: &str) {
        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!(
            "{} Migration {} {}",
            style("▶").green().bold(),
            style(formula).yellow().bold(),
            style(format!("v{}", version)).dim()
        ));
        self.print_line(format!("{}  {}", style("Town:").dim(), town_root));
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line("");
    }

    /// Report a checkpoint anomaly that the run is continuing past.
    pub fn show_anomaly(&self, description: &str) {
        self.print_line(format!(
            "{} {}",
            WARNING,
            style(format!("Checkpoint mismatch: {}", description)).yellow()
        ));
    }

    /// A completed step from an earlier run. Advances the step bar.
    pub fn skip_step(&self, id: &str, title: &str) {
        self.step_bar.inc(1);
        self.print_line(format!(
            "{} {} {}",
            SKIP,
            style(id).dim(),
            style(format!("{} (already completed)", title)).dim()
        ));
    }

    /// Announce the 1-based `index`th step about to execute. `replay` marks a step found `running`.
    pub fn start_step(&self, index: usize, id: &str, title: &str, replay: bool) {
        if replay {
            self.print_line(format!(
                "{} {}",
                REPLAY,
                style(format!(
                    "Step {} was interrupted by a previous run; running it again",
                    id
                ))
                .yellow()
            ));
        }
        self.step_bar
            .set_message(format!("{}{}. {}: {}", RUNNING, index, style(id).yellow(), title));
        self.command_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    pub fn start_command(&self, number: usize, total: usize, preview: &str) {
        self.command_bar.set_message(format!(
            "{}/{} {}",
            style(number).cyan(),
            total,
            style(preview).dim()
        ));
    }

    /// Print a command's captured output in verbose mode.
    pub fn command_output(&self, preview: &str) {
        if self.verbose && !preview.trim().is_empty() {
            for line in preview.lines() {
                self.print_line(format!("    {} {}", style("│").dim(), style(line).dim()));
            }
        }
    }

    pub fn step_completed(&self, id: &str, elapsed: Duration) {
        self.step_bar.inc(1);
        self.command_bar.set_message("");
        self.print_line(format!(
            "{} {} {}",
            CHECK,
            style(id).green().bold(),
            style(format!("{}{:.1}s", CLOCK, elapsed.as_secs_f64())).dim()
        ));
    }

    pub fn step_failed(&self, id: &str, error: &str, output_preview: &str) {
        self.command_bar.set_message("");
        self.print_line(format!(
            "{} {} failed: {}",
            CROSS,
            style(id).red().bold(),
            error
        ));
        if !output_preview.trim().is_empty() {
            for line in output_preview.lines() {
                self.print_line(format!("    {} {}", style("│").dim(), line));
            }
        }
    }

    /// Stop both bars. `success` picks the closing banner.
    pub fn finish(&self, success: bool) {
        self.command_bar.finish_and_clear();
        if success {
            self.step_bar
                .finish_with_message(format!("{}", style("done").green()));
            self.print_line(format!(
                "\n{} {}\n",
                SPARKLE,
                style("Migration complete!").green().bold()
            ));
        } else {
            self.step_bar
                .abandon_with_message(format!("{} {}", CROSS, style("stopped").red()));
        }
    }

}
