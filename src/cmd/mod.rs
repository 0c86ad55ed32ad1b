//! CLI command implementations.
//!
//! | Module    | Commands handled                  |
//! |-----------|-----------------------------------|
//! | `run`     | `Run`, `Run --dry-run`            |
//! | `status`  | `Status`, `Reset`, `Steps`        |
//! | `config`  | `Config`                          |

pub mod config;
pub mod run;
pub mod status;

pub use config::cmd_config;
pub use run::{cmd_plan, cmd_run};
pub use status::{cmd_reset, cmd_status, cmd_steps};

use anyhow::Result;
use std::path::Path;
use townmig::config::Config;

use super::Cli;

/// Resolve configuration for `town_root` with the global CLI overrides applied.
pub fn load_config(cli: &Cli, town_root: &Path, allow_mismatch: bool) -> Result<Config> {
    Config::with_cli_args(town_root, cli.formula.clone(), allow_mismatch, cli.verbose)
}
