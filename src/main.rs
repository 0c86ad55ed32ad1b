use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "townmig")]
#[command(version, about = "Resumable migration formula runner for Gas Town workspaces")]
pub struct Cli {
    /// Print command output and debug logs
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Town root to migrate (defaults to the current directory)
    #[arg(long, global = true)]
    pub town_root: Option<PathBuf>,

    /// Formula file to run instead of the configured or built-in one
    #[arg(long, global = true)]
    pub formula: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the formula, resuming from the checkpoint if one exists
    Run {
        /// Show what would run without executing anything
        #[arg(long)]
        dry_run: bool,

        /// Proceed even if the checkpoint was written by another formula version or town root
        #[arg(long)]
        allow_mismatch: bool,
    },
    /// Show checkpoint progress for each formula step
    Status,
    /// Delete the checkpoint so the next run starts over
    Reset {
        #[arg(long)]
        force: bool,
    },
    /// List formula steps and the commands they run
    Steps,
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the resolved configuration
    Show,
    /// Write a default townmig.toml
    Init,
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match cli.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let town_root = match cli.town_root.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            dry_run,
            allow_mismatch,
        } => {
            if *dry_run {
                cmd::cmd_plan(&cli, &town_root, *allow_mismatch)?;
            } else {
                cmd::cmd_run(&cli, &town_root, *allow_mismatch).await?;
            }
        }
        Commands::Status => cmd::cmd_status(&cli, &town_root)?,
        Commands::Reset { force } => cmd::cmd_reset(&cli, &town_root, *force)?,
        Commands::Steps => cmd::cmd_steps(&cli, &town_root)?,
        Commands::Config { command } => cmd::cmd_config(&cli, &town_root, command.clone())?,
    }

    Ok(())
}
