//! Configuration view and initialization: `townmig config`.

use anyhow::Result;
use std::path::Path;

use super::super::{Cli, ConfigCommands};
use super::load_config;

pub fn cmd_config(cli: &Cli, town_root: &Path, command: Option<ConfigCommands>) -> Result<()> {
    use townmig::config::{FORMULA_ENV, SHELL_ENV, TIMEOUT_ENV, TownmigToml};

    let config = load_config(cli, town_root, false)?;
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("townmig Configuration");
            println!("=====================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No townmig.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            println!(
                "Effective values (file, then {}/{}/{}, then CLI):",
                FORMULA_ENV, SHELL_ENV, TIMEOUT_ENV
            );
            println!("  town_root = \"{}\"", config.town_root.display());
            match &config.formula_path {
                Some(path) => println!("  formula = \"{}\"", path.display()),
                None => println!("  formula = (built-in sqlite-to-dolt)"),
            }
            println!("  shell = \"{}\"", config.shell);
            match config.timeout {
                Some(timeout) => println!("  timeout_secs = {}", timeout.as_secs()),
                None => println!("  timeout_secs = (none)"),
            }
            println!("  on_mismatch = \"{}\"", config.mismatch_policy);
            println!("  output_preview_chars = {}", config.output_preview_chars);
            println!("  checkpoint = \"{}\"", config.checkpoint_file.display());
            println!();

            if !config_path.exists() {
                println!("Run 'townmig config init' to create a townmig.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("townmig.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            TownmigToml::default().save(&config_path)?;

            println!("Created townmig.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [formula] path");
            println!("  - [executor] shell, timeout_secs");
            println!("  - [run] on_mismatch, output_preview_chars");
            println!();
        }
    }

    Ok(())
}
