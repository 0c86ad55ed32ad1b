//! Layered configuration for townmig.
//!
//! Settings are read from `<town_root>/.townmig/townmig.toml`, then
//! environment variables, then CLI flags, each layer overriding the last.
//!
//! ```toml
//! [formula]
//! path = "formulas/custom.formula.toml"   # relative to the town root
//!
//! [executor]
//! shell = "bash"
//! timeout_secs = 900
//!
//! [run]
//! on_mismatch = "abort"                   # or "continue"
//! output_preview_chars = 400
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checkpoint::checkpoint_path;
use crate::executor::ShellExecutor;
use crate::formula::Formula;
use crate::orchestrator::{DEFAULT_OUTPUT_PREVIEW_CHARS, MismatchPolicy, RunOptions};

/// Directory inside the town root holding townmig's own files.
pub const CONFIG_DIR: &str = ".townmig";
pub const CONFIG_FILE: &str = "townmig.toml";

pub const SHELL_ENV: &str = "TOWNMIG_SHELL";
pub const TIMEOUT_ENV: &str = "TOWNMIG_TIMEOUT_SECS";
pub const FORMULA_ENV: &str = "TOWNMIG_FORMULA";

const DEFAULT_SHELL: &str = "bash";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormulaSection {
    /// Formula file; relative paths resolve against the town root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSection {
    /// Shell used as `<shell> -c <command>` (default: "bash")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// Per-command timeout; absent or 0 means none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSection {
    #[serde(default)]
    pub on_mismatch: MismatchPolicy,
    #[serde(default = "default_output_preview_chars")]
    pub output_preview_chars: usize,
}

fn default_output_preview_chars() -> usize {
    DEFAULT_OUTPUT_PREVIEW_CHARS
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            on_mismatch: MismatchPolicy::default(),
            output_preview_chars: default_output_preview_chars(),
        }
    }
}

/// Contents of `townmig.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TownmigToml {
    #[serde(default)]
    pub formula: FormulaSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub run: RunSection,
}

impl TownmigToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse townmig.toml")
    }

    /// Load `townmig.toml` from `config_dir`, or defaults when it does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize townmig.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Canonical town root
    pub town_root: PathBuf,
    pub config_dir: PathBuf,
    pub checkpoint_file: PathBuf,
    /// `None` selects the built-in formula
    pub formula_path: Option<PathBuf>,
    pub shell: String,
    pub timeout: Option<Duration>,
    pub mismatch_policy: MismatchPolicy,
    pub output_preview_chars: usize,
    pub verbose: bool,
    /// The file layer as loaded
    pub toml: TownmigToml,
}

impl Config {
    /// File and environment layers for `town_root`.
    pub fn new(town_root: &Path) -> Result<Self> {
        let town_root = town_root
            .canonicalize()
            .with_context(|| format!("Failed to resolve town root: {}", town_root.display()))?;
        let toml = TownmigToml::load_or_default(&town_root.join(CONFIG_DIR))?;
        Self::resolve(town_root, toml, |key| std::env::var(key).ok())
    }

    /// All three layers. CLI values win when given.
    pub fn with_cli_args(
        town_root: &Path,
        formula: Option<PathBuf>,
        allow_mismatch: bool,
        verbose: bool,
    ) -> Result<Self> {
        let mut config = Self::new(town_root)?;
        if let Some(path) = formula {
            config.formula_path = Some(path);
        }
        if allow_mismatch {
            config.mismatch_policy = MismatchPolicy::Continue;
        }
        config.verbose = verbose;
        Ok(config)
    }

    /// Combine the file layer with environment values looked up through `env`.
    fn resolve(
        town_root: PathBuf,
        toml: TownmigToml,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let formula_path = env(FORMULA_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                toml.formula
                    .path
                    .as_ref()
                    .map(|p| if p.is_absolute() { p.clone() } else { town_root.join(p) })
            });

        let shell = env(SHELL_ENV)
            .filter(|v| !v.is_empty())
            .or_else(|| toml.executor.shell.clone())
            .unwrap_or_else(|| DEFAULT_SHELL.to_string());

        let timeout_secs = match env(TIMEOUT_ENV).filter(|v| !v.is_empty()) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("Invalid {} value '{}'", TIMEOUT_ENV, raw))?,
            ),
            None => toml.executor.timeout_secs,
        };
        let timeout = timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let config_dir = town_root.join(CONFIG_DIR);
        Ok(Self {
            checkpoint_file: checkpoint_path(&town_root),
            config_dir,
            formula_path,
            shell,
            timeout,
            mismatch_policy: toml.run.on_mismatch,
            output_preview_chars: toml.run.output_preview_chars,
            verbose: false,
            toml,
            town_root,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// The configured formula, or the built-in one.
    pub fn load_formula(&self) -> Result<Formula> {
        Formula::load_or_builtin(self.formula_path.as_deref()).context("Failed to load formula")
    }

    pub fn executor(&self) -> ShellExecutor {
        ShellExecutor::new(self.shell.clone(), self.timeout)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            mismatch_policy: self.mismatch_policy,
            output_preview_chars: self.output_preview_chars,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = tempdir().unwrap();
        let toml = TownmigToml::load_or_default(&dir.path().join(CONFIG_DIR)).unwrap();
        assert_eq!(toml, TownmigToml::default());

        let config = Config::resolve(dir.path().to_path_buf(), toml, no_env).unwrap();
        assert_eq!(config.shell, "bash");
        assert_eq!(config.timeout, None);
        assert_eq!(config.formula_path, None);
        assert_eq!(config.mismatch_policy, MismatchPolicy::Abort);
        assert_eq!(config.output_preview_chars, 400);
        assert_eq!(
            config.checkpoint_file,
            dir.path().join(".migration-checkpoint.json")
        );
    }

    #[test]
    fn test_parse_full_file() {
        let content = r#"
[formula]
path = "formulas/custom.formula.toml"

[executor]
shell = "zsh"
timeout_secs = 900

[run]
on_mismatch = "continue"
output_preview_chars = 120
"#;
        let toml = TownmigToml::parse(content).unwrap();
        let config = Config::resolve(PathBuf::from("/town"), toml, no_env).unwrap();
        assert_eq!(
            config.formula_path,
            Some(PathBuf::from("/town/formulas/custom.formula.toml"))
        );
        assert_eq!(config.shell, "zsh");
        assert_eq!(config.timeout, Some(Duration::from_secs(900)));
        assert_eq!(config.mismatch_policy, MismatchPolicy::Continue);
        assert_eq!(config.run_options().output_preview_chars, 120);
    }

    #[test]
    fn test_env_overrides_file() {
        let toml = TownmigToml::parse("[executor]\nshell = \"zsh\"\ntimeout_secs = 10\n").unwrap();
        let env: HashMap<&str, &str> = [
            (SHELL_ENV, "sh"),
            (TIMEOUT_ENV, "30"),
            (FORMULA_ENV, "/elsewhere/f.toml"),
        ]
        .into_iter()
        .collect();

        let config = Config::resolve(PathBuf::from("/town"), toml, |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();
        assert_eq!(config.shell, "sh");
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.formula_path, Some(PathBuf::from("/elsewhere/f.toml")));
        assert_eq!(config.executor().shell(), "sh");
    }

    #[test]
    fn test_zero_timeout_means_none() {
        let toml = TownmigToml::parse("[executor]\ntimeout_secs = 0\n").unwrap();
        let config = Config::resolve(PathBuf::from("/town"), toml, no_env).unwrap();
        assert_eq!(config.timeout, None);
    }

    #[test]
    fn test_invalid_env_timeout_is_error() {
        let err = Config::resolve(PathBuf::from("/town"), TownmigToml::default(), |k| {
            (k == TIMEOUT_ENV).then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains(TIMEOUT_ENV));
    }

    #[test]
    fn test_invalid_mismatch_policy_rejected() {
        assert!(TownmigToml::parse("[run]\non_mismatch = \"ignore\"\n").is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_DIR).join(CONFIG_FILE);
        let mut toml = TownmigToml::default();
        toml.executor.shell = Some("sh".into());
        toml.run.on_mismatch = MismatchPolicy::Continue;
        toml.save(&path).unwrap();

        let loaded = TownmigToml::load_or_default(&dir.path().join(CONFIG_DIR)).unwrap();
        assert_eq!(loaded, toml);
    }

    #[test]
    fn test_with_cli_args_overrides() {
        let dir = tempdir().unwrap();
        let config = Config::with_cli_args(
            dir.path(),
            Some(PathBuf::from("custom.toml")),
            true,
            true,
        )
        .unwrap();
        assert_eq!(config.formula_path, Some(PathBuf::from("custom.toml")));
        assert_eq!(config.mismatch_policy, MismatchPolicy::Continue);
        assert!(config.verbose);
        assert_eq!(config.town_root, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_missing_town_root_is_error() {
        let dir = tempdir().unwrap();
        assert!(Config::new(&dir.path().join("nope")).is_err());
    }
}
