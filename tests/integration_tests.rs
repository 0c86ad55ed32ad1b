//! Integration tests for townmig
//!
//! These drive the compiled binary against temporary town roots with a small
//! formula whose commands only touch files inside the town.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const FORMULA: &str = r#"
name = "demo"
version = 1

[[steps]]
id = "detect"
title = "Detect"
description = """
Record that detection ran.

```sh
echo detect >> {{town_root}}/detect.count
```
"""

[[steps]]
id = "migrate"
title = "Migrate"
description = """
Only succeeds once the `allow` marker exists.

```sh
if [ -f "$TOWN_ROOT/allow" ]; then
  echo migrated
else
  echo 'not ready' >&2
  exit 7
fi
```
"""

[[steps]]
id = "verify"
title = "Verify"
description = """
```bash
# nothing to see here
```

```sh
echo verified > verify.txt
```
"""
"#;

/// Helper to create a townmig Command rooted at `dir` using `sh`
fn townmig(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("townmig");
    cmd.env("TOWNMIG_SHELL", "sh")
        .env_remove("TOWNMIG_FORMULA")
        .env_remove("TOWNMIG_TIMEOUT_SECS")
        .env_remove("RUST_LOG")
        .arg("--town-root")
        .arg(dir);
    cmd
}

/// Helper to create a town with the demo formula at `demo.formula.toml`
fn create_town() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("demo.formula.toml"), FORMULA).unwrap();
    dir
}

fn formula_arg(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("demo.formula.toml")
}

fn read_checkpoint(dir: &TempDir) -> serde_json::Value {
    let content = fs::read_to_string(dir.path().join(".migration-checkpoint.json")).unwrap();
    serde_json::from_str(&content).unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        cargo_bin_cmd!("townmig").arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        cargo_bin_cmd!("townmig")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("townmig"));
    }

    #[test]
    fn test_missing_town_root_fails() {
        let dir = TempDir::new().unwrap();
        townmig(&dir.path().join("missing"))
            .arg("status")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to resolve town root"));
    }

    #[test]
    fn test_steps_lists_builtin_formula() {
        let dir = TempDir::new().unwrap();
        townmig(dir.path())
            .arg("steps")
            .assert()
            .success()
            .stdout(predicate::str::contains("sqlite-to-dolt"))
            .stdout(predicate::str::contains("backup"))
            .stdout(predicate::str::contains("verify"));
    }

    #[test]
    fn test_steps_counts_commands() {
        let dir = create_town();
        townmig(dir.path())
            .arg("--formula")
            .arg(formula_arg(&dir))
            .arg("steps")
            .assert()
            .success()
            .stdout(predicate::str::contains("demo v1 (3 steps)"))
            .stdout(predicate::str::contains("verify - Verify (1 command)"));
    }

    #[test]
    fn test_invalid_formula_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "name = \"broken\"\nversion = 1\nsteps = []\n").unwrap();
        townmig(dir.path())
            .arg("--formula")
            .arg(&path)
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("defines no steps"));
    }
}

// =============================================================================
// Run and Resume Tests
// =============================================================================

mod run_resume {
    use super::*;

    #[test]
    fn test_dry_run_executes_nothing() {
        let dir = create_town();
        townmig(dir.path())
            .arg("--formula")
            .arg(formula_arg(&dir))
            .args(["run", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Dry run"))
            .stdout(predicate::str::contains("detect.count"))
            .stdout(predicate::str::contains("nothing to see here").not());

        assert!(!dir.path().join(".migration-checkpoint.json").exists());
        assert!(!dir.path().join("detect.count").exists());
    }

    #[test]
    fn test_failure_then_resume() {
        let dir = create_town();

        townmig(dir.path())
            .arg("--formula")
            .arg(formula_arg(&dir))
            .arg("run")
            .assert()
            .failure()
            .stdout(predicate::str::contains("Migration stopped"))
            .stderr(predicate::str::contains("Step migrate failed"));

        let cp = read_checkpoint(&dir);
        assert_eq!(cp["formula_version"], 1);
        assert_eq!(cp["steps"]["detect"]["status"], "completed");
        assert_eq!(cp["steps"]["migrate"]["status"], "failed");
        assert!(
            cp["steps"]["migrate"]["error"]
                .as_str()
                .unwrap()
                .contains("code 7")
        );
        assert!(
            cp["steps"]["migrate"]["output"]
                .as_str()
                .unwrap()
                .contains("not ready")
        );
        assert!(cp["steps"].get("verify").is_none());

        fs::write(dir.path().join("allow"), "").unwrap();

        townmig(dir.path())
            .arg("--formula")
            .arg(formula_arg(&dir))
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("skipped 1 already completed"))
            .stdout(predicate::str::contains("Migration complete"));

        let cp = read_checkpoint(&dir);
        for id in ["detect", "migrate", "verify"] {
            assert_eq!(cp["steps"][id]["status"], "completed", "step {}", id);
        }
        assert!(cp["steps"]["migrate"].get("error").is_none());
        let count = fs::read_to_string(dir.path().join("detect.count")).unwrap();
        assert_eq!(count.lines().count(), 1);
        assert!(dir.path().join("verify.txt").exists());
    }

    #[test]
    fn test_completed_run_is_idempotent() {
        let dir = create_town();
        fs::write(dir.path().join("allow"), "").unwrap();

        for _ in 0..2 {
            townmig(dir.path())
                .arg("--formula")
                .arg(formula_arg(&dir))
                .arg("run")
                .assert()
                .success();
        }

        let count = fs::read_to_string(dir.path().join("detect.count")).unwrap();
        assert_eq!(count.lines().count(), 1);
    }

    #[test]
    fn test_version_mismatch_requires_flag() {
        let dir = create_town();
        fs::write(dir.path().join("allow"), "").unwrap();
        townmig(dir.path())
            .arg("--formula")
            .arg(formula_arg(&dir))
            .arg("run")
            .assert()
            .success();

        let bumped = FORMULA.replace("version = 1", "version = 2");
        fs::write(formula_arg(&dir), bumped).unwrap();

        townmig(dir.path())
            .arg("--formula")
            .arg(formula_arg(&dir))
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("--allow-mismatch"))
            .stderr(predicate::str::contains("formula version 1 differs"));

        townmig(dir.path())
            .arg("--formula")
            .arg(formula_arg(&dir))
            .args(["run", "--allow-mismatch"])
            .assert()
            .success()
            .stdout(predicate::str::contains("warning:"));
    }
}

// =============================================================================
// Status / Reset Tests
// =============================================================================

mod status_reset {
    use super::*;

    #[test]
    fn test_status_before_any_run() {
        let dir = create_town();
        townmig(dir.path())
            .arg("--formula")
            .arg(formula_arg(&dir))
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Not started"));
    }

    #[test]
    fn test_status_shows_failed_step() {
        let dir = create_town();
        townmig(dir.path())
            .arg("--formula")
            .arg(formula_arg(&dir))
            .arg("run")
            .assert()
            .failure();

        townmig(dir.path())
            .arg("--formula")
            .arg(formula_arg(&dir))
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("1/3 steps completed"))
            .stdout(predicate::str::contains("[failed]"))
            .stdout(predicate::str::contains("not ready"));
    }

    #[test]
    fn test_status_reports_corrupt_checkpoint() {
        let dir = create_town();
        fs::write(dir.path().join(".migration-checkpoint.json"), "{ nope").unwrap();
        townmig(dir.path())
            .arg("--formula")
            .arg(formula_arg(&dir))
            .arg("status")
            .assert()
            .failure()
            .stderr(predicate::str::contains("parsing checkpoint"));
    }

    #[test]
    fn test_reset_force_removes_checkpoint() {
        let dir = create_town();
        townmig(dir.path())
            .arg("--formula")
            .arg(formula_arg(&dir))
            .arg("run")
            .assert()
            .failure();
        assert!(dir.path().join(".migration-checkpoint.json").exists());

        townmig(dir.path())
            .args(["reset", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Reset complete"));
        assert!(!dir.path().join(".migration-checkpoint.json").exists());
    }

    #[test]
    fn test_reset_without_checkpoint() {
        let dir = TempDir::new().unwrap();
        townmig(dir.path())
            .arg("reset")
            .assert()
            .success()
            .stdout(predicate::str::contains("No checkpoint"));
    }
}

// =============================================================================
// Config Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_init_and_show() {
        let dir = TempDir::new().unwrap();
        townmig(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created townmig.toml"));
        assert!(dir.path().join(".townmig/townmig.toml").exists());

        townmig(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        townmig(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("shell = \"sh\""))
            .stdout(predicate::str::contains("on_mismatch = \"abort\""));
    }

    #[test]
    fn test_config_file_selects_formula() {
        let dir = create_town();
        fs::create_dir_all(dir.path().join(".townmig")).unwrap();
        fs::write(
            dir.path().join(".townmig/townmig.toml"),
            "[formula]\npath = \"demo.formula.toml\"\n",
        )
        .unwrap();

        townmig(dir.path())
            .arg("steps")
            .assert()
            .success()
            .stdout(predicate::str::contains("demo v1"));
    }
}
