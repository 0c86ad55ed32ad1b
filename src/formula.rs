//! Formula definition and TOML loading.
//!
//! A formula is a versioned, ordered list of steps. Each step carries a
//! free-text description whose fenced shell blocks are what actually runs.
//! Step ids must be unique; they key the checkpoint across resumes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::errors::FormulaError;
use crate::extract::extract_commands;

/// Formula shipped with the binary, used when no formula file is configured.
pub const BUILTIN_FORMULA: &str = include_str!("../formulas/sqlite-to-dolt.formula.toml");

/// One unit of a formula.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormulaStep {
    /// Stable identifier, used as the checkpoint key
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// Operator-facing instructions with embedded `bash`/`sh` blocks
    #[serde(default)]
    pub description: String,
}

impl FormulaStep {
    pub fn new(id: &str, title: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    /// Commands this step would run against `town_root`.
    pub fn commands(&self, town_root: &str) -> Vec<String> {
        extract_commands(&self.description, town_root)
    }
}

/// A versioned, ordered migration procedure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Formula {
    pub name: String,
    /// Bumped whenever the step sequence changes meaning
    pub version: u32,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<FormulaStep>,
}

impl Formula {
    /// Load and validate a formula from a TOML file.
    pub fn load(path: &Path) -> Result<Self, FormulaError> {
        let content = std::fs::read_to_string(path).map_err(|source| FormulaError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse and validate a formula from TOML text. `origin` names the source in errors.
    pub fn parse(content: &str, origin: &str) -> Result<Self, FormulaError> {
        let formula: Formula = toml::from_str(content).map_err(|source| FormulaError::Parse {
            origin: origin.to_string(),
            source,
        })?;
        formula.validate()?;
        Ok(formula)
    }

    /// The formula embedded in the binary.
    pub fn builtin() -> Result<Self, FormulaError> {
        Self::parse(BUILTIN_FORMULA, "built-in formula")
    }

    /// Load from `path` when given, otherwise fall back to the built-in formula.
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self, FormulaError> {
        match path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    pub fn validate(&self) -> Result<(), FormulaError> {
        if self.name.trim().is_empty() {
            return Err(FormulaError::Invalid("formula name is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(FormulaError::Invalid(format!(
                "formula '{}' defines no steps",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(FormulaError::Invalid(format!(
                    "step '{}' has an empty id",
                    step.title
                )));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(FormulaError::DuplicateStep(step.id.clone()));
            }
        }
        Ok(())
    }

    pub fn step(&self, id: &str) -> Option<&FormulaStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn has_step(&self, id: &str) -> bool {
        self.step(id).is_some()
    }

    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }
}
