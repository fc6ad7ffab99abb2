//! Structured build instructions.
//!
//! Instruction text is parsed elsewhere; the engine consumes the parsed
//! form: one [`Instruction`] per logical line plus a parallel
//! [`LineContext`] carrying the env/label pairs the parser resolved for it.

use std::collections::BTreeMap;
use std::path::Path;

use kiln_core::error::{KilnError, Result};
use serde::{Deserialize, Serialize};

/// A single parsed build instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Uppercase instruction keyword (e.g. "RUN")
    pub keyword: String,
    /// Instruction value with the keyword stripped
    pub value: String,
    /// Original instruction text, used for logs and commit messages
    pub content: String,
}

impl Instruction {
    /// Build an instruction from a keyword and value, deriving `content`.
    pub fn new(keyword: impl Into<String>, value: impl Into<String>) -> Self {
        let keyword = keyword.into();
        let value = value.into();
        let content = format!("{} {}", keyword, value);
        Self {
            keyword,
            value,
            content,
        }
    }
}

/// Env and label pairs declared on one instruction line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineContext {
    pub line_envs: BTreeMap<String, String>,
    pub line_labels: BTreeMap<String, String>,
}

impl LineContext {
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.line_envs.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.line_labels.insert(key.into(), value.into());
        self
    }
}

/// Everything the parser hands to the builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionSet {
    /// Resolved base image reference (from `FROM`)
    pub base_image: String,
    /// Instructions in file order
    pub instructions: Vec<Instruction>,
    /// Per-instruction env/label context, parallel to `instructions`
    #[serde(default)]
    pub contexts: Vec<LineContext>,
}

impl InstructionSet {
    pub fn new(base_image: impl Into<String>, instructions: Vec<Instruction>) -> Self {
        Self {
            base_image: base_image.into(),
            instructions,
            contexts: Vec::new(),
        }
    }

    pub fn with_contexts(mut self, contexts: Vec<LineContext>) -> Self {
        self.contexts = contexts;
        self
    }

    /// Parse an instruction set from its JSON form.
    pub fn from_json(content: &str) -> Result<Self> {
        let set: InstructionSet = serde_json::from_str(content)?;
        set.validate()?;
        Ok(set)
    }

    /// Load an instruction set from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            KilnError::PlanError(format!(
                "Failed to read instruction set at {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    /// Check that the set can be planned.
    pub fn validate(&self) -> Result<()> {
        if self.base_image.trim().is_empty() {
            return Err(KilnError::PlanError("Base image reference is empty".to_string()));
        }
        if !self.contexts.is_empty() && self.contexts.len() != self.instructions.len() {
            return Err(KilnError::PlanError(format!(
                "Instruction contexts ({}) do not match instructions ({})",
                self.contexts.len(),
                self.instructions.len()
            )));
        }
        Ok(())
    }

    /// Context for the instruction at `index`; empty when none was supplied.
    pub fn context(&self, index: usize) -> LineContext {
        self.contexts.get(index).cloned().unwrap_or_default()
    }
}
