//! Declarative probe suites.
//!
//! A suite is plain data: ordered categories of shell probes, loaded
//! from TOML at startup. Declaration order is execution order and
//! report order (TOML arrays of tables keep their order).

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::classify::ExpectedOutcome;

/// Suite compiled into the binary, used when no suite path is configured.
const BUILTIN_SUITE: &str = include_str!("../suites/default.toml");

/// Placeholder replaced by the session id in session-dependent probes.
pub const SESSION_PLACEHOLDER: &str = "{session_id}";

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("cannot read suite: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid suite: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("suite has no test cases")]
    Empty,

    #[error("duplicate category key '{0}'")]
    DuplicateCategory(String),

    #[error("category '{0}' has a case with an empty name or command")]
    IncompleteCase(String),

    #[error("case '{0}' uses {{session_id}} but does not set requires_session")]
    UndeclaredSession(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct Suite {
    #[serde(default)]
    pub title: Option<String>,
    /// Free text printed after the summary counters
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(rename = "category", default)]
    pub categories: Vec<TestCategory>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TestCategory {
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "case", default)]
    pub cases: Vec<TestCase>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TestCase {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub expect: ExpectedOutcome,
    #[serde(default)]
    pub description: String,
    /// Skipped (and counted as failed) when no session could be created
    #[serde(default)]
    pub requires_session: bool,
    /// A `success` probe must also print something
    #[serde(default)]
    pub require_output: bool,
    /// Overrides `probes.timeout_secs`
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Suite {
    pub fn builtin() -> Result<Self, SuiteError> {
        Self::parse(BUILTIN_SUITE)
    }

    pub fn load(path: &Path) -> Result<Self, SuiteError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, SuiteError> {
        let suite: Suite = toml::from_str(content)?;
        suite.validate()?;
        Ok(suite)
    }

    fn validate(&self) -> Result<(), SuiteError> {
        if self.total_cases() == 0 {
            return Err(SuiteError::Empty);
        }

        let mut keys = HashSet::new();
        for category in &self.categories {
            if !keys.insert(category.key.as_str()) {
                return Err(SuiteError::DuplicateCategory(category.key.clone()));
            }
            for case in &category.cases {
                if case.name.trim().is_empty() || case.command.trim().is_empty() {
                    return Err(SuiteError::IncompleteCase(category.key.clone()));
                }
                if case.command.contains(SESSION_PLACEHOLDER) && !case.requires_session {
                    return Err(SuiteError::UndeclaredSession(case.name.clone()));
                }
            }
        }
        Ok(())
    }

    pub fn total_cases(&self) -> usize {
        self.categories.iter().map(|c| c.cases.len()).sum()
    }

    pub fn has_category(&self, key: &str) -> bool {
        self.categories.iter().any(|c| c.key == key)
    }

    /// Inserts `category` right after the category keyed `after`, or
    /// appends it when `after` is not found.
    pub fn insert_after(&mut self, after: &str, category: TestCategory) {
        match self.categories.iter().position(|c| c.key == after) {
            Some(pos) => self.categories.insert(pos + 1, category),
            None => self.categories.push(category),
        }
    }
}

/// Replaces each `{name}` in `template` with its value.
pub fn expand_placeholders(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}
