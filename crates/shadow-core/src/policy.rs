//! Comparison policy: equivalence tables and comparison modes.
//!
//! Backends legitimately disagree on native type names and error codes for
//! the same semantics. Those equivalences are data loaded from a policy file,
//! never hardcoded.
//!
//! # Policy file
//!
//! ```yaml
//! ordering: ordered
//! reconcile: reference-wins
//! column_names: case-insensitive
//! type_equivalence:
//!   - [VARCHAR, VAR_STRING, CHAR]
//!   - [TEXT, BLOB]
//! error_equivalence:
//!   - [1105, 1064]
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading a policy.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Policy file could not be read.
    #[error("Failed to read policy file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error.
    #[error("Invalid YAML policy: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parse error.
    #[error("Invalid TOML policy: {0}")]
    Toml(#[from] toml::de::Error),

    /// A type name appears in two different equivalence classes.
    #[error("Type '{0}' appears in more than one equivalence class")]
    DuplicateType(String),

    /// An error code appears in two different equivalence classes.
    #[error("Error code {0} appears in more than one equivalence class")]
    DuplicateErrorCode(u16),
}

/// Whether row order is significant when comparing result sets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum OrderingMode {
    /// Rows must appear in the same order on both sides.
    #[default]
    Ordered,
    /// Rows are compared as multisets (both sides sorted canonically first).
    Unordered,
}

/// Which outcome is returned to the client.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcilePolicy {
    /// Always return the reference outcome.
    #[default]
    ReferenceWins,
    /// Return the candidate outcome when the reference failed and the
    /// candidate succeeded.
    PreferSuccess,
}

/// How column names are matched during the shape check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnNameMatch {
    /// Byte-for-byte equality.
    #[default]
    Exact,
    /// ASCII case-insensitive equality.
    CaseInsensitive,
    /// Names are not compared.
    Ignore,
}

impl ColumnNameMatch {
    /// Check whether two column names match under this rule.
    pub fn matches(self, reference: &str, candidate: &str) -> bool {
        match self {
            ColumnNameMatch::Exact => reference == candidate,
            ColumnNameMatch::CaseInsensitive => reference.eq_ignore_ascii_case(candidate),
            ColumnNameMatch::Ignore => true,
        }
    }
}

/// Classes of native type names treated as compatible.
///
/// A type is always compatible with itself (case-insensitively).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeEquivalence {
    classes: Vec<Vec<String>>,
}

impl TypeEquivalence {
    /// Build a table from classes of type names.
    pub fn new<I, C, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            classes: classes
                .into_iter()
                .map(|class| class.into_iter().map(Into::into).collect())
                .collect(),
        }
    }

    /// Check whether two declared types are compatible.
    pub fn compatible(&self, reference: &str, candidate: &str) -> bool {
        let reference = normalize_type(reference);
        let candidate = normalize_type(candidate);
        if reference == candidate {
            return true;
        }
        self.class_of(&reference)
            .is_some_and(|class| self.class_of(&candidate) == Some(class))
    }

    fn class_of(&self, normalized: &str) -> Option<usize> {
        self.classes
            .iter()
            .position(|class| class.iter().any(|t| normalize_type(t) == normalized))
    }

    fn validate(&self) -> Result<(), PolicyError> {
        let mut seen = std::collections::HashMap::new();
        for (idx, class) in self.classes.iter().enumerate() {
            for name in class {
                let name = normalize_type(name);
                if let Some(prev) = seen.insert(name.clone(), idx) {
                    if prev != idx {
                        return Err(PolicyError::DuplicateType(name));
                    }
                }
            }
        }
        Ok(())
    }
}

fn normalize_type(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

/// Classes of error codes treated as the same condition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorEquivalence {
    classes: Vec<Vec<u16>>,
}

impl ErrorEquivalence {
    /// Build a table from classes of error codes.
    pub fn new<I, C>(classes: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: IntoIterator<Item = u16>,
    {
        Self {
            classes: classes
                .into_iter()
                .map(|class| class.into_iter().collect())
                .collect(),
        }
    }

    /// Check whether two error codes denote the same condition.
    pub fn equivalent(&self, reference: u16, candidate: u16) -> bool {
        reference == candidate
            || self
                .classes
                .iter()
                .any(|class| class.contains(&reference) && class.contains(&candidate))
    }

    fn validate(&self) -> Result<(), PolicyError> {
        let mut seen = std::collections::HashMap::new();
        for (idx, class) in self.classes.iter().enumerate() {
            for code in class {
                if let Some(prev) = seen.insert(*code, idx) {
                    if prev != idx {
                        return Err(PolicyError::DuplicateErrorCode(*code));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Complete comparison policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComparePolicy {
    /// Default row ordering mode.
    #[serde(default)]
    pub ordering: OrderingMode,
    /// Which outcome the client receives.
    #[serde(default)]
    pub reconcile: ReconcilePolicy,
    /// Column name matching rule.
    #[serde(default)]
    pub column_names: ColumnNameMatch,
    /// Also require equal nullability per column.
    #[serde(default)]
    pub compare_nullability: bool,
    /// Also require equal declared length per column.
    #[serde(default)]
    pub compare_length: bool,
    /// Compatible native type names.
    #[serde(default)]
    pub type_equivalence: TypeEquivalence,
    /// Equivalent error codes.
    #[serde(default)]
    pub error_equivalence: ErrorEquivalence,
}

impl ComparePolicy {
    /// Load a policy from a YAML or TOML file (chosen by extension).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    /// Parse a YAML policy.
    pub fn from_yaml_str(content: &str) -> Result<Self, PolicyError> {
        let policy: ComparePolicy = serde_yaml::from_str(content)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Parse a TOML policy.
    pub fn from_toml_str(content: &str) -> Result<Self, PolicyError> {
        let policy: ComparePolicy = toml::from_str(content)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Reject tables where one entry belongs to two classes.
    pub fn validate(&self) -> Result<(), PolicyError> {
        self.type_equivalence.validate()?;
        self.error_equivalence.validate()
    }
}
