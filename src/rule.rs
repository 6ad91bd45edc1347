//! Rule model: rule definitions, rule sets and their loading

use crate::finding::Severity;
use crate::predicate::Predicate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error loading rule sets or building a policy from them
///
/// Always fatal: nothing is evaluated against a broken rule configuration.
#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("IO error reading {file}: {source}")]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {file}: {message}")]
    Parse { file: String, message: String },

    #[error("Rule '{rule_id}' in rule set '{rule_set}' has an empty predicate")]
    EmptyPredicate { rule_set: String, rule_id: String },

    #[error("Rule id '{rule_id}' in rule set '{rule_set}' is reserved for parse failures")]
    ReservedRuleId { rule_set: String, rule_id: String },

    #[error("Rule '{rule_id}' is defined more than once in rule set '{rule_set}'")]
    DuplicateRule { rule_set: String, rule_id: String },

    #[error("Rule '{rule_id}' in rule set '{rule_set}' has unrecognized severity '{severity}'")]
    InvalidSeverity {
        rule_set: String,
        rule_id: String,
        severity: String,
    },

    #[error("Rule set '{0}' is loaded more than once")]
    DuplicateRuleSet(String),

    #[error("Rule set '{0}' is missing from the precedence order")]
    MissingPrecedence(String),

    #[error("Precedence order names unknown rule set '{0}'")]
    UnknownRuleSet(String),

    #[error("Precedence order names rule set '{0}' more than once")]
    DuplicatePrecedence(String),
}

/// Where a rule applies
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    /// Applies to every language
    Universal,
    /// Applies to one language tag
    Language(String),
}

impl Scope {
    /// Whether this scope covers a language
    pub fn applies_to(&self, language: &str) -> bool {
        match self {
            Scope::Universal => true,
            Scope::Language(tag) => tag == language,
        }
    }

    /// Specificity rank: language-specific outranks universal
    pub fn specificity(&self) -> u8 {
        match self {
            Scope::Universal => 0,
            Scope::Language(_) => 1,
        }
    }
}

impl TryFrom<String> for Scope {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let tag = value.trim().to_lowercase();
        match tag.as_str() {
            "" => Err("scope must not be empty".to_string()),
            "common" | "universal" | "*" | "all" => Ok(Scope::Universal),
            _ => Ok(Scope::Language(tag)),
        }
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Universal => write!(f, "common"),
            Scope::Language(tag) => write!(f, "{}", tag),
        }
    }
}

/// A rule as written in a rule-set document
///
/// Severity stays raw text and the predicate optional until the registry
/// validates them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Stable identifier, unique within its rule set (e.g. "DI-001")
    pub id: String,

    /// Free-form category (e.g. "dependency-injection", "security")
    #[serde(default)]
    pub category: String,

    /// One of info, warning, error
    pub severity: String,

    /// Structural condition the code must satisfy
    #[serde(default)]
    pub predicate: Option<Predicate>,

    /// Message template (can contain placeholders)
    pub message: String,

    /// Why this rule exists
    #[serde(default)]
    pub rationale: String,
}

impl RuleDefinition {
    /// Create a definition with minimal required fields
    pub fn new(id: &str, severity: &str, predicate: Predicate, message: &str) -> Self {
        Self {
            id: id.to_string(),
            category: String::new(),
            severity: severity.to_string(),
            predicate: Some(predicate),
            message: message.to_string(),
            rationale: String::new(),
        }
    }

    /// Set the category
    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    /// Set the rationale
    pub fn with_rationale(mut self, rationale: &str) -> Self {
        self.rationale = rationale.to_string();
        self
    }
}

/// A named, versioned, scoped collection of rule definitions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleSet {
    pub name: String,

    #[serde(default)]
    pub version: Option<String>,

    pub scope: Scope,

    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

impl RuleSet {
    pub fn new(name: &str, scope: Scope) -> Self {
        Self {
            name: name.to_string(),
            version: None,
            scope,
            rules: Vec::new(),
        }
    }

    /// Add a rule definition
    pub fn with_rule(mut self, rule: RuleDefinition) -> Self {
        self.rules.push(rule);
        self
    }

    /// Parse a rule-set document; the format is chosen by extension
    pub fn parse(content: &str, path: &Path) -> Result<Self, RuleLoadError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let parse_err = |message: String| RuleLoadError::Parse {
            file: path.display().to_string(),
            message,
        };

        match ext {
            "yaml" | "yml" => serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string())),
            "json" => serde_json::from_str(content).map_err(|e| parse_err(e.to_string())),
            _ => Err(parse_err(format!("Unknown rule set format: {}", ext))),
        }
    }

    /// Load a rule set from a file
    pub fn load(path: &Path) -> Result<Self, RuleLoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| RuleLoadError::Io {
            file: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }
}

/// Load rule sets from files and directories, in the order given
///
/// Directories contribute their `.yaml`, `.yml` and `.json` files sorted by
/// name, so the result does not depend on directory listing order.
pub fn load_rule_sets(paths: &[PathBuf]) -> Result<Vec<RuleSet>, RuleLoadError> {
    let mut sets = Vec::new();

    for path in paths {
        if path.is_dir() {
            let read = std::fs::read_dir(path).map_err(|source| RuleLoadError::Io {
                file: path.clone(),
                source,
            })?;
            let mut files: Vec<PathBuf> = Vec::new();
            for entry in read {
                let entry = entry.map_err(|source| RuleLoadError::Io {
                    file: path.clone(),
                    source,
                })?;
                let p = entry.path();
                let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
                if matches!(ext, "yaml" | "yml" | "json") {
                    files.push(p);
                }
            }
            files.sort();
            for file in files {
                sets.push(RuleSet::load(&file)?);
            }
        } else {
            sets.push(RuleSet::load(path)?);
        }
    }

    log::debug!("Loaded {} rule set(s)", sets.len());
    Ok(sets)
}

/// A validated rule, as it appears in an effective policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub id: String,
    pub scope: Scope,
    pub category: String,
    pub severity: Severity,
    pub predicate: Predicate,
    pub message: String,
    pub rationale: String,
    /// Name of the rule set the rule came from
    pub origin: String,
}
