//! Finding types for evaluation results

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;

/// Rule id carried by findings produced for files that failed to parse
pub const PARSE_ERROR_RULE_ID: &str = "parse-error";

/// Severity level for rules and findings
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,
    /// Warning - convention not followed
    #[default]
    Warning,
    /// Error - blocks a successful run
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    /// Only the three canonical names are accepted: rule documents with any
    /// other spelling are rejected when the registry is built.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(format!("Unknown severity: {}", other)),
        }
    }
}

/// Line/column position (both 1-based)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// Source range covered by a node or finding
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Span covering a single line range
    pub fn on_line(line: usize, column: usize, length: usize) -> Self {
        Self {
            start: Position::new(line, column),
            end: Position::new(line, column + length),
        }
    }

    /// Span used for findings that belong to the file as a whole
    pub fn file_start() -> Self {
        Self::on_line(1, 1, 0)
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.start.line, self.start.column)
    }
}

/// What produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingKind {
    /// The rule's predicate does not hold
    #[default]
    Violation,
    /// The file could not be parsed, so no rule was checked
    ParseError,
    /// The rule could not be evaluated for this file
    EvaluationError,
}

impl FindingKind {
    /// Whether this finding means "could not check" rather than a violation
    pub fn is_incomplete(&self) -> bool {
        !matches!(self, FindingKind::Violation)
    }
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FindingKind::Violation => write!(f, "violation"),
            FindingKind::ParseError => write!(f, "parse-error"),
            FindingKind::EvaluationError => write!(f, "evaluation-error"),
        }
    }
}

/// One reported rule violation instance (or a record of what could not be checked)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Rule that produced this finding
    pub rule_id: String,
    /// File the finding belongs to
    pub file: PathBuf,
    /// Source range
    pub span: Span,
    /// Severity level
    pub severity: Severity,
    /// Rendered message
    pub message: String,
    /// Violation, parse error or evaluation error
    #[serde(default)]
    pub kind: FindingKind,
}

impl Finding {
    /// Create a new violation finding
    pub fn new(rule_id: &str, file: PathBuf, span: Span, severity: Severity, message: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            file,
            span,
            severity,
            message: message.to_string(),
            kind: FindingKind::Violation,
        }
    }

    /// Finding recorded when a whole file could not be parsed
    pub fn parse_error(file: PathBuf, reason: &str) -> Self {
        Self {
            rule_id: PARSE_ERROR_RULE_ID.to_string(),
            file,
            span: Span::file_start(),
            severity: Severity::Error,
            message: format!("Parse error: {}", reason),
            kind: FindingKind::ParseError,
        }
    }

    /// Finding recorded when one rule could not be evaluated for a file
    pub fn evaluation_error(rule_id: &str, file: PathBuf, reason: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            file,
            span: Span::file_start(),
            severity: Severity::Error,
            message: format!("Rule could not be evaluated: {}", reason),
            kind: FindingKind::EvaluationError,
        }
    }

    /// Check if this is an error
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Check if this is a warning
    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }

    /// Ordering used within one file: span start, then rule id
    pub fn source_order(&self, other: &Self) -> Ordering {
        self.span
            .start
            .cmp(&other.span.start)
            .then_with(|| self.rule_id.cmp(&other.rule_id))
            .then_with(|| self.span.end.cmp(&other.span.end))
            .then_with(|| self.message.cmp(&other.message))
    }
}

/// Sort findings of one file into their stable report order
pub fn sort_findings(findings: &mut Vec<Finding>) {
    findings.sort_by(|a, b| a.source_order(b));
    findings.dedup();
}
