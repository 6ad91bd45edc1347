//! Aggregated result of an evaluation run

use crate::finding::{Finding, Severity};
use crate::registry::{PolicyVersion, RuleRejection};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Lifecycle state of one file in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileState {
    Pending,
    Parsing,
    Matching,
    CacheHit,
    Done,
    ParseFailed,
    Cancelled,
}

impl FileState {
    /// Whether no further transition can happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileState::Done | FileState::ParseFailed | FileState::Cancelled
        )
    }
}

impl std::fmt::Display for FileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileState::Pending => "pending",
            FileState::Parsing => "parsing",
            FileState::Matching => "matching",
            FileState::CacheHit => "cache-hit",
            FileState::Done => "done",
            FileState::ParseFailed => "parse-failed",
            FileState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Findings of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    /// Language the file was evaluated as, when an adapter was found
    pub language: Option<String>,
    /// Terminal state
    pub state: FileState,
    /// Findings in (span start, rule id) order
    pub findings: Vec<Finding>,
    /// Served from the cache (not part of serialized output)
    #[serde(skip)]
    pub from_cache: bool,
}

impl FileReport {
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(Finding::is_error)
    }
}

/// Run statistics, excluded from serialized output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub files: usize,
    pub cache_hits: usize,
    pub parsed: usize,
    pub duration: Duration,
}

/// Result of evaluating a set of files
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Policy version every file was evaluated against
    pub policy_version: PolicyVersion,

    /// One entry per input file, in input order
    pub files: Vec<FileReport>,

    /// Rules excluded for missing adapter capabilities
    pub rejected: Vec<RuleRejection>,

    /// Whether the run stopped early
    pub cancelled: bool,

    #[serde(skip)]
    pub stats: RunStats,
}

impl Report {
    /// All findings, file by file
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.files.iter().flat_map(|f| f.findings.iter())
    }

    fn count(&self, severity: Severity) -> usize {
        self.findings().filter(|f| f.severity == severity).count()
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    pub fn info_count(&self) -> usize {
        self.count(Severity::Info)
    }

    /// Check if there are any errors
    pub fn has_errors(&self) -> bool {
        self.findings().any(Finding::is_error)
    }

    /// Check if result is clean (no findings, nothing skipped)
    pub fn is_clean(&self) -> bool {
        self.findings().next().is_none() && self.rejected.is_empty() && !self.cancelled
    }

    /// Parse failures and evaluation errors: things that could not be checked
    pub fn incomplete(&self) -> Vec<&Finding> {
        self.findings().filter(|f| f.kind.is_incomplete()).collect()
    }

    /// Files that did not reach `Done`
    pub fn unfinished_files(&self) -> Vec<&FileReport> {
        self.files
            .iter()
            .filter(|f| f.state != FileState::Done)
            .collect()
    }

    /// Number of findings per rule id
    pub fn rule_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for finding in self.findings() {
            *counts.entry(finding.rule_id.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Get exit code (0 = clean or non-blocking findings, 1 = errors)
    pub fn exit_code(&self) -> i32 {
        if self.has_errors() {
            1
        } else {
            0
        }
    }
}
