//! Evaluation session: parse, match and aggregate a set of files
//!
//! A session owns the adapter registry, the current policy set and an
//! optional finding cache. Files are evaluated in parallel; the report keeps
//! the input order regardless of worker scheduling.

use crate::adapter::AdapterRegistry;
use crate::cache::{CacheKey, FindingCache};
use crate::finding::Finding;
use crate::matcher::MatcherEngine;
use crate::registry::PolicySet;
use crate::report::{FileReport, FileState, Report, RunStats};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A file to evaluate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Declared language tag; the extension decides when absent
    pub language: Option<String>,
    pub text: String,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            language: None,
            text: text.into(),
        }
    }

    /// Declare the language tag
    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_lowercase());
        self
    }

    /// Read a file from disk
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::new(path, text))
    }
}

/// Session-wide cancellation flag, checked between files
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the session can run again
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Evaluate files in parallel
    pub parallel: bool,
    /// Number of worker threads (0 = number of CPUs)
    pub jobs: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            jobs: 0,
        }
    }
}

/// Drives evaluation of a tracked file set against a policy set
pub struct EvaluationSession {
    adapters: AdapterRegistry,
    policies: PolicySet,
    cache: Option<Arc<FindingCache>>,
    matcher: MatcherEngine,
    options: SessionOptions,
    token: CancellationToken,
    /// Files of the last run, in input order
    tracked: Vec<SourceFile>,
}

impl EvaluationSession {
    /// Create a session; `policies` must come from a completed registry build
    pub fn new(adapters: AdapterRegistry, policies: PolicySet) -> Self {
        Self {
            adapters,
            policies,
            cache: None,
            matcher: MatcherEngine::new(),
            options: SessionOptions::default(),
            token: CancellationToken::new(),
            tracked: Vec::new(),
        }
    }

    /// Use a finding cache
    pub fn with_cache(mut self, cache: Arc<FindingCache>) -> Self {
        cache.retain_version(&self.policies.version);
        self.cache = Some(cache);
        self
    }

    /// Set worker pool options
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Token that cancels the current and future runs until reset
    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    pub fn cache(&self) -> Option<&Arc<FindingCache>> {
        self.cache.as_ref()
    }

    /// Files evaluated by the last run, in input order
    pub fn tracked(&self) -> &[SourceFile] {
        &self.tracked
    }

    /// Evaluate `files`, replacing the tracked set
    pub fn evaluate(&mut self, files: Vec<SourceFile>) -> Report {
        self.tracked = files;
        self.run()
    }

    /// Merge changed files into the tracked set and evaluate it again
    ///
    /// Files are matched by path; new paths are appended. Unchanged files
    /// are served from the cache when one is configured.
    pub fn reevaluate(&mut self, changed: Vec<SourceFile>) -> Report {
        for file in changed {
            match self.tracked.iter_mut().find(|f| f.path == file.path) {
                Some(existing) => *existing = file,
                None => self.tracked.push(file),
            }
        }
        self.run()
    }

    /// Swap in a newly built policy set
    ///
    /// Cache entries of other versions are purged; the next run re-matches
    /// every file.
    pub fn set_policies(&mut self, policies: PolicySet) {
        if let Some(cache) = &self.cache {
            cache.retain_version(&policies.version);
        }
        log::info!(
            "Policy updated: {} -> {}",
            self.policies.version,
            policies.version
        );
        self.policies = policies;
    }

    /// Stop tracking a file (e.g. deleted from disk)
    pub fn forget(&mut self, path: &Path) -> bool {
        let before = self.tracked.len();
        self.tracked.retain(|f| f.path != path);
        if let Some(cache) = &self.cache {
            cache.forget(path);
        }
        self.tracked.len() != before
    }

    fn run(&self) -> Report {
        let start = Instant::now();
        let files = &self.tracked;

        let outcomes: Vec<FileReport> = if self.options.parallel && files.len() > 1 {
            let threads = if self.options.jobs > 0 {
                self.options.jobs
            } else {
                num_cpus::get()
            };
            match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => pool.install(|| files.par_iter().map(|f| self.evaluate_file(f)).collect()),
                Err(e) => {
                    log::warn!("Could not start worker pool ({}); evaluating serially", e);
                    files.iter().map(|f| self.evaluate_file(f)).collect()
                }
            }
        } else {
            files.iter().map(|f| self.evaluate_file(f)).collect()
        };

        let stats = RunStats {
            files: outcomes.len(),
            cache_hits: outcomes.iter().filter(|f| f.from_cache).count(),
            parsed: outcomes
                .iter()
                .filter(|f| !f.from_cache && f.state != FileState::Cancelled)
                .count(),
            duration: start.elapsed(),
        };
        let cancelled = outcomes.iter().any(|f| f.state == FileState::Cancelled);

        log::debug!(
            "Evaluated {} file(s): {} from cache, {} parsed, cancelled: {}",
            stats.files,
            stats.cache_hits,
            stats.parsed,
            cancelled
        );

        Report {
            policy_version: self.policies.version.clone(),
            files: outcomes,
            rejected: self.policies.rejections(),
            cancelled,
            stats,
        }
    }

    /// Evaluate one file through its state machine
    fn evaluate_file(&self, file: &SourceFile) -> FileReport {
        let path = file.path.as_path();
        let mut report = FileReport {
            path: file.path.clone(),
            language: None,
            state: FileState::Pending,
            findings: Vec::new(),
            from_cache: false,
        };

        if self.token.is_cancelled() {
            transition(&mut report, FileState::Cancelled);
            return report;
        }

        let Some(adapter) = self.adapters.resolve(path, file.language.as_deref()) else {
            let reason = match &file.language {
                Some(tag) => format!("no adapter for language '{}'", tag),
                None => "no adapter for this file type".to_string(),
            };
            report.findings.push(Finding::parse_error(file.path.clone(), &reason));
            transition(&mut report, FileState::Parsing);
            transition(&mut report, FileState::ParseFailed);
            return report;
        };

        let language = adapter.language().to_string();
        report.language = Some(language.clone());

        let Some(policy) = self.policies.for_language(&language) else {
            let reason = format!("no policy built for language '{}'", language);
            report.findings.push(Finding::parse_error(file.path.clone(), &reason));
            transition(&mut report, FileState::Parsing);
            transition(&mut report, FileState::ParseFailed);
            return report;
        };

        let key = CacheKey::new(&file.text, &policy.version, &language);
        if let Some(cache) = &self.cache {
            if let Some(findings) = cache.get(&key, path) {
                transition(&mut report, FileState::CacheHit);
                report.findings = findings;
                report.from_cache = true;
                transition(&mut report, FileState::Done);
                return report;
            }
        }

        transition(&mut report, FileState::Parsing);
        let unit = match adapter.parse(path, &file.text) {
            Ok(unit) => unit,
            Err(e) => {
                log::debug!("{}", e);
                report.findings.push(Finding::parse_error(file.path.clone(), &e.reason));
                transition(&mut report, FileState::ParseFailed);
                return report;
            }
        };

        transition(&mut report, FileState::Matching);
        report.findings = self.matcher.evaluate(&unit, &policy);

        // Commit only after the file has completed
        if let Some(cache) = &self.cache {
            cache.put(key, path, &report.findings);
        }
        transition(&mut report, FileState::Done);
        report
    }
}

fn transition(report: &mut FileReport, next: FileState) {
    log::trace!("{}: {} -> {}", report.path.display(), report.state, next);
    report.state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::NodeKind;
    use crate::finding::FindingKind;
    use crate::predicate::{Condition, Predicate};
    use crate::registry::RuleRegistry;
    use crate::rule::{RuleDefinition, RuleSet, Scope};

    fn session() -> EvaluationSession {
        let adapters = AdapterRegistry::with_builtin();
        let set = RuleSet::new("common", Scope::Universal).with_rule(RuleDefinition::new(
            "NAME-001",
            "warning",
            Predicate::every(NodeKind::Type, Condition::matches("name", "^[A-Z]")),
            "Type '{name}' should start with an uppercase letter",
        ));
        let mut registry = RuleRegistry::new(vec!["common".to_string()]);
        let policies = registry.build(&[set], &adapters.capabilities()).unwrap();
        EvaluationSession::new(adapters, policies)
    }

    #[test]
    fn test_unknown_extension_is_parse_failure() {
        let mut session = session();
        let report = session.evaluate(vec![SourceFile::new("notes.txt", "hello")]);
        assert_eq!(report.files[0].state, FileState::ParseFailed);
        assert_eq!(report.files[0].findings[0].kind, FindingKind::ParseError);
        assert!(report.files[0].findings[0].message.contains("no adapter"));
    }

    #[test]
    fn test_declared_language_wins() {
        let mut session = session();
        let file = SourceFile::new("script", "class lower:\n    pass\n").with_language("Python");
        let report = session.evaluate(vec![file]);
        assert_eq!(report.files[0].language.as_deref(), Some("python"));
        assert_eq!(report.files[0].findings.len(), 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let mut session = session();
        session.cancel_token().cancel();
        let report = session.evaluate(vec![
            SourceFile::new("a.py", "x = 1\n"),
            SourceFile::new("b.py", "y = 2\n"),
        ]);
        assert!(report.cancelled);
        assert!(report
            .files
            .iter()
            .all(|f| f.state == FileState::Cancelled && f.findings.is_empty()));

        session.cancel_token().reset();
        assert!(!session.evaluate(vec![SourceFile::new("a.py", "x = 1\n")]).cancelled);
    }

    #[test]
    fn test_reevaluate_merges_by_path() {
        let mut session = session();
        session.evaluate(vec![SourceFile::new("a.py", "class A:\n    pass\n")]);
        let report = session.reevaluate(vec![
            SourceFile::new("a.py", "class a:\n    pass\n"),
            SourceFile::new("b.py", "class B:\n    pass\n"),
        ]);
        assert_eq!(session.tracked().len(), 2);
        assert_eq!(report.files[0].findings.len(), 1);
        assert!(report.files[1].findings.is_empty());

        assert!(session.forget(Path::new("a.py")));
        assert!(!session.forget(Path::new("a.py")));
        assert_eq!(session.tracked().len(), 1);
    }
}
