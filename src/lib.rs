//! Conform - rule-compliance engine for multi-language coding conventions
//!
//! Checks source files against declarative convention rules. Rules are
//! grouped into scoped rule sets (universal or per language) and merged by
//! a registry into one effective policy per language. Language adapters turn
//! source text into a flat list of structural nodes; a matcher evaluates
//! each rule's predicate over those nodes and produces findings.
//!
//! # Architecture
//!
//! ```text
//! RuleSet* -> RuleRegistry -> PolicySet ─┐
//!                                        ├-> EvaluationSession -> Report
//! SourceFile* -> LanguageAdapter ────────┘        (MatcherEngine, FindingCache)
//! ```
//!
//! # Rule sets
//!
//! ```yaml
//! name: java
//! version: "1.2"
//! scope: java
//! rules:
//!   - id: DI-001
//!     category: dependency-injection
//!     severity: warning
//!     message: "Field '{name}' uses field injection"
//!     predicate:
//!       kind: every
//!       node: field
//!       require: { kind: lacks, attribute: injection }
//! ```

pub mod adapter;
pub mod adapters;
pub mod cache;
pub mod config;
pub mod finding;
pub mod matcher;
pub mod output;
pub mod predicate;
pub mod registry;
pub mod report;
pub mod rule;
pub mod session;
pub mod watch;

// Re-export main types
pub use adapter::{AdapterRegistry, LanguageAdapter, NodeKind, ParseError, StructuralNode, StructuralUnit};
pub use cache::FindingCache;
pub use config::Config;
pub use finding::{Finding, FindingKind, Severity, Span};
pub use matcher::{MatcherEngine, RuleEvaluationError};
pub use output::OutputFormatter;
pub use predicate::{Condition, Predicate, Selector};
pub use registry::{EffectivePolicy, PolicySet, PolicyVersion, RuleRegistry};
pub use report::{FileState, Report};
pub use rule::{Rule, RuleDefinition, RuleLoadError, RuleSet, Scope};
pub use session::{CancellationToken, EvaluationSession, SourceFile};
pub use watch::Watcher;
