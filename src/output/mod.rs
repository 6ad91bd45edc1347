//! Output formatters for evaluation reports

mod json;
mod text;

pub use json::JsonFormatter;
pub use text::TextFormatter;

use crate::config::OutputFormat;
use crate::finding::Finding;
use crate::report::Report;

/// Output formatter trait
pub trait OutputFormatter: Send + Sync {
    /// Format the entire report
    fn format(&self, report: &Report) -> String;

    /// Format a single finding
    fn format_finding(&self, finding: &Finding) -> String;
}

/// Formatter for a configured output format
pub fn formatter_for(format: OutputFormat, colored: bool, show_stats: bool) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Text => {
            let mut text = TextFormatter::new();
            text.colored = colored;
            text.show_stats = show_stats;
            Box::new(text)
        }
        OutputFormat::Json => Box::new(JsonFormatter::new().pretty()),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::finding::{Finding, Severity, Span};
    use crate::registry::{PolicyVersion, RuleRejection};
    use crate::adapter::Capability;
    use crate::report::{FileReport, FileState, Report, RunStats};
    use std::path::PathBuf;

    /// A report with one clean file, one file with two findings and one
    /// file that failed to parse
    pub(crate) fn report() -> Report {
        let java = PathBuf::from("src/OrderService.java");
        Report {
            policy_version: PolicyVersion {
                serial: 1,
                fingerprint: "0123456789abcdef".to_string(),
            },
            files: vec![
                FileReport {
                    path: PathBuf::from("src/Clean.java"),
                    language: Some("java".to_string()),
                    state: FileState::Done,
                    findings: Vec::new(),
                    from_cache: true,
                },
                FileReport {
                    path: java.clone(),
                    language: Some("java".to_string()),
                    state: FileState::Done,
                    findings: vec![
                        Finding::new(
                            "DI-001",
                            java.clone(),
                            Span::on_line(11, 5, 10),
                            Severity::Warning,
                            "Field 'repository' uses field injection",
                        ),
                        Finding::new(
                            "SEC-001",
                            java,
                            Span::on_line(14, 38, 10),
                            Severity::Error,
                            "Hard-coded secret in literal",
                        ),
                    ],
                    from_cache: false,
                },
                FileReport {
                    path: PathBuf::from("app/broken.py"),
                    language: Some("python".to_string()),
                    state: FileState::ParseFailed,
                    findings: vec![Finding::parse_error(
                        PathBuf::from("app/broken.py"),
                        "unterminated string literal at 3:9",
                    )],
                    from_cache: false,
                },
            ],
            rejected: vec![RuleRejection {
                rule_id: "DI-002".to_string(),
                language: "python".to_string(),
                missing: vec![Capability::ConstructUsage],
            }],
            cancelled: false,
            stats: RunStats {
                files: 3,
                cache_hits: 1,
                parsed: 2,
                duration: std::time::Duration::from_millis(12),
            },
        }
    }
}
