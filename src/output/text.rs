//! Human-readable text output formatter

use super::OutputFormatter;
use crate::finding::{Finding, Severity};
use crate::report::{FileState, Report};
use colored::*;

/// Text formatter with optional color support
pub struct TextFormatter {
    /// Enable colored output
    pub colored: bool,

    /// Show statistics
    pub show_stats: bool,

    /// List rules that were rejected for missing capabilities
    pub show_rejected: bool,
}

impl Default for TextFormatter {
    fn default() -> Self {
        Self {
            colored: true,
            show_stats: true,
            show_rejected: true,
        }
    }
}

impl TextFormatter {
    /// Create a new text formatter
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable colors
    pub fn without_color(mut self) -> Self {
        self.colored = false;
        self
    }

    fn paint(&self, s: String, style: fn(ColoredString) -> ColoredString) -> String {
        if self.colored {
            style(s.normal()).to_string()
        } else {
            s
        }
    }

    fn severity_str(&self, severity: Severity) -> ColoredString {
        let s = format!("{}", severity);
        if !self.colored {
            return s.normal();
        }
        match severity {
            Severity::Error => s.red().bold(),
            Severity::Warning => s.yellow().bold(),
            Severity::Info => s.blue(),
        }
    }

    fn plural(count: usize, noun: &str) -> String {
        if count == 1 {
            format!("{} {}", count, noun)
        } else {
            format!("{} {}s", count, noun)
        }
    }
}

impl OutputFormatter for TextFormatter {
    fn format(&self, report: &Report) -> String {
        let mut output = String::new();

        // Files in input order
        for file in report.files.iter().filter(|f| !f.findings.is_empty()) {
            let header = file.path.display().to_string();
            output.push_str(&self.paint(header, |s| s.underline()));
            output.push('\n');
            for finding in &file.findings {
                output.push_str(&self.format_finding(finding));
                output.push('\n');
            }
            output.push('\n');
        }

        if self.show_rejected && !report.rejected.is_empty() {
            for rejection in &report.rejected {
                output.push_str(&format!(
                    "{}: {}\n",
                    self.paint("note".to_string(), |s| s.cyan()),
                    rejection
                ));
            }
            output.push('\n');
        }

        let cancelled = report
            .files
            .iter()
            .filter(|f| f.state == FileState::Cancelled)
            .count();
        if report.cancelled {
            output.push_str(&format!(
                "{}: run cancelled, {} not evaluated\n",
                self.paint("note".to_string(), |s| s.cyan()),
                Self::plural(cancelled, "file")
            ));
        }

        if self.show_stats {
            output.push_str(&format!(
                "{} evaluated",
                Self::plural(report.files.len(), "file")
            ));

            let mut counts = Vec::new();
            if report.error_count() > 0 {
                counts.push(self.paint(Self::plural(report.error_count(), "error"), |s| s.red()));
            }
            if report.warning_count() > 0 {
                counts.push(self.paint(
                    Self::plural(report.warning_count(), "warning"),
                    |s| s.yellow(),
                ));
            }
            if report.info_count() > 0 {
                counts.push(self.paint(Self::plural(report.info_count(), "info"), |s| s.blue()));
            }
            if !counts.is_empty() {
                output.push_str(&format!(": {}", counts.join(", ")));
            }
            output.push('\n');

            let incomplete = report.incomplete().len();
            if incomplete > 0 {
                output.push_str(&format!(
                    "{} could not be checked\n",
                    Self::plural(incomplete, "rule/file pair")
                ));
            }

            output.push_str(&format!(
                "Policy {}, {} from cache, finished in {:.2}s\n",
                report.policy_version,
                report.stats.cache_hits,
                report.stats.duration.as_secs_f64()
            ));
        }

        output
    }

    fn format_finding(&self, finding: &Finding) -> String {
        let rule = self.paint(finding.rule_id.clone(), |s| s.cyan());
        let mut line = format!(
            "{}:{}: {}[{}]: {}",
            finding.file.display(),
            finding.span,
            self.severity_str(finding.severity),
            rule,
            finding.message
        );
        if finding.kind.is_incomplete() {
            line.push_str(&format!(" ({})", finding.kind));
        }
        line
    }
}
