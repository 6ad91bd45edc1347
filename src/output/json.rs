//! JSON output formatter

use super::OutputFormatter;
use crate::finding::Finding;
use crate::report::Report;
use serde::Serialize;

/// JSON formatter for machine-readable output
#[derive(Default)]
pub struct JsonFormatter {
    /// Pretty print with indentation
    pub pretty: bool,
}

impl JsonFormatter {
    /// Create a new JSON formatter
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable pretty printing
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    fn render<T: Serialize>(&self, value: &T) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_else(|e| {
            log::error!("Could not serialize output: {}", e);
            String::new()
        })
    }
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    #[serde(flatten)]
    report: &'a Report,
    summary: JsonSummary,
}

#[derive(Serialize)]
struct JsonSummary {
    files_evaluated: usize,
    files_with_errors: usize,
    error_count: usize,
    warning_count: usize,
    info_count: usize,
    incomplete_count: usize,
}

impl OutputFormatter for JsonFormatter {
    fn format(&self, report: &Report) -> String {
        let output = JsonOutput {
            report,
            summary: JsonSummary {
                files_evaluated: report.files.len(),
                files_with_errors: report.files.iter().filter(|f| f.has_errors()).count(),
                error_count: report.error_count(),
                warning_count: report.warning_count(),
                info_count: report.info_count(),
                incomplete_count: report.incomplete().len(),
            },
        };
        self.render(&output)
    }

    fn format_finding(&self, finding: &Finding) -> String {
        self.render(finding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::fixtures;

    #[test]
    fn test_json_format_finding() {
        let formatter = JsonFormatter::new();
        let report = fixtures::report();
        let output = formatter.format_finding(&report.files[1].findings[0]);
        assert!(output.contains("\"rule_id\":\"DI-001\""));
        assert!(output.contains("\"severity\":\"warning\""));
        assert!(output.contains("\"kind\":\"violation\""));
        assert!(output.contains("\"line\":11"));
    }

    #[test]
    fn test_json_format_report() {
        let formatter = JsonFormatter::new();
        let output = formatter.format(&fixtures::report());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(value["summary"]["files_evaluated"], 3);
        assert_eq!(value["summary"]["error_count"], 2);
        assert_eq!(value["summary"]["files_with_errors"], 2);
        assert_eq!(value["summary"]["incomplete_count"], 1);
        assert_eq!(value["files"][2]["state"], "parse-failed");
        assert_eq!(value["rejected"][0]["missing"][0], "construct-usage");
        assert_eq!(value["policy_version"]["serial"], 1);
        assert!(value["files"][0].get("from_cache").is_none());
        assert!(value.get("stats").is_none());
    }

    #[test]
    fn test_json_pretty() {
        let formatter = JsonFormatter::new().pretty();
        let output = formatter.format(&fixtures::report());
        assert!(output.contains('\n'));
    }
}
