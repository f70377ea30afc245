//! Report generation for test results
//!
//! Renders stored reports and the end-of-run summary as text or markdown.

use std::fmt::{self, Write};

use chrono::{DateTime, Utc};

use crate::models::{ExitStatus, SuiteResult, TestState};
use crate::results::storage::{StoredReport, StoredSuite};

/// Report generator
pub struct ReportGenerator;

impl ReportGenerator {
    /// Render a stored report
    pub fn render(report: &StoredReport, format: ReportFormat) -> String {
        let mut output = String::new();
        let written = match format {
            ReportFormat::Text => write_text_report(&mut output, report),
            ReportFormat::Markdown => write_markdown_report(&mut output, report),
        };
        debug_assert!(written.is_ok());
        output
    }

    /// Summary printed when a run ends
    pub fn run_summary(suites: &[SuiteResult], status: ExitStatus) -> String {
        let mut output = String::new();
        let written = write_run_summary(&mut output, suites, status);
        debug_assert!(written.is_ok());
        output
    }
}

fn write_text_report(output: &mut String, report: &StoredReport) -> fmt::Result {
    writeln!(output, "\n{:=^70}", " Test Launcher Report ")?;
    writeln!(output)?;
    writeln!(output, "Run ID: {}", report.id)?;
    writeln!(output, "Started: {}", format_datetime(&report.started_at))?;
    writeln!(output, "Updated: {}", format_datetime(&report.updated_at))?;
    if let Some(status) = report.status {
        writeln!(output, "Status: {status}")?;
    } else {
        writeln!(output, "Status: in progress")?;
    }

    for suite in &report.suites {
        writeln!(output, "\n{:-^70}", format!(" {} ", truncate(&suite.name, 60)))?;
        writeln!(
            output,
            "{:<40} {:>10} {:>10}",
            "Test", "State", "Time(ms)"
        )?;
        writeln!(output, "{:-<70}", "")?;
        for case in &suite.cases {
            writeln!(
                output,
                "{:<40} {:>10} {:>10}",
                truncate(&case.name, 40),
                case.state,
                case.duration_ms
            )?;
            if let Some(message) = case.message.as_deref() {
                writeln!(output, "    {message}")?;
            }
        }
        writeln!(output, "{:-<70}", "")?;
        writeln!(output, "{}", totals_line(suite))?;
    }

    writeln!(output, "\n{:=^70}", "")
}

fn write_markdown_report(output: &mut String, report: &StoredReport) -> fmt::Result {
    writeln!(output, "# Test Launcher Report\n")?;
    writeln!(output, "| Property | Value |")?;
    writeln!(output, "|----------|-------|")?;
    writeln!(output, "| Run ID | `{}` |", report.id)?;
    writeln!(output, "| Started | {} |", format_datetime(&report.started_at))?;
    writeln!(output, "| Updated | {} |", format_datetime(&report.updated_at))?;
    match report.status {
        Some(status) => writeln!(output, "| Status | {status} |")?,
        None => writeln!(output, "| Status | in progress |")?,
    }

    for suite in &report.suites {
        writeln!(output, "\n## {}\n", suite.name)?;
        writeln!(output, "{}\n", totals_line(suite))?;
        writeln!(output, "| Test | Group | State | Time (ms) | Message |")?;
        writeln!(output, "|------|-------|-------|-----------|---------|")?;
        for case in &suite.cases {
            writeln!(
                output,
                "| {} | {} | {} {} | {} | {} |",
                escape_cell(&case.name),
                escape_cell(&case.class_name),
                case.state.symbol(),
                case.state,
                case.duration_ms,
                case.message.as_deref().map(escape_cell).unwrap_or_default()
            )?;
        }
    }

    Ok(())
}

fn write_run_summary(output: &mut String, suites: &[SuiteResult], status: ExitStatus) -> fmt::Result {
    for suite in suites {
        write!(output, "{suite}")?;
        let problems: Vec<_> = suite
            .results
            .iter()
            .filter(|r| r.state.is_failure() || r.state == TestState::NoRun)
            .collect();
        if !problems.is_empty() {
            writeln!(output, "Not passed:")?;
            for result in problems {
                writeln!(output, "  {result}")?;
            }
        }
        writeln!(output)?;
    }
    writeln!(output, "Run result: {status}")
}

fn totals_line(suite: &StoredSuite) -> String {
    format!(
        "Total: {} | Pass: {} | Fail: {} | Error: {} | Skip: {} | Duration: {}ms",
        suite.tests, suite.passed, suite.failures, suite.errors, suite.skipped, suite.runtime_ms
    )
}

/// Report format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Markdown,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            _ => None,
        }
    }
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TestRunResult, TestSpec, TestType};
    use crate::results::storage::StoredCase;
    use std::time::Duration;

    fn sample_report() -> StoredReport {
        let spec = TestSpec::with_type("Login|Flow", "suite", Some(TestType::Gui));
        let mut report = StoredReport::new();
        report.suites.push(StoredSuite {
            name: "local".to_string(),
            tests: 1,
            failures: 1,
            cases: vec![StoredCase::from_result(0, &TestRunResult::failed(
                &spec,
                Duration::from_millis(12),
                "step 2",
            ))],
            ..Default::default()
        });
        report
    }

    #[test]
    fn test_report_format() {
        assert_eq!(ReportFormat::from_str("text"), Some(ReportFormat::Text));
        assert_eq!(ReportFormat::from_str("md"), Some(ReportFormat::Markdown));
        assert!(ReportFormat::from_str("html").is_none());
    }

    #[test]
    fn test_text_report() {
        let text = ReportGenerator::render(&sample_report(), ReportFormat::Text);
        assert!(text.contains("Status: in progress"));
        assert!(text.contains("step 2"));
        assert!(text.contains("Fail: 1"));
    }

    #[test]
    fn test_markdown_escapes_cells() {
        let md = ReportGenerator::render(&sample_report(), ReportFormat::Markdown);
        assert!(md.contains("## local"));
        assert!(md.contains("Login\\|Flow"));
    }

    #[test]
    fn test_run_summary_lists_problems() {
        let spec = TestSpec::with_type("b", "g", Some(TestType::Api));
        let mut suite = SuiteResult::new("local");
        suite.record(TestRunResult::passed(&spec, Duration::ZERO));
        suite.record(TestRunResult::cancelled(&spec));

        let summary = ReportGenerator::run_summary(&[suite], ExitStatus::Aborted);
        assert!(summary.contains("Not passed:"));
        assert!(summary.contains("cancelled"));
        assert!(summary.ends_with("Run result: ABORTED\n"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
    }
}
