//! Incremental report storage
//!
//! The report is a JSON document rewritten after every terminal test
//! result. Each write goes to a temporary file that is then renamed over
//! the report, so a killed process leaves either the previous or the new
//! complete document behind.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::{ExitStatus, SuiteResult, TestRunResult, TestState};

/// Stored report for one launcher run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredReport {
    /// Unique run ID
    pub id: String,

    pub tool_version: String,

    pub started_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Final verdict, set once the run ends
    pub status: Option<ExitStatus>,

    pub suites: Vec<StoredSuite>,
}

/// Stored suite with its totals
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoredSuite {
    pub name: String,
    pub tests: usize,
    pub passed: usize,
    pub failures: usize,
    pub errors: usize,
    pub skipped: usize,
    pub runtime_ms: u64,
    pub finalized: bool,
    pub cases: Vec<StoredCase>,
}

/// Stored test case
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredCase {
    /// Position of the test in the run; a list may name one test twice
    #[serde(default)]
    pub position: usize,
    pub name: String,
    /// Group label of the test
    pub class_name: String,
    pub state: TestState,
    pub duration_ms: u64,
    pub message: Option<String>,
    pub report_location: Option<PathBuf>,
    pub run_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
}

impl StoredReport {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: generate_run_id(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: now,
            updated_at: now,
            status: None,
            suites: Vec::new(),
        }
    }

    pub fn suite(&self, name: &str) -> Option<&StoredSuite> {
        self.suites.iter().find(|s| s.name == name)
    }

    fn suite_mut(&mut self, name: &str) -> &mut StoredSuite {
        let index = match self.suites.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.suites.push(StoredSuite {
                    name: name.to_string(),
                    ..Default::default()
                });
                self.suites.len() - 1
            }
        };
        &mut self.suites[index]
    }

    pub fn total_cases(&self) -> usize {
        self.suites.iter().map(|s| s.cases.len()).sum()
    }
}

impl Default for StoredReport {
    fn default() -> Self {
        Self::new()
    }
}

impl StoredSuite {
    /// Copy totals from the live suite
    fn update_totals(&mut self, suite: &SuiteResult) {
        self.tests = suite.num_tests;
        self.passed = suite.num_passed;
        self.failures = suite.num_failures;
        self.errors = suite.num_errors;
        self.skipped = suite.num_skipped;
        self.runtime_ms = suite.total_runtime_ms;
        self.finalized = suite.is_finalized();
    }

    /// Insert or replace the case at `position`
    fn upsert(&mut self, position: usize, result: &TestRunResult) {
        let case = StoredCase::from_result(position, result);
        match self.cases.iter_mut().find(|c| c.position == position) {
            Some(existing) => *existing = case,
            None => self.cases.push(case),
        }
    }
}

impl StoredCase {
    pub fn from_result(position: usize, result: &TestRunResult) -> Self {
        Self {
            position,
            name: result.name.clone(),
            class_name: result.group.clone(),
            state: result.state,
            duration_ms: result.duration_ms,
            message: result.message().map(str::to_string),
            report_location: result.report_location.clone(),
            run_id: result.run_id,
            started_at: result.started_at,
        }
    }
}

/// Generate unique run ID
fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

/// Report file manager
#[derive(Clone, Debug)]
pub struct ReportStore {
    path: PathBuf,
}

impl ReportStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Start a fresh report, replacing any previous one at this path
    pub fn begin(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(path);
        let report = StoredReport::new();
        store.write(&report)?;
        info!("Writing incremental report to {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the report from disk
    pub fn load(&self) -> Result<StoredReport> {
        load_from_path(&self.path)
    }

    fn load_or_new(&self) -> Result<StoredReport> {
        if self.path.exists() {
            self.load()
        } else {
            Ok(StoredReport::new())
        }
    }

    /// Record the terminal result at `index` and the current suite totals
    pub fn record(&self, suite: &SuiteResult, index: usize) -> Result<()> {
        let result = suite
            .results
            .get(index)
            .with_context(|| format!("No result {index} in suite {}", suite.name))?;
        let mut report = self.load_or_new()?;
        let stored = report.suite_mut(&suite.name);
        stored.upsert(index, result);
        stored.update_totals(suite);
        self.write(&report)?;
        debug!("Recorded {} in {}", result.name, self.path.display());
        Ok(())
    }

    /// Record suite totals without a new case, e.g. after finalization
    pub fn record_suite(&self, suite: &SuiteResult) -> Result<()> {
        let mut report = self.load_or_new()?;
        let stored = report.suite_mut(&suite.name);
        for (index, result) in suite.results.iter().enumerate() {
            if result.is_counted() {
                stored.upsert(index, result);
            }
        }
        stored.update_totals(suite);
        self.write(&report)
    }

    pub fn record_status(&self, status: ExitStatus) -> Result<()> {
        let mut report = self.load_or_new()?;
        report.status = Some(status);
        self.write(&report)
    }

    /// Replace the report atomically
    pub fn write(&self, report: &StoredReport) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut report = report.clone();
        report.updated_at = Utc::now();

        let tmp = tmp_path(&self.path);
        {
            let file = File::create(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &report).context("Failed to write report")?;
            writer.flush().context("Failed to flush report")?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace report: {}", self.path.display()))?;
        Ok(())
    }

    /// Export a report to a file
    pub fn export(report: &StoredReport, path: &Path, format: ExportFormat) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        match format {
            ExportFormat::Json => {
                serde_json::to_writer_pretty(BufWriter::new(file), report)
                    .context("Failed to write report")?;
            }
            ExportFormat::Csv => write_csv(report, file)?,
        }

        info!("Exported report to {}", path.display());
        Ok(())
    }
}

/// Load a report from a specific path
pub fn load_from_path(path: &Path) -> Result<StoredReport> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open report: {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse report: {}", path.display()))
}

/// Write one CSV row per case
pub fn write_csv<W: Write>(report: &StoredReport, writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record([
        "suite",
        "class_name",
        "name",
        "state",
        "duration_ms",
        "message",
        "report_location",
    ])?;

    for suite in &report.suites {
        for case in &suite.cases {
            writer.write_record([
                suite.name.clone(),
                case.class_name.clone(),
                case.name.clone(),
                case.state.to_string(),
                case.duration_ms.to_string(),
                case.message.clone().unwrap_or_default(),
                case.report_location
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Export format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TestSpec, TestType};
    use std::time::Duration;
    use tempfile::tempdir;

    fn spec(name: &str) -> TestSpec {
        TestSpec::with_type(name, "group", Some(TestType::Gui))
    }

    #[test]
    fn test_generate_run_id() {
        assert!(!generate_run_id().is_empty());
    }

    #[test]
    fn test_report_grows_monotonically() {
        let dir = tempdir().unwrap();
        let store = ReportStore::begin(dir.path().join("report.json")).unwrap();
        let mut suite = SuiteResult::new("local");

        for (k, name) in ["a", "b", "c"].iter().enumerate() {
            let result = TestRunResult::passed(&spec(name), Duration::from_millis(10));
            let index = suite.record(result);
            store.record(&suite, index).unwrap();

            let report = load_from_path(store.path()).unwrap();
            let stored = report.suite("local").unwrap();
            assert_eq!(stored.cases.len(), k + 1);
            assert_eq!(stored.tests, k + 1);
            assert_eq!(stored.cases[k].name, *name);
        }
        assert!(!tmp_path(store.path()).exists());
    }

    #[test]
    fn test_record_replaces_case_at_same_position() {
        let dir = tempdir().unwrap();
        let store = ReportStore::begin(dir.path().join("nested/report.json")).unwrap();
        let mut suite = SuiteResult::new("local");

        let index = suite.track(TestRunResult::tracking("a", TestState::Failed));
        store.record(&suite, index).unwrap();
        suite.results[index].observe(TestState::Passed);
        store.record(&suite, index).unwrap();

        let report = store.load().unwrap();
        assert_eq!(report.total_cases(), 1);
        assert_eq!(report.suites[0].cases[0].state, TestState::Passed);
    }

    #[test]
    fn test_same_test_twice_keeps_both_cases() {
        let dir = tempdir().unwrap();
        let store = ReportStore::begin(dir.path().join("report.json")).unwrap();
        let mut suite = SuiteResult::new("local");

        let first = suite.record(TestRunResult::passed(&spec("peak.lrs"), Duration::ZERO));
        store.record(&suite, first).unwrap();
        let second = suite.record(TestRunResult::failed(&spec("peak.lrs"), Duration::ZERO, "slow"));
        store.record(&suite, second).unwrap();

        let report = store.load().unwrap();
        let stored = report.suite("local").unwrap();
        assert_eq!(stored.tests, 2);
        let states: Vec<_> = stored.cases.iter().map(|c| c.state).collect();
        assert_eq!(states, vec![TestState::Passed, TestState::Failed]);
        assert_eq!(stored.cases[1].position, 1);
    }

    #[test]
    fn test_record_unknown_index_fails() {
        let dir = tempdir().unwrap();
        let store = ReportStore::begin(dir.path().join("report.json")).unwrap();
        assert!(store.record(&SuiteResult::new("s"), 3).is_err());
    }

    #[test]
    fn test_begin_resets_previous_report() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.json");
        let store = ReportStore::begin(&path).unwrap();
        let mut suite = SuiteResult::new("s");
        let index = suite.record(TestRunResult::passed(&spec("a"), Duration::ZERO));
        store.record(&suite, index).unwrap();

        let store = ReportStore::begin(&path).unwrap();
        assert_eq!(store.load().unwrap().total_cases(), 0);
    }

    #[test]
    fn test_finalized_suite_and_status() {
        let dir = tempdir().unwrap();
        let store = ReportStore::begin(dir.path().join("report.json")).unwrap();
        let mut suite = SuiteResult::new("s");
        suite.record(TestRunResult::cancelled(&spec("a")));
        suite.finalize(Duration::from_millis(42));

        store.record_suite(&suite).unwrap();
        store.record_status(ExitStatus::Aborted).unwrap();

        let report = store.load().unwrap();
        let stored = report.suite("s").unwrap();
        assert!(stored.finalized);
        assert_eq!(stored.runtime_ms, 42);
        assert_eq!(stored.skipped, 1);
        assert_eq!(stored.cases[0].message.as_deref(), Some("cancelled"));
        assert_eq!(report.status, Some(ExitStatus::Aborted));
    }

    #[test]
    fn test_csv_export() {
        let dir = tempdir().unwrap();
        let mut report = StoredReport::new();
        let mut suite = SuiteResult::new("s");
        let index = suite.record(TestRunResult::error(&spec("a"), "bad, very bad"));
        report.suite_mut("s").upsert(index, &suite.results[index]);

        let path = dir.path().join("out.csv");
        ReportStore::export(&report, &path, ExportFormat::Csv).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("suite,class_name,name,state"));
        assert!(content.contains("\"bad, very bad\""));
    }

    #[test]
    fn test_export_format() {
        assert_eq!(ExportFormat::from_str("JSON"), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::from_str("csv"), Some(ExportFormat::Csv));
        assert!(ExportFormat::from_str("xml").is_none());
    }
}
