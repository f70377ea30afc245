//! Results storage and reporting module
//!
//! Provides the incremental JSON report and its text, markdown and CSV
//! renderings.

mod report;
mod storage;

pub use report::{ReportFormat, ReportGenerator};
pub use storage::{load_from_path, write_csv, ExportFormat, ReportStore};
