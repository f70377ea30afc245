//! Remote test-management backend
//!
//! A backend resolves collections of test instances on a test-management
//! server, starts them and reports their status while they run.

mod client;
mod collection;

pub use client::HttpBackend;
pub use collection::{run_link, CollectionPath, RemoteFilter, RunMode};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::models::TestParameter;

/// Sign-in details for the remote server
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub api_key: Option<String>,
    pub domain: String,
    pub project: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, domain: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            domain: domain.into(),
            project: project.into(),
            ..Default::default()
        }
    }

    pub fn uses_api_key(&self) -> bool {
        self.client_id.is_some() && self.api_key.is_some()
    }
}

/// A collection resolved on the server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionHandle {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub folder: String,
}

/// One test instance in a collection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub test_name: String,
    #[serde(default)]
    pub last_status: String,
    #[serde(default)]
    pub test_type: Option<String>,
}

/// A started execution of a collection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub id: String,
}

/// Raw status of one test instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub test_id: String,
    pub status: String,
    #[serde(default)]
    pub message: String,
}

impl StatusEntry {
    pub fn new(test_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            status: status.into(),
            message: String::new(),
        }
    }
}

/// One refresh of an execution
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub finished: bool,
    pub entries: Vec<StatusEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStep {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub description: String,
}

/// Details of the last run of a test instance
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDetails {
    pub run_id: Option<i64>,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub steps: Vec<RunStep>,
    #[serde(default)]
    pub log: Option<String>,
}

impl RunDetails {
    /// Descriptions of failed steps, one per line
    pub fn failed_steps(&self) -> String {
        self.steps
            .iter()
            .filter(|step| step.status.eq_ignore_ascii_case("Failed"))
            .map(|step| format!("{}: {}", step.name, step.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Server that owns and runs collections of tests
pub trait RemoteBackend: Send + Sync {
    /// Returns false when the server rejects the sign-in
    fn connect(
        &mut self,
        server: &str,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<bool>> + Send;

    fn resolve_collection(
        &self,
        path: &CollectionPath,
    ) -> impl Future<Output = Result<Option<CollectionHandle>>> + Send;

    fn list_tests(
        &self,
        collection: &CollectionHandle,
    ) -> impl Future<Output = Result<Vec<RemoteTest>>> + Send;

    fn start(
        &self,
        collection: &CollectionHandle,
        tests: &[RemoteTest],
        mode: &RunMode,
        parameters: &[TestParameter],
    ) -> impl Future<Output = Result<ExecutionHandle>> + Send;

    fn refresh_status(
        &self,
        execution: &ExecutionHandle,
    ) -> impl Future<Output = Result<StatusReport>> + Send;

    fn run_details(&self, test_id: &str) -> impl Future<Output = Result<RunDetails>> + Send;

    fn stop(&self, execution: &ExecutionHandle) -> impl Future<Output = Result<()>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_steps() {
        let details = RunDetails {
            run_id: Some(3),
            steps: vec![
                RunStep {
                    name: "Open".into(),
                    status: "Passed".into(),
                    description: String::new(),
                },
                RunStep {
                    name: "Login".into(),
                    status: "failed".into(),
                    description: "button missing".into(),
                },
            ],
            ..Default::default()
        };
        assert_eq!(details.failed_steps(), "Login: button missing");
        assert_eq!(RunDetails::default().failed_steps(), "");
    }

    #[test]
    fn test_credentials() {
        let mut credentials = Credentials::new("qa", "DEFAULT", "Shop");
        assert!(!credentials.uses_api_key());
        credentials.client_id = Some("id".into());
        credentials.api_key = Some("key".into());
        assert!(credentials.uses_api_key());
    }

    #[test]
    fn test_status_report_from_json() {
        let report: StatusReport = serde_json::from_str(
            r#"{"finished": false, "entries": [{"test_id": "7", "status": "Running"}]}"#,
        )
        .unwrap();
        assert_eq!(report.entries, vec![StatusEntry::new("7", "Running")]);
    }
}
