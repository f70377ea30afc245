//! Remote collection addressing
//!
//! Parses collection paths with their inline parameters, filters the test
//! instances of a collection and builds links to individual runs.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::RemoteTest;
use crate::models::TestParameter;

/// `folder\sub\Set "name":"value", ...`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionPath {
    pub folder: String,
    pub name: String,
    pub parameters: Vec<TestParameter>,
}

impl CollectionPath {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (path, params) = match raw.find('"') {
            Some(quote) => (&raw[..quote], Some(&raw[quote..])),
            None => (raw, None),
        };

        let path = path.trim().trim_matches('\\').trim();
        if path.is_empty() {
            anyhow::bail!("Empty collection path");
        }

        let (folder, name) = match path.rsplit_once('\\') {
            Some((folder, name)) => (folder.trim_matches('\\'), name.trim()),
            None => ("", path),
        };

        let parameters = match params {
            Some(params) => parse_parameters(params)?,
            None => Vec::new(),
        };

        Ok(Self {
            folder: folder.to_string(),
            name: name.to_string(),
            parameters,
        })
    }

    /// Group label of tests in this collection
    pub fn group(&self) -> String {
        self.to_string().replace('.', "_")
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.folder.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}\\{}", self.folder, self.name)
        }
    }
}

/// Parse `"name":"value", "other":"value"`
fn parse_parameters(raw: &str) -> Result<Vec<TestParameter>> {
    let mut parameters = Vec::new();
    for pair in split_outside_quotes(raw, ',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let parts = split_outside_quotes(pair, ':');
        let [name, value] = parts.as_slice() else {
            anyhow::bail!("Invalid collection parameter: {pair}");
        };
        let name = unquote(name);
        if name.is_empty() {
            anyhow::bail!("Missing parameter name in: {pair}");
        }
        let value = unquote(value);
        if value.is_empty() {
            anyhow::bail!("Missing value for parameter {name}");
        }
        parameters.push(TestParameter::new(name, value));
    }
    Ok(parameters)
}

fn split_outside_quotes(s: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c == separator && !in_quotes => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

/// Selection of test instances within a collection
#[derive(Clone, Debug, Default)]
pub struct RemoteFilter {
    /// Case-insensitive substring of the instance or test name
    pub name: Option<String>,
    /// Last statuses to keep
    pub statuses: Vec<String>,
}

impl RemoteFilter {
    pub fn new(name: Option<String>, statuses: Vec<String>) -> Self {
        Self {
            name: name.filter(|n| !n.trim().is_empty()),
            statuses,
        }
    }

    pub fn is_active(&self) -> bool {
        self.name.is_some() || !self.statuses.is_empty()
    }

    /// With both criteria set a test is kept when either matches
    pub fn keeps(&self, test: &RemoteTest) -> bool {
        let by_name = self.name.as_ref().map(|name| {
            let needle = name.to_lowercase();
            test.name.to_lowercase().contains(&needle)
                || test.test_name.to_lowercase().contains(&needle)
        });
        let by_status = (!self.statuses.is_empty())
            .then(|| self.statuses.iter().any(|s| s.eq_ignore_ascii_case(&test.last_status)));

        match (by_name, by_status) {
            (None, None) => true,
            (Some(name), None) => name,
            (None, Some(status)) => status,
            (Some(name), Some(status)) => name || status,
        }
    }

    pub fn apply(&self, tests: Vec<RemoteTest>) -> Vec<RemoteTest> {
        if !self.is_active() {
            return tests;
        }
        tests.into_iter().filter(|t| self.keeps(t)).collect()
    }
}

/// Where remote tests execute
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "host")]
pub enum RunMode {
    /// On the machine running the launcher
    Local,
    /// On the named host
    Remote(String),
    /// On the hosts planned in the collection
    PlannedHost,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Local => write!(f, "local"),
            RunMode::Remote(host) => write!(f, "remote ({host})"),
            RunMode::PlannedHost => write!(f, "planned host"),
        }
    }
}

/// Link to a run in the test-management client
pub fn run_link(server: &str, domain: &str, project: &str, run_id: i64) -> String {
    let server = server.trim();
    let lower = server.to_lowercase();
    let (scheme, host) = if lower.starts_with("https://") {
        ("tds", &server["https://".len()..])
    } else if lower.starts_with("http://") {
        ("td", &server["http://".len()..])
    } else {
        ("td", server)
    };
    format!(
        "{scheme}://{project}.{domain}.{host}/TestRunsModule-00000000090859589?EntityType=IRun&EntityID={run_id}"
    )
}
