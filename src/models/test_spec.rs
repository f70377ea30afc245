//! Test specification models
//!
//! Defines what a single test to execute looks like once the catalog has
//! been built.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Supported test technologies
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    /// GUI automation test
    Gui,
    /// API / service test
    Api,
    /// Load scenario
    Load,
    /// GUI test fanned out over several environments
    Parallel,
}

impl TestType {
    pub fn name(&self) -> &'static str {
        match self {
            TestType::Gui => "GUI",
            TestType::Api => "API",
            TestType::Load => "Load",
            TestType::Parallel => "Parallel",
        }
    }

    pub fn all() -> [TestType; 4] {
        [TestType::Gui, TestType::Api, TestType::Load, TestType::Parallel]
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gui" => Some(TestType::Gui),
            "api" => Some(TestType::Api),
            "load" => Some(TestType::Load),
            "parallel" => Some(TestType::Parallel),
            _ => None,
        }
    }

    /// Detect the test type of a path on disk.
    ///
    /// A `.lrs` file is a load scenario. A directory is an API test when it
    /// holds a `*.st` file and a GUI test when it holds a `*.tsp` or `*.usr`
    /// file.
    pub fn detect(path: &Path) -> Option<TestType> {
        if path.is_file() {
            return has_extension(path, "lrs").then_some(TestType::Load);
        }

        let entries = std::fs::read_dir(path).ok()?;
        let mut found = None;
        for entry in entries.flatten() {
            let file = entry.path();
            if !file.is_file() {
                continue;
            }
            if has_extension(&file, "st") {
                return Some(TestType::Api);
            }
            if has_extension(&file, "tsp") || has_extension(&file, "usr") {
                found = Some(TestType::Gui);
            }
        }
        found
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// Identity of a test
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestId {
    /// Test on the local file system
    Path(PathBuf),
    /// Collection held by a remote test-management server
    Remote(String),
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestId::Path(path) => write!(f, "{}", path.display()),
            TestId::Remote(path) => write!(f, "remote:{path}"),
        }
    }
}

/// Named test parameter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestParameter {
    pub name: String,
    pub value: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl TestParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind: None,
        }
    }
}

/// One test to execute
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpec {
    pub id: TestId,
    pub name: String,
    pub group: String,
    pub test_type: Option<TestType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<TestParameter>,
    /// Base directory the executor writes this test's report under
    pub report_dir: Option<PathBuf>,
}

impl TestSpec {
    /// Spec for a test on disk; the type is detected from its contents
    pub fn local(path: impl Into<PathBuf>, group: impl AsRef<str>) -> Self {
        let path = path.into();
        let test_type = TestType::detect(&path);
        Self::with_type(path, group, test_type)
    }

    pub fn with_type(
        path: impl Into<PathBuf>,
        group: impl AsRef<str>,
        test_type: Option<TestType>,
    ) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            id: TestId::Path(path),
            group: normalize_group(group.as_ref()),
            test_type,
            parameters: Vec::new(),
            report_dir: None,
        }
    }

    /// Spec for a remote collection
    pub fn remote(collection: impl Into<String>) -> Self {
        let collection = collection.into();
        let group = collection
            .rsplit_once('\\')
            .map(|(folder, _)| folder.to_string())
            .unwrap_or_default();
        Self {
            name: collection.clone(),
            id: TestId::Remote(collection),
            group: normalize_group(&group),
            test_type: None,
            parameters: Vec::new(),
            report_dir: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<TestParameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = Some(dir.into());
        self
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.id {
            TestId::Path(path) => Some(path),
            TestId::Remote(_) => None,
        }
    }

    /// Remote collection path, for specs that name one
    pub fn collection(&self) -> Option<&str> {
        match &self.id {
            TestId::Remote(collection) => Some(collection),
            TestId::Path(_) => None,
        }
    }
}

impl fmt::Display for TestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.test_type {
            Some(test_type) => write!(f, "[{test_type}] {}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Group labels end up as class names in downstream reports, where dots act
/// as package separators.
pub fn normalize_group(group: &str) -> String {
    group.trim_end_matches(['\\', '/']).replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_group() {
        assert_eq!(normalize_group("C:\\tests\\v1.2\\"), "C:\\tests\\v1_2");
        assert_eq!(normalize_group("suite/"), "suite");
    }

    #[test]
    fn test_detect_types() {
        let dir = tempdir().unwrap();

        let gui = dir.path().join("gui");
        std::fs::create_dir(&gui).unwrap();
        std::fs::write(gui.join("Test.tsp"), "").unwrap();

        let api = dir.path().join("api");
        std::fs::create_dir(&api).unwrap();
        std::fs::write(api.join("Service.st"), "").unwrap();

        let scenario = dir.path().join("peak.lrs");
        std::fs::write(&scenario, "").unwrap();

        let empty = dir.path().join("empty");
        std::fs::create_dir(&empty).unwrap();

        assert_eq!(TestType::detect(&gui), Some(TestType::Gui));
        assert_eq!(TestType::detect(&api), Some(TestType::Api));
        assert_eq!(TestType::detect(&scenario), Some(TestType::Load));
        assert_eq!(TestType::detect(&empty), None);
    }

    #[test]
    fn test_remote_spec_group() {
        let spec = TestSpec::remote("Release.1\\Smoke\\Nightly");
        assert_eq!(spec.group, "Release_1\\Smoke");
        assert!(matches!(spec.id, TestId::Remote(_)));
        assert!(spec.path().is_none());
    }

    #[test]
    fn test_type_from_str() {
        assert_eq!(TestType::from_str("GUI"), Some(TestType::Gui));
        assert_eq!(TestType::from_str("parallel"), Some(TestType::Parallel));
        assert_eq!(TestType::from_str("unit"), None);
    }
}
