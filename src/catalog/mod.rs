//! Test catalog
//!
//! Turns heterogeneous sources (directories, list files, load scenarios and
//! remote collection names) into one ordered list of test specifications.

mod discovery;
mod list_file;

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::models::{has_extension, normalize_group, TestSpec, TestType};
use crate::remote::CollectionPath;

/// Group label given to a source that yields a single test
pub const SINGLE_TEST_GROUP: &str = "Test group";

/// Where tests come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    /// Directory, list file or scenario file on disk
    Path(PathBuf),
    /// Named collection on the remote test-management server
    Remote(String),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Path(path) => write!(f, "{}", path.display()),
            Source::Remote(name) => write!(f, "{name}"),
        }
    }
}

/// Ordered list of tests to run
#[derive(Clone, Debug, Default)]
pub struct TestCatalog {
    specs: Vec<TestSpec>,
}

impl TestCatalog {
    /// Build the catalog from `sources` in order.
    ///
    /// Sources that fail to parse or resolve to no tests are dropped with a
    /// warning. When `report_base` is set, specs without their own report
    /// directory inherit it.
    pub fn build(sources: &[Source], report_base: Option<&Path>) -> Self {
        let mut specs = Vec::new();

        for source in sources {
            let mut group = match expand(source) {
                Ok(group) => group,
                Err(e) => {
                    warn!("Dropping source {}: {:#}", source, e);
                    continue;
                }
            };

            match group.len() {
                0 => warn!("Dropping source {}: no tests found", source),
                1 => {
                    group[0].group = SINGLE_TEST_GROUP.to_string();
                    specs.append(&mut group);
                }
                n => {
                    debug!("Source {} expanded to {} tests", source, n);
                    specs.append(&mut group);
                }
            }
        }

        if let Some(base) = report_base {
            info!("Results base directory (for all tests) is: {}", base.display());
            for spec in specs.iter_mut().filter(|s| s.report_dir.is_none()) {
                spec.report_dir = Some(base.to_path_buf());
            }
        }

        Self { specs }
    }

    pub fn specs(&self) -> &[TestSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn has_load_tests(&self) -> bool {
        self.specs
            .iter()
            .any(|s| s.test_type == Some(TestType::Load))
    }
}

/// Expand one source into its specs
fn expand(source: &Source) -> Result<Vec<TestSpec>> {
    let path = match source {
        Source::Remote(raw) => {
            CollectionPath::parse(raw)?;
            return Ok(vec![TestSpec::remote(raw.trim())]);
        }
        Source::Path(path) => path,
    };

    let group = normalize_group(&path.display().to_string());

    if path.is_dir() {
        let specs = discovery::discover(path)?
            .into_iter()
            .map(|location| TestSpec::local(location, &group))
            .collect();
        return Ok(specs);
    }

    if !path.exists() {
        anyhow::bail!("path does not exist");
    }

    if has_extension(path, "lrs") {
        return Ok(vec![TestSpec::with_type(
            path.clone(),
            &group,
            Some(TestType::Load),
        )]);
    }

    if list_file::is_list_file(path) {
        let entries = list_file::parse(path)
            .with_context(|| format!("Failed to parse test list: {}", path.display()))?;
        let specs = entries
            .into_iter()
            .map(|entry| {
                let mut spec = TestSpec::local(entry.path, &group).with_parameters(entry.parameters);
                if let Some(name) = entry.name {
                    spec.name = name;
                }
                if let Some(report) = entry.report_path {
                    spec = spec.with_report_dir(report);
                }
                spec
            })
            .collect();
        return Ok(specs);
    }

    anyhow::bail!("unsupported file type")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_test(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("Test.tsp"), "").unwrap();
    }

    #[test]
    fn test_build_preserves_source_order() {
        let root = tempdir().unwrap();
        let suite = root.path().join("suite.v2");
        make_test(&suite.join("A"));
        make_test(&suite.join("B"));
        let single = root.path().join("single");
        make_test(&single);

        let catalog = TestCatalog::build(
            &[Source::Path(single.clone()), Source::Path(suite.clone())],
            None,
        );

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.specs()[0].path(), Some(single.as_path()));
        assert_eq!(catalog.specs()[0].group, SINGLE_TEST_GROUP);
        assert_eq!(catalog.specs()[1].path(), Some(suite.join("A").as_path()));
        assert_eq!(catalog.specs()[1].test_type, Some(TestType::Gui));
        assert!(!catalog.specs()[1].group.contains('.'));
    }

    #[test]
    fn test_empty_and_missing_sources_are_dropped() {
        let root = tempdir().unwrap();
        let empty = root.path().join("empty");
        std::fs::create_dir(&empty).unwrap();

        let catalog = TestCatalog::build(
            &[
                Source::Path(empty),
                Source::Path(root.path().join("missing")),
                Source::Path(root.path().join("notes.doc")),
            ],
            None,
        );
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_report_base_inherited() {
        let root = tempdir().unwrap();
        let scenario = root.path().join("peak.lrs");
        std::fs::write(&scenario, "").unwrap();
        let list = root.path().join("tests.yaml");
        std::fs::write(
            &list,
            "tests:\n  - path: peak.lrs\n    report_path: custom\n  - path: peak.lrs\n",
        )
        .unwrap();

        let base = root.path().join("reports");
        let catalog = TestCatalog::build(
            &[Source::Path(scenario), Source::Path(list)],
            Some(&base),
        );

        assert_eq!(catalog.len(), 3);
        assert!(catalog.has_load_tests());
        assert_eq!(catalog.specs()[0].report_dir.as_deref(), Some(base.as_path()));
        assert_eq!(
            catalog.specs()[1].report_dir.as_deref(),
            Some(root.path().join("custom").as_path())
        );
        assert_eq!(catalog.specs()[2].report_dir.as_deref(), Some(base.as_path()));
    }

    #[test]
    fn test_remote_sources() {
        let catalog = TestCatalog::build(
            &[
                Source::Remote("Root\\Smoke".into()),
                Source::Remote("  ".into()),
                Source::Remote("Root\\Nightly \"user\":".into()),
                Source::Remote("Root\\Regression \"env\":\"qa\"".into()),
            ],
            None,
        );
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.specs()[0].collection(), Some("Root\\Smoke"));
        assert_eq!(
            catalog.specs()[1].collection(),
            Some("Root\\Regression \"env\":\"qa\"")
        );
        assert!(catalog.specs()[0].path().is_none());
        assert_eq!(catalog.specs()[0].group, SINGLE_TEST_GROUP);
    }
}
