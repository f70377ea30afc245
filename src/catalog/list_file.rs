//! Test list files
//!
//! Parses files that enumerate tests by path: `.mtb` INI files, plain
//! `.txt`/`.lst` lists, and `.yaml`/`.yml`/`.json` documents that can also
//! carry parameters.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::{has_extension, TestParameter};

/// List file errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Missing [Files] section in {0}")]
    MissingSection(PathBuf),

    #[error("Invalid NumberOfFiles value in {0}")]
    InvalidCount(PathBuf),

    #[error("Missing File{index} entry in {path}")]
    MissingEntry { path: PathBuf, index: usize },

    #[error("Invalid test list {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Unsupported test list format: {0}")]
    Unsupported(PathBuf),
}

/// One listed test
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub path: PathBuf,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parameters: Vec<TestParameter>,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl ListEntry {
    fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            name: None,
            parameters: Vec::new(),
            report_path: None,
        }
    }
}

#[derive(Deserialize)]
struct ListDocument {
    tests: Vec<ListEntry>,
}

/// Extensions recognized as test lists
pub const LIST_EXTENSIONS: &[&str] = &["mtb", "txt", "lst", "yaml", "yml", "json"];

pub fn is_list_file(path: &Path) -> bool {
    LIST_EXTENSIONS.iter().any(|ext| has_extension(path, ext))
}

/// Parse a list file, preserving entry order. Relative paths resolve against
/// the list file's directory.
pub fn parse(path: &Path) -> Result<Vec<ListEntry>, CatalogError> {
    let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut entries = if has_extension(path, "mtb") {
        parse_mtb(path, &content)?
    } else if has_extension(path, "txt") || has_extension(path, "lst") {
        parse_lines(&content)
    } else if has_extension(path, "yaml") || has_extension(path, "yml") {
        serde_yaml::from_str::<ListDocument>(&content)
            .map_err(|e| malformed(path, e))?
            .tests
    } else if has_extension(path, "json") {
        serde_json::from_str::<ListDocument>(&content)
            .map_err(|e| malformed(path, e))?
            .tests
    } else {
        return Err(CatalogError::Unsupported(path.to_path_buf()));
    };

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    for entry in &mut entries {
        entry.path = resolve(base, &entry.path);
        if let Some(report) = entry.report_path.take() {
            entry.report_path = Some(resolve(base, &report));
        }
    }

    Ok(entries)
}

fn malformed(path: &Path, err: impl std::fmt::Display) -> CatalogError {
    CatalogError::Malformed {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn parse_lines(content: &str) -> Vec<ListEntry> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ListEntry::at)
        .collect()
}

/// `[Files]` section with `NumberOfFiles=N` and `File1..FileN` keys
fn parse_mtb(path: &Path, content: &str) -> Result<Vec<ListEntry>, CatalogError> {
    let mut in_files = false;
    let mut seen_section = false;
    let mut values = std::collections::HashMap::new();

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            in_files = line[1..line.len() - 1].trim().eq_ignore_ascii_case("files");
            seen_section |= in_files;
            continue;
        }
        if !in_files {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            values.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    if !seen_section {
        return Err(CatalogError::MissingSection(path.to_path_buf()));
    }

    let count: usize = values
        .get("numberoffiles")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| CatalogError::InvalidCount(path.to_path_buf()))?;

    (1..=count)
        .map(|index| {
            values
                .get(&format!("file{index}"))
                .filter(|v| !v.is_empty())
                .map(ListEntry::at)
                .ok_or_else(|| CatalogError::MissingEntry {
                    path: path.to_path_buf(),
                    index,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_mtb() {
        let dir = tempdir().unwrap();
        let list = dir.path().join("nightly.mtb");
        std::fs::write(
            &list,
            "[Files]\nNumberOfFiles=2\nFile1=/abs/Login\nFile2=rel\\Checkout\n",
        )
        .unwrap();

        let entries = parse(&list).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, PathBuf::from("/abs/Login"));
        assert_eq!(entries[1].path, dir.path().join("rel\\Checkout"));
    }

    #[test]
    fn test_parse_mtb_missing_entry() {
        let dir = tempdir().unwrap();
        let list = dir.path().join("broken.mtb");
        std::fs::write(&list, "[Files]\nNumberOfFiles=2\nFile1=a\n").unwrap();

        let err = parse(&list).unwrap_err();
        assert!(matches!(err, CatalogError::MissingEntry { index: 2, .. }));
    }

    #[test]
    fn test_parse_mtb_without_section() {
        let dir = tempdir().unwrap();
        let list = dir.path().join("empty.mtb");
        std::fs::write(&list, "NumberOfFiles=1\nFile1=a\n").unwrap();
        assert!(matches!(parse(&list), Err(CatalogError::MissingSection(_))));
    }

    #[test]
    fn test_parse_plain_list() {
        let dir = tempdir().unwrap();
        let list = dir.path().join("tests.txt");
        std::fs::write(&list, "# smoke\nb\n\n  a  \n").unwrap();

        let entries = parse(&list).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.clone()).collect();
        assert_eq!(paths, vec![dir.path().join("b"), dir.path().join("a")]);
    }

    #[test]
    fn test_parse_yaml_with_parameters() {
        let dir = tempdir().unwrap();
        let list = dir.path().join("tests.yaml");
        std::fs::write(
            &list,
            r#"
tests:
  - path: login
    name: Login
    parameters:
      - name: user
        value: admin
        type: string
    report_path: out
  - path: /abs/checkout
"#,
        )
        .unwrap();

        let entries = parse(&list).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name.as_deref(), Some("Login"));
        assert_eq!(entries[0].parameters[0].kind.as_deref(), Some("string"));
        assert_eq!(entries[0].report_path, Some(dir.path().join("out")));
        assert_eq!(entries[1].path, PathBuf::from("/abs/checkout"));
    }

    #[test]
    fn test_parse_json() {
        let dir = tempdir().unwrap();
        let list = dir.path().join("tests.json");
        std::fs::write(&list, r#"{"tests":[{"path":"a"},{"path":"b"}]}"#).unwrap();
        assert_eq!(parse(&list).unwrap().len(), 2);

        std::fs::write(&list, r#"{"tests": 3}"#).unwrap();
        assert!(matches!(parse(&list), Err(CatalogError::Malformed { .. })));
    }
}
