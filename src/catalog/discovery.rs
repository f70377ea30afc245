//! Directory discovery
//!
//! Walks a directory tree and collects every leaf test location.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::{has_extension, TestType};

/// Find test locations below `root`, in name order.
///
/// A directory that is itself a test is returned as-is and not descended
/// into. Load scenario files are picked up wherever they appear.
pub fn discover(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    visit(root, &mut found)?;
    debug!("Discovered {} tests under {}", found.len(), root.display());
    Ok(found)
}

fn visit(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    if matches!(TestType::detect(dir), Some(TestType::Api | TestType::Gui)) {
        found.push(dir.to_path_buf());
        return Ok(());
    }

    let mut children: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    children.sort();

    for child in children {
        if child.is_dir() {
            visit(&child, found)?;
        } else if has_extension(&child, "lrs") {
            found.push(child);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_test(dir: &Path, marker: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(marker), "").unwrap();
    }

    #[test]
    fn test_discover_in_name_order() {
        let root = tempdir().unwrap();
        make_test(&root.path().join("b_suite/Checkout"), "Test.tsp");
        make_test(&root.path().join("a_suite/Login"), "Test.tsp");
        make_test(&root.path().join("a_suite/Service"), "Service.st");
        std::fs::write(root.path().join("a_suite/peak.lrs"), "").unwrap();
        std::fs::create_dir_all(root.path().join("c_empty")).unwrap();

        let found = discover(root.path()).unwrap();
        let rel: Vec<_> = found
            .iter()
            .map(|p| p.strip_prefix(root.path()).unwrap().to_path_buf())
            .collect();

        assert_eq!(
            rel,
            vec![
                PathBuf::from("a_suite/Login"),
                PathBuf::from("a_suite/Service"),
                PathBuf::from("a_suite/peak.lrs"),
                PathBuf::from("b_suite/Checkout"),
            ]
        );
    }

    #[test]
    fn test_root_is_test() {
        let root = tempdir().unwrap();
        make_test(root.path(), "Test.usr");
        make_test(&root.path().join("nested"), "Test.tsp");

        let found = discover(root.path()).unwrap();
        assert_eq!(found, vec![root.path().to_path_buf()]);
    }
}
