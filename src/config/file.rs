//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{CommandConfig, LauncherConfig, ParallelConfig};

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./test-launcher.yaml",
    "./test-launcher.yml",
    "./.test-launcher.yaml",
    "~/.config/test-launcher/config.yaml",
    "~/.test-launcher.yaml",
];

const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

/// Full configuration file structure
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub launcher: LauncherConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            launcher: LauncherConfig::default(),
        }
    }
}

impl ConfigFile {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load from `path`, or from the first standard location, or defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::find() {
                Some(path) => Self::load(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }
        self.launcher.validate()
    }

    /// Generate example configuration
    pub fn example() -> Self {
        let mut launcher = LauncherConfig {
            timeout_secs: Some(3600),
            cancel_on_failure: true,
            report_dir: Some(PathBuf::from("reports")),
            ..Default::default()
        };
        launcher.executors.gui = Some(
            CommandConfig::new("gui-runner").with_args(["--test", "{test}", "--report", "{report}"]),
        );
        launcher.executors.api =
            Some(CommandConfig::new("api-runner").with_args(["{test}", "{report}"]));
        launcher.executors.load = Some(
            CommandConfig::new("load-runner").with_args(["-scenario", "{test}", "-out", "{report}"]),
        );
        launcher.executors.test_timeout_secs = Some(900);
        launcher.executors.parallel = ParallelConfig {
            environments: vec!["chrome".to_string(), "firefox".to_string()],
            max_concurrent: 2,
        };
        launcher.remote.server = Some("https://alm.example.com/qcbin".to_string());
        launcher.remote.user = Some("qa-bot".to_string());
        launcher.remote.project = "Shop".to_string();

        Self {
            version: default_version(),
            launcher,
        }
    }

    /// JSON schema of the configuration file
    pub fn schema() -> Result<String> {
        let schema = schemars::schema_for!(LauncherConfig);
        serde_json::to_string_pretty(&schema).context("Failed to serialize config schema")
    }
}

/// Expand ~ to home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_file_default() {
        let config = ConfigFile::default();
        assert_eq!(config.version, "1.0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_is_valid() {
        let config = ConfigFile::example();
        assert!(config.validate().is_ok());
        assert!(config.launcher.executors.parallel.is_enabled());
    }

    #[test]
    fn test_config_file_save_load() {
        let dir = tempdir().unwrap();
        for name in ["config.yaml", "config.json"] {
            let path = dir.path().join(name);
            let config = ConfigFile::example();
            config.save(&path).unwrap();

            let loaded = ConfigFile::load(&path).unwrap();
            assert_eq!(loaded.launcher.timeout_secs, Some(3600));
            assert_eq!(loaded.launcher.executors.gui, config.launcher.executors.gui);
        }
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "launcher:\n  cancel_on_failure: true\n  remote:\n    project: Shop\n",
        )
        .unwrap();

        let config = ConfigFile::load(&path).unwrap();
        assert_eq!(config.version, "1.0");
        assert!(config.launcher.cancel_on_failure);
        assert_eq!(config.launcher.poll_interval_ms, 200);
        assert_eq!(config.launcher.remote.domain, "DEFAULT");
    }

    #[test]
    fn test_rejects_unknown_version() {
        let config = ConfigFile {
            version: "9.9".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_password_is_never_saved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = ConfigFile::example();
        config.launcher.remote.password = Some("hunter2".to_string());
        config.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("hunter2"));
    }

    #[test]
    fn test_schema_lists_fields() {
        let schema = ConfigFile::schema().unwrap();
        assert!(schema.contains("cancel_on_failure"));
        assert!(schema.contains("poll_interval_ms"));
    }

    #[test]
    fn test_expand_path() {
        let path = expand_path("./test.yaml");
        assert_eq!(path, PathBuf::from("./test.yaml"));
    }
}
