//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration. Secrets are
//! only ever read from here.

use std::env;
use std::path::PathBuf;

use super::LauncherConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "TEST_LAUNCHER";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Run timeout from TEST_LAUNCHER_TIMEOUT
    pub timeout: Option<u64>,
    /// Config file from TEST_LAUNCHER_CONFIG
    pub config_file: Option<String>,
    /// Report directory from TEST_LAUNCHER_REPORT_DIR
    pub report_dir: Option<String>,
    /// Sentinel directory from TEST_LAUNCHER_SENTINEL_DIR
    pub sentinel_dir: Option<String>,
    /// Cancel on failure from TEST_LAUNCHER_CANCEL_ON_FAILURE
    pub cancel_on_failure: Option<bool>,
    /// Server from TEST_LAUNCHER_SERVER
    pub server: Option<String>,
    /// User from TEST_LAUNCHER_USER
    pub user: Option<String>,
    /// Password from TEST_LAUNCHER_PASSWORD
    pub password: Option<String>,
    /// Client id from TEST_LAUNCHER_CLIENT_ID
    pub client_id: Option<String>,
    /// API key from TEST_LAUNCHER_API_KEY
    pub api_key: Option<String>,
    /// Domain from TEST_LAUNCHER_DOMAIN
    pub domain: Option<String>,
    /// Project from TEST_LAUNCHER_PROJECT
    pub project: Option<String>,
    /// Skip certificate checks from TEST_LAUNCHER_INSECURE_TLS
    pub insecure_tls: Option<bool>,
    /// Log level from TEST_LAUNCHER_LOG
    pub log: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            timeout: get_env_parse("TIMEOUT"),
            config_file: get_env("CONFIG"),
            report_dir: get_env("REPORT_DIR"),
            sentinel_dir: get_env("SENTINEL_DIR"),
            cancel_on_failure: get_env_bool("CANCEL_ON_FAILURE"),
            server: get_env("SERVER"),
            user: get_env("USER"),
            password: get_env("PASSWORD"),
            client_id: get_env("CLIENT_ID"),
            api_key: get_env("API_KEY"),
            domain: get_env("DOMAIN"),
            project: get_env("PROJECT"),
            insecure_tls: get_env_bool("INSECURE_TLS"),
            log: get_env("LOG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.timeout.is_some()
            || self.config_file.is_some()
            || self.report_dir.is_some()
            || self.sentinel_dir.is_some()
            || self.cancel_on_failure.is_some()
            || self.server.is_some()
            || self.user.is_some()
            || self.password.is_some()
            || self.client_id.is_some()
            || self.api_key.is_some()
            || self.domain.is_some()
            || self.project.is_some()
            || self.insecure_tls.is_some()
            || self.log.is_some()
    }

    /// Override file settings with the values set in the environment
    pub fn apply(&self, config: &mut LauncherConfig) {
        if let Some(timeout) = self.timeout {
            config.timeout_secs = Some(timeout);
        }
        if let Some(dir) = &self.report_dir {
            config.report_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = &self.sentinel_dir {
            config.sentinel_dir = PathBuf::from(dir);
        }
        if let Some(cancel) = self.cancel_on_failure {
            config.cancel_on_failure = cancel;
        }

        let remote = &mut config.remote;
        if let Some(server) = &self.server {
            remote.server = Some(server.clone());
        }
        if let Some(user) = &self.user {
            remote.user = Some(user.clone());
        }
        if let Some(client_id) = &self.client_id {
            remote.client_id = Some(client_id.clone());
        }
        if let Some(domain) = &self.domain {
            remote.domain = domain.clone();
        }
        if let Some(project) = &self.project {
            remote.project = project.clone();
        }
        if let Some(insecure) = self.insecure_tls {
            remote.insecure_tls = insecure;
        }
        remote.password = self.password.clone();
        remote.api_key = self.api_key.clone();
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        if !self.has_any() {
            println!("  (no {ENV_PREFIX}_* variables set)");
            return;
        }
        println!("  {}_TIMEOUT:           {:?}", ENV_PREFIX, self.timeout);
        println!("  {}_CONFIG:            {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_REPORT_DIR:        {:?}", ENV_PREFIX, self.report_dir);
        println!("  {}_SENTINEL_DIR:      {:?}", ENV_PREFIX, self.sentinel_dir);
        println!("  {}_CANCEL_ON_FAILURE: {:?}", ENV_PREFIX, self.cancel_on_failure);
        println!("  {}_SERVER:            {:?}", ENV_PREFIX, self.server);
        println!("  {}_USER:              {:?}", ENV_PREFIX, self.user);
        println!("  {}_PASSWORD:          {}", ENV_PREFIX, masked(&self.password));
        println!("  {}_CLIENT_ID:         {:?}", ENV_PREFIX, self.client_id);
        println!("  {}_API_KEY:           {}", ENV_PREFIX, masked(&self.api_key));
        println!("  {}_DOMAIN:            {:?}", ENV_PREFIX, self.domain);
        println!("  {}_PROJECT:           {:?}", ENV_PREFIX, self.project);
        println!("  {}_INSECURE_TLS:      {:?}", ENV_PREFIX, self.insecure_tls);
        println!("  {}_LOG:               {:?}", ENV_PREFIX, self.log);
    }
}

fn masked(secret: &Option<String>) -> &'static str {
    if secret.is_some() {
        "<set>"
    } else {
        "None"
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Print all TEST_LAUNCHER environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_TIMEOUT            Run timeout in seconds");
    println!("  {ENV_PREFIX}_CONFIG             Path to configuration file");
    println!("  {ENV_PREFIX}_REPORT_DIR         Base directory for per-test reports");
    println!("  {ENV_PREFIX}_SENTINEL_DIR       Directory watched for the stop file");
    println!("  {ENV_PREFIX}_CANCEL_ON_FAILURE  Skip remaining tests after a failure (true/false)");
    println!("  {ENV_PREFIX}_SERVER             Test-management server URL");
    println!("  {ENV_PREFIX}_USER               Server user name");
    println!("  {ENV_PREFIX}_PASSWORD           Server password");
    println!("  {ENV_PREFIX}_CLIENT_ID          API key client id");
    println!("  {ENV_PREFIX}_API_KEY            API key secret");
    println!("  {ENV_PREFIX}_DOMAIN             Server domain");
    println!("  {ENV_PREFIX}_PROJECT            Server project");
    println!("  {ENV_PREFIX}_INSECURE_TLS       Skip server certificate checks (true/false)");
    println!("  {ENV_PREFIX}_LOG                Log level (trace, debug, info, warn, error)");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_SERVER=https://alm.example.com/qcbin");
    println!("  export {ENV_PREFIX}_PASSWORD=...");
    println!("  test-launcher remote \"Root\\Release\\Nightly\"");
}
