//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/pulseboard/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/pulseboard/` (~/.config/pulseboard/)
//! - Data: `$XDG_DATA_HOME/pulseboard/` (~/.local/share/pulseboard/)
//! - State/Logs: `$XDG_STATE_HOME/pulseboard/` (~/.local/state/pulseboard/)
//!
//! Secrets can be kept out of the file: `PULSEBOARD_TODOIST_TOKEN` and
//! `PULSEBOARD_LINEAR_API_KEY` override the file values, and any string written
//! as `"${VAR}"` is read from the environment.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "PULSEBOARD_";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Resolve a `${VAR}` reference; any other value is returned unchanged.
fn resolve_env_ref(value: &str) -> String {
    match value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        Some(var) => std::env::var(var).unwrap_or_default(),
        None => value.to_string(),
    }
}

/// Read `PULSEBOARD_<key>`, ignoring empty values.
fn env_override(key: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .filter(|v| !v.is_empty())
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Fan-out and persistence settings
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Local git repository scanning
    #[serde(default)]
    pub git: GitConfig,

    /// Task tracker (Todoist REST API)
    #[serde(default)]
    pub todoist: TodoistConfig,

    /// Issue tracker (Linear GraphQL API)
    #[serde(default)]
    pub linear: LinearConfig,

    /// Local task board
    #[serde(default)]
    pub kanban: KanbanConfig,

    /// Current weather
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Planning chat gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Circuit breaker thresholds for remote sources
    #[serde(default)]
    pub circuit: CircuitConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// How often the frontend should refresh the dashboard
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Directory with the single-page frontend, served at `/` when set
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            refresh_interval_secs: default_refresh_interval(),
            static_dir: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8889
}

fn default_refresh_interval() -> u64 {
    300
}

/// Aggregation configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AggregatorConfig {
    /// Size of the worker pool shared by all source adapters
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Write snapshots after each dashboard aggregation
    #[serde(default = "default_true")]
    pub persist_snapshots: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            persist_snapshots: true,
        }
    }
}

fn default_max_workers() -> usize {
    4
}

fn default_true() -> bool {
    true
}

/// Git scanning configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    /// Directories whose immediate children are scanned for repositories
    #[serde(default)]
    pub scan_paths: Vec<PathBuf>,

    /// Lookback window for commit counts
    #[serde(default = "default_history_days")]
    pub history_days: u32,

    /// Commit summaries kept per repository
    #[serde(default = "default_max_commits")]
    pub max_commits: usize,

    /// Deadline for a single git invocation
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Concurrent repository scans
    #[serde(default = "default_scan_workers")]
    pub scan_workers: usize,

    /// Deadline for the whole git source
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,

    /// Git executable
    #[serde(default = "default_git_binary")]
    pub git_binary: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            scan_paths: vec![],
            history_days: default_history_days(),
            max_commits: default_max_commits(),
            command_timeout_secs: default_command_timeout(),
            scan_workers: default_scan_workers(),
            timeout_secs: default_git_timeout(),
            git_binary: default_git_binary(),
        }
    }
}

impl GitConfig {
    /// Scan paths with `~` expanded
    pub fn expanded_scan_paths(&self) -> Vec<PathBuf> {
        self.scan_paths.iter().map(|p| expand_home(p)).collect()
    }
}

fn default_history_days() -> u32 {
    7
}

fn default_max_commits() -> usize {
    5
}

fn default_command_timeout() -> u64 {
    5
}

fn default_scan_workers() -> usize {
    4
}

fn default_git_timeout() -> u64 {
    10
}

fn default_git_binary() -> String {
    "git".to_string()
}

/// Todoist configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TodoistConfig {
    /// API token (or `PULSEBOARD_TODOIST_TOKEN`)
    pub token: Option<String>,

    /// Only show tasks from these projects (empty = all)
    #[serde(default)]
    pub projects: Vec<String>,

    #[serde(default = "default_todoist_url")]
    pub base_url: String,

    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
}

impl Default for TodoistConfig {
    fn default() -> Self {
        Self {
            token: None,
            projects: vec![],
            base_url: default_todoist_url(),
            timeout_secs: default_remote_timeout(),
        }
    }
}

impl TodoistConfig {
    /// Check whether a usable token is present
    pub fn is_configured(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

fn default_todoist_url() -> String {
    "https://api.todoist.com/rest/v2".to_string()
}

fn default_remote_timeout() -> u64 {
    10
}

/// Linear configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinearConfig {
    /// API key (or `PULSEBOARD_LINEAR_API_KEY`)
    pub api_key: Option<String>,

    #[serde(default = "default_linear_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_linear_endpoint(),
            timeout_secs: default_remote_timeout(),
        }
    }
}

impl LinearConfig {
    /// Check whether a usable API key is present
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

fn default_linear_endpoint() -> String {
    "https://api.linear.app/graphql".to_string()
}

/// Task board configuration
#[derive(Debug, Deserialize, Clone)]
pub struct KanbanConfig {
    /// Local board API; unset disables the API and uses the local store only
    #[serde(default = "default_kanban_url")]
    pub api_url: Option<String>,

    /// Deadline for the board API before falling back
    #[serde(default = "default_kanban_api_timeout")]
    pub api_timeout_secs: u64,

    /// Read the local store when the board API is unreachable
    #[serde(default = "default_true")]
    pub fallback_to_store: bool,

    /// Deadline for the whole kanban source, fallback included
    #[serde(default = "default_kanban_timeout")]
    pub timeout_secs: u64,
}

impl Default for KanbanConfig {
    fn default() -> Self {
        Self {
            api_url: default_kanban_url(),
            api_timeout_secs: default_kanban_api_timeout(),
            fallback_to_store: true,
            timeout_secs: default_kanban_timeout(),
        }
    }
}

fn default_kanban_url() -> Option<String> {
    Some("http://127.0.0.1:8765/api/kanban/tasks".to_string())
}

fn default_kanban_api_timeout() -> u64 {
    3
}

fn default_kanban_timeout() -> u64 {
    6
}

/// Weather configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WeatherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_location")]
    pub location: String,

    #[serde(default = "default_weather_url")]
    pub base_url: String,

    #[serde(default = "default_weather_timeout")]
    pub timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            location: default_location(),
            base_url: default_weather_url(),
            timeout_secs: default_weather_timeout(),
        }
    }
}

fn default_location() -> String {
    "London".to_string()
}

fn default_weather_url() -> String {
    "https://wttr.in".to_string()
}

fn default_weather_timeout() -> u64 {
    5
}

/// Chat gateway the frontend talks to for planning sessions
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GatewayConfig {
    pub url: Option<String>,
}

/// Circuit breaker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CircuitConfig {
    /// Consecutive failures before a circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before allowing a trial call
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_secs: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_reset_timeout() -> u64 {
    60
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also log to stderr
    #[serde(default)]
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stderr: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Secret-free view of the configuration for clients
#[derive(Debug, Clone, Serialize)]
pub struct ConfigStatus {
    pub todoist: SourceConfigStatus,
    pub linear: SourceConfigStatus,
    pub git: GitConfigStatus,
    pub kanban: KanbanConfigStatus,
    pub weather: SourceConfigStatus,
    pub gateway_url: Option<String>,
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceConfigStatus {
    pub configured: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GitConfigStatus {
    pub scan_paths: Vec<PathBuf>,
    pub history_days: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct KanbanConfigStatus {
    pub api_url: Option<String>,
    pub fallback_to_store: bool,
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            let mut config = Config::default();
            config.apply_env();
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.apply_env();

        tracing::info!(
            todoist = config.todoist.is_configured(),
            linear = config.linear.is_configured(),
            git_paths = config.git.scan_paths.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Resolve `${VAR}` references and apply `PULSEBOARD_*` overrides.
    pub fn apply_env(&mut self) {
        self.todoist.token = env_override("TODOIST_TOKEN")
            .or_else(|| self.todoist.token.as_deref().map(resolve_env_ref))
            .filter(|t| !t.is_empty());
        self.linear.api_key = env_override("LINEAR_API_KEY")
            .or_else(|| self.linear.api_key.as_deref().map(resolve_env_ref))
            .filter(|k| !k.is_empty());
    }

    /// Check for values that would make the service misbehave.
    ///
    /// Returns one message per problem; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.server.port == 0 {
            problems.push("server.port must be between 1 and 65535".to_string());
        }
        if self.aggregator.max_workers == 0 {
            problems.push("aggregator.max_workers must be at least 1".to_string());
        }
        if self.git.scan_workers == 0 {
            problems.push("git.scan_workers must be at least 1".to_string());
        }
        if self.git.history_days == 0 {
            problems.push("git.history_days must be at least 1".to_string());
        }
        if self.circuit.failure_threshold == 0 {
            problems.push("circuit.failure_threshold must be at least 1".to_string());
        }

        for path in self.git.expanded_scan_paths() {
            if !path.is_dir() {
                tracing::warn!(path = %path.display(), "Git scan path does not exist");
            }
        }

        problems
    }

    /// Configuration summary that is safe to hand to clients
    pub fn status(&self) -> ConfigStatus {
        ConfigStatus {
            todoist: SourceConfigStatus {
                configured: self.todoist.is_configured(),
            },
            linear: SourceConfigStatus {
                configured: self.linear.is_configured(),
            },
            git: GitConfigStatus {
                scan_paths: self.git.expanded_scan_paths(),
                history_days: self.git.history_days,
            },
            kanban: KanbanConfigStatus {
                api_url: self.kanban.api_url.clone(),
                fallback_to_store: self.kanban.fallback_to_store,
            },
            weather: SourceConfigStatus {
                configured: self.weather.enabled,
            },
            gateway_url: self.gateway.url.clone(),
            refresh_interval_secs: self.server.refresh_interval_secs,
        }
    }

    /// Interval between scheduled aggregations
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.server.refresh_interval_secs.max(1))
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/pulseboard/config.toml` (~/.config/pulseboard/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("pulseboard").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/pulseboard/` (~/.local/share/pulseboard/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("pulseboard")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/pulseboard/` (~/.local/state/pulseboard/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("pulseboard")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/pulseboard/pulseboard.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("pulseboard.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/pulseboard/pulseboard.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("pulseboard.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8889);
        assert_eq!(config.aggregator.max_workers, 4);
        assert_eq!(config.git.history_days, 7);
        assert_eq!(config.todoist.timeout_secs, 10);
        assert_eq!(config.weather.timeout_secs, 5);
        assert!(!config.todoist.is_configured());
        assert!(!config.linear.is_configured());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 9000
refresh_interval_secs = 60

[git]
scan_paths = ["/srv/projects"]
history_days = 14

[todoist]
token = "abc123"
projects = ["Work"]

[kanban]
fallback_to_store = false

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.git.scan_paths, vec![PathBuf::from("/srv/projects")]);
        assert_eq!(config.git.history_days, 14);
        assert_eq!(config.git.max_commits, 5);
        assert!(config.todoist.is_configured());
        assert_eq!(config.todoist.projects, vec!["Work".to_string()]);
        assert!(!config.kanban.fallback_to_store);
        assert!(config.kanban.api_url.is_some());
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validate_reports_each_problem() {
        let toml = r#"
[server]
port = 0

[aggregator]
max_workers = 0
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let problems = config.validate();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("server.port"));
        assert!(problems[1].contains("max_workers"));
    }

    #[test]
    fn test_status_hides_secrets() {
        let mut config = Config::default();
        config.linear.api_key = Some("lin_api_secret".to_string());

        let status = serde_json::to_string(&config.status()).unwrap();
        assert!(status.contains("\"configured\":true"));
        assert!(!status.contains("lin_api_secret"));
    }

    #[test]
    fn test_env_reference_resolution() {
        std::env::set_var("PULSEBOARD_TEST_LINEAR_REF", "from-env");
        let mut config: Config = toml::from_str(
            r#"
[linear]
api_key = "${PULSEBOARD_TEST_LINEAR_REF}"
"#,
        )
        .unwrap();
        config.apply_env();
        assert_eq!(config.linear.api_key.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home(Path::new("~/code"));
        assert!(expanded.ends_with("code"));
        assert!(!expanded.starts_with("~"));
        assert_eq!(expand_home(Path::new("/abs")), PathBuf::from("/abs"));
    }
}
