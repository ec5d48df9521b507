//! Layered configuration for linewatch.
//!
//! Settings are read from `.linewatch/linewatch.toml` in the project
//! directory, falling back to `<config_dir>/linewatch/linewatch.toml`, then
//! overridden by environment variables, then by CLI flags
//! (file → environment → CLI). A missing file means defaults everywhere.
//!
//! # Configuration File Format
//!
//! ```toml
//! [backend]
//! base_url = "http://localhost:3000"
//! ws_url = "ws://localhost:3001/ws"
//! request_timeout_secs = 15
//!
//! [realtime]
//! throttle_ms = 100
//! debounce_ms = 100
//! highlight_ms = 2000
//! reconnect_delay_secs = 3
//! max_reconnect_attempts = 5
//! ping_interval_secs = 30
//! subscribe_confirm_timeout_secs = 5
//!
//! [polling]
//! live_interval_secs = 30
//! idle_interval_secs = 120
//! initial_delay_ms = 1000
//!
//! [display]
//! thousands_separator = "."
//! lines_cache_secs = 300
//! ```
//!
//! # Environment
//!
//! | Variable                            | Overrides                      |
//! |-------------------------------------|--------------------------------|
//! | `LINEWATCH_BACKEND_URL`             | `backend.base_url`             |
//! | `LINEWATCH_WS_URL`                  | `backend.ws_url`               |
//! | `LINEWATCH_FALLBACK_INTERVAL_SECS`  | `polling.live_interval_secs`   |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::{ConnectionConfig, PollerConfig};
use crate::errors::ConfigError;
use crate::fetch::BackendConfig;
use crate::session::SessionConfig;

pub const CONFIG_DIR: &str = ".linewatch";
pub const CONFIG_FILE: &str = "linewatch.toml";

pub const ENV_BACKEND_URL: &str = "LINEWATCH_BACKEND_URL";
pub const ENV_WS_URL: &str = "LINEWATCH_WS_URL";
pub const ENV_FALLBACK_INTERVAL: &str = "LINEWATCH_FALLBACK_INTERVAL_SECS";

/// `[backend]`: where the production-data service lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:3001/ws".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_url: default_ws_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// `[realtime]`: push channel timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeSection {
    /// Lossy per-identity delivery window.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    /// Store publish coalescing delay.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// How long a changed cell stays highlighted.
    #[serde(default = "default_highlight_ms")]
    pub highlight_ms: u64,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// 0 = retry forever.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_subscribe_confirm_timeout_secs")]
    pub subscribe_confirm_timeout_secs: u64,
}

fn default_throttle_ms() -> u64 {
    100
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_highlight_ms() -> u64 {
    2000
}

fn default_reconnect_delay_secs() -> u64 {
    3
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_subscribe_confirm_timeout_secs() -> u64 {
    5
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
            debounce_ms: default_debounce_ms(),
            highlight_ms: default_highlight_ms(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            ping_interval_secs: default_ping_interval_secs(),
            subscribe_confirm_timeout_secs: default_subscribe_confirm_timeout_secs(),
        }
    }
}

/// `[polling]`: fallback poller used while the push channel is down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingSection {
    #[serde(default = "default_live_interval_secs")]
    pub live_interval_secs: u64,
    /// Interval for idle/background boards (e.g. a wall TV on a quiet line).
    #[serde(default = "default_idle_interval_secs")]
    pub idle_interval_secs: u64,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

fn default_live_interval_secs() -> u64 {
    30
}

fn default_idle_interval_secs() -> u64 {
    120
}

fn default_initial_delay_ms() -> u64 {
    1000
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            live_interval_secs: default_live_interval_secs(),
            idle_interval_secs: default_idle_interval_secs(),
            initial_delay_ms: default_initial_delay_ms(),
        }
    }
}

/// `[display]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySection {
    #[serde(default = "default_thousands_separator")]
    pub thousands_separator: String,
    #[serde(default = "default_lines_cache_secs")]
    pub lines_cache_secs: u64,
}

fn default_thousands_separator() -> String {
    ".".to_string()
}

fn default_lines_cache_secs() -> u64 {
    300
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            thousands_separator: default_thousands_separator(),
            lines_cache_secs: default_lines_cache_secs(),
        }
    }
}

/// Root of `linewatch.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinewatchToml {
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub realtime: RealtimeSection,
    #[serde(default)]
    pub polling: PollingSection,
    #[serde(default)]
    pub display: DisplaySection,
}

impl LinewatchToml {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply environment overrides from an arbitrary lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BACKEND_URL).filter(|v| !v.trim().is_empty()) {
            self.backend.base_url = url;
        }
        if let Some(url) = lookup(ENV_WS_URL).filter(|v| !v.trim().is_empty()) {
            self.backend.ws_url = url;
        }
        if let Some(raw) = lookup(ENV_FALLBACK_INTERVAL) {
            self.polling.live_interval_secs =
                raw.trim().parse().map_err(|_| ConfigError::Invalid {
                    field: ENV_FALLBACK_INTERVAL.to_string(),
                    message: format!("'{raw}' is not a whole number of seconds"),
                })?;
        }
        Ok(())
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Problems that would make the board misbehave. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if !self.backend.base_url.starts_with("http://") && !self.backend.base_url.starts_with("https://") {
            problems.push(format!(
                "backend.base_url '{}' must start with http:// or https://",
                self.backend.base_url
            ));
        }
        if !self.backend.ws_url.starts_with("ws://") && !self.backend.ws_url.starts_with("wss://") {
            problems.push(format!(
                "backend.ws_url '{}' must start with ws:// or wss://",
                self.backend.ws_url
            ));
        }
        if self.backend.request_timeout_secs == 0 {
            problems.push("backend.request_timeout_secs must be greater than 0".to_string());
        }
        if self.polling.live_interval_secs == 0 {
            problems.push("polling.live_interval_secs must be greater than 0".to_string());
        }
        if self.polling.idle_interval_secs < self.polling.live_interval_secs {
            problems.push(format!(
                "polling.idle_interval_secs ({}) should not be shorter than live_interval_secs ({})",
                self.polling.idle_interval_secs, self.polling.live_interval_secs
            ));
        }
        if self.realtime.highlight_ms == 0 {
            problems.push("realtime.highlight_ms must be greater than 0".to_string());
        }
        if self.realtime.ping_interval_secs == 0 {
            problems.push("realtime.ping_interval_secs must be greater than 0".to_string());
        }
        if self.display.thousands_separator.chars().count() > 1 {
            problems.push(format!(
                "display.thousands_separator '{}' must be a single character or empty",
                self.display.thousands_separator
            ));
        }

        problems
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new(&self.backend.ws_url)
            .with_reconnect_delay(Duration::from_secs(self.realtime.reconnect_delay_secs))
            .with_max_reconnect_attempts(self.realtime.max_reconnect_attempts)
            .with_ping_interval(Duration::from_secs(self.realtime.ping_interval_secs))
            .with_confirm_timeout(Duration::from_secs(self.realtime.subscribe_confirm_timeout_secs))
            .with_throttle_window(Duration::from_millis(self.realtime.throttle_ms))
    }

    pub fn poller_config(&self, idle: bool) -> PollerConfig {
        let secs = if idle {
            self.polling.idle_interval_secs
        } else {
            self.polling.live_interval_secs
        };
        PollerConfig::new(Duration::from_secs(secs))
            .with_initial_delay(Duration::from_millis(self.polling.initial_delay_ms))
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::new(&self.backend.base_url)
            .with_timeout(Duration::from_secs(self.backend.request_timeout_secs))
    }

    pub fn session_config(&self, idle: bool) -> SessionConfig {
        SessionConfig {
            poller: self.poller_config(idle),
            debounce: Duration::from_millis(self.realtime.debounce_ms),
            highlight: Duration::from_millis(self.realtime.highlight_ms),
            ..SessionConfig::default()
        }
    }

    pub fn lines_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.display.lines_cache_secs)
    }
}

/// Flags that override file and environment settings.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub backend_url: Option<String>,
    pub ws_url: Option<String>,
    pub fallback_interval_secs: Option<u64>,
}

/// Effective configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct LinewatchConfig {
    /// File the settings were read from, if any.
    pub source: Option<PathBuf>,
    pub toml: LinewatchToml,
}

impl LinewatchConfig {
    /// Resolve file → environment for a project directory.
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let source = Self::locate(project_dir);
        let mut toml = match &source {
            Some(path) => LinewatchToml::load(path)?,
            None => LinewatchToml::default(),
        };
        toml.apply_env()?;
        Ok(Self { source, toml })
    }

    /// First existing config file: project-local, then user config dir.
    pub fn locate(project_dir: &Path) -> Option<PathBuf> {
        let local = project_dir.join(CONFIG_DIR).join(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("linewatch").join(CONFIG_FILE))
            .filter(|path| path.exists())
    }

    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(url) = &overrides.backend_url {
            self.toml.backend.base_url.clone_from(url);
        }
        if let Some(url) = &overrides.ws_url {
            self.toml.backend.ws_url.clone_from(url);
        }
        if let Some(secs) = overrides.fallback_interval_secs {
            self.toml.polling.live_interval_secs = secs;
        }
        self
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_documented_values() {
        let toml = LinewatchToml::default();
        assert_eq!(toml.realtime.throttle_ms, 100);
        assert_eq!(toml.realtime.debounce_ms, 100);
        assert_eq!(toml.realtime.highlight_ms, 2000);
        assert_eq!(toml.realtime.reconnect_delay_secs, 3);
        assert_eq!(toml.realtime.max_reconnect_attempts, 5);
        assert_eq!(toml.polling.live_interval_secs, 30);
        assert_eq!(toml.polling.idle_interval_secs, 120);
        assert_eq!(toml.display.thousands_separator, ".");
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let toml = LinewatchToml::parse(
            r#"
[backend]
base_url = "http://factory-api:8080"

[polling]
live_interval_secs = 10
"#,
        )
        .unwrap();
        assert_eq!(toml.backend.base_url, "http://factory-api:8080");
        assert_eq!(toml.backend.ws_url, default_ws_url());
        assert_eq!(toml.polling.live_interval_secs, 10);
        assert_eq!(toml.polling.initial_delay_ms, 1000);
        assert_eq!(toml.realtime, RealtimeSection::default());
    }

    #[test]
    fn test_env_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_BACKEND_URL, "http://env-host:9000"),
            (ENV_FALLBACK_INTERVAL, "45"),
        ]);
        let mut toml = LinewatchToml::default();
        toml.apply_env_with(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(toml.backend.base_url, "http://env-host:9000");
        assert_eq!(toml.backend.ws_url, default_ws_url());
        assert_eq!(toml.polling.live_interval_secs, 45);
    }

    #[test]
    fn test_bad_env_interval_is_an_error() {
        let mut toml = LinewatchToml::default();
        let err = toml
            .apply_env_with(|k| (k == ENV_FALLBACK_INTERVAL).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_cli_overrides_win() {
        let config = LinewatchConfig {
            source: None,
            toml: LinewatchToml::default(),
        }
        .with_overrides(&CliOverrides {
            backend_url: Some("http://cli:1".into()),
            ws_url: None,
            fallback_interval_secs: Some(5),
        });
        assert_eq!(config.toml.backend.base_url, "http://cli:1");
        assert_eq!(config.toml.polling.live_interval_secs, 5);
    }

    #[test]
    fn test_load_reads_project_file() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_DIR).join(CONFIG_FILE),
            "[display]\nthousands_separator = \",\"\n",
        )
        .unwrap();
        let toml = LinewatchToml::load(&dir.path().join(CONFIG_DIR).join(CONFIG_FILE)).unwrap();
        assert_eq!(toml.display.thousands_separator, ",");
        assert_eq!(
            LinewatchConfig::locate(dir.path()),
            Some(dir.path().join(CONFIG_DIR).join(CONFIG_FILE))
        );
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[backend\nbase_url = 1").unwrap();
        match LinewatchToml::load(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("Expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_flags_bad_urls_and_intervals() {
        let mut toml = LinewatchToml::default();
        toml.backend.base_url = "factory-api".into();
        toml.backend.ws_url = "http://wrong".into();
        toml.polling.live_interval_secs = 0;
        let problems = toml.validate();
        assert_eq!(problems.len(), 3);
        assert!(problems[0].contains("base_url"));
    }

    #[test]
    fn test_round_trips_through_toml() {
        let toml = LinewatchToml::default();
        let text = toml.to_toml().unwrap();
        assert!(text.contains("[realtime]"));
        assert_eq!(LinewatchToml::parse(&text).unwrap(), toml);
    }

    #[test]
    fn test_idle_boards_poll_less_often() {
        let toml = LinewatchToml::default();
        assert_eq!(toml.poller_config(false).interval, Duration::from_secs(30));
        assert_eq!(toml.poller_config(true).interval, Duration::from_secs(120));
        assert_eq!(toml.poller_config(true).initial_delay, Duration::from_millis(1000));
    }
}
