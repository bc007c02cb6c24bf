//! Configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::extra::ExtraStrategy;
use crate::listener::{DEFAULT_LISTENER_CAPACITY, FanOutPolicy};

/// Project-local config file, looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = ".clientmux.yml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Defaults applied to every client built from this configuration
    pub client: ClientConfig,

    /// File this configuration was read from; `None` means built-in defaults
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Config {
    /// Resolve the configuration
    ///
    /// An explicit path must load. Otherwise the first readable file among
    /// [`Config::search_paths`] wins; unreadable ones are skipped with a
    /// warning and defaults apply when none is usable.
    pub fn load(explicit: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::read(path).with_context(|| format!("Failed to load config from {}", path.display()));
        }

        let found = Self::search_paths()
            .into_iter()
            .filter(|path| path.is_file())
            .find_map(|path| match Self::read(&path) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unusable config file");
                    None
                }
            });
        Ok(found.unwrap_or_default())
    }

    /// Candidate files in priority order: project-local, then per-user
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("clientmux").join("clientmux.yml"));
        }
        paths
    }

    /// Effective log level: an explicit override beats the file's setting
    pub fn log_level_or<'a>(&'a self, cli_level: Option<&'a str>) -> Option<&'a str> {
        cli_level.or(self.log_level.as_deref())
    }

    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let mut config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }
}

/// Per-client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// How long `send` waits for a matching response
    #[serde(rename = "catch-timeout-ms", default = "default_catch_timeout_ms")]
    pub catch_timeout_ms: u64,

    /// Timeout passed to each blocking receive call
    #[serde(rename = "updates-timeout-ms", default = "default_updates_timeout_ms")]
    pub updates_timeout_ms: u64,

    /// Shortest time between two receive calls that both failed
    #[serde(rename = "min-poll-interval-ms", default = "default_min_poll_interval_ms")]
    pub min_poll_interval_ms: u64,

    /// Buffered updates per listener
    #[serde(rename = "listener-capacity", default = "default_capacity")]
    pub listener_capacity: usize,

    /// Buffered raw messages between the receive loop and the catch loop
    #[serde(rename = "catcher-capacity", default = "default_capacity")]
    pub catcher_capacity: usize,

    /// Behaviour when a listener's buffer is full
    #[serde(rename = "fan-out", default)]
    pub fan_out: FanOutPolicy,

    /// Correlation token strategy
    #[serde(default)]
    pub extra: ExtraStrategy,
}

fn default_catch_timeout_ms() -> u64 {
    debug!("default_catch_timeout_ms: called");
    60_000
}

fn default_updates_timeout_ms() -> u64 {
    debug!("default_updates_timeout_ms: called");
    60_000
}

fn default_min_poll_interval_ms() -> u64 {
    debug!("default_min_poll_interval_ms: called");
    10
}

fn default_capacity() -> usize {
    debug!("default_capacity: called");
    DEFAULT_LISTENER_CAPACITY
}

impl Default for ClientConfig {
    fn default() -> Self {
        debug!("ClientConfig::default: called");
        Self {
            catch_timeout_ms: default_catch_timeout_ms(),
            updates_timeout_ms: default_updates_timeout_ms(),
            min_poll_interval_ms: default_min_poll_interval_ms(),
            listener_capacity: default_capacity(),
            catcher_capacity: default_capacity(),
            fan_out: FanOutPolicy::default(),
            extra: ExtraStrategy::default(),
        }
    }
}

impl ClientConfig {
    pub fn catch_timeout(&self) -> Duration {
        Duration::from_millis(self.catch_timeout_ms)
    }

    pub fn updates_timeout(&self) -> Duration {
        Duration::from_millis(self.updates_timeout_ms)
    }

    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.catch_timeout(), Duration::from_secs(60));
        assert_eq!(config.updates_timeout(), Duration::from_secs(60));
        assert_eq!(config.listener_capacity, 1000);
        assert_eq!(config.catcher_capacity, 1000);
        assert_eq!(config.fan_out, FanOutPolicy::Drop);
        assert_eq!(config.extra, ExtraStrategy::Uuid);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("client:\n  catch-timeout-ms: 500\n").unwrap();
        assert_eq!(config.client.catch_timeout(), Duration::from_millis(500));
        assert_eq!(config.client.updates_timeout_ms, 60_000);
        assert_eq!(config.client.listener_capacity, 1000);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "log-level: debug\nclient:\n  fan-out:\n    mode: block\n    max-wait-ms: 100\n  extra:\n    kind: sequential\n    prefix: req-"
        )
        .unwrap();

        let path = file.path().to_path_buf();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.source.as_ref(), Some(&path));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.client.fan_out, FanOutPolicy::Block { max_wait_ms: 100 });
        assert_eq!(
            config.client.extra,
            ExtraStrategy::Sequential {
                prefix: "req-".to_string()
            }
        );
        assert_eq!(config.log_level_or(None), Some("debug"));
        assert_eq!(config.log_level_or(Some("trace")), Some("trace"));
    }

    #[test]
    fn test_source_not_serialized() {
        let config = Config {
            source: Some(PathBuf::from("/etc/clientmux.yml")),
            ..Config::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("source"));
        assert!(!yaml.contains("/etc/clientmux.yml"));
    }

    #[test]
    fn test_search_paths_start_local() {
        let paths = Config::search_paths();
        assert_eq!(paths[0], PathBuf::from(LOCAL_CONFIG_FILE));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/clientmux.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
