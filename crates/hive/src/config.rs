//! Host Configuration
//!
//! Defaults merged with an optional TOML file and `HIVE_`-prefixed
//! environment overrides (`HIVE_SERVER__PORT=9800`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Top-level host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub server: ServerConfig,
    pub runtime: RuntimeOptions,
    pub storage: StorageConfig,
}

impl HostConfig {
    /// Load configuration: defaults, then the TOML file (if given), then
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("HIVE_").split("__")).extract()
    }
}

/// HTTP/WebSocket listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9700,
        }
    }
}

/// Timeouts and queue sizing for Cells.
///
/// The request wait is deliberately shorter than the interpreter
/// watchdog: an HTTP caller gets a timeout response while the worker
/// still recovers from the hung task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// How long a route caller waits for its task to complete.
    pub request_timeout_ms: u64,
    /// Interrupt budget for a single interpreter entry.
    pub task_timeout_ms: u64,
    /// How long Stop waits for the shutdown phase.
    pub shutdown_timeout_ms: u64,
    /// Task queue capacity per Cell.
    pub queue_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            task_timeout_ms: 30_000,
            shutdown_timeout_ms: 5_000,
            queue_capacity: 256,
        }
    }
}

impl RuntimeOptions {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Storage backend selection. With no data directory the host runs on
/// in-memory stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = HostConfig::default();
        assert_eq!(config.server.port, 9700);
        assert_eq!(config.runtime.request_timeout(), Duration::from_secs(10));
        assert!(config.storage.data_dir.is_none());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9800\n\n[runtime]\nrequest_timeout_ms = 250\n",
        )
        .unwrap();

        let config = HostConfig::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9800);
        assert_eq!(config.runtime.request_timeout_ms, 250);
        // Untouched sections keep their defaults.
        assert_eq!(config.runtime.queue_capacity, 256);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = HostConfig::load(Some(Path::new("/nonexistent/hive.toml"))).unwrap();
        assert_eq!(config.server.port, 9700);
    }
}
