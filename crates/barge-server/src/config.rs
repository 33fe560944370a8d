//! Server configuration.
//!
//! Precedence: built-in defaults < TOML file < `BARGE_*` environment
//! variables < command-line flags.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    /// HTTP listener configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Request timeout configuration.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    /// Built-in authorization policy.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address.
    pub listen_addr: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8417)),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding `<owner>/<repo>.git` trees.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,
    /// Output format: json or pretty.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Request timeouts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Reading a request body.
    pub request_read_secs: u64,
    /// Indexing an inbound packfile.
    pub index_pack_secs: u64,
    /// A receive-pack request end to end.
    pub receive_pack_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_read_secs: 60,
            index_pack_secs: 120,
            receive_pack_secs: 600,
        }
    }
}

impl TimeoutsConfig {
    /// Body read timeout.
    pub fn request_read(&self) -> Duration {
        Duration::from_secs(self.request_read_secs)
    }

    /// Packfile indexing deadline within a receive-pack request.
    pub fn index_pack(&self) -> Duration {
        Duration::from_secs(self.index_pack_secs)
    }

    /// End-to-end receive-pack timeout.
    pub fn receive_pack(&self) -> Duration {
        Duration::from_secs(self.receive_pack_secs)
    }
}

/// Built-in authorization policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Allow unauthenticated reads (clone, fetch, browse).
    pub anonymous_read: bool,
    /// Allow unauthenticated pushes.
    pub anonymous_write: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            anonymous_read: true,
            anonymous_write: true,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: ServerConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlays `BARGE_*` environment variables.
    pub fn merge_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("BARGE_HTTP_ADDR") {
            self.http.listen_addr = addr
                .parse()
                .with_context(|| format!("BARGE_HTTP_ADDR: {}", addr))?;
        }
        if let Ok(dir) = std::env::var("BARGE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("BARGE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("BARGE_LOG_FORMAT") {
            self.logging.format = format;
        }
        Ok(())
    }

    /// Rejects configurations the server cannot run with.
    pub fn validate_config(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => bail!("unknown log level: {}", other),
        }
        match self.logging.format.as_str() {
            "json" | "pretty" => {}
            other => bail!("unknown log format: {}", other),
        }
        if self.timeouts.request_read_secs == 0
            || self.timeouts.index_pack_secs == 0
            || self.timeouts.receive_pack_secs == 0
        {
            bail!("timeouts must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let config = ServerConfig::default();
        config.to_file(&path).unwrap();

        let loaded = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.http.listen_addr, loaded.http.listen_addr);
        assert_eq!(config.timeouts.receive_pack_secs, 600);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\nformat = \"pretty\"\n").unwrap();

        let loaded = ServerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.logging.level, "debug");
        assert_eq!(loaded.timeouts.request_read_secs, 60);
        assert!(loaded.auth.anonymous_write);
    }

    #[test]
    fn validation_rejects_bad_level() {
        let mut config = ServerConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate_config().is_err());
    }
}
