//! Application configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::fuzzer::{FuzzerOptions, TraversalStrategy};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fuzzer campaign settings
    pub fuzzer: FuzzerConfig,

    /// HTTP client settings
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzerConfig {
    /// Number of concurrent worker threads per campaign
    pub threads: usize,

    /// Delay between message sends in milliseconds (0 to disable)
    pub send_delay_ms: u64,

    /// Transport-level retries per message send
    pub retries_on_io_error: u32,

    /// Maximum task failures tolerated before a campaign stops itself;
    /// omit for unlimited
    pub max_errors_allowed: Option<u64>,

    /// Payload traversal strategy
    pub strategy: TraversalStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub request_timeout: u64,

    /// Follow redirects
    pub follow_redirects: bool,

    /// Maximum redirect depth
    pub max_redirects: usize,

    /// User agent string
    pub user_agent: String,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            threads: 10,
            send_delay_ms: 0,
            retries_on_io_error: 3,
            max_errors_allowed: Some(1000),
            strategy: TraversalStrategy::DepthFirst,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: 30,
            follow_redirects: true,
            max_redirects: 10,
            user_agent: format!("Carnyx/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {:?}", config_path))?;

            let config: Config = toml::from_str(&contents)
                .with_context(|| "Failed to parse configuration file")?;

            tracing::info!("Loaded configuration from {:?}", config_path);
            Ok(config)
        } else {
            tracing::info!("No configuration file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: Option<&str>) -> Result<()> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)?;

        tracing::info!("Saved configuration to {:?}", config_path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.fuzzer.threads == 0 {
            anyhow::bail!("Fuzzer threads must be greater than 0");
        }

        if self.http.request_timeout == 0 {
            anyhow::bail!("HTTP request_timeout must be greater than 0");
        }

        Ok(())
    }

    /// Build the per-campaign options snapshot from this configuration
    pub fn fuzzer_options(&self) -> FuzzerOptions {
        FuzzerOptions {
            thread_count: self.fuzzer.threads,
            send_message_delay: Duration::from_millis(self.fuzzer.send_delay_ms),
            retries_on_io_error: self.fuzzer.retries_on_io_error,
            max_errors_allowed: self.fuzzer.max_errors_allowed,
            strategy: self.fuzzer.strategy,
        }
    }

    /// Get default configuration file path
    fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "carnyx", "carnyx")
            .context("Failed to determine config directory")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "carnyx", "carnyx")
            .context("Failed to determine data directory")?;

        Ok(dirs.data_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fuzzer.threads, 10);
        assert_eq!(config.fuzzer.retries_on_io_error, 3);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let mut config = Config::default();
        config.fuzzer.threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fuzzer_options_mapping() {
        let mut config = Config::default();
        config.fuzzer.send_delay_ms = 250;
        config.fuzzer.max_errors_allowed = None;

        let options = config.fuzzer_options();
        assert_eq!(options.send_message_delay, Duration::from_millis(250));
        assert_eq!(options.max_errors_allowed, None);
        assert_eq!(options.strategy, TraversalStrategy::DepthFirst);
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.fuzzer.threads, config.fuzzer.threads);
        assert_eq!(parsed.http.user_agent, config.http.user_agent);
    }
}
