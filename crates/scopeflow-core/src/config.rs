/*!
 * Configuration management for ScopeFlow.
 *
 * This module loads layered configuration (defaults, an optional file and
 * environment variables) for logging, device acquisition timing and the
 * remote-object boundary.
 */
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Core configuration for ScopeFlow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Device acquisition timing
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Remote-object boundary configuration
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Application environment (development, production, etc.)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to use JSON format for logs
    #[serde(default)]
    pub json_format: bool,
}

/// Acquisition timing shared by all devices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Default timeout for `fetch` when the caller does not pass one
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Interval between hardware polls while a fetch is waiting
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Longest `abort` waits for a device held by an in-flight hardware call
    #[serde(default = "default_abort_grace_ms")]
    pub abort_grace_ms: u64,

    /// Retries of the hardware handshake during bulk initialization
    #[serde(default = "default_initialize_retries")]
    pub initialize_retries: usize,

    /// Timeout of a single hardware handshake attempt
    #[serde(default = "default_initialize_timeout_ms")]
    pub initialize_timeout_ms: u64,
}

/// Remote-object boundary configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Upper bound for a request/response round trip, excluding fetch time
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Number of requests that may queue in front of a device server
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: default_fetch_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            abort_grace_ms: default_abort_grace_ms(),
            initialize_retries: default_initialize_retries(),
            initialize_timeout_ms: default_initialize_timeout_ms(),
        }
    }
}

impl AcquisitionConfig {
    /// Default fetch timeout as a duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Poll interval as a duration (never zero)
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Abort grace period as a duration
    pub fn abort_grace(&self) -> Duration {
        Duration::from_millis(self.abort_grace_ms)
    }

    /// Timeout of one initialization attempt as a duration
    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_millis(self.initialize_timeout_ms)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl RemoteConfig {
    /// Request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_app_name() -> String {
    "scopeflow".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_fetch_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    2
}

fn default_abort_grace_ms() -> u64 {
    100
}

fn default_initialize_retries() -> usize {
    2
}

fn default_initialize_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_channel_capacity() -> usize {
    64
}

impl Config {
    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
    override_with: Option<Config>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Override with an existing config
    pub fn override_with(mut self, config: Config) -> Self {
        self.override_with = Some(config);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        if let Some(config) = self.override_with {
            debug!("Using explicitly provided configuration");
            return Ok(config);
        }

        let defaults = ConfigLib::try_from(&Config::default())
            .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?;
        let mut config_builder = ConfigLib::builder().add_source(defaults);

        if let Some(config_file) = self.config_file {
            if Path::new(&config_file).exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config_lib = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?;

        let config: Config = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        info!("Configuration loaded successfully");
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone)]
pub struct SharedConfig(Arc<Config>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: Config) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &Config {
        &self.0
    }
}

impl From<Config> for SharedConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

impl AsRef<Config> for SharedConfig {
    fn as_ref(&self) -> &Config {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.app_name, "scopeflow");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.acquisition.fetch_timeout_ms, 5_000);
        assert_eq!(config.acquisition.poll_interval(), Duration::from_millis(2));
        assert_eq!(config.remote.channel_capacity, 64);
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let acquisition = AcquisitionConfig {
            poll_interval_ms: 0,
            ..AcquisitionConfig::default()
        };
        assert_eq!(acquisition.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.general.app_name, "scopeflow");
        assert_eq!(config.acquisition.abort_grace_ms, 100);
    }

    #[test]
    fn test_config_builder_with_file() -> Result<()> {
        let dir = tempdir().map_err(|e| Error::other(e.to_string()))?;
        let file_path = dir.path().join("scope.toml");

        {
            let mut file = File::create(&file_path).map_err(|e| Error::other(e.to_string()))?;
            file.write_all(
                br#"
                [general]
                app_name = "widefield"

                [logging]
                level = "debug"

                [acquisition]
                fetch_timeout_ms = 250
                poll_interval_ms = 5
            "#,
            )
            .map_err(|e| Error::other(e.to_string()))?;
        }

        let config = ConfigBuilder::new().with_config_file(file_path).build()?;

        assert_eq!(config.general.app_name, "widefield");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.acquisition.fetch_timeout(), Duration::from_millis(250));
        assert_eq!(config.acquisition.poll_interval_ms, 5);
        assert_eq!(config.acquisition.abort_grace_ms, 100);

        Ok(())
    }

    #[test]
    fn test_config_builder_missing_file_uses_defaults() -> Result<()> {
        let config = ConfigBuilder::new()
            .with_config_file("/nonexistent/scopeflow.toml")
            .build()?;
        assert_eq!(config.logging.level, "info");
        Ok(())
    }

    #[test]
    fn test_config_builder_with_env() -> Result<()> {
        env::set_var("SCOPEFLOWTEST__REMOTE__REQUEST_TIMEOUT_MS", "1500");
        env::set_var("SCOPEFLOWTEST__LOGGING__LEVEL", "trace");

        let config = ConfigBuilder::new()
            .with_environment_prefix("SCOPEFLOWTEST")
            .build()?;

        assert_eq!(config.remote.request_timeout(), Duration::from_millis(1500));
        assert_eq!(config.logging.level, "trace");

        env::remove_var("SCOPEFLOWTEST__REMOTE__REQUEST_TIMEOUT_MS");
        env::remove_var("SCOPEFLOWTEST__LOGGING__LEVEL");

        Ok(())
    }

    #[test]
    fn test_override_wins() -> Result<()> {
        let mut custom = Config::default();
        custom.acquisition.poll_interval_ms = 9;
        let config = ConfigBuilder::new().override_with(custom).build()?;
        assert_eq!(config.acquisition.poll_interval_ms, 9);
        Ok(())
    }

    #[test]
    fn test_to_toml() -> Result<()> {
        let rendered = Config::default().to_toml()?;
        assert!(rendered.contains("[acquisition]"));
        assert!(rendered.contains("fetch_timeout_ms = 5000"));
        Ok(())
    }

    #[test]
    fn test_shared_config() {
        let shared = SharedConfig::new(Config::default());
        let shared2 = shared.clone();
        assert_eq!(shared2.get().general.app_name, "scopeflow");
    }
}
