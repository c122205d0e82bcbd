//! Configuration management for clactor.
//!
//! Configuration is loaded with the `config` crate from TOML files or
//! strings, overlaid with environment variables prefixed `CLACTOR` and
//! separated by `__` (for example `CLACTOR_DISCOVERY__PLATFORM_INDEX=1`).
//!
//! # Example
//!
//! ```ignore
//! use clactor_core::config::ComputeConfig;
//!
//! let config = ComputeConfig::load("config/clactor.toml")?;
//! config.validate()?;
//! let registry = DeviceRegistry::new(backend, config.discovery.clone());
//! ```

use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::backend::DeviceKind;
use crate::error::{ComputeError, Result};

const ENV_PREFIX: &str = "CLACTOR";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComputeConfig {
    /// Device discovery and program defaults.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Compute actor defaults.
    #[serde(default)]
    pub actor: ActorConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device discovery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Index of the platform to use.
    #[serde(default)]
    pub platform_index: usize,

    /// Device class to enumerate first.
    #[serde(default = "default_preferred_device")]
    pub preferred_device: DeviceKind,

    /// Enumerate CPU devices when no preferred device exists.
    #[serde(default = "default_true")]
    pub fallback_to_cpu: bool,

    /// Create queues with profiling enabled.
    #[serde(default = "default_true")]
    pub profiling: bool,

    /// Build options used when a program is created without any.
    #[serde(default)]
    pub default_build_options: Option<String>,
}

fn default_preferred_device() -> DeviceKind {
    DeviceKind::Gpu
}

fn default_true() -> bool {
    true
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            platform_index: 0,
            preferred_device: default_preferred_device(),
            fallback_to_cpu: true,
            profiling: true,
            default_build_options: None,
        }
    }
}

/// Compute actor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Mailbox capacity of each spawned actor.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

fn default_mailbox_capacity() -> usize {
    1024
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact, full).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include thread ids in log lines.
    #[serde(default)]
    pub thread_ids: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "full".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            thread_ids: false,
        }
    }
}

impl ComputeConfig {
    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        builder.build()?.try_deserialize()
    }

    /// Load configuration with fallback to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Create from environment variables only.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let builder =
            Config::builder().add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        builder.build()?.try_deserialize()
    }

    /// Create a builder with defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.actor.mailbox_capacity == 0 {
            return Err(ComputeError::config(
                "Mailbox capacity must be greater than 0",
            ));
        }

        let valid_formats = ["pretty", "compact", "full"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ComputeError::config(format!(
                "Invalid log format '{}'. Valid options: {:?}",
                self.logging.format, valid_formats
            )));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ComputeError::config("Log level must not be empty"));
        }

        Ok(())
    }
}

/// Load configuration from a TOML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> std::result::Result<ComputeConfig, ConfigError> {
    ComputeConfig::load(path)
}

/// Load configuration from a TOML string.
pub fn load_config_from_str(content: &str) -> std::result::Result<ComputeConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(File::from_str(content, FileFormat::Toml))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    builder.build()?.try_deserialize()
}

/// Builder for programmatic configuration.
pub struct ConfigBuilder {
    config: ComputeConfig,
}

impl ConfigBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            config: ComputeConfig::default(),
        }
    }

    /// Set the platform index.
    pub fn platform_index(mut self, index: usize) -> Self {
        self.config.discovery.platform_index = index;
        self
    }

    /// Set the preferred device class.
    pub fn preferred_device(mut self, kind: DeviceKind) -> Self {
        self.config.discovery.preferred_device = kind;
        self
    }

    /// Enable or disable the CPU fallback.
    pub fn fallback_to_cpu(mut self, enabled: bool) -> Self {
        self.config.discovery.fallback_to_cpu = enabled;
        self
    }

    /// Enable or disable queue profiling.
    pub fn profiling(mut self, enabled: bool) -> Self {
        self.config.discovery.profiling = enabled;
        self
    }

    /// Set default build options.
    pub fn default_build_options(mut self, options: impl Into<String>) -> Self {
        self.config.discovery.default_build_options = Some(options.into());
        self
    }

    /// Set the actor mailbox capacity.
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.config.actor.mailbox_capacity = capacity;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Set the log format.
    pub fn log_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<ComputeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build without validation.
    pub fn build_unchecked(self) -> ComputeConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
