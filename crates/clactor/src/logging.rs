//! Logging bootstrap.

use tracing_subscriber::EnvFilter;

use clactor_core::config::LoggingConfig;
use clactor_core::error::{ComputeError, Result};

/// Install a global `tracing` subscriber configured by `config`.
///
/// `RUST_LOG` takes precedence over `config.level`. Fails when the level is
/// not a valid filter or a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| ComputeError::config(format!("invalid log level '{}': {}", config.level, e)))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(config.thread_ids);

    let installed = match config.format.as_str() {
        "pretty" => builder.pretty().try_init(),
        "compact" => builder.compact().try_init(),
        _ => builder.try_init(),
    };

    installed.map_err(|e| ComputeError::config(format!("could not install subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "clactor=loud".to_string(),
            format: "full".to_string(),
            thread_ids: false,
        };
        assert!(init_tracing(&config).unwrap_err().is_config());
    }
}
