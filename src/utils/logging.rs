//! # Structured Logging
//!
//! Installs the process-wide `tracing` subscriber from a
//! [`LoggingConfig`]. The `RUST_LOG` environment variable, when set,
//! overrides the configured level so a deployment can turn up verbosity
//! without editing config files.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the global log subscriber.
///
/// # Errors
/// Returns `ProtocolError::ConfigError` if a subscriber is already
/// installed for this process.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if !config.log_to_console {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| {
        ProtocolError::ConfigError(format!("failed to install log subscriber: {e}"))
    })?;

    info!(
        app = %config.app_name,
        level = %config.log_level,
        json = config.json_format,
        "logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_console_is_a_no_op() {
        let config = LoggingConfig {
            log_to_console: false,
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config).is_ok());
        // Installing nothing twice is still fine.
        assert!(init_logging(&config).is_ok());
    }
}
