//! # Configuration Management
//!
//! Centralized configuration for the replication protocol core.
//!
//! This module provides wire-format constants shared by every frame, plus
//! structured configuration for codec limits, compression bounds, and
//! logging, loadable from TOML files or environment variables.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Security Considerations
//! - `max_frame_size` caps what the codec will accept before parsing
//! - `max_decompressed_size` bounds decompression output *before* allocation
//! - `max_sequence_len` rejects declared-oversized element counts up front

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::Level;

/// Current supported protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Magic bytes identifying replication frames (0x53594E43 → "SYNC")
pub const MAGIC_BYTES: [u8; 4] = [0x53, 0x59, 0x4E, 0x43];

/// Max allowed frame size accepted by the codec (4 MB)
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Default bound on decompressed output (aligned with MAX_FRAME_SIZE)
pub const MAX_DECOMPRESSED_SIZE: usize = MAX_FRAME_SIZE;

/// Width in bytes of the shared length/count prefix (u32, network order)
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Default cap on declared element counts for length-prefixed sequences
pub const MAX_SEQUENCE_LEN: u32 = 65_536;

/// Main configuration structure containing all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ReplicationConfig {
    /// Codec limits
    #[serde(default)]
    pub codec: CodecConfig,

    /// Compression envelope settings
    #[serde(default)]
    pub compression: CompressionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ReplicationConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Start with defaults
        let mut config = Self::default();

        // Override with environment variables
        if let Ok(size) = std::env::var("SCENESYNC_MAX_FRAME_SIZE") {
            if let Ok(val) = size.parse::<usize>() {
                config.codec.max_frame_size = val;
            }
        }

        if let Ok(size) = std::env::var("SCENESYNC_MAX_DECOMPRESSED_SIZE") {
            if let Ok(val) = size.parse::<usize>() {
                config.compression.max_decompressed_size = val;
            }
        }

        if let Ok(len) = std::env::var("SCENESYNC_MAX_SEQUENCE_LEN") {
            if let Ok(val) = len.parse::<u32>() {
                config.codec.max_sequence_len = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.codec.validate());
        errors.extend(self.compression.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Codec limit configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CodecConfig {
    /// Maximum frame size accepted before any parsing occurs
    pub max_frame_size: usize,

    /// Maximum declared element count for length-prefixed sequences
    pub max_sequence_len: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            max_sequence_len: MAX_SEQUENCE_LEN,
        }
    }
}

impl CodecConfig {
    /// Validate codec configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_size == 0 {
            errors.push("Max frame size cannot be 0".to_string());
        } else if self.max_frame_size < 1024 {
            errors.push("Max frame size too small (minimum: 1 KB)".to_string());
        } else if self.max_frame_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max frame size too large: {} bytes (maximum recommended: 100 MB)",
                self.max_frame_size
            ));
        }

        if self.max_sequence_len == 0 {
            errors.push("Max sequence length cannot be 0".to_string());
        }

        errors
    }
}

/// Compression envelope configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompressionConfig {
    /// Whether outgoing frames should be compressed at all
    pub enabled: bool,

    /// Minimum payload size (bytes) before compression is applied.
    /// Payloads smaller than this threshold bypass compression to reduce overhead
    #[serde(default)]
    pub threshold_bytes: usize,

    /// Bound on decompressed output, checked before the output buffer is
    /// allocated. A small malicious input must never force a large allocation
    pub max_decompressed_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_bytes: 512,
            max_decompressed_size: MAX_DECOMPRESSED_SIZE,
        }
    }
}

impl CompressionConfig {
    /// Validate compression configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_decompressed_size == 0 {
            errors.push("Max decompressed size cannot be 0".to_string());
        } else if self.max_decompressed_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max decompressed size too large: {} bytes (maximum recommended: 100 MB)",
                self.max_decompressed_size
            ));
        }

        if self.enabled && self.threshold_bytes > self.max_decompressed_size {
            errors.push(
                "Compression threshold cannot be larger than max decompressed size".to_string(),
            );
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("scenesync"),
            log_level: Level::INFO,
            log_to_console: true,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ReplicationConfig::default();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_zero_frame_size_rejected() {
        let mut config = ReplicationConfig::default();
        config.codec.max_frame_size = 0;
        assert!(config.validate_strict().is_err());
    }

    #[test]
    fn test_zero_sequence_len_rejected() {
        let mut config = ReplicationConfig::default();
        config.codec.max_sequence_len = 0;
        assert!(!config.validate().is_empty());
    }

    #[test]
    fn test_threshold_above_bound_rejected() {
        let mut config = ReplicationConfig::default();
        config.compression.enabled = true;
        config.compression.threshold_bytes = config.compression.max_decompressed_size + 1;
        assert!(!config.validate().is_empty());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_toml_roundtrip() {
        let config = ReplicationConfig::default_with_overrides(|c| {
            c.codec.max_sequence_len = 1024;
            c.compression.enabled = true;
        });
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed = ReplicationConfig::from_toml(&toml).unwrap();
        assert_eq!(parsed.codec.max_sequence_len, 1024);
        assert!(parsed.compression.enabled);
    }
}
