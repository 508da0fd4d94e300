//! Configuration for handle sockets
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no
//! file at all) is a valid configuration.
//!
//! ```toml
//! overlapped = false
//! read_chunk_size = 4096
//! stderr_line_limit = 8192
//!
//! [log]
//! level = "debug"
//! format = "json"
//! ```

use crate::error::ConfigError;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Default upper bound on a single engine read.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// Default length at which a stderr line with no newline yet is logged anyway.
pub const DEFAULT_STDERR_LINE_LIMIT: usize = 8192;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

/// Socket configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Handles were opened for overlapped I/O
    pub overlapped: bool,

    /// Maximum bytes requested per engine read
    pub read_chunk_size: usize,

    /// Partial stderr lines are flushed to the log once they reach this length
    pub stderr_line_limit: usize,

    /// Logging settings
    pub log: LogConfig,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            overlapped: false,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            stderr_line_limit: DEFAULT_STDERR_LINE_LIMIT,
            log: LogConfig::default(),
        }
    }
}

impl SocketConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "read_chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.stderr_line_limit == 0 {
            return Err(ConfigError::ValidationError(
                "stderr_line_limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Options handed to the engine for each channel.
    #[must_use]
    pub fn channel_options(&self) -> crate::engine::ChannelOptions {
        crate::engine::ChannelOptions {
            overlapped: self.overlapped,
            read_chunk_size: self.read_chunk_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = SocketConfig::from_toml_str("").unwrap();
        assert_eq!(config, SocketConfig::default());
        assert_eq!(config.read_chunk_size, 4096);
        assert!(!config.overlapped);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = SocketConfig::from_toml_str(
            "read_chunk_size = 512\n[log]\nformat = \"json\"\nlevel = \"debug\"\n",
        )
        .unwrap();
        assert_eq!(config.read_chunk_size, 512);
        assert_eq!(config.stderr_line_limit, DEFAULT_STDERR_LINE_LIMIT);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = SocketConfig::from_toml_str("read_chunk_size = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn zero_line_limit_is_rejected() {
        let err = SocketConfig::from_toml_str("stderr_line_limit = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = SocketConfig::from_toml_str("read_chunk_size = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed(_)));
    }

    #[test]
    fn log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn channel_options_follow_config() {
        let config = SocketConfig {
            overlapped: true,
            read_chunk_size: 99,
            ..SocketConfig::default()
        };
        let opts = config.channel_options();
        assert!(opts.overlapped);
        assert_eq!(opts.read_chunk_size, 99);
    }
}
