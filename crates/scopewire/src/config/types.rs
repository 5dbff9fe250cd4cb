//! Configuration types

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Container configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Resolution engine settings
    #[serde(default)]
    pub resolution: ResolutionConfig,

    /// Teardown settings
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Resolution engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Maximum resolution path length
    pub max_depth: usize,

    /// Maintain cache hit/miss counters
    pub collect_stats: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_RESOLUTION_DEPTH,
            collect_stats: DEFAULT_COLLECT_STATS,
        }
    }
}

/// Cleanup configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Upper bound for each async close, in seconds (0 = unbounded)
    pub close_timeout_secs: u64,
}

impl CleanupConfig {
    /// Timeout applied to each async close
    pub fn close_timeout(&self) -> Option<Duration> {
        (self.close_timeout_secs > 0).then(|| Duration::from_secs(self.close_timeout_secs))
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            close_timeout_secs: DEFAULT_CLOSE_TIMEOUT_SECS,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON output format
    pub json_format: bool,

    /// Log to file in addition to stdout
    pub file_output: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            json_format: false,
            file_output: None,
        }
    }
}
