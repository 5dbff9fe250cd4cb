//! Container constants
//!
//! Defaults for configuration values and the names used to locate
//! configuration files and environment overrides.

// ============================================================================
// Resolution Constants
// ============================================================================

/// Maximum length of a resolution path before `DepthExceeded` is raised
pub const DEFAULT_MAX_RESOLUTION_DEPTH: usize = 128;

/// Whether hit/miss counters are maintained by default
pub const DEFAULT_COLLECT_STATS: bool = true;

// ============================================================================
// Cleanup Constants
// ============================================================================

/// Per-resource async close timeout, in seconds (0 disables the timeout)
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Environment variable prefix for configuration overrides
pub const CONFIG_ENV_PREFIX: &str = "SCOPEWIRE";

/// Separator between nested keys in environment variable names
pub const CONFIG_ENV_SEPARATOR: &str = "__";

/// Default configuration file name
pub const DEFAULT_CONFIG_FILENAME: &str = "scopewire.toml";

/// Default configuration directory name
pub const DEFAULT_CONFIG_DIR: &str = "scopewire";

// ============================================================================
// Logging Constants
// ============================================================================

/// Environment variable that overrides the configured log filter
pub const LOG_FILTER_ENV: &str = "SCOPEWIRE_LOG";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default log file stem when a file path has none
pub const DEFAULT_LOG_FILE_STEM: &str = "scopewire";
