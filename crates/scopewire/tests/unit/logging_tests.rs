//! Tests for logging helpers

use scopewire::config::LoggingConfig;
use scopewire::logging::parse_log_level;
use tracing::Level;

#[test]
fn test_parse_log_level() {
    assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
    assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
    assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
    assert_eq!(parse_log_level("warning").unwrap(), Level::WARN);
    assert_eq!(parse_log_level("error").unwrap(), Level::ERROR);
}

#[test]
fn test_parse_log_level_rejects_unknown() {
    let err = parse_log_level("verbose").unwrap_err();
    assert!(err.to_string().contains("Invalid log level: verbose"));
}

#[test]
fn test_logging_config_serde_defaults() {
    let config: LoggingConfig = toml::from_str("json_format = true").unwrap();

    assert!(config.json_format);
    assert_eq!(config.level, "info");
    assert!(config.file_output.is_none());
}
