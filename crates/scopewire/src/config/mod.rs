//! Configuration management
//!
//! Typed container settings and the figment-based loader that assembles them
//! from defaults, a TOML file and `SCOPEWIRE__*` environment variables.

pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::{CleanupConfig, ContainerConfig, LoggingConfig, ResolutionConfig};
