//! Error extension utilities
//!
//! Context helpers that convert foreign errors into the crate [`Error`],
//! mostly for use inside providers and the configuration loader.

use std::fmt;

use crate::error::{Error, Result};

/// Extension trait for adding context to errors
///
/// # Example
///
/// ```
/// use scopewire::error_ext::ErrorContext;
/// use scopewire::{Provider, Resolver};
///
/// let port = Provider::new(|_: &Resolver| {
///     "8080".parse::<u16>().context("Invalid port")
/// });
/// # let _ = port;
/// ```
pub trait ErrorContext<T> {
    /// Convert the error into a provider failure with context
    fn context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static;

    /// Add context with lazy evaluation
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;

    /// Convert the error into a configuration failure with context
    fn config_context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static,
        Self: Sized;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|err| Error::Provider {
            message: format!("{}: {}", context, err),
            source: Some(Box::new(err)),
        })
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|err| Error::Provider {
            message: format!("{}: {}", f(), err),
            source: Some(Box::new(err)),
        })
    }

    fn config_context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static,
        Self: Sized,
    {
        self.map_err(|err| Error::Configuration {
            message: format!("{}: {}", context, err),
            source: Some(Box::new(err)),
        })
    }
}

