//! Error handling types

use std::fmt;

use thiserror::Error;

use crate::token::{ScopeKind, TokenKey};

/// Boxed error returned by close capabilities and carried as a source
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for operations that can fail
pub type Result<T> = std::result::Result<T, Error>;

/// A single resource that failed to close during a cleanup pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFailure {
    /// Label of the tracked resource (its token)
    pub resource: String,
    /// Rendered close error
    pub message: String,
}

impl fmt::Display for CloseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.resource, self.message)
    }
}

/// Main error type for the container
#[derive(Error, Debug)]
pub enum Error {
    /// No provider registered for the token
    #[error("No provider registered for token '{token}'")]
    NotFound {
        /// The token that was requested
        token: TokenKey,
    },

    /// A second registration was attempted for the same token
    #[error("Token '{token}' is already registered")]
    AlreadyRegistered {
        /// The token that already has a binding
        token: TokenKey,
    },

    /// The token is already on the resolution path of the current call tree
    #[error("Circular dependency detected: {}", render_chain(.chain))]
    CircularDependency {
        /// Resolution path, ending with the token that closed the cycle
        chain: Vec<TokenKey>,
    },

    /// The provider result was rejected by the token's validator
    #[error("Provider for token '{token}' returned an instance incompatible with {expected}")]
    TypeValidation {
        /// The token being resolved
        token: TokenKey,
        /// Declared type name
        expected: &'static str,
    },

    /// `get` was called for a token bound to an async provider
    #[error("Provider for token '{token}' is async; resolve it with aget()")]
    SyncResolutionOfAsyncProvider {
        /// The token being resolved
        token: TokenKey,
    },

    /// Synchronous teardown refused because async-only resources are tracked
    #[error(
        "Resources require async cleanup ({}); use aclose() instead of dispose()",
        .resources.join(", ")
    )]
    AsyncCleanupRequired {
        /// Labels of the async-only resources
        resources: Vec<String>,
    },

    /// A Request/Session token was resolved with no active scope of that tier
    #[error("No active {scope} scope while resolving token '{token}'")]
    NoActiveScope {
        /// The token being resolved
        token: TokenKey,
        /// The tier the token is bound to
        scope: ScopeKind,
    },

    /// The resolution path grew beyond the configured limit
    #[error("Resolution depth exceeded {max_depth} while resolving token '{token}'")]
    DepthExceeded {
        /// The token being resolved
        token: TokenKey,
        /// Configured limit
        max_depth: usize,
    },

    /// One or more tracked resources failed to close
    #[error(
        "{} resource(s) failed to close: {}",
        .failures.len(),
        .failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
    )]
    Cleanup {
        /// Every failure of the pass, in the order the closes were attempted
        failures: Vec<CloseFailure>,
    },

    /// Failure reported by a provider
    #[error("Provider error: {message}")]
    Provider {
        /// Description of the failure
        message: String,
        /// Optional source error
        #[source]
        source: Option<BoxError>,
    },

    /// Configuration-related error
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error
        message: String,
        /// Optional source error
        #[source]
        source: Option<BoxError>,
    },
}

fn render_chain(chain: &[TokenKey]) -> String {
    chain
        .iter()
        .map(|key| key.name().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

// Basic error creation methods
impl Error {
    /// Create a provider error
    pub fn provider<S: Into<String>>(message: S) -> Self {
        Self::Provider {
            message: message.into(),
            source: None,
        }
    }

    /// Create a provider error with source
    pub fn provider_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Provider {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with source
    pub fn configuration_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Configuration {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Classification
impl Error {
    /// Whether this is one of the resolution failures surfaced by `get`/`aget`
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::CircularDependency { .. }
                | Self::TypeValidation { .. }
                | Self::SyncResolutionOfAsyncProvider { .. }
        )
    }

    /// The resolution chain of a circular dependency error
    pub fn cycle_chain(&self) -> Option<&[TokenKey]> {
        match self {
            Self::CircularDependency { chain } => Some(chain),
            _ => None,
        }
    }
}
