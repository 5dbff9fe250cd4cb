//! # scopewire
//!
//! Typed dependency injection with scoped lifecycles.
//!
//! Dependencies are identified by typed [`Token`]s and built by
//! [`Provider`]s registered in a [`Container`]. Each registration carries a
//! lifecycle: Singleton (one per container), Session and Request (one per
//! entered scope) or Transient (one per resolution). Resolution state such as
//! the active scopes, overrides and the cycle-detection path travels in an
//! explicit [`Resolver`] handle rather than in globals.
//!
//! ## Module Categories
//!
//! ### Core
//! | Module | Description |
//! |--------|-------------|
//! | [`token`] | Typed tokens, scope kinds, token factory |
//! | [`provider`] | Sync/async factories and close capabilities |
//! | [`registry`] | Write-once token → provider bindings |
//! | [`resolver`] | Resolution engine and singleton single-flight |
//! | [`scope`] | Request/Session caches, overrides, givens, scope guards |
//! | `cleanup` | LIFO teardown of tracked resources |
//! | [`container`] | Composition root |
//!
//! ### Configuration & Observability
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | TOML/env configuration via figment |
//! | [`logging`] | Structured logging with tracing |
//! | [`stats`] | Cache hit/miss statistics |
//! | [`constants`] | Defaults |
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use scopewire::{Container, Provider, Resolver, Token};
//!
//! struct RequestId(usize);
//!
//! let counter = Arc::new(AtomicUsize::new(0));
//! let request_id = Token::<RequestId>::request("request_id");
//!
//! let container = Container::new();
//! let next = Arc::clone(&counter);
//! container.register(&request_id, Provider::new(move |_: &Resolver| {
//!     Ok(RequestId(next.fetch_add(1, Ordering::SeqCst)))
//! }))?;
//!
//! let request = container.enter_request();
//! let first = request.get(&request_id)?;
//! let again = request.get(&request_id)?;
//! assert!(Arc::ptr_eq(&first, &again));
//! # Ok::<(), scopewire::Error>(())
//! ```

// Core modules
mod cleanup;
pub mod container;
pub mod provider;
pub mod registry;
pub mod resolver;
pub mod scope;
pub mod token;

// Ambient modules
pub mod config;
pub mod constants;
pub mod error;
pub mod error_ext;
pub mod logging;
pub mod stats;

// Re-export commonly used types
pub use config::{ConfigLoader, ContainerConfig};
pub use container::Container;
pub use error::{BoxError, CloseFailure, Error, Result};
pub use error_ext::ErrorContext;
pub use provider::{AsyncClose, Close, Provider, ProviderKind};
pub use registry::{Registration, Registry};
pub use resolver::Resolver;
pub use scope::{Givens, OverrideGuard, Overrides, ScopeGuard, ScopeId};
pub use stats::ContainerStats;
pub use token::{ScopeKind, Token, TokenFactory, TokenKey};
