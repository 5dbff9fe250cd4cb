//! Providers and close capabilities
//!
//! A [`Provider<T>`] wraps the factory the container invokes to build an
//! instance for a token. Factories receive the [`Resolver`] of the call that
//! triggered them and resolve their own dependencies through it.
//!
//! ```
//! use std::sync::Arc;
//! use scopewire::{Provider, Resolver, Token};
//!
//! struct Config { url: String }
//! struct Pool { url: String }
//!
//! let config = Token::<Config>::singleton("config");
//! let config_dep = config.clone();
//! let pool = Provider::new(move |r: &Resolver| {
//!     let config = r.get(&config_dep)?;
//!     Ok(Pool { url: config.url.clone() })
//! });
//! # let _ = (pool, config);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::cleanup::{CloseAction, TrackedResource};
use crate::error::{BoxError, Result};
use crate::resolver::Resolver;

/// Synchronous close capability
pub trait Close: Send + Sync {
    /// Release the resource
    fn close(&self) -> std::result::Result<(), BoxError>;
}

/// Asynchronous close capability
#[async_trait]
pub trait AsyncClose: Send + Sync {
    /// Release the resource
    async fn aclose(&self) -> std::result::Result<(), BoxError>;
}

/// Whether a provider can be invoked without awaiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Plain function call
    Sync,
    /// Returns a future; only resolvable with `aget`
    Async,
}

pub(crate) type SyncFactory<T> = Arc<dyn Fn(&Resolver) -> Result<Arc<T>> + Send + Sync>;
pub(crate) type AsyncFactory<T> =
    Arc<dyn Fn(Resolver) -> BoxFuture<'static, Result<Arc<T>>> + Send + Sync>;
type CloseHook<T> = Arc<dyn Fn(Arc<T>) -> CloseAction + Send + Sync>;

pub(crate) enum Factory<T: ?Sized> {
    Sync(SyncFactory<T>),
    Async(AsyncFactory<T>),
}

impl<T: ?Sized> Clone for Factory<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(f) => Self::Sync(Arc::clone(f)),
            Self::Async(f) => Self::Async(Arc::clone(f)),
        }
    }
}

/// Factory capability for instances of `T`
pub struct Provider<T: ?Sized> {
    factory: Factory<T>,
    close: Option<CloseHook<T>>,
}

impl<T: Send + Sync + 'static> Provider<T> {
    /// Synchronous factory producing an owned value
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&Resolver) -> Result<T> + Send + Sync + 'static,
    {
        Self::new_arc(move |r: &Resolver| factory(r).map(Arc::new))
    }

    /// Asynchronous factory producing an owned value
    pub fn new_async<F, Fut>(factory: F) -> Self
    where
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::new_async_arc(move |r: Resolver| factory(r).map(|result| result.map(Arc::new)))
    }
}

impl<T: ?Sized + Send + Sync + 'static> Provider<T> {
    /// Synchronous factory producing a shared instance (works for trait objects)
    pub fn new_arc<F>(factory: F) -> Self
    where
        F: Fn(&Resolver) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        Self {
            factory: Factory::Sync(Arc::new(factory)),
            close: None,
        }
    }

    /// Asynchronous factory producing a shared instance (works for trait objects)
    pub fn new_async_arc<F, Fut>(factory: F) -> Self
    where
        F: Fn(Resolver) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<T>>> + Send + 'static,
    {
        Self {
            factory: Factory::Async(Arc::new(move |r: Resolver| factory(r).boxed())),
            close: None,
        }
    }

    /// Pre-built instance, handed out as-is
    pub fn value(instance: Arc<T>) -> Self {
        Self::new_arc(move |_: &Resolver| Ok(Arc::clone(&instance)))
    }

    /// Track created instances for synchronous teardown
    #[must_use]
    pub fn closing(mut self) -> Self
    where
        T: Close,
    {
        self.close = Some(Arc::new(|instance: Arc<T>| {
            CloseAction::Sync(Box::new(move || instance.close()))
        }));
        self
    }

    /// Track created instances for asynchronous teardown
    #[must_use]
    pub fn aclosing(mut self) -> Self
    where
        T: AsyncClose,
    {
        self.close = Some(Arc::new(|instance: Arc<T>| {
            CloseAction::Async(Box::new(move || {
                async move { instance.aclose().await }.boxed()
            }))
        }));
        self
    }

    /// Sync or async
    pub fn kind(&self) -> ProviderKind {
        match self.factory {
            Factory::Sync(_) => ProviderKind::Sync,
            Factory::Async(_) => ProviderKind::Async,
        }
    }

    /// Whether created instances are tracked for teardown
    pub fn is_tracked(&self) -> bool {
        self.close.is_some()
    }

    pub(crate) fn factory(&self) -> &Factory<T> {
        &self.factory
    }

    pub(crate) fn tracked(&self, label: &str, instance: &Arc<T>) -> Option<TrackedResource> {
        self.close
            .as_ref()
            .map(|hook| TrackedResource::new(label, hook(Arc::clone(instance))))
    }
}

impl<T: ?Sized> Clone for Provider<T> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            close: self.close.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Provider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.factory {
            Factory::Sync(_) => ProviderKind::Sync,
            Factory::Async(_) => ProviderKind::Async,
        };
        f.debug_struct("Provider")
            .field("kind", &kind)
            .field("tracked", &self.close.is_some())
            .finish()
    }
}
