//! Scope management
//!
//! Request and Session caches, override layers and the guards that bound
//! them. A guard dereferences to a child [`Resolver`]; the parent resolver is
//! never mutated, so leaving the guard restores the previous state exactly
//! and concurrent call trees never observe each other's caches or overrides.
//!
//! ## Usage
//!
//! ```ignore
//! let request = container.enter_request();
//! let user = request.get(&CURRENT_USER)?;
//!
//! {
//!     let nested = request.enter_request();
//!     // fresh cache: nothing resolved in `request` is visible here
//! }
//!
//! request.aclose().await?;
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::cleanup::CleanupStack;
use crate::error::{Error, Result};
use crate::resolver::Resolver;
use crate::token::{ScopeKind, Token, TokenKey};

/// Type-erased cached instance; always holds an `Arc<T>`
pub(crate) type Instance = Arc<dyn Any + Send + Sync>;

pub(crate) fn erase<T: ?Sized + Send + Sync + 'static>(instance: &Arc<T>) -> Instance {
    Arc::new(Arc::clone(instance))
}

pub(crate) fn unerase<T: ?Sized + Send + Sync + 'static>(
    token: &Token<T>,
    instance: &Instance,
) -> Result<Arc<T>> {
    instance
        .downcast_ref::<Arc<T>>()
        .cloned()
        .ok_or_else(|| Error::TypeValidation {
            token: token.key().clone(),
            expected: token.type_name(),
        })
}

/// Unique identifier of an entered Request/Session scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// Cache and cleanup stack of one entered Request/Session scope
pub(crate) struct ScopeCache {
    id: ScopeId,
    kind: ScopeKind,
    pub(crate) entries: DashMap<TokenKey, Instance>,
    pub(crate) resources: CleanupStack,
    closed: AtomicBool,
}

impl ScopeCache {
    pub(crate) fn new(kind: ScopeKind) -> Self {
        Self {
            id: ScopeId::next(),
            kind,
            entries: DashMap::new(),
            resources: CleanupStack::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> ScopeId {
        self.id
    }

    pub(crate) fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn mark_closed(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        self.entries.clear();
        first
    }

    /// Synchronous teardown; leaves the scope open when the circuit breaker trips
    fn finish_sync(&self) -> Result<()> {
        if self.resources.has_async() {
            return Err(Error::AsyncCleanupRequired {
                resources: self.resources.labels(),
            });
        }
        self.mark_closed();
        debug!(scope = %self.id, kind = %self.kind, "Closing scope");
        self.resources.close_sync()
    }

    async fn finish_async(&self, timeout: Option<Duration>) -> Result<()> {
        self.mark_closed();
        debug!(scope = %self.id, kind = %self.kind, "Closing scope (async)");
        self.resources.close_async(timeout).await
    }

    /// Teardown for a guard dropped without an explicit close
    fn finish_on_drop(self: &Arc<Self>, timeout: Option<Duration>) {
        if !self.mark_closed() {
            return;
        }
        if self.resources.is_empty() {
            debug!(scope = %self.id, kind = %self.kind, "Scope exited");
            return;
        }

        if !self.resources.has_async() {
            if let Err(e) = self.resources.close_sync() {
                warn!(scope = %self.id, error = %e, "Scope cleanup failed");
            }
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let cache = Arc::clone(self);
                handle.spawn(async move {
                    if let Err(e) = cache.resources.close_async(timeout).await {
                        warn!(scope = %cache.id, error = %e, "Scope cleanup failed");
                    }
                });
            }
            Err(_) => {
                let (failures, skipped) = self.resources.close_sync_partial();
                for failure in failures {
                    warn!(
                        scope = %self.id,
                        resource = %failure.resource,
                        error = %failure.message,
                        "Scope cleanup failed"
                    );
                }
                if !skipped.is_empty() {
                    warn!(
                        scope = %self.id,
                        resources = ?skipped,
                        "Scope dropped outside a Tokio runtime; async resources were not closed"
                    );
                }
            }
        }
    }
}

impl fmt::Debug for ScopeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeCache")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("entries", &self.entries.len())
            .field("resources", &self.resources)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Token → value mapping installed with `use_overrides`
///
/// ```
/// use std::sync::Arc;
/// use scopewire::{Overrides, Token};
///
/// let port = Token::<u16>::singleton("port");
/// let overrides = Overrides::new().with(&port, Arc::new(8080));
/// assert_eq!(overrides.len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct Overrides {
    values: HashMap<TokenKey, Instance>,
}

impl Overrides {
    /// Empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an override, builder style
    #[must_use]
    pub fn with<T: ?Sized + Send + Sync + 'static>(
        mut self,
        token: &Token<T>,
        value: Arc<T>,
    ) -> Self {
        self.insert(token, value);
        self
    }

    /// Add an override
    pub fn insert<T: ?Sized + Send + Sync + 'static>(&mut self, token: &Token<T>, value: Arc<T>) {
        self.values.insert(token.key().clone(), erase(&value));
    }

    /// Number of overridden tokens
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing is overridden
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn layer_over(self, parent: Option<&OverrideLayer>) -> OverrideLayer {
        let mut layer = parent.cloned().unwrap_or_default();
        layer.values.extend(self.values);
        layer
    }
}

impl fmt::Debug for Overrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Type → instance mapping installed with `using`
///
/// Givens only affect resolution by type (`get_type`/`aget_type`) and
/// [`Resolver::resolve_given`]; token resolution is untouched.
///
/// ```
/// use std::sync::Arc;
/// use scopewire::Givens;
///
/// let givens = Givens::new().with(Arc::new(3_u8)).with::<str>(Arc::from("eu-west"));
/// assert_eq!(givens.len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct Givens {
    values: HashMap<TypeId, Instance>,
}

impl Givens {
    /// Empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a given, builder style
    #[must_use]
    pub fn with<T: ?Sized + Send + Sync + 'static>(mut self, value: Arc<T>) -> Self {
        self.insert(value);
        self
    }

    /// Add a given
    pub fn insert<T: ?Sized + Send + Sync + 'static>(&mut self, value: Arc<T>) {
        self.values.insert(TypeId::of::<T>(), erase(&value));
    }

    /// Number of given types
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing is given
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn layer_over(self, parent: Option<&OverrideLayer>) -> OverrideLayer {
        let mut layer = parent.cloned().unwrap_or_default();
        layer.givens.extend(self.values);
        layer
    }
}

impl fmt::Debug for Givens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Givens")
            .field("types", &self.values.len())
            .finish()
    }
}

/// Flattened override stack frame: the parent's entries shadowed by the new ones
#[derive(Clone, Default)]
pub(crate) struct OverrideLayer {
    values: HashMap<TokenKey, Instance>,
    givens: HashMap<TypeId, Instance>,
}

impl OverrideLayer {
    pub(crate) fn get(&self, key: &TokenKey) -> Option<&Instance> {
        self.values.get(key)
    }

    pub(crate) fn given(&self, type_id: TypeId) -> Option<&Instance> {
        self.givens.get(&type_id)
    }
}

/// Guard for an entered Request or Session scope
///
/// Dereferences to the scope's [`Resolver`]. Call [`close`](Self::close) or
/// [`aclose`](Self::aclose) to observe cleanup failures; dropping an unclosed
/// guard tears the scope down on a best-effort basis.
pub struct ScopeGuard {
    resolver: Resolver,
    cache: Arc<ScopeCache>,
    close_timeout: Option<Duration>,
}

impl ScopeGuard {
    pub(crate) fn new(
        resolver: Resolver,
        cache: Arc<ScopeCache>,
        close_timeout: Option<Duration>,
    ) -> Self {
        debug!(scope = %cache.id(), kind = %cache.kind(), "Entered scope");
        Self {
            resolver,
            cache,
            close_timeout,
        }
    }

    /// Scope identifier
    pub fn id(&self) -> ScopeId {
        self.cache.id()
    }

    /// Request or Session
    pub fn kind(&self) -> ScopeKind {
        self.cache.kind()
    }

    /// Resolver bound to this scope
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Number of instances cached in this scope
    pub fn cached(&self) -> usize {
        self.cache.entries.len()
    }

    /// Number of resources awaiting teardown in this scope
    pub fn tracked_resources(&self) -> usize {
        self.cache.resources.len()
    }

    /// Whether the scope has been torn down
    pub fn is_closed(&self) -> bool {
        self.cache.is_closed()
    }

    /// Synchronous teardown
    ///
    /// Fails with `AsyncCleanupRequired` and closes nothing when the scope
    /// tracks async-only resources; the scope stays open so `aclose` can
    /// still be used.
    pub fn close(&mut self) -> Result<()> {
        self.cache.finish_sync()
    }

    /// Asynchronous teardown: async closes first, then sync closes
    pub async fn aclose(&mut self) -> Result<()> {
        self.cache.finish_async(self.close_timeout).await
    }
}

impl Deref for ScopeGuard {
    type Target = Resolver;

    fn deref(&self) -> &Resolver {
        &self.resolver
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.cache.finish_on_drop(self.close_timeout);
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("scope", &self.cache)
            .finish()
    }
}

/// Guard for an override or given layer
///
/// Dereferences to a [`Resolver`] that sees the layer; resolvers outside the
/// guard never do.
pub struct OverrideGuard {
    resolver: Resolver,
    overridden: usize,
}

impl OverrideGuard {
    pub(crate) fn new(resolver: Resolver, overridden: usize) -> Self {
        debug!(overridden, "Entered override scope");
        Self {
            resolver,
            overridden,
        }
    }

    /// Resolver that sees the overrides
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }
}

impl Deref for OverrideGuard {
    type Target = Resolver;

    fn deref(&self) -> &Resolver {
        &self.resolver
    }
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        debug!(overridden = self.overridden, "Exited override scope");
    }
}

impl fmt::Debug for OverrideGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverrideGuard")
            .field("overridden", &self.overridden)
            .finish()
    }
}

/// Run `body` inside a freshly entered scope and tear the scope down afterwards
pub(crate) async fn run_scoped<F, Fut, R>(mut guard: ScopeGuard, body: F) -> Result<R>
where
    F: FnOnce(Resolver) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let outcome = body(guard.resolver().clone()).await;
    let cleanup = guard.aclose().await;
    match (outcome, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup_err)) => {
            warn!(
                scope = %guard.id(),
                error = %cleanup_err,
                "Scope cleanup failed after body error"
            );
            Err(e)
        }
    }
}
