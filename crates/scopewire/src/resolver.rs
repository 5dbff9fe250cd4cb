//! Resolution engine
//!
//! A [`Resolver`] is the context of one call tree: the container, the active
//! override layer, the active Session/Request caches and the resolution path.
//! Every `get`/`aget` walks the same states:
//!
//! ```text
//! override? ──yes──► return value
//!    │no
//! token on path? ──yes──► CircularDependency [.., token]
//!    │no
//! registry lookup ──missing──► NotFound
//!    │
//! tier cache hit? ──yes──► return cached
//!    │no
//! async provider on sync path? ──yes──► SyncResolutionOfAsyncProvider
//!    │no
//! invoke (singletons: per-token lock, double-checked) ─► validate ─► store ─► track
//! ```
//!
//! Providers receive a child resolver whose path includes the token being
//! built, so cycle detection is scoped to the call tree and never sees
//! unrelated concurrent resolutions.

use std::any::TypeId;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::try_join_all;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, trace};

use crate::cleanup::{TrackedResource, aclose_orphan, close_orphan};
use crate::container::Container;
use crate::error::{Error, Result};
use crate::provider::{AsyncFactory, Factory, Provider};
use crate::registry::Registration;
use crate::scope::{
    Givens, Instance, OverrideGuard, OverrideLayer, Overrides, ScopeCache, ScopeGuard, ScopeId,
    erase, run_scoped, unerase,
};
use crate::token::{ScopeKind, Token, TokenKey};

/// Per-token singleton initialisation lock
///
/// Sync providers serialise on the thread mutex (from both `get` and `aget`,
/// without suspending); async providers serialise on the task mutex. A token
/// has exactly one provider, so its racers always share one of the two.
#[derive(Default)]
pub(crate) struct InitLock {
    thread: parking_lot::Mutex<()>,
    task: tokio::sync::Mutex<()>,
}

/// Lazily allocated init locks, discarded once the singleton is cached
#[derive(Default)]
pub(crate) struct SingletonLocks {
    locks: DashMap<TokenKey, Arc<InitLock>>,
}

impl SingletonLocks {
    pub(crate) fn acquire(&self, key: &TokenKey) -> Arc<InitLock> {
        Arc::clone(self.locks.entry(key.clone()).or_default().value())
    }

    /// Remove the entry if it is still the lock the caller used
    pub(crate) fn release(&self, key: &TokenKey, lock: &Arc<InitLock>) {
        self.locks
            .remove_if(key, |_, current| Arc::ptr_eq(current, lock));
    }

    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

/// A built instance that was not handed out, with its close action
struct Rejected {
    error: Error,
    orphan: Option<TrackedResource>,
}

impl Rejected {
    fn new(error: Error, orphan: Option<TrackedResource>) -> Self {
        Self { error, orphan }
    }

    fn discard(self, timeout: Option<Duration>) -> Error {
        if let Some(resource) = self.orphan {
            close_orphan(resource, timeout);
        }
        self.error
    }

    async fn adiscard(self, timeout: Option<Duration>) -> Error {
        if let Some(resource) = self.orphan {
            aclose_orphan(resource, timeout).await;
        }
        self.error
    }
}

struct PathNode {
    key: TokenKey,
    parent: Option<Arc<PathNode>>,
    depth: usize,
}

/// Resolution context handle
///
/// Cheap to clone. Obtained from [`Container::resolver`], from scope and
/// override guards (through `Deref`), and passed to every provider.
#[derive(Clone)]
pub struct Resolver {
    container: Container,
    overrides: Option<Arc<OverrideLayer>>,
    session: Option<Arc<ScopeCache>>,
    request: Option<Arc<ScopeCache>>,
    path: Option<Arc<PathNode>>,
}

impl Resolver {
    pub(crate) fn root(container: Container) -> Self {
        Self {
            container,
            overrides: None,
            session: None,
            request: None,
            path: None,
        }
    }

    /// Owning container
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Tokens currently being built by this call tree, outermost first
    pub fn path(&self) -> Vec<TokenKey> {
        let mut keys = Vec::with_capacity(self.depth());
        let mut node = self.path.as_deref();
        while let Some(current) = node {
            keys.push(current.key.clone());
            node = current.parent.as_deref();
        }
        keys.reverse();
        keys
    }

    /// Length of the resolution path
    pub fn depth(&self) -> usize {
        self.path.as_ref().map_or(0, |node| node.depth)
    }

    /// Id of the active request scope, if any
    pub fn request_id(&self) -> Option<ScopeId> {
        self.request
            .as_ref()
            .filter(|cache| !cache.is_closed())
            .map(|cache| cache.id())
    }

    /// Id of the active session scope, if any
    pub fn session_id(&self) -> Option<ScopeId> {
        self.session
            .as_ref()
            .filter(|cache| !cache.is_closed())
            .map(|cache| cache.id())
    }

    // ========================================================================
    // Scope management
    // ========================================================================

    /// Enter a fresh request scope; nothing from an enclosing request is inherited
    pub fn enter_request(&self) -> ScopeGuard {
        let cache = Arc::new(ScopeCache::new(ScopeKind::Request));
        let resolver = Self {
            request: Some(Arc::clone(&cache)),
            ..self.clone()
        };
        ScopeGuard::new(resolver, cache, self.container.close_timeout())
    }

    /// Enter a fresh session scope
    pub fn enter_session(&self) -> ScopeGuard {
        let cache = Arc::new(ScopeCache::new(ScopeKind::Session));
        let resolver = Self {
            session: Some(Arc::clone(&cache)),
            ..self.clone()
        };
        ScopeGuard::new(resolver, cache, self.container.close_timeout())
    }

    /// Shadow tokens with fixed values for resolutions made through the guard
    pub fn use_overrides(&self, overrides: Overrides) -> OverrideGuard {
        let overridden = overrides.len();
        let layer = overrides.layer_over(self.overrides.as_deref());
        let resolver = Self {
            overrides: Some(Arc::new(layer)),
            ..self.clone()
        };
        OverrideGuard::new(resolver, overridden)
    }

    /// Shadow by-type resolution with given instances for resolutions made
    /// through the guard
    pub fn using(&self, givens: Givens) -> OverrideGuard {
        let overridden = givens.len();
        let layer = givens.layer_over(self.overrides.as_deref());
        let resolver = Self {
            overrides: Some(Arc::new(layer)),
            ..self.clone()
        };
        OverrideGuard::new(resolver, overridden)
    }

    /// Given instance for `T`: the innermost `using` layer first, then the
    /// container's givens
    pub fn resolve_given<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let type_id = TypeId::of::<T>();
        self.overrides
            .as_ref()
            .and_then(|layer| layer.given(type_id).cloned())
            .or_else(|| self.container.given_for(type_id))
            .and_then(|instance| instance.downcast_ref::<Arc<T>>().cloned())
    }

    /// Run `body` in a fresh request scope, then run its async cleanup pass
    pub async fn in_request<F, Fut, R>(&self, body: F) -> Result<R>
    where
        F: FnOnce(Resolver) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        run_scoped(self.enter_request(), body).await
    }

    /// Run `body` in a fresh session scope, then run its async cleanup pass
    pub async fn in_session<F, Fut, R>(&self, body: F) -> Result<R>
    where
        F: FnOnce(Resolver) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        run_scoped(self.enter_session(), body).await
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Resolve synchronously
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self, token: &Token<T>) -> Result<Arc<T>> {
        if let Some(value) = self.overridden(token)? {
            return Ok(value);
        }
        let child = self.descend(token.key())?;
        let registration = self.container.registry().lookup(token.key())?;
        if let Some(hit) = self.cached(token, &registration)? {
            return Ok(hit);
        }

        let provider = provider_of(token, &registration)?;
        let Factory::Sync(factory) = provider.factory() else {
            return Err(Error::SyncResolutionOfAsyncProvider {
                token: token.key().clone(),
            });
        };

        if registration.scope() == ScopeKind::Singleton {
            return self.create_singleton_sync(token, provider, factory.as_ref(), &child);
        }

        self.container.stats_counters().miss();
        debug!(token = %token.key(), scope = %registration.scope(), "Invoking provider");
        let instance = factory(&child)?;
        self.store_scoped(token, &registration, provider, instance)
            .map_err(|rejected| rejected.discard(self.container.close_timeout()))
    }

    /// Resolve asynchronously; accepts sync and async providers
    ///
    /// A sync singleton provider still serialises on a blocking lock. On a
    /// multi-thread runtime that section runs under
    /// [`tokio::task::block_in_place`], so waiting for a slow creation on
    /// another thread does not stall the worker's other tasks; on a
    /// current-thread runtime it blocks the executor.
    pub async fn aget<T: ?Sized + Send + Sync + 'static>(
        &self,
        token: &Token<T>,
    ) -> Result<Arc<T>> {
        if let Some(value) = self.overridden(token)? {
            return Ok(value);
        }
        let child = self.descend(token.key())?;
        let registration = self.container.registry().lookup(token.key())?;
        if let Some(hit) = self.cached(token, &registration)? {
            return Ok(hit);
        }

        let provider = provider_of(token, &registration)?;
        match (provider.factory(), registration.scope()) {
            (Factory::Sync(factory), ScopeKind::Singleton) => blocking_section(|| {
                self.create_singleton_sync(token, provider, factory.as_ref(), &child)
            }),
            (Factory::Async(factory), ScopeKind::Singleton) => {
                let factory = Arc::clone(factory);
                self.create_singleton_async(token, provider, factory, child)
                    .await
            }
            (Factory::Sync(factory), _) => {
                self.container.stats_counters().miss();
                debug!(token = %token.key(), scope = %registration.scope(), "Invoking provider");
                let instance = factory(&child)?;
                self.astore_scoped(token, &registration, provider, instance)
                    .await
            }
            (Factory::Async(factory), _) => {
                self.container.stats_counters().miss();
                debug!(
                    token = %token.key(),
                    scope = %registration.scope(),
                    "Invoking async provider"
                );
                let instance = factory(child).await?;
                self.astore_scoped(token, &registration, provider, instance)
                    .await
            }
        }
    }

    /// Resolve by declared type (see [`Container::get_type`])
    ///
    /// Given instances take precedence over registrations.
    pub fn get_type<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        if let Some(given) = self.resolve_given::<T>() {
            return Ok(given);
        }
        self.get(&self.container.type_token::<T>())
    }

    /// Resolve by declared type asynchronously
    pub async fn aget_type<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        if let Some(given) = self.resolve_given::<T>() {
            return Ok(given);
        }
        let token = self.container.type_token::<T>();
        self.aget(&token).await
    }

    /// Resolve several tokens, longest-lived scopes first
    ///
    /// Results come back in the order of `tokens`; the first failure aborts
    /// the batch.
    pub fn batch_get<T: ?Sized + Send + Sync + 'static>(
        &self,
        tokens: &[Token<T>],
    ) -> Result<Vec<Arc<T>>> {
        let mut order: Vec<usize> = (0..tokens.len()).collect();
        order.sort_by_cached_key(|&index| lifetime_rank(self.bound_scope(&tokens[index])));

        let mut resolved: Vec<Option<Arc<T>>> = vec![None; tokens.len()];
        for index in order {
            resolved[index] = Some(self.get(&tokens[index])?);
        }
        Ok(resolved.into_iter().flatten().collect())
    }

    /// Resolve several tokens concurrently
    pub async fn batch_aget<T: ?Sized + Send + Sync + 'static>(
        &self,
        tokens: &[Token<T>],
    ) -> Result<Vec<Arc<T>>> {
        try_join_all(tokens.iter().map(|token| self.aget(token))).await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn overridden<T: ?Sized + Send + Sync + 'static>(
        &self,
        token: &Token<T>,
    ) -> Result<Option<Arc<T>>> {
        let key = token.key();
        let found: Option<Instance> = self
            .overrides
            .as_ref()
            .and_then(|layer| layer.get(key).cloned())
            .or_else(|| self.container.override_for(key));

        match found {
            Some(instance) => {
                trace!(token = %key, "Resolved from override");
                self.container.stats_counters().hit();
                unerase(token, &instance).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Scope the token is registered under, or its default when unregistered
    fn bound_scope<T: ?Sized>(&self, token: &Token<T>) -> ScopeKind {
        self.container
            .registry()
            .lookup(token.key())
            .map_or(token.scope(), |registration| registration.scope())
    }

    fn path_contains(&self, key: &TokenKey) -> bool {
        let mut node = self.path.as_deref();
        while let Some(current) = node {
            if current.key == *key {
                return true;
            }
            node = current.parent.as_deref();
        }
        false
    }

    /// Child context with `key` pushed onto the path
    fn descend(&self, key: &TokenKey) -> Result<Self> {
        if self.path_contains(key) {
            let mut chain = self.path();
            chain.push(key.clone());
            return Err(Error::CircularDependency { chain });
        }

        let depth = self.depth() + 1;
        let max_depth = self.container.config().resolution.max_depth;
        if depth > max_depth {
            return Err(Error::DepthExceeded {
                token: key.clone(),
                max_depth,
            });
        }

        Ok(Self {
            path: Some(Arc::new(PathNode {
                key: key.clone(),
                parent: self.path.clone(),
                depth,
            })),
            ..self.clone()
        })
    }

    /// Singleton providers never see Request/Session caches
    fn container_tier(&self) -> Self {
        Self {
            session: None,
            request: None,
            ..self.clone()
        }
    }

    /// Active cache for a Request/Session token; `None` for the other tiers
    fn tier_cache(&self, key: &TokenKey, scope: ScopeKind) -> Result<Option<&Arc<ScopeCache>>> {
        let slot = match scope {
            ScopeKind::Request => &self.request,
            ScopeKind::Session => &self.session,
            ScopeKind::Singleton | ScopeKind::Transient => return Ok(None),
        };
        slot.as_ref()
            .filter(|cache| !cache.is_closed())
            .map(Some)
            .ok_or_else(|| Error::NoActiveScope {
                token: key.clone(),
                scope,
            })
    }

    fn cached<T: ?Sized + Send + Sync + 'static>(
        &self,
        token: &Token<T>,
        registration: &Registration,
    ) -> Result<Option<Arc<T>>> {
        let key = token.key();
        let found = match registration.scope() {
            ScopeKind::Singleton => self.container.singleton(key),
            ScopeKind::Transient => None,
            scope => self
                .tier_cache(key, scope)?
                .and_then(|cache| cache.entries.get(key).map(|entry| Arc::clone(entry.value()))),
        };

        match found {
            Some(instance) => {
                trace!(token = %key, scope = %registration.scope(), "Cache hit");
                self.container.stats_counters().hit();
                unerase(token, &instance).map(Some)
            }
            None => Ok(None),
        }
    }

    fn create_singleton_sync<T: ?Sized + Send + Sync + 'static>(
        &self,
        token: &Token<T>,
        provider: &Provider<T>,
        factory: &(dyn Fn(&Resolver) -> Result<Arc<T>> + Send + Sync),
        child: &Resolver,
    ) -> Result<Arc<T>> {
        let key = token.key();
        let locks = self.container.singleton_locks();
        let lock = locks.acquire(key);

        let instance = {
            let guard = lock.thread.lock();
            if let Some(existing) = self.container.singleton(key) {
                drop(guard);
                locks.release(key, &lock);
                self.container.stats_counters().hit();
                return unerase(token, &existing);
            }

            self.container.stats_counters().miss();
            debug!(token = %key, "Creating singleton");
            let instance = factory(&child.container_tier())?;
            if let Err(error) = validate(token, &instance) {
                drop(guard);
                let orphan = provider.tracked(&key.to_string(), &instance);
                return Err(Rejected::new(error, orphan).discard(self.container.close_timeout()));
            }
            self.container.store_singleton(key, erase(&instance));
            drop(guard);
            instance
        };

        locks.release(key, &lock);
        if let Some(resource) = provider.tracked(&key.to_string(), &instance) {
            self.container.track(resource);
        }
        Ok(instance)
    }

    async fn create_singleton_async<T: ?Sized + Send + Sync + 'static>(
        &self,
        token: &Token<T>,
        provider: &Provider<T>,
        factory: AsyncFactory<T>,
        child: Resolver,
    ) -> Result<Arc<T>> {
        let key = token.key();
        let locks = self.container.singleton_locks();
        let lock = locks.acquire(key);

        let instance = {
            // Cancellation drops the guard before anything is cached
            let guard = lock.task.lock().await;
            if let Some(existing) = self.container.singleton(key) {
                drop(guard);
                locks.release(key, &lock);
                self.container.stats_counters().hit();
                return unerase(token, &existing);
            }

            self.container.stats_counters().miss();
            debug!(token = %key, "Creating singleton (async)");
            let instance = factory(child.container_tier()).await?;
            if let Err(error) = validate(token, &instance) {
                drop(guard);
                let orphan = provider.tracked(&key.to_string(), &instance);
                let timeout = self.container.close_timeout();
                return Err(Rejected::new(error, orphan).adiscard(timeout).await);
            }
            self.container.store_singleton(key, erase(&instance));
            drop(guard);
            instance
        };

        locks.release(key, &lock);
        if let Some(resource) = provider.tracked(&key.to_string(), &instance) {
            self.container.track(resource);
        }
        Ok(instance)
    }

    /// Cache (or, for transients, hand out) a freshly built instance
    ///
    /// An instance that cannot be handed out comes back as [`Rejected`] with
    /// its close action, so the caller can release it.
    fn store_scoped<T: ?Sized + Send + Sync + 'static>(
        &self,
        token: &Token<T>,
        registration: &Registration,
        provider: &Provider<T>,
        instance: Arc<T>,
    ) -> std::result::Result<Arc<T>, Rejected> {
        let key = token.key();
        let resource = provider.tracked(&key.to_string(), &instance);
        if let Err(error) = validate(token, &instance) {
            return Err(Rejected::new(error, resource));
        }

        let cache = match self.tier_cache(key, registration.scope()) {
            Ok(Some(cache)) => cache,
            Ok(None) => {
                // Transient: never cached, owned by the innermost active tier
                if let Some(resource) = resource {
                    match self.innermost_scope() {
                        Some(cache) => cache.resources.track(resource),
                        None => self.container.track(resource),
                    }
                }
                return Ok(instance);
            }
            // The scope closed while the provider was running
            Err(error) => return Err(Rejected::new(error, resource)),
        };

        match cache.entries.entry(key.clone()) {
            Entry::Occupied(existing) => {
                let winner = Arc::clone(existing.get());
                drop(existing);
                // A racing resolution cached first; the losing instance still
                // belongs to this scope
                if let Some(resource) = resource {
                    cache.resources.track(resource);
                }
                unerase(token, &winner).map_err(|error| Rejected::new(error, None))
            }
            Entry::Vacant(slot) => {
                slot.insert(erase(&instance));
                if let Some(resource) = resource {
                    cache.resources.track(resource);
                }
                Ok(instance)
            }
        }
    }

    async fn astore_scoped<T: ?Sized + Send + Sync + 'static>(
        &self,
        token: &Token<T>,
        registration: &Registration,
        provider: &Provider<T>,
        instance: Arc<T>,
    ) -> Result<Arc<T>> {
        match self.store_scoped(token, registration, provider, instance) {
            Ok(instance) => Ok(instance),
            Err(rejected) => Err(rejected.adiscard(self.container.close_timeout()).await),
        }
    }

    fn innermost_scope(&self) -> Option<&Arc<ScopeCache>> {
        self.request
            .as_ref()
            .filter(|cache| !cache.is_closed())
            .or_else(|| self.session.as_ref().filter(|cache| !cache.is_closed()))
    }
}

/// Run a blocking section without stalling the other tasks of a multi-thread
/// runtime worker
fn blocking_section<R>(section: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(section)
        }
        _ => section(),
    }
}

fn lifetime_rank(scope: ScopeKind) -> u8 {
    match scope {
        ScopeKind::Singleton => 0,
        ScopeKind::Session => 1,
        ScopeKind::Request => 2,
        ScopeKind::Transient => 3,
    }
}

fn provider_of<'a, T: ?Sized + Send + Sync + 'static>(
    token: &Token<T>,
    registration: &'a Registration,
) -> Result<&'a Provider<T>> {
    registration
        .provider::<T>()
        .ok_or_else(|| Error::TypeValidation {
            token: token.key().clone(),
            expected: token.type_name(),
        })
}

fn validate<T: ?Sized + Send + Sync + 'static>(token: &Token<T>, instance: &Arc<T>) -> Result<()> {
    if token.validate(instance) {
        Ok(())
    } else {
        Err(Error::TypeValidation {
            token: token.key().clone(),
            expected: token.type_name(),
        })
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("path", &self.path())
            .field("request", &self.request_id())
            .field("session", &self.session_id())
            .field("overrides", &self.overrides.is_some())
            .finish()
    }
}
