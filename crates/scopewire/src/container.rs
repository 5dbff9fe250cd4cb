//! Composition root
//!
//! [`Container`] owns the registry, the container-tier caches (singletons,
//! container-wide overrides, the by-type token memo), the singleton init
//! locks and the container-tier cleanup stack. It is a cheap handle: clones
//! share one container.

use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::cleanup::{CleanupStack, TrackedResource};
use crate::config::ContainerConfig;
use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::registry::{Registration, Registry};
use crate::resolver::{Resolver, SingletonLocks};
use crate::scope::{Givens, Instance, OverrideGuard, Overrides, ScopeGuard, erase};
use crate::stats::{ContainerStats, ResolutionStats};
use crate::token::{ScopeKind, Token, TokenKey};

type GivenFn = Arc<dyn Fn() -> Instance + Send + Sync>;

struct ContainerInner {
    config: ContainerConfig,
    registry: Registry,
    singletons: DashMap<TokenKey, Instance>,
    locks: SingletonLocks,
    overrides: DashMap<TokenKey, Instance>,
    type_tokens: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
    givens: DashMap<TypeId, GivenFn>,
    resources: CleanupStack,
    stats: ResolutionStats,
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        let leaked = self.resources.labels();
        if !leaked.is_empty() {
            warn!(
                resources = ?leaked,
                "Container dropped without dispose()/aclose(); tracked resources were not closed"
            );
        }
    }
}

/// Dependency injection container
///
/// ```
/// use std::sync::Arc;
/// use scopewire::{Container, Provider, Resolver, Token};
///
/// struct Greeter { greeting: String }
///
/// let greeting = Token::<String>::singleton("greeting");
/// let greeter = Token::<Greeter>::transient("greeter");
///
/// let container = Container::new();
/// container.register_value(&greeting, Arc::new("hello".to_string()))?;
/// let dep = greeting.clone();
/// container.register(&greeter, Provider::new(move |r: &Resolver| {
///     Ok(Greeter { greeting: r.get(&dep)?.to_string() })
/// }))?;
///
/// assert_eq!(container.get(&greeter)?.greeting, "hello");
/// # Ok::<(), scopewire::Error>(())
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    /// Container with default configuration
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    /// Container with explicit configuration
    pub fn with_config(config: ContainerConfig) -> Self {
        let stats = ResolutionStats::new(config.resolution.collect_stats);
        Self {
            inner: Arc::new(ContainerInner {
                config,
                registry: Registry::new(),
                singletons: DashMap::new(),
                locks: SingletonLocks::default(),
                overrides: DashMap::new(),
                type_tokens: DashMap::new(),
                givens: DashMap::new(),
                resources: CleanupStack::new(),
                stats,
            }),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    /// Root resolution context: no request, no session, no context overrides
    pub fn resolver(&self) -> Resolver {
        Resolver::root(self.clone())
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Bind a provider to a token under the token's default scope
    pub fn register<T: ?Sized + Send + Sync + 'static>(
        &self,
        token: &Token<T>,
        provider: Provider<T>,
    ) -> Result<()> {
        self.register_scoped(token, provider, token.scope())
    }

    /// Bind a provider to a token under an explicit scope
    pub fn register_scoped<T: ?Sized + Send + Sync + 'static>(
        &self,
        token: &Token<T>,
        provider: Provider<T>,
        scope: ScopeKind,
    ) -> Result<()> {
        self.inner
            .registry
            .register(Registration::new(token, provider, scope))?;

        let bound = token.with_scope(scope);
        self.inner
            .type_tokens
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(bound));
        Ok(())
    }

    /// Bind as a singleton
    pub fn register_singleton<T: ?Sized + Send + Sync + 'static>(
        &self,
        token: &Token<T>,
        provider: Provider<T>,
    ) -> Result<()> {
        self.register_scoped(token, provider, ScopeKind::Singleton)
    }

    /// Bind as session-scoped
    pub fn register_session<T: ?Sized + Send + Sync + 'static>(
        &self,
        token: &Token<T>,
        provider: Provider<T>,
    ) -> Result<()> {
        self.register_scoped(token, provider, ScopeKind::Session)
    }

    /// Bind as request-scoped
    pub fn register_request<T: ?Sized + Send + Sync + 'static>(
        &self,
        token: &Token<T>,
        provider: Provider<T>,
    ) -> Result<()> {
        self.register_scoped(token, provider, ScopeKind::Request)
    }

    /// Bind as transient
    pub fn register_transient<T: ?Sized + Send + Sync + 'static>(
        &self,
        token: &Token<T>,
        provider: Provider<T>,
    ) -> Result<()> {
        self.register_scoped(token, provider, ScopeKind::Transient)
    }

    /// Bind a pre-built instance as a singleton
    pub fn register_value<T: ?Sized + Send + Sync + 'static>(
        &self,
        token: &Token<T>,
        value: Arc<T>,
    ) -> Result<()> {
        self.register_scoped(token, Provider::value(value), ScopeKind::Singleton)
    }

    /// Bind a provider to the canonical token of `T` and return that token
    pub fn register_type<T: ?Sized + Send + Sync + 'static>(
        &self,
        provider: Provider<T>,
        scope: ScopeKind,
    ) -> Result<Token<T>> {
        let token = Token::<T>::for_type().with_scope(scope);
        self.register_scoped(&token, provider, scope)?;
        Ok(token)
    }

    /// Register several providers for one type, in order
    ///
    /// Stops at the first failure; earlier registrations stay in place.
    pub fn batch_register<T, I>(&self, registrations: I) -> Result<()>
    where
        T: ?Sized + Send + Sync + 'static,
        I: IntoIterator<Item = (Token<T>, Provider<T>)>,
    {
        for (token, provider) in registrations {
            self.register(&token, provider)?;
        }
        Ok(())
    }

    // ========================================================================
    // Givens
    // ========================================================================

    /// Given instance for resolution by type; replaces an earlier given for `T`
    pub fn given<T: ?Sized + Send + Sync + 'static>(&self, value: Arc<T>) -> &Self {
        self.given_with(move || Arc::clone(&value))
    }

    /// Given built on every resolution by type
    pub fn given_with<T, F>(&self, provider: F) -> &Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        debug!(given = std::any::type_name::<T>(), "Registering given");
        self.inner
            .givens
            .insert(TypeId::of::<T>(), Arc::new(move || erase(&provider())));
        self
    }

    /// Drop the container given for `T`; `true` when one was present
    pub fn remove_given<T: ?Sized + 'static>(&self) -> bool {
        self.inner.givens.remove(&TypeId::of::<T>()).is_some()
    }

    /// Given instance for `T` from the root context
    pub fn resolve_given<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.resolver().resolve_given()
    }

    /// Givens on top of the root context, dropped with the guard
    pub fn using(&self, givens: Givens) -> OverrideGuard {
        self.resolver().using(givens)
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Resolve from the root context
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self, token: &Token<T>) -> Result<Arc<T>> {
        self.resolver().get(token)
    }

    /// Resolve from the root context asynchronously
    pub async fn aget<T: ?Sized + Send + Sync + 'static>(
        &self,
        token: &Token<T>,
    ) -> Result<Arc<T>> {
        self.resolver().aget(token).await
    }

    /// Resolve by declared type
    ///
    /// A given for `T` wins. Otherwise uses the first token registered for
    /// `T`, or the canonical by-type token when `T` was never registered.
    pub fn get_type<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.resolver().get_type()
    }

    /// Resolve by declared type asynchronously
    pub async fn aget_type<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.resolver().aget_type().await
    }

    /// Resolve several tokens from the root context, longest-lived scopes first
    pub fn batch_get<T: ?Sized + Send + Sync + 'static>(
        &self,
        tokens: &[Token<T>],
    ) -> Result<Vec<Arc<T>>> {
        self.resolver().batch_get(tokens)
    }

    /// Resolve several tokens from the root context concurrently
    pub async fn batch_aget<T: ?Sized + Send + Sync + 'static>(
        &self,
        tokens: &[Token<T>],
    ) -> Result<Vec<Arc<T>>> {
        self.resolver().batch_aget(tokens).await
    }

    // ========================================================================
    // Overrides
    // ========================================================================

    /// Container-wide override, visible to every context without a shadowing
    /// context override
    pub fn set_override<T: ?Sized + Send + Sync + 'static>(
        &self,
        token: &Token<T>,
        value: Arc<T>,
    ) {
        debug!(token = %token.key(), "Setting container override");
        self.inner.overrides.insert(token.key().clone(), erase(&value));
    }

    /// Drop one container-wide override; `true` when one was present
    pub fn remove_override<T: ?Sized>(&self, token: &Token<T>) -> bool {
        self.inner.overrides.remove(token.key()).is_some()
    }

    /// Drop every container-wide override
    pub fn clear_overrides(&self) {
        self.inner.overrides.clear();
    }

    /// Context overrides on top of the root context
    pub fn use_overrides(&self, overrides: Overrides) -> OverrideGuard {
        self.resolver().use_overrides(overrides)
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    /// Enter a request scope from the root context
    pub fn enter_request(&self) -> ScopeGuard {
        self.resolver().enter_request()
    }

    /// Enter a session scope from the root context
    pub fn enter_session(&self) -> ScopeGuard {
        self.resolver().enter_session()
    }

    /// Run `body` in a fresh request scope, then close the scope
    pub async fn in_request<F, Fut, R>(&self, body: F) -> Result<R>
    where
        F: FnOnce(Resolver) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        self.resolver().in_request(body).await
    }

    /// Run `body` in a fresh session scope, then close the scope
    pub async fn in_session<F, Fut, R>(&self, body: F) -> Result<R>
    where
        F: FnOnce(Resolver) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        self.resolver().in_session(body).await
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Close container-tier resources synchronously, newest first
    ///
    /// Fails with `AsyncCleanupRequired` and closes nothing when an async-only
    /// resource is tracked. Cached singletons are dropped once the pass has run.
    pub fn dispose(&self) -> Result<()> {
        let tracked = self.inner.resources.len();
        let outcome = self.inner.resources.close_sync();
        if matches!(outcome, Err(Error::AsyncCleanupRequired { .. })) {
            return outcome;
        }
        self.drop_singletons();
        info!(resources = tracked, "Container disposed");
        outcome
    }

    /// Close container-tier resources: async closes first, then sync closes
    pub async fn aclose(&self) -> Result<()> {
        let tracked = self.inner.resources.len();
        let outcome = self.inner.resources.close_async(self.close_timeout()).await;
        self.drop_singletons();
        info!(resources = tracked, "Container closed");
        outcome
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Whether the token has a binding
    pub fn has<T: ?Sized>(&self, token: &Token<T>) -> bool {
        self.inner.registry.contains(token.key())
    }

    /// Whether a given or a binding exists for resolution by type
    pub fn has_type<T: ?Sized + Send + Sync + 'static>(&self) -> bool {
        self.inner.givens.contains_key(&TypeId::of::<T>()) || self.has(&self.type_token::<T>())
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        self.inner.registry.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.inner.registry.is_empty()
    }

    /// Registered token identities
    pub fn tokens(&self) -> Vec<TokenKey> {
        self.inner.registry.keys()
    }

    /// Container-tier resources awaiting teardown
    pub fn tracked_resources(&self) -> usize {
        self.inner.resources.len()
    }

    /// Singleton init locks still allocated
    pub fn pending_init_locks(&self) -> usize {
        self.inner.locks.len()
    }

    /// Point-in-time statistics
    pub fn stats(&self) -> ContainerStats {
        let hits = self.inner.stats.hits();
        let misses = self.inner.stats.misses();
        ContainerStats {
            providers: self.len(),
            cached_singletons: self.inner.singletons.len(),
            cache_hits: hits,
            cache_misses: misses,
            hit_rate: ContainerStats::hit_rate(hits, misses),
            tracked_resources: self.tracked_resources(),
            pending_init_locks: self.pending_init_locks(),
        }
    }

    /// Zero the hit/miss counters
    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    /// Drop cached singletons, container overrides, givens and counters
    ///
    /// Registrations are kept. Tracked resources are forgotten without being
    /// closed. Init locks of creations still in flight stay in place, so a
    /// racer arriving afterwards waits for that creation instead of starting
    /// another one.
    pub fn clear_caches(&self) {
        let forgotten = self.inner.resources.forget();
        if forgotten > 0 {
            warn!(resources = forgotten, "Cleared caches with unclosed resources");
        }
        self.drop_singletons();
        self.inner.overrides.clear();
        self.inner.givens.clear();
        self.inner.stats.reset();
    }

    // ========================================================================
    // Engine hooks
    // ========================================================================

    pub(crate) fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub(crate) fn singleton_locks(&self) -> &SingletonLocks {
        &self.inner.locks
    }

    pub(crate) fn stats_counters(&self) -> &ResolutionStats {
        &self.inner.stats
    }

    pub(crate) fn singleton(&self, key: &TokenKey) -> Option<Instance> {
        self.inner
            .singletons
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn store_singleton(&self, key: &TokenKey, instance: Instance) {
        self.inner.singletons.insert(key.clone(), instance);
    }

    pub(crate) fn override_for(&self, key: &TokenKey) -> Option<Instance> {
        self.inner
            .overrides
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn given_for(&self, type_id: TypeId) -> Option<Instance> {
        let provider = self
            .inner
            .givens
            .get(&type_id)
            .map(|entry| Arc::clone(entry.value()))?;
        Some(provider())
    }

    pub(crate) fn track(&self, resource: TrackedResource) {
        self.inner.resources.track(resource);
    }

    pub(crate) fn close_timeout(&self) -> Option<Duration> {
        self.inner.config.cleanup.close_timeout()
    }

    pub(crate) fn type_token<T: ?Sized + Send + Sync + 'static>(&self) -> Token<T> {
        self.inner
            .type_tokens
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().downcast_ref::<Token<T>>().cloned())
            .unwrap_or_else(Token::for_type)
    }

    fn drop_singletons(&self) {
        self.inner.singletons.clear();
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("Container")
            .field("providers", &stats.providers)
            .field("singletons", &stats.cached_singletons)
            .field("hit_rate", &stats.hit_rate)
            .field("tracked_resources", &stats.tracked_resources)
            .finish()
    }
}
