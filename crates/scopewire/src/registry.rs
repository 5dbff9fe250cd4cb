//! Provider registry
//!
//! Write-once map from token to registration. Reads go through an
//! [`ArcSwap`] snapshot and never take a lock; writes are serialised by a
//! coarse mutex and publish a fresh snapshot.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::provider::{Provider, ProviderKind};
use crate::token::{ScopeKind, Token, TokenKey};

/// A token bound to its provider and lifecycle
pub struct Registration {
    key: TokenKey,
    scope: ScopeKind,
    kind: ProviderKind,
    tracked: bool,
    provider: Arc<dyn Any + Send + Sync>,
}

impl Registration {
    pub(crate) fn new<T: ?Sized + Send + Sync + 'static>(
        token: &Token<T>,
        provider: Provider<T>,
        scope: ScopeKind,
    ) -> Self {
        Self {
            key: token.key().clone(),
            scope,
            kind: provider.kind(),
            tracked: provider.is_tracked(),
            provider: Arc::new(provider),
        }
    }

    /// Registered token identity
    pub fn key(&self) -> &TokenKey {
        &self.key
    }

    /// Effective lifecycle
    pub fn scope(&self) -> ScopeKind {
        self.scope
    }

    /// Sync or async provider
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Whether created instances are tracked for teardown
    pub fn is_tracked(&self) -> bool {
        self.tracked
    }

    pub(crate) fn provider<T: ?Sized + 'static>(&self) -> Option<&Provider<T>> {
        self.provider.downcast_ref::<Provider<T>>()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("token", &self.key)
            .field("scope", &self.scope)
            .field("kind", &self.kind)
            .field("tracked", &self.tracked)
            .finish()
    }
}

type Snapshot = HashMap<TokenKey, Arc<Registration>>;

/// Token → registration bindings
#[derive(Default)]
pub struct Registry {
    snapshot: ArcSwap<Snapshot>,
    write_lock: Mutex<()>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a registration; a second binding for the same token is rejected
    pub fn register(&self, registration: Registration) -> Result<()> {
        let _guard = self.write_lock.lock();
        let current = self.snapshot.load();
        if current.contains_key(&registration.key) {
            return Err(Error::AlreadyRegistered {
                token: registration.key.clone(),
            });
        }

        debug!(
            token = %registration.key,
            scope = %registration.scope,
            kind = ?registration.kind,
            "Registering provider"
        );

        let mut next = Snapshot::clone(&current);
        next.insert(registration.key.clone(), Arc::new(registration));
        self.snapshot.store(Arc::new(next));
        Ok(())
    }

    /// Look up the registration for a token
    pub fn lookup(&self, key: &TokenKey) -> Result<Arc<Registration>> {
        self.snapshot
            .load()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound { token: key.clone() })
    }

    /// Whether the token has a binding
    pub fn contains(&self, key: &TokenKey) -> bool {
        self.snapshot.load().contains_key(key)
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }

    /// Registered token identities, sorted by name
    pub fn keys(&self) -> Vec<TokenKey> {
        let mut keys: Vec<_> = self.snapshot.load().keys().cloned().collect();
        keys.sort_by(|a, b| a.name().cmp(b.name()));
        keys
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("registrations", &self.keys())
            .finish()
    }
}
