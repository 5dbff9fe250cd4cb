//! Typed dependency tokens
//!
//! A [`Token<T>`] is the identity under which a provider is registered and an
//! instance is resolved. Identity is `(name, declared type, qualifier)`; the
//! scope, tags and validator travel with the token but never affect equality.
//!
//! ```
//! use scopewire::token::{ScopeKind, Token};
//!
//! struct Database;
//!
//! let primary = Token::<Database>::singleton("db").with_qualifier("primary");
//! let replica = primary.with_qualifier("replica");
//!
//! assert_ne!(primary, replica);
//! assert_eq!(primary.scope(), ScopeKind::Singleton);
//! ```

use std::any::{Any, TypeId, type_name};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Lifecycle class of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    /// One instance for the whole container
    Singleton,
    /// One instance per active session scope
    Session,
    /// One instance per active request scope
    Request,
    /// A new instance on every resolution
    #[default]
    Transient,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Singleton => "singleton",
            Self::Session => "session",
            Self::Request => "request",
            Self::Transient => "transient",
        };
        f.write_str(name)
    }
}

struct KeyInner {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    qualifier: Option<String>,
    hash: u64,
}

/// Type-erased token identity
///
/// Used as the key of every internal map and carried by errors. Cloning is a
/// reference count increment; hashing writes the hash computed at
/// construction.
#[derive(Clone)]
pub struct TokenKey(Arc<KeyInner>);

impl TokenKey {
    fn new(
        name: String,
        type_id: TypeId,
        type_name: &'static str,
        qualifier: Option<String>,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        type_id.hash(&mut hasher);
        qualifier.hash(&mut hasher);
        let hash = hasher.finish();

        Self(Arc::new(KeyInner {
            name,
            type_id,
            type_name,
            qualifier,
            hash,
        }))
    }

    /// Token name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Declared type name
    pub fn type_name(&self) -> &'static str {
        self.0.type_name
    }

    /// Declared type id
    pub fn type_id(&self) -> TypeId {
        self.0.type_id
    }

    /// Optional qualifier
    pub fn qualifier(&self) -> Option<&str> {
        self.0.qualifier.as_deref()
    }

    /// Precomputed hash of the identity triple
    pub fn precomputed_hash(&self) -> u64 {
        self.0.hash
    }

    /// `type::name` with the qualifier appended in brackets when present
    pub fn qualified_name(&self) -> String {
        match self.qualifier() {
            Some(qualifier) => format!("{}::{}[{}]", self.type_name(), self.name(), qualifier),
            None => format!("{}::{}", self.type_name(), self.name()),
        }
    }
}

impl PartialEq for TokenKey {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.hash == other.0.hash
            && self.0.type_id == other.0.type_id
            && self.0.name == other.0.name
            && self.0.qualifier == other.0.qualifier
    }
}

impl Eq for TokenKey {}

impl Hash for TokenKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.qualifier() {
            Some(qualifier) => write!(f, "{}[{}]", self.name(), qualifier),
            None => f.write_str(self.name()),
        }
    }
}

impl fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenKey")
            .field("name", &self.name())
            .field("type", &self.type_name())
            .field("qualifier", &self.qualifier())
            .finish()
    }
}

type Validator<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Typed, immutable identity for a dependency
pub struct Token<T: ?Sized> {
    key: TokenKey,
    scope: ScopeKind,
    tags: Arc<BTreeSet<String>>,
    validator: Option<Validator<T>>,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + 'static> Token<T> {
    /// Create a transient token
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            key: TokenKey::new(name.into(), TypeId::of::<T>(), type_name::<T>(), None),
            scope: ScopeKind::Transient,
            tags: Arc::default(),
            validator: None,
            _marker: PhantomData,
        }
    }

    /// Create a singleton-scoped token
    pub fn singleton(name: impl Into<String>) -> Self {
        Self::new(name).with_scope(ScopeKind::Singleton)
    }

    /// Create a session-scoped token
    pub fn session(name: impl Into<String>) -> Self {
        Self::new(name).with_scope(ScopeKind::Session)
    }

    /// Create a request-scoped token
    pub fn request(name: impl Into<String>) -> Self {
        Self::new(name).with_scope(ScopeKind::Request)
    }

    /// Create a transient token
    pub fn transient(name: impl Into<String>) -> Self {
        Self::new(name)
    }

    /// Canonical token for resolving by type: named after the type, transient
    pub fn for_type() -> Self {
        Self::new(type_name::<T>())
    }
}

impl<T: ?Sized> Token<T> {
    /// Erased identity
    pub fn key(&self) -> &TokenKey {
        &self.key
    }

    /// Token name
    pub fn name(&self) -> &str {
        self.key.name()
    }

    /// Declared type name
    pub fn type_name(&self) -> &'static str {
        self.key.type_name()
    }

    /// Optional qualifier
    pub fn qualifier(&self) -> Option<&str> {
        self.key.qualifier()
    }

    /// Default scope used when the token is registered without an explicit one
    pub fn scope(&self) -> ScopeKind {
        self.scope
    }

    /// Tags attached to the token
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Whether the token carries `tag`
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// See [`TokenKey::qualified_name`]
    pub fn qualified_name(&self) -> String {
        self.key.qualified_name()
    }

    /// Same identity with a different default scope
    #[must_use]
    pub fn with_scope(&self, scope: ScopeKind) -> Self {
        Self {
            scope,
            ..self.clone()
        }
    }

    /// New identity with the given qualifier
    #[must_use]
    pub fn with_qualifier(&self, qualifier: impl Into<String>) -> Self {
        Self {
            key: TokenKey::new(
                self.key.0.name.clone(),
                self.key.type_id(),
                self.key.type_name(),
                Some(qualifier.into()),
            ),
            ..self.clone()
        }
    }

    /// Same identity with additional tags
    #[must_use]
    pub fn with_tags<I, S>(&self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut merged = (*self.tags).clone();
        merged.extend(tags.into_iter().map(Into::into));
        Self {
            tags: Arc::new(merged),
            ..self.clone()
        }
    }

    /// Same identity with a capability probe run on every created instance
    #[must_use]
    pub fn with_validator<F>(&self, validator: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            validator: Some(Arc::new(validator)),
            ..self.clone()
        }
    }

    /// Check an instance against the token's capability probe
    ///
    /// The declared type is enforced statically; without a validator every
    /// instance of `T` is compatible.
    pub fn validate(&self, instance: &T) -> bool {
        self.validator
            .as_ref()
            .is_none_or(|validator| validator(instance))
    }
}

impl<T: ?Sized> Clone for Token<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            scope: self.scope,
            tags: Arc::clone(&self.tags),
            validator: self.validator.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> PartialEq for Token<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T: ?Sized> Eq for Token<T> {}

impl<T: ?Sized> Hash for Token<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("name", &self.name())
            .field("type", &self.type_name())
            .field("qualifier", &self.qualifier())
            .field("scope", &self.scope)
            .field("tags", &self.tags)
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

impl<T: ?Sized> fmt::Display for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.key, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FactoryKey {
    name: String,
    type_id: TypeId,
    scope: ScopeKind,
    qualifier: Option<String>,
}

/// Memoising token constructor
///
/// Repeated requests for the same `(name, type, scope, qualifier)` return
/// clones of one token, sharing its key allocation.
#[derive(Default)]
pub struct TokenFactory {
    cache: DashMap<FactoryKey, Box<dyn Any + Send + Sync>>,
}

impl TokenFactory {
    /// Create an empty factory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or fetch) a token
    pub fn create<T: ?Sized + 'static>(&self, name: &str, scope: ScopeKind) -> Token<T> {
        self.lookup(name, scope, None)
    }

    /// Singleton-scoped token
    pub fn singleton<T: ?Sized + 'static>(&self, name: &str) -> Token<T> {
        self.create(name, ScopeKind::Singleton)
    }

    /// Session-scoped token
    pub fn session<T: ?Sized + 'static>(&self, name: &str) -> Token<T> {
        self.create(name, ScopeKind::Session)
    }

    /// Request-scoped token
    pub fn request<T: ?Sized + 'static>(&self, name: &str) -> Token<T> {
        self.create(name, ScopeKind::Request)
    }

    /// Transient token
    pub fn transient<T: ?Sized + 'static>(&self, name: &str) -> Token<T> {
        self.create(name, ScopeKind::Transient)
    }

    /// Transient token named after the short type name, with a qualifier
    pub fn qualified<T: ?Sized + 'static>(&self, qualifier: &str) -> Token<T> {
        let full = type_name::<T>();
        let short = full.rsplit("::").next().unwrap_or(full);
        self.lookup(short, ScopeKind::Transient, Some(qualifier))
    }

    /// Number of memoised tokens
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// Forget every memoised token
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn lookup<T: ?Sized + 'static>(
        &self,
        name: &str,
        scope: ScopeKind,
        qualifier: Option<&str>,
    ) -> Token<T> {
        let key = FactoryKey {
            name: name.to_string(),
            type_id: TypeId::of::<T>(),
            scope,
            qualifier: qualifier.map(str::to_string),
        };
        let build = || {
            let token = Token::<T>::new(name).with_scope(scope);
            match qualifier {
                Some(qualifier) => token.with_qualifier(qualifier),
                None => token,
            }
        };
        let entry = self
            .cache
            .entry(key)
            .or_insert_with(|| Box::new(build()));
        // Entries are keyed by TypeId, so the downcast only misses if the map was tampered with.
        entry.downcast_ref::<Token<T>>().cloned().unwrap_or_else(build)
    }
}

impl fmt::Debug for TokenFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenFactory")
            .field("cache_size", &self.cache.len())
            .finish()
    }
}
