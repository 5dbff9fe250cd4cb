//! Tests for the memoising token factory

use scopewire::{ScopeKind, TokenFactory};

struct Cache;

#[test]
fn test_factory_memoises_tokens() {
    let factory = TokenFactory::new();

    let first = factory.singleton::<Cache>("cache");
    let second = factory.singleton::<Cache>("cache");

    assert_eq!(first, second);
    assert_eq!(factory.cache_size(), 1);
}

#[test]
fn test_factory_keys_include_scope_and_type() {
    let factory = TokenFactory::new();

    factory.singleton::<Cache>("cache");
    factory.request::<Cache>("cache");
    factory.singleton::<String>("cache");

    assert_eq!(factory.cache_size(), 3);
}

#[test]
fn test_factory_scope_helpers() {
    let factory = TokenFactory::new();

    assert_eq!(factory.singleton::<Cache>("a").scope(), ScopeKind::Singleton);
    assert_eq!(factory.session::<Cache>("b").scope(), ScopeKind::Session);
    assert_eq!(factory.request::<Cache>("c").scope(), ScopeKind::Request);
    assert_eq!(factory.transient::<Cache>("d").scope(), ScopeKind::Transient);
    assert_eq!(factory.create::<Cache>("e", ScopeKind::Session).scope(), ScopeKind::Session);
}

#[test]
fn test_qualified_uses_short_type_name() {
    let factory = TokenFactory::new();

    let token = factory.qualified::<Cache>("redis");

    assert_eq!(token.name(), "Cache");
    assert_eq!(token.qualifier(), Some("redis"));
    assert_eq!(token.scope(), ScopeKind::Transient);
}

#[test]
fn test_clear_cache() {
    let factory = TokenFactory::new();
    factory.transient::<Cache>("a");
    factory.transient::<Cache>("b");

    factory.clear_cache();

    assert_eq!(factory.cache_size(), 0);
}
