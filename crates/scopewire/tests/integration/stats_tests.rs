//! Tests for resolution statistics

use std::sync::Arc;

use scopewire::{Container, ContainerConfig, Overrides, Provider, Resolver, Token};

#[test]
fn test_hits_and_misses() {
    let container = Container::new();
    let singleton = Token::<u8>::singleton("s");
    let transient = Token::<u8>::transient("t");
    container
        .register(&singleton, Provider::new(|_: &Resolver| Ok(1)))
        .unwrap();
    container
        .register(&transient, Provider::new(|_: &Resolver| Ok(2)))
        .unwrap();

    container.get(&singleton).unwrap();
    container.get(&singleton).unwrap();
    container.get(&singleton).unwrap();
    container.get(&transient).unwrap();

    let stats = container.stats();
    assert_eq!(stats.providers, 2);
    assert_eq!(stats.cached_singletons, 1);
    assert_eq!(stats.cache_hits, 2);
    assert_eq!(stats.cache_misses, 2);
    assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
}

#[test]
fn test_override_counts_as_hit() {
    let container = Container::new();
    let token = Token::<u8>::singleton("s");
    container
        .register(&token, Provider::new(|_: &Resolver| Ok(1)))
        .unwrap();

    let scoped = container.use_overrides(Overrides::new().with(&token, Arc::new(9)));
    scoped.get(&token).unwrap();

    let stats = container.stats();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 0);
}

#[test]
fn test_reset_stats() {
    let container = Container::new();
    let token = Token::<u8>::singleton("s");
    container
        .register(&token, Provider::new(|_: &Resolver| Ok(1)))
        .unwrap();
    container.get(&token).unwrap();

    container.reset_stats();

    let stats = container.stats();
    assert_eq!(stats.cache_hits, 0);
    assert_eq!(stats.cache_misses, 0);
    assert_eq!(stats.hit_rate, 0.0);
    assert_eq!(stats.cached_singletons, 1);
}

#[test]
fn test_stats_disabled_by_config() {
    let mut config = ContainerConfig::default();
    config.resolution.collect_stats = false;
    let container = Container::with_config(config);
    let token = Token::<u8>::singleton("s");
    container
        .register(&token, Provider::new(|_: &Resolver| Ok(1)))
        .unwrap();

    container.get(&token).unwrap();
    container.get(&token).unwrap();

    let stats = container.stats();
    assert_eq!(stats.cache_hits + stats.cache_misses, 0);
    assert_eq!(stats.cached_singletons, 1);
}

#[test]
fn test_stats_serialize() {
    let container = Container::new();

    let json = serde_json::to_value(container.stats()).unwrap();

    assert_eq!(json["providers"], 0);
    assert_eq!(json["hit_rate"], 0.0);
    assert_eq!(json["pending_init_locks"], 0);
}
