//! Tests for context and container-wide overrides

use std::sync::Arc;
use std::time::Duration;

use scopewire::{Container, Error, Overrides, Provider, Resolver, Token};

use crate::common::Counter;

fn setup() -> (Container, Token<String>, Counter) {
    let container = Container::new();
    let token = Token::<String>::singleton("endpoint");
    let counter = Counter::default();
    let c = counter.clone();
    container
        .register(
            &token,
            Provider::new(move |_: &Resolver| {
                c.bump();
                Ok("https://prod".to_string())
            }),
        )
        .unwrap();
    (container, token, counter)
}

#[test]
fn test_override_round_trip() {
    let (container, token, counter) = setup();

    {
        let scoped = container.use_overrides(
            Overrides::new().with(&token, Arc::new("https://mock".to_string())),
        );
        assert_eq!(*scoped.get(&token).unwrap(), "https://mock");
        // Overrides bypass the provider entirely
        assert_eq!(counter.get(), 0);
    }

    assert_eq!(*container.get(&token).unwrap(), "https://prod");
    assert_eq!(counter.get(), 1);
}

#[test]
fn test_override_does_not_touch_singleton_cache() {
    let (container, token, _) = setup();
    let original = container.get(&token).unwrap();

    let mock = Arc::new("https://mock".to_string());
    let scoped = container.use_overrides(Overrides::new().with(&token, mock));
    assert_eq!(*scoped.get(&token).unwrap(), "https://mock");
    drop(scoped);

    assert!(Arc::ptr_eq(&original, &container.get(&token).unwrap()));
}

#[test]
fn test_nested_overrides_merge_and_shadow() {
    let container = Container::new();
    let host = Token::<String>::singleton("host");
    let port = Token::<u16>::singleton("port");
    container
        .register_value(&host, Arc::new("localhost".to_string()))
        .unwrap();
    container.register_value(&port, Arc::new(80)).unwrap();

    let outer = container.use_overrides(
        Overrides::new()
            .with(&host, Arc::new("outer".to_string()))
            .with(&port, Arc::new(8080)),
    );
    {
        let inner =
            outer.use_overrides(Overrides::new().with(&host, Arc::new("inner".to_string())));
        assert_eq!(*inner.get(&host).unwrap(), "inner");
        assert_eq!(*inner.get(&port).unwrap(), 8080);
    }
    assert_eq!(*outer.get(&host).unwrap(), "outer");
}

/// Dependencies resolved by providers see the caller's overrides
#[test]
fn test_override_reaches_transitive_dependencies() {
    let (container, endpoint, _) = setup();
    let client = Token::<String>::transient("client");
    let dep = endpoint.clone();
    container
        .register(
            &client,
            Provider::new(move |r: &Resolver| Ok(format!("client({})", r.get(&dep)?))),
        )
        .unwrap();

    let mock = Arc::new("https://mock".to_string());
    let scoped = container.use_overrides(Overrides::new().with(&endpoint, mock));

    assert_eq!(*scoped.get(&client).unwrap(), "client(https://mock)");
    assert_eq!(*container.get(&client).unwrap(), "client(https://prod)");
}

#[test]
fn test_container_override_and_context_shadowing() {
    let (container, token, _) = setup();

    container.set_override(&token, Arc::new("https://staging".to_string()));
    assert_eq!(*container.get(&token).unwrap(), "https://staging");

    {
        let mock = Arc::new("https://mock".to_string());
        let scoped = container.use_overrides(Overrides::new().with(&token, mock));
        assert_eq!(*scoped.get(&token).unwrap(), "https://mock");
    }

    assert!(container.remove_override(&token));
    assert!(!container.remove_override(&token));
    assert_eq!(*container.get(&token).unwrap(), "https://prod");
}

#[test]
fn test_clear_overrides() {
    let (container, token, _) = setup();
    container.set_override(&token, Arc::new("https://staging".to_string()));

    container.clear_overrides();

    assert_eq!(*container.get(&token).unwrap(), "https://prod");
}

#[test]
fn test_override_applies_without_registration() {
    let container = Container::new();
    let token = Token::<u32>::transient("unregistered");

    let scoped = container.use_overrides(Overrides::new().with(&token, Arc::new(5)));

    assert_eq!(*scoped.get(&token).unwrap(), 5);
    assert!(matches!(container.get(&token), Err(Error::NotFound { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overrides_isolated_between_tasks() {
    let (container, token, _) = setup();

    let overridden = {
        let container = container.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let scoped = container
                .use_overrides(Overrides::new().with(&token, Arc::new("https://mock".to_string())));
            tokio::time::sleep(Duration::from_millis(20)).await;
            scoped.aget(&token).await.unwrap()
        })
    };
    let plain = {
        let container = container.clone();
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            container.aget(&token).await.unwrap()
        })
    };

    assert_eq!(*overridden.await.unwrap(), "https://mock");
    assert_eq!(*plain.await.unwrap(), "https://prod");
}
