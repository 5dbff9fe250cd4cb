//! Tests for request and session scopes

use std::sync::{Arc, Mutex};
use std::time::Duration;

use scopewire::{Container, Error, Provider, Resolver, ScopeKind, Token};

use crate::common::{AsyncConn, CloseLog, Conn, Counter, closed};

fn counting(container: &Container, token: &Token<usize>) -> Counter {
    let counter = Counter::default();
    let c = counter.clone();
    container
        .register(token, Provider::new(move |_: &Resolver| Ok(c.bump())))
        .unwrap();
    counter
}

#[test]
fn test_request_instance_cached_within_scope() {
    let container = Container::new();
    let token = Token::<usize>::request("request-id");
    let counter = counting(&container, &token);

    let request = container.enter_request();
    let first = request.get(&token).unwrap();
    let second = request.get(&token).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(counter.get(), 1);
    assert_eq!(request.cached(), 1);
    assert_eq!(request.kind(), ScopeKind::Request);
}

#[test]
fn test_sibling_requests_get_fresh_instances() {
    let container = Container::new();
    let token = Token::<usize>::request("request-id");
    counting(&container, &token);

    let a = *container.enter_request().get(&token).unwrap();
    let b = *container.enter_request().get(&token).unwrap();

    assert_ne!(a, b);
}

#[test]
fn test_nested_request_is_isolated() {
    let container = Container::new();
    let token = Token::<usize>::request("request-id");
    counting(&container, &token);

    let outer = container.enter_request();
    let outer_value = outer.get(&token).unwrap();

    {
        let inner = outer.enter_request();
        assert_ne!(inner.id(), outer.id());
        assert_eq!(inner.cached(), 0);

        let inner_value = inner.get(&token).unwrap();
        assert!(!Arc::ptr_eq(&outer_value, &inner_value));
        assert!(Arc::ptr_eq(&inner_value, &inner.get(&token).unwrap()));
    }

    // Leaving the inner scope restores the outer cache untouched
    assert!(Arc::ptr_eq(&outer_value, &outer.get(&token).unwrap()));
}

#[test]
fn test_session_outlives_requests() {
    let container = Container::new();
    let session_token = Token::<usize>::session("session-id");
    let request_token = Token::<usize>::request("request-id");
    counting(&container, &session_token);
    counting(&container, &request_token);

    let session = container.enter_session();
    let (s1, r1) = {
        let request = session.enter_request();
        (request.get(&session_token).unwrap(), request.get(&request_token).unwrap())
    };
    let (s2, r2) = {
        let request = session.enter_request();
        (request.get(&session_token).unwrap(), request.get(&request_token).unwrap())
    };

    assert!(Arc::ptr_eq(&s1, &s2));
    assert_ne!(*r1, *r2);
    assert!(session.request_id().is_none());
}

#[test]
fn test_session_token_requires_session() {
    let container = Container::new();
    let token = Token::<usize>::session("session-id");
    counting(&container, &token);

    let request = container.enter_request();
    let err = request.get(&token).unwrap_err();

    assert!(matches!(
        err,
        Error::NoActiveScope {
            scope: ScopeKind::Session,
            ..
        }
    ));
}

#[test]
fn test_closed_scope_rejects_resolution() {
    let container = Container::new();
    let token = Token::<usize>::request("request-id");
    counting(&container, &token);

    let mut request = container.enter_request();
    let escaped = request.resolver().clone();
    escaped.get(&token).unwrap();
    request.close().unwrap();

    assert!(request.is_closed());
    assert!(escaped.request_id().is_none());
    assert!(matches!(
        escaped.get(&token).unwrap_err(),
        Error::NoActiveScope { .. }
    ));
}

#[test]
fn test_request_resources_closed_lifo_on_close() {
    let container = Container::new();
    let log = CloseLog::default();
    let first = Token::<Conn>::request("first");
    let second = Token::<Conn>::request("second");
    for token in [&first, &second] {
        let log = Arc::clone(&log);
        let name = token.name().to_string();
        container
            .register(
                token,
                Provider::new(move |_: &Resolver| Ok(Conn::new(&name, &log))).closing(),
            )
            .unwrap();
    }

    let mut request = container.enter_request();
    request.get(&first).unwrap();
    request.get(&second).unwrap();
    request.get(&first).unwrap();
    assert_eq!(request.tracked_resources(), 2);

    request.close().unwrap();

    assert_eq!(closed(&log), ["sync:second", "sync:first"]);
    assert_eq!(container.tracked_resources(), 0);
}

#[test]
fn test_dropping_guard_closes_sync_resources() {
    let container = Container::new();
    let log = CloseLog::default();
    let token = Token::<Conn>::request("conn");
    let l = Arc::clone(&log);
    container
        .register(
            &token,
            Provider::new(move |_: &Resolver| Ok(Conn::new("conn", &l))).closing(),
        )
        .unwrap();

    {
        let request = container.enter_request();
        request.get(&token).unwrap();
        assert!(closed(&log).is_empty());
    }

    assert_eq!(closed(&log), ["sync:conn"]);
}

/// Transient resources belong to the innermost active scope
#[test]
fn test_transient_resources_tracked_by_innermost_scope() {
    let container = Container::new();
    let log = CloseLog::default();
    let token = Token::<Conn>::transient("conn");
    let l = Arc::clone(&log);
    container
        .register(
            &token,
            Provider::new(move |_: &Resolver| Ok(Conn::new("conn", &l))).closing(),
        )
        .unwrap();

    let session = container.enter_session();
    let mut request = session.enter_request();
    request.get(&token).unwrap();
    request.get(&token).unwrap();

    assert_eq!(request.tracked_resources(), 2);
    assert_eq!(session.tracked_resources(), 0);
    assert_eq!(container.tracked_resources(), 0);

    request.close().unwrap();
    assert_eq!(closed(&log).len(), 2);
}

#[tokio::test]
async fn test_scope_close_circuit_breaker() {
    let container = Container::new();
    let log = CloseLog::default();
    let token = Token::<AsyncConn>::request("socket");
    let l = Arc::clone(&log);
    container
        .register(
            &token,
            Provider::new(move |_: &Resolver| Ok(AsyncConn::new("socket", &l))).aclosing(),
        )
        .unwrap();

    let mut request = container.enter_request();
    request.get(&token).unwrap();

    let err = request.close().unwrap_err();
    assert!(matches!(
        err,
        Error::AsyncCleanupRequired { ref resources } if resources == &["socket"]
    ));
    assert!(closed(&log).is_empty());
    assert!(!request.is_closed());

    request.aclose().await.unwrap();
    assert_eq!(closed(&log), ["async:socket"]);
    assert!(request.is_closed());
}

#[tokio::test]
async fn test_dropping_guard_spawns_async_cleanup() {
    let container = Container::new();
    let log = CloseLog::default();
    let token = Token::<AsyncConn>::request("socket");
    let l = Arc::clone(&log);
    container
        .register(
            &token,
            Provider::new(move |_: &Resolver| Ok(AsyncConn::new("socket", &l))).aclosing(),
        )
        .unwrap();

    {
        let request = container.enter_request();
        request.get(&token).unwrap();
    }

    for _ in 0..100 {
        if !closed(&log).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(closed(&log), ["async:socket"]);
}

#[tokio::test]
async fn test_in_request_runs_body_and_cleanup() {
    let container = Container::new();
    let log = CloseLog::default();
    let token = Token::<AsyncConn>::request("socket");
    let l = Arc::clone(&log);
    container
        .register(
            &token,
            Provider::new_async(move |_: Resolver| {
                let conn = AsyncConn::new("socket", &l);
                async move { Ok::<_, Error>(conn) }
            })
            .aclosing(),
        )
        .unwrap();

    let t = token.clone();
    let name = container
        .in_request(|r| async move {
            let conn = r.aget(&t).await?;
            assert!(Arc::ptr_eq(&conn, &r.aget(&t).await?));
            Ok::<_, Error>(conn.name.clone())
        })
        .await
        .unwrap();

    assert_eq!(name, "socket");
    assert_eq!(closed(&log), ["async:socket"]);
}

#[tokio::test]
async fn test_in_request_body_error_still_cleans_up() {
    let container = Container::new();
    let log = CloseLog::default();
    let token = Token::<Conn>::request("conn");
    let l = Arc::clone(&log);
    container
        .register(
            &token,
            Provider::new(move |_: &Resolver| Ok(Conn::new("conn", &l))).closing(),
        )
        .unwrap();

    let t = token.clone();
    let err = container
        .in_request(|r| async move {
            r.get(&t)?;
            Err::<(), _>(Error::provider("handler failed"))
        })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Provider error: handler failed");
    assert_eq!(closed(&log), ["sync:conn"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_are_isolated() {
    let container = Container::new();
    let token = Token::<usize>::request("request-id");
    counting(&container, &token);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let container = container.clone();
            let token = token.clone();
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                container
                    .in_request(|r| async move {
                        let first = r.aget(&token).await?;
                        tokio::task::yield_now().await;
                        let again = r.aget(&token).await?;
                        assert!(Arc::ptr_eq(&first, &again));
                        seen.lock().unwrap().push(*first);
                        Ok::<_, Error>(())
                    })
                    .await
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let mut values = seen.lock().unwrap().clone();
    values.sort_unstable();
    values.dedup();
    assert_eq!(values.len(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_racing_request_resolutions_close_every_instance() {
    let container = Container::new();
    let log = CloseLog::default();
    let created = Counter::default();
    let token = Token::<Conn>::request("conn");
    let (l, c) = (Arc::clone(&log), created.clone());
    container
        .register(
            &token,
            Provider::new_async(move |_: Resolver| {
                let conn = Conn::new(&format!("conn-{}", c.bump()), &l);
                async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok::<_, Error>(conn)
                }
            })
            .closing(),
        )
        .unwrap();

    let mut request = container.enter_request();
    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let resolver = request.resolver().clone();
            let t = token.clone();
            tokio::spawn(async move { resolver.aget(&t).await })
        })
        .collect();
    let mut resolved = Vec::new();
    for task in tasks {
        resolved.push(task.await.unwrap().unwrap());
    }

    // Both callers observe the instance that was cached first
    assert!(Arc::ptr_eq(&resolved[0], &resolved[1]));
    assert_eq!(request.cached(), 1);

    request.aclose().await.unwrap();
    assert!(created.get() >= 1);
    assert_eq!(closed(&log).len(), created.get());
}

#[tokio::test]
async fn test_instance_finished_after_scope_closed_is_released() {
    let container = Container::new();
    let log = CloseLog::default();
    let token = Token::<Conn>::request("conn");
    let l = Arc::clone(&log);
    container
        .register(
            &token,
            Provider::new_async(move |_: Resolver| {
                let conn = Conn::new("conn", &l);
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, Error>(conn)
                }
            })
            .closing(),
        )
        .unwrap();

    let mut request = container.enter_request();
    let resolver = request.resolver().clone();
    let t = token.clone();
    let pending = tokio::spawn(async move { resolver.aget(&t).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    request.aclose().await.unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        Error::NoActiveScope {
            scope: ScopeKind::Request,
            ..
        }
    ));
    assert_eq!(closed(&log), ["sync:conn"]);
}

#[test]
fn test_rejected_request_instance_is_released() {
    let container = Container::new();
    let log = CloseLog::default();
    let token = Token::<Conn>::request("conn").with_validator(|conn: &Conn| conn.name != "conn");
    let l = Arc::clone(&log);
    container
        .register(
            &token,
            Provider::new(move |_: &Resolver| Ok(Conn::new("conn", &l))).closing(),
        )
        .unwrap();

    let request = container.enter_request();
    let err = request.get(&token).unwrap_err();

    assert!(matches!(err, Error::TypeValidation { .. }));
    assert_eq!(request.cached(), 0);
    assert_eq!(request.tracked_resources(), 0);
    assert_eq!(closed(&log), ["sync:conn"]);
}
