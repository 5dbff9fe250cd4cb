//! Tests for error rendering and classification

use scopewire::{CloseFailure, Error, ScopeKind, Token};

#[test]
fn test_circular_dependency_renders_chain() {
    let a = Token::<u8>::singleton("A").key().clone();
    let b = Token::<u8>::singleton("B").key().clone();
    let err = Error::CircularDependency {
        chain: vec![a.clone(), b, a],
    };

    assert_eq!(err.to_string(), "Circular dependency detected: A -> B -> A");
    assert_eq!(err.cycle_chain().map(<[_]>::len), Some(3));
    assert!(err.is_resolution_error());
}

#[test]
fn test_resolution_error_classification() {
    let key = Token::<u8>::new("x").key().clone();

    assert!(Error::NotFound { token: key.clone() }.is_resolution_error());
    assert!(Error::SyncResolutionOfAsyncProvider { token: key.clone() }.is_resolution_error());
    assert!(
        Error::TypeValidation {
            token: key.clone(),
            expected: "u8"
        }
        .is_resolution_error()
    );
    assert!(!Error::AlreadyRegistered { token: key.clone() }.is_resolution_error());
    assert!(
        !Error::NoActiveScope {
            token: key,
            scope: ScopeKind::Request
        }
        .is_resolution_error()
    );
    assert!(!Error::provider("boom").is_resolution_error());
}

#[test]
fn test_cleanup_error_lists_failures() {
    let err = Error::Cleanup {
        failures: vec![
            CloseFailure {
                resource: "db".to_string(),
                message: "timeout".to_string(),
            },
            CloseFailure {
                resource: "cache".to_string(),
                message: "refused".to_string(),
            },
        ],
    };

    let rendered = err.to_string();
    assert!(rendered.starts_with("2 resource(s) failed to close"));
    assert!(rendered.contains("db: timeout"));
    assert!(rendered.contains("cache: refused"));
}

#[test]
fn test_async_cleanup_required_names_resources() {
    let err = Error::AsyncCleanupRequired {
        resources: vec!["socket".to_string()],
    };

    assert!(err.to_string().contains("socket"));
    assert!(err.to_string().contains("aclose()"));
}

#[test]
fn test_provider_error_keeps_source() {
    let io = std::io::Error::other("disk gone");
    let err = Error::provider_with_source("Failed to open store", io);

    let source = std::error::Error::source(&err).map(ToString::to_string);
    assert_eq!(source.as_deref(), Some("disk gone"));
    assert_eq!(err.to_string(), "Provider error: Failed to open store");
}
