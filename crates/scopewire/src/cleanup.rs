//! Cleanup coordination
//!
//! Every instance created by a provider with a declared close capability is
//! pushed onto the [`CleanupStack`] of the tier that owns it. Draining always
//! walks the stack newest-first. The synchronous pass refuses to start when
//! any async-only resource is tracked; the asynchronous pass awaits every
//! async close before running the sync ones.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{BoxError, CloseFailure, Error, Result};

/// Which close capability a tracked resource exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseKind {
    /// `Close::close`
    Sync,
    /// `AsyncClose::aclose`
    Async,
}

pub(crate) type SyncCloseFn = Box<dyn FnOnce() -> std::result::Result<(), BoxError> + Send>;
pub(crate) type AsyncCloseFn =
    Box<dyn FnOnce() -> BoxFuture<'static, std::result::Result<(), BoxError>> + Send>;

pub(crate) enum CloseAction {
    Sync(SyncCloseFn),
    Async(AsyncCloseFn),
}

/// An instance registered for teardown
pub(crate) struct TrackedResource {
    label: String,
    action: CloseAction,
}

impl TrackedResource {
    pub(crate) fn new(label: impl Into<String>, action: CloseAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }

    pub(crate) fn kind(&self) -> CloseKind {
        match self.action {
            CloseAction::Sync(_) => CloseKind::Sync,
            CloseAction::Async(_) => CloseKind::Async,
        }
    }
}

impl fmt::Debug for TrackedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedResource")
            .field("label", &self.label)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Creation-ordered list of tracked resources for one tier
#[derive(Default)]
pub(crate) struct CleanupStack {
    entries: Mutex<Vec<TrackedResource>>,
}

impl CleanupStack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn track(&self, resource: TrackedResource) {
        debug!(
            resource = %resource.label,
            kind = ?resource.kind(),
            "Tracking resource for cleanup"
        );
        self.entries.lock().push(resource);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub(crate) fn has_async(&self) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|resource| resource.kind() == CloseKind::Async)
    }

    /// Labels in creation order, for diagnostics
    pub(crate) fn labels(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|resource| resource.label.clone())
            .collect()
    }

    /// Synchronous drain
    ///
    /// Fails with `AsyncCleanupRequired` before closing anything when an
    /// async-only resource is tracked.
    pub(crate) fn close_sync(&self) -> Result<()> {
        let drained = {
            let mut entries = self.entries.lock();
            let pending: Vec<String> = entries
                .iter()
                .filter(|resource| resource.kind() == CloseKind::Async)
                .map(|resource| resource.label.clone())
                .collect();
            if !pending.is_empty() {
                return Err(Error::AsyncCleanupRequired { resources: pending });
            }
            std::mem::take(&mut *entries)
        };

        let mut failures = Vec::new();
        for resource in drained.into_iter().rev() {
            if let Some(failure) = run_sync(resource) {
                failures.push(failure);
            }
        }
        into_result(failures)
    }

    /// Asynchronous drain: async closes first, then sync closes, each newest-first
    pub(crate) async fn close_async(&self, timeout: Option<Duration>) -> Result<()> {
        let drained = std::mem::take(&mut *self.entries.lock());

        let (async_entries, sync_entries): (Vec<_>, Vec<_>) = drained
            .into_iter()
            .rev()
            .partition(|resource| resource.kind() == CloseKind::Async);

        let mut failures = Vec::new();
        for resource in async_entries {
            if let Some(failure) = run_async(resource, timeout).await {
                failures.push(failure);
            }
        }
        for resource in sync_entries {
            if let Some(failure) = run_sync(resource) {
                failures.push(failure);
            }
        }
        into_result(failures)
    }

    /// Close what can be closed without awaiting and hand back the async rest
    pub(crate) fn close_sync_partial(&self) -> (Vec<CloseFailure>, Vec<String>) {
        let drained = std::mem::take(&mut *self.entries.lock());
        let mut failures = Vec::new();
        let mut skipped = Vec::new();
        for resource in drained.into_iter().rev() {
            if resource.kind() == CloseKind::Async {
                skipped.push(resource.label);
                continue;
            }
            if let Some(failure) = run_sync(resource) {
                failures.push(failure);
            }
        }
        (failures, skipped)
    }

    /// Drop every entry without closing it
    pub(crate) fn forget(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }
}

impl fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupStack")
            .field("resources", &self.labels())
            .finish()
    }
}

/// Close a resource that never made it onto a stack, without awaiting
///
/// Async closes are spawned onto the current Tokio runtime; outside one they
/// are reported and skipped.
pub(crate) fn close_orphan(resource: TrackedResource, timeout: Option<Duration>) {
    if resource.kind() == CloseKind::Sync {
        run_sync(resource);
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(run_async(resource, timeout));
        }
        Err(_) => warn!(
            resource = %resource.label,
            "Discarded instance outside a Tokio runtime; async close skipped"
        ),
    }
}

/// Close a resource that never made it onto a stack
pub(crate) async fn aclose_orphan(resource: TrackedResource, timeout: Option<Duration>) {
    run_async(resource, timeout).await;
}

fn run_sync(resource: TrackedResource) -> Option<CloseFailure> {
    let TrackedResource { label, action } = resource;
    let result = match action {
        CloseAction::Sync(close) => close(),
        CloseAction::Async(_) => Err("async resource reached the synchronous close path".into()),
    };
    close_outcome(label, result)
}

async fn run_async(resource: TrackedResource, timeout: Option<Duration>) -> Option<CloseFailure> {
    let TrackedResource { label, action } = resource;
    let result = match action {
        CloseAction::Async(close) => match timeout {
            Some(limit) => match tokio::time::timeout(limit, close()).await {
                Ok(result) => result,
                Err(_) => Err(format!("close timed out after {limit:?}").into()),
            },
            None => close().await,
        },
        CloseAction::Sync(close) => close(),
    };
    close_outcome(label, result)
}

fn close_outcome(label: String, result: std::result::Result<(), BoxError>) -> Option<CloseFailure> {
    match result {
        Ok(()) => {
            debug!(resource = %label, "Resource closed");
            None
        }
        Err(e) => {
            warn!(resource = %label, error = %e, "Resource failed to close");
            Some(CloseFailure {
                resource: label,
                message: e.to_string(),
            })
        }
    }
}

fn into_result(failures: Vec<CloseFailure>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Cleanup { failures })
    }
}
