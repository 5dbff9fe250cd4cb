//! Resolution statistics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lock-free hit/miss counters
///
/// A hit is a resolution served from an override or a cache; a miss is a
/// provider invocation.
#[derive(Debug)]
pub(crate) struct ResolutionStats {
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResolutionStats {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub(crate) fn hit(&self) {
        if self.enabled {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn miss(&self) {
        if self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub(crate) fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub(crate) fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    /// Number of registered tokens
    pub providers: usize,
    /// Number of singletons created so far
    pub cached_singletons: usize,
    /// Resolutions served from an override or a cache
    pub cache_hits: u64,
    /// Provider invocations
    pub cache_misses: u64,
    /// `cache_hits / (cache_hits + cache_misses)`, 0 when nothing was resolved
    pub hit_rate: f64,
    /// Container-tier resources awaiting teardown
    pub tracked_resources: usize,
    /// Singleton init locks not yet discarded
    pub pending_init_locks: usize,
}

impl ContainerStats {
    pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
