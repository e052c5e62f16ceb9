use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

/// A leaf certificate that passed full chain verification for a host.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CachedLeaf {
    leaf: Vec<u8>,
    verified_at: DateTime<Utc>,
}

/// Thread-safe cache of verified leaf certificates, keyed by hostname.
///
/// Holds at most one leaf per host. Entries never expire; they are replaced
/// by a later verification or removed explicitly.
#[derive(Debug, Default)]
pub struct CertCache {
    leaves: RwLock<HashMap<String, CachedLeaf>>,
}

static GLOBAL: OnceLock<Arc<CertCache>> = OnceLock::new();

impl CertCache {
    pub fn new() -> Self {
        Self {
            leaves: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide cache, created on first use.
    pub fn global() -> Arc<CertCache> {
        GLOBAL.get_or_init(|| Arc::new(CertCache::new())).clone()
    }

    // The map only ever holds complete entries, so a writer that panicked
    // cannot have left it half-updated.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CachedLeaf>> {
        self.leaves.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CachedLeaf>> {
        self.leaves.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Leaf certificate last verified for `hostname`.
    pub fn get(&self, hostname: &str) -> Option<Vec<u8>> {
        self.read().get(hostname).map(|entry| entry.leaf.clone())
    }

    /// Whether the cached leaf for `hostname` is exactly `leaf`.
    pub fn matches(&self, hostname: &str, leaf: &[u8]) -> Option<bool> {
        self.read()
            .get(hostname)
            .map(|entry| entry.leaf.as_slice() == leaf)
    }

    /// When the cached leaf for `hostname` was verified.
    pub fn verified_at(&self, hostname: &str) -> Option<DateTime<Utc>> {
        self.read().get(hostname).map(|entry| entry.verified_at)
    }

    /// Store `leaf` for `hostname`, replacing any previous entry.
    pub fn put(&self, hostname: &str, leaf: &[u8]) {
        self.write().insert(
            hostname.to_string(),
            CachedLeaf {
                leaf: leaf.to_vec(),
                verified_at: Utc::now(),
            },
        );
    }

    pub fn remove(&self, hostname: &str) {
        self.write().remove(hostname);
    }

    /// Drop every cached leaf.
    pub fn clear(&self) {
        let mut leaves = self.write();
        debug!(entries = leaves.len(), "clearing certificate cache");
        leaves.clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Clear the process-wide certificate cache, e.g. on logout.
pub fn clear_cache() {
    CertCache::global().clear();
}
