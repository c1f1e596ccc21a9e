//! Duplicate detection against a persistent per-source hash set.
//!
//! The persistent set is authoritative (in production it is the
//! `content_hash` column of the records table); a bounded per-source LRU in
//! front of it accelerates the common case. Hashes enter the set only after
//! the record is durably stored, so a failed batch can be replayed without
//! its records being mistaken for duplicates.

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use intake_core::Result;
use lru::LruCache;
use parking_lot::Mutex;

/// Persistent duplicate-hash set, scoped by source.
#[async_trait]
pub trait DuplicateStore: Send + Sync {
    /// Whether a record with this content hash was already persisted for the
    /// source.
    async fn is_duplicate(&self, source_id: &str, content_hash: &str) -> Result<bool>;

    /// Record a persisted content hash. Called after storage succeeds.
    async fn remember(&self, source_id: &str, content_hash: &str) -> Result<()>;
}

/// Bounded LRU cache in front of an authoritative store.
///
/// A cache hit answers without touching the store; a miss falls through and
/// positive answers are cached. `remember` populates the cache and forwards.
pub struct CachedDuplicateStore {
    inner:    Arc<dyn DuplicateStore>,
    capacity: NonZeroUsize,
    caches:   DashMap<String, Mutex<LruCache<String, ()>>>,
}

impl CachedDuplicateStore {
    /// Wrap `inner` with per-source caches of `capacity` hashes each.
    #[must_use]
    pub fn new(inner: Arc<dyn DuplicateStore>, capacity: usize) -> Self {
        Self {
            inner,
            capacity: NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN),
            caches: DashMap::new(),
        }
    }

    fn cache_contains(&self, source_id: &str, content_hash: &str) -> bool {
        self.caches
            .get(source_id)
            .is_some_and(|cache| cache.lock().get(content_hash).is_some())
    }

    fn cache_insert(&self, source_id: &str, content_hash: &str) {
        let cache = self
            .caches
            .entry(source_id.to_string())
            .or_insert_with(|| Mutex::new(LruCache::new(self.capacity)));
        cache.lock().put(content_hash.to_string(), ());
    }

    /// Drop a source's cache (on unregistration).
    pub fn forget_source(&self, source_id: &str) {
        self.caches.remove(source_id);
    }
}

#[async_trait]
impl DuplicateStore for CachedDuplicateStore {
    async fn is_duplicate(&self, source_id: &str, content_hash: &str) -> Result<bool> {
        if self.cache_contains(source_id, content_hash) {
            return Ok(true);
        }
        let seen = self.inner.is_duplicate(source_id, content_hash).await?;
        if seen {
            self.cache_insert(source_id, content_hash);
        }
        Ok(seen)
    }

    async fn remember(&self, source_id: &str, content_hash: &str) -> Result<()> {
        self.cache_insert(source_id, content_hash);
        self.inner.remember(source_id, content_hash).await
    }
}

/// In-memory duplicate store for tests and single-process runs.
#[derive(Default)]
pub struct MemoryDuplicateStore {
    seen: DashMap<String, std::collections::HashSet<String>>,
}

impl MemoryDuplicateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DuplicateStore for MemoryDuplicateStore {
    async fn is_duplicate(&self, source_id: &str, content_hash: &str) -> Result<bool> {
        Ok(self
            .seen
            .get(source_id)
            .is_some_and(|hashes| hashes.contains(content_hash)))
    }

    async fn remember(&self, source_id: &str, content_hash: &str) -> Result<()> {
        self.seen
            .entry(source_id.to_string())
            .or_default()
            .insert(content_hash.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    struct CountingStore {
        inner: MemoryDuplicateStore,
        reads: AtomicU64,
    }

    #[async_trait]
    impl DuplicateStore for CountingStore {
        async fn is_duplicate(&self, source_id: &str, content_hash: &str) -> Result<bool> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.is_duplicate(source_id, content_hash).await
        }

        async fn remember(&self, source_id: &str, content_hash: &str) -> Result<()> {
            self.inner.remember(source_id, content_hash).await
        }
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryDuplicateStore::new();
        assert!(!store.is_duplicate("a", "h1").await.expect("check"));
        store.remember("a", "h1").await.expect("remember");
        assert!(store.is_duplicate("a", "h1").await.expect("check"));
        // Scoped by source.
        assert!(!store.is_duplicate("b", "h1").await.expect("check"));
    }

    #[tokio::test]
    async fn cache_short_circuits_repeat_lookups() {
        let counting = Arc::new(CountingStore {
            inner: MemoryDuplicateStore::new(),
            reads: AtomicU64::new(0),
        });
        let cached = CachedDuplicateStore::new(counting.clone(), 16);

        cached.remember("a", "h1").await.expect("remember");
        assert!(cached.is_duplicate("a", "h1").await.expect("check"));
        assert!(cached.is_duplicate("a", "h1").await.expect("check"));
        // remember() primed the cache, so the inner store never saw a read.
        assert_eq!(counting.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cache_eviction_falls_back_to_the_store() {
        let counting = Arc::new(CountingStore {
            inner: MemoryDuplicateStore::new(),
            reads: AtomicU64::new(0),
        });
        let cached = CachedDuplicateStore::new(counting.clone(), 1);

        cached.remember("a", "h1").await.expect("remember");
        cached.remember("a", "h2").await.expect("remember");
        // h1 was evicted from the single-slot cache; the store still knows it.
        assert!(cached.is_duplicate("a", "h1").await.expect("check"));
        assert_eq!(counting.reads.load(Ordering::SeqCst), 1);
    }
}
