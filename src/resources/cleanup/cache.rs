//! Cache collaborators that cleanup can shrink

use super::error::CleanupResult;
use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Snapshot of a cache tier's contents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub stale_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Hit ratio in [0, 1]; `None` before any lookup happened
    pub fn hit_ratio(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        if total == 0 {
            None
        } else {
            Some(self.hits as f64 / total as f64)
        }
    }

    pub fn merge(self, other: CacheStats) -> CacheStats {
        CacheStats {
            entries: self.entries + other.entries,
            bytes: self.bytes + other.bytes,
            stale_entries: self.stale_entries + other.stale_entries,
            hits: self.hits + other.hits,
            misses: self.misses + other.misses,
        }
    }
}

/// What an eviction released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictResult {
    pub entries_evicted: usize,
    pub bytes_freed: u64,
}

impl EvictResult {
    pub fn merge(self, other: EvictResult) -> EvictResult {
        EvictResult {
            entries_evicted: self.entries_evicted + other.entries_evicted,
            bytes_freed: self.bytes_freed + other.bytes_freed,
        }
    }
}

/// A cache the engine may shrink under memory pressure
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn name(&self) -> &str;

    async fn stats(&self) -> CleanupResult<CacheStats>;

    /// Drop entries past their time-to-live
    async fn purge_expired(&self) -> CleanupResult<EvictResult>;

    /// Drop everything
    async fn flush(&self) -> CleanupResult<EvictResult>;

    /// Evict least-valuable entries until at least `target_bytes` are freed or the cache is empty
    async fn force_evict(&self, target_bytes: u64) -> CleanupResult<EvictResult>;

    /// Move cold entries to an external tier. Tiers without one free nothing.
    async fn migrate_cold(&self) -> CleanupResult<EvictResult> {
        Ok(EvictResult::default())
    }
}

struct Entry<V> {
    value: V,
    size_bytes: u64,
    inserted_at: Instant,
}

struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, Entry<V>>,
    bytes: u64,
}

/// In-process LRU object cache with a time-to-live
pub struct LruObjectCache<K: Hash + Eq, V> {
    name: String,
    ttl: Duration,
    inner: Mutex<Inner<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> LruObjectCache<K, V>
where
    K: Hash + Eq + Clone + Send,
    V: Clone + Send,
{
    pub fn new(name: impl Into<String>, capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                bytes: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, key: K, value: V, size_bytes: u64) {
        let mut inner = self.lock();
        let entry = Entry {
            value,
            size_bytes,
            inserted_at: Instant::now(),
        };
        if let Some((_, displaced)) = inner.entries.push(key, entry) {
            inner.bytes = inner.bytes.saturating_sub(displaced.size_bytes);
        }
        inner.bytes += size_bytes;
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        match inner.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> u64 {
        self.lock().bytes
    }
}

#[async_trait]
impl<K, V> CacheTier for LruObjectCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn stats(&self) -> CleanupResult<CacheStats> {
        let inner = self.lock();
        let stale_entries = inner
            .entries
            .iter()
            .filter(|(_, e)| e.inserted_at.elapsed() > self.ttl)
            .count();
        Ok(CacheStats {
            entries: inner.entries.len(),
            bytes: inner.bytes,
            stale_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        })
    }

    async fn purge_expired(&self) -> CleanupResult<EvictResult> {
        let mut inner = self.lock();
        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.inserted_at.elapsed() > self.ttl)
            .map(|(k, _)| k.clone())
            .collect();

        let mut result = EvictResult::default();
        for key in expired {
            if let Some(entry) = inner.entries.pop(&key) {
                inner.bytes = inner.bytes.saturating_sub(entry.size_bytes);
                result.entries_evicted += 1;
                result.bytes_freed += entry.size_bytes;
            }
        }
        Ok(result)
    }

    async fn flush(&self) -> CleanupResult<EvictResult> {
        let mut inner = self.lock();
        let result = EvictResult {
            entries_evicted: inner.entries.len(),
            bytes_freed: inner.bytes,
        };
        inner.entries.clear();
        inner.bytes = 0;
        Ok(result)
    }

    async fn force_evict(&self, target_bytes: u64) -> CleanupResult<EvictResult> {
        let mut inner = self.lock();
        let mut result = EvictResult::default();
        while result.bytes_freed < target_bytes {
            match inner.entries.pop_lru() {
                Some((_, entry)) => {
                    inner.bytes = inner.bytes.saturating_sub(entry.size_bytes);
                    result.entries_evicted += 1;
                    result.bytes_freed += entry.size_bytes;
                }
                None => break,
            }
        }
        Ok(result)
    }
}
