//! Segment cache: a concurrent, byte-budgeted LRU with TTL expiry.
//!
//! One mutex guards the map, the recency order, and the byte counter
//! together, so every observable operation is atomic with respect to the
//! byte-accounting invariant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::headers::Headers;

/// Normalize an absolute URL into a [`CacheKey`](CacheEntry): lower-cased
/// scheme and host, explicit default port removed, path and query
/// preserved.
pub fn normalize_key(url: &url::Url) -> String {
    let scheme = url.scheme().to_ascii_lowercase();
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let is_default_port = matches!(
        (scheme.as_str(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    );

    let mut key = format!("{scheme}://{host}");
    if let Some(port) = url.port() {
        if !is_default_port {
            key.push_str(&format!(":{port}"));
        }
    }
    key.push_str(url.path());
    if let Some(query) = url.query() {
        key.push('?');
        key.push_str(query);
    }
    key
}

/// One cached response body plus enough of its headers to replay it.
#[derive(Clone)]
pub struct CacheEntry {
    pub bytes: Bytes,
    pub headers: Headers,
    pub status: u16,
    pub size_bytes: usize,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, expiry: Duration) -> bool {
        self.inserted_at.elapsed() > expiry
    }
}

/// Runtime configuration for a [`SegmentCache`].
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_memory_bytes: usize,
    pub expiry: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 2000,
            max_memory_bytes: 500 * 1024 * 1024,
            expiry: Duration::from_secs(2 * 60 * 60),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_mb: f64,
    pub avg_entry_kb: f64,
    pub max_entries: usize,
    pub max_mb: f64,
    pub current_mb: f64,
    pub expiry_hours: f64,
}

struct Inner {
    entries: LruCache<String, CacheEntry>,
    current_memory_bytes: usize,
}

/// Concurrent LRU segment cache bounded by both entry count and aggregate
/// byte size, with TTL expiry.
pub struct SegmentCache {
    config: CacheConfig,
    inner: Mutex<Inner>,
    // Mirrors `inner.entries.len()` for cheap stats reads that don't
    // otherwise need the lock; always updated under `inner`'s mutex.
    len_hint: AtomicUsize,
}

impl SegmentCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                current_memory_bytes: 0,
            }),
            len_hint: AtomicUsize::new(0),
        }
    }

    /// Look up `key`. A live hit promotes the entry to most-recently-used.
    /// An expired hit is removed and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.inner.lock().await;
        match inner.entries.get(key) {
            Some(entry) if entry.is_expired(self.config.expiry) => {
                if let Some(removed) = inner.entries.pop(key) {
                    inner.current_memory_bytes -= removed.size_bytes;
                }
                self.len_hint.store(inner.entries.len(), Ordering::Relaxed);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    /// Insert (or replace) `key`, evicting least-recently-used entries
    /// first by byte budget, then by entry count, until the new entry
    /// fits.
    pub async fn set(&self, key: String, bytes: Bytes, headers: Headers, status: u16) {
        let size_bytes = bytes.len();
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.entries.pop(&key) {
            inner.current_memory_bytes -= existing.size_bytes;
        }

        while inner.current_memory_bytes + size_bytes > self.config.max_memory_bytes
            && !inner.entries.is_empty()
        {
            if let Some((_, evicted)) = inner.entries.pop_lru() {
                inner.current_memory_bytes -= evicted.size_bytes;
            }
        }

        if inner.entries.len() >= self.config.max_entries {
            if let Some((_, evicted)) = inner.entries.pop_lru() {
                inner.current_memory_bytes -= evicted.size_bytes;
            }
        }

        inner.entries.put(
            key,
            CacheEntry {
                bytes,
                headers,
                status,
                size_bytes,
                inserted_at: Instant::now(),
            },
        );
        inner.current_memory_bytes += size_bytes;
        self.len_hint.store(inner.entries.len(), Ordering::Relaxed);
    }

    /// Remove `key` unconditionally. Returns whether an entry was removed.
    pub async fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.entries.pop(key) {
            Some(removed) => {
                inner.current_memory_bytes -= removed.size_bytes;
                self.len_hint.store(inner.entries.len(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Remove every entry older than the configured TTL. Returns the count
    /// removed.
    pub async fn cleanup(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let expiry = self.config.expiry;

        let expired_keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(expiry))
            .map(|(key, _)| key.clone())
            .collect();

        let removed = expired_keys.len();
        for key in &expired_keys {
            if let Some(entry) = inner.entries.pop(key) {
                inner.current_memory_bytes -= entry.size_bytes;
            }
        }
        self.len_hint.store(inner.entries.len(), Ordering::Relaxed);
        removed
    }

    /// Drop every entry and reset accounting to zero.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.current_memory_bytes = 0;
        self.len_hint.store(0, Ordering::Relaxed);
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        let entries = inner.entries.len();
        let current_mb = inner.current_memory_bytes as f64 / (1024.0 * 1024.0);
        CacheStats {
            entries,
            total_mb: current_mb,
            avg_entry_kb: if entries > 0 {
                (inner.current_memory_bytes as f64 / 1024.0) / entries as f64
            } else {
                0.0
            },
            max_entries: self.config.max_entries,
            max_mb: self.config.max_memory_bytes as f64 / (1024.0 * 1024.0),
            current_mb,
            expiry_hours: self.config.expiry.as_secs_f64() / 3600.0,
        }
    }

    #[cfg(test)]
    pub async fn current_memory_bytes(&self) -> usize {
        self.inner.lock().await.current_memory_bytes
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_key_lowercases_host_and_drops_default_port() {
        let url = url::Url::parse("HTTPS://O.Test:443/a/Seg.ts?x=1").unwrap();
        assert_eq!(normalize_key(&url), "https://o.test/a/Seg.ts?x=1");
    }

    #[test]
    fn normalize_key_preserves_non_default_port() {
        let url = url::Url::parse("http://o.test:8080/a").unwrap();
        assert_eq!(normalize_key(&url), "http://o.test:8080/a");
    }

    fn entry(n: usize) -> Bytes {
        Bytes::from(vec![0u8; n])
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = SegmentCache::new(CacheConfig::default());
        cache.set("k".into(), entry(10), Headers::new(), 200).await;
        let got = cache.get("k").await.expect("hit");
        assert_eq!(got.size_bytes, 10);
        assert_eq!(cache.current_memory_bytes().await, 10);
    }

    #[tokio::test]
    async fn get_miss_for_absent_key() {
        let cache = SegmentCache::new(CacheConfig::default());
        assert!(cache.get("missing").await.is_none());
    }

    /// Entry-count eviction evicts the least-recently-used entry.
    #[tokio::test]
    async fn lru_eviction_by_entry_count() {
        let cache = SegmentCache::new(CacheConfig {
            max_entries: 3,
            max_memory_bytes: 1_000_000_000,
            expiry: Duration::from_secs(9999),
        });
        cache.set("A".into(), entry(1), Headers::new(), 200).await;
        cache.set("B".into(), entry(1), Headers::new(), 200).await;
        cache.set("C".into(), entry(1), Headers::new(), 200).await;
        cache.get("A").await;
        cache.set("D".into(), entry(1), Headers::new(), 200).await;

        assert!(cache.get("A").await.is_some());
        assert!(cache.get("B").await.is_none());
        assert!(cache.get("C").await.is_some());
        assert!(cache.get("D").await.is_some());
    }

    /// Byte-budget eviction evicts the oldest entry to make room.
    #[tokio::test]
    async fn byte_budget_eviction() {
        let cache = SegmentCache::new(CacheConfig {
            max_entries: 1000,
            max_memory_bytes: 300,
            expiry: Duration::from_secs(9999),
        });
        cache.set("A".into(), entry(100), Headers::new(), 200).await;
        cache.set("B".into(), entry(100), Headers::new(), 200).await;
        cache.set("C".into(), entry(100), Headers::new(), 200).await;
        cache.set("D".into(), entry(100), Headers::new(), 200).await;

        assert!(cache.get("A").await.is_none());
        assert_eq!(cache.current_memory_bytes().await, 300);
    }

    /// An entry past its TTL is reported as a miss and its bytes are
    /// removed from the accounting.
    #[tokio::test]
    async fn ttl_expiry_reports_miss_and_frees_bytes() {
        let cache = SegmentCache::new(CacheConfig {
            max_entries: 1000,
            max_memory_bytes: 1_000_000,
            expiry: Duration::from_millis(1),
        });
        cache.set("A".into(), entry(10), Headers::new(), 200).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("A").await.is_none());
        assert_eq!(cache.current_memory_bytes().await, 0);
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_entries() {
        let cache = SegmentCache::new(CacheConfig {
            max_entries: 1000,
            max_memory_bytes: 1_000_000,
            expiry: Duration::from_millis(10),
        });
        cache.set("old".into(), entry(5), Headers::new(), 200).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.set("new".into(), entry(5), Headers::new(), 200).await;

        let removed = cache.cleanup().await;
        assert_eq!(removed, 1);
        assert!(cache.get("new").await.is_some());
    }

    #[tokio::test]
    async fn degenerate_set_larger_than_budget_still_inserts() {
        let cache = SegmentCache::new(CacheConfig {
            max_entries: 1000,
            max_memory_bytes: 100,
            expiry: Duration::from_secs(9999),
        });
        cache.set("small".into(), entry(50), Headers::new(), 200).await;
        cache.set("huge".into(), entry(500), Headers::new(), 200).await;

        assert!(cache.get("small").await.is_none());
        assert!(cache.get("huge").await.is_some());
        assert_eq!(cache.current_memory_bytes().await, 500);
    }

    #[tokio::test]
    async fn delete_reports_whether_an_entry_was_removed() {
        let cache = SegmentCache::new(CacheConfig::default());
        cache.set("k".into(), entry(1), Headers::new(), 200).await;
        assert!(cache.delete("k").await);
        assert!(!cache.delete("k").await);
    }

    #[tokio::test]
    async fn clear_resets_accounting() {
        let cache = SegmentCache::new(CacheConfig::default());
        cache.set("a".into(), entry(10), Headers::new(), 200).await;
        cache.set("b".into(), entry(10), Headers::new(), 200).await;
        cache.clear().await;
        assert_eq!(cache.len().await, 0);
        assert_eq!(cache.current_memory_bytes().await, 0);
    }

    /// Concurrent sets/gets never push accounting negative or leave it
    /// unboundedly above the configured budget.
    #[tokio::test]
    async fn concurrent_mutation_preserves_accounting_invariant() {
        use std::sync::Arc;

        let cache = Arc::new(SegmentCache::new(CacheConfig {
            max_entries: 50,
            max_memory_bytes: 10_000,
            expiry: Duration::from_secs(9999),
        }));

        let mut handles = Vec::new();
        for i in 0..100 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("key-{}", i % 20);
                cache.set(key.clone(), entry(100), Headers::new(), 200).await;
                cache.get(&key).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let current = cache.current_memory_bytes().await;
        assert!(current <= 10_000 + 100);
    }
}
