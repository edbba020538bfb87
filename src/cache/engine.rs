//! Cache engine: coordinates the index and the store under a striped
//! locking scheme, and runs background store/delete work off the
//! connection handler's hot path.
//!
//! Grounded in the teacher's `ProxyCache` (`src/lib.rs`), generalized from
//! a single `Mutex<LruCache>` into the three-tier lock model of
//! spec.md §4.2/§5 (index lock > slot lock; the source's chdir lock is
//! eliminated per the REDESIGN FLAGS since `cache/store.rs` only ever
//! builds absolute paths). The cache deliberately has no size bound or
//! eviction policy (spec.md §1 Non-goals): it grows until `shutdown`'s
//! prune pass, which only ever removes dead (zero-count) entries.

use crate::cache::index::{CacheEntry, CacheIndex, Expiry};
use crate::cache::store;
use crate::error::ProxyError;
use crate::key::{Encoding, ResourceKey};
use crate::primes::next_prime;
use crate::time::HttpDate;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use xxhash_rust::xxh64::xxh64;

pub enum FetchResult {
    Hit { chunks: Vec<Bytes>, expiry: Expiry },
    Miss,
    Corrupt,
}

struct Inner {
    root: PathBuf,
    index_path: PathBuf,
    index: Mutex<CacheIndex>,
    slot_locks: Vec<Mutex<()>>,
    tasks: Mutex<JoinSet<()>>,
}

#[derive(Clone)]
pub struct CacheEngine {
    inner: Arc<Inner>,
}

impl CacheEngine {
    pub async fn new(root: PathBuf, worker_count: usize) -> Result<Self, ProxyError> {
        let index_path = root
            .parent()
            .unwrap_or(&root)
            .join("cache_lookup_table.json");
        let index = CacheIndex::load(&index_path).await?;
        let slot_count = next_prime(2 * worker_count.max(1));
        let mut slot_locks = Vec::with_capacity(slot_count as usize);
        for _ in 0..slot_count {
            slot_locks.push(Mutex::new(()));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                root,
                index_path,
                index: Mutex::new(index),
                slot_locks,
                tasks: Mutex::new(JoinSet::new()),
            }),
        })
    }

    fn slot_for(&self, key: &ResourceKey) -> &Mutex<()> {
        let hash = xxh64(key.joined().as_bytes(), 0);
        let idx = (hash as usize) % self.inner.slot_locks.len();
        &self.inner.slot_locks[idx]
    }

    /// Returns at most one cached response whose encoding is compatible
    /// with `accept_encoding`. `None`/empty/`"*"` means "any"; among
    /// multiple stored encodings, picks in declaration order.
    pub async fn fetch(
        &self,
        key: &ResourceKey,
        accept_encoding: &str,
    ) -> Result<FetchResult, ProxyError> {
        let entry = {
            let index = self.inner.index.lock().await;
            index.find(key).cloned()
        };
        let Some(entry) = entry else {
            return Ok(FetchResult::Miss);
        };

        let encoding = match pick_encoding(accept_encoding, &entry) {
            Some(e) => e,
            None => return Ok(FetchResult::Miss),
        };
        let count = entry.counts.get(encoding);

        let _slot = self.slot_for(key).lock().await;
        match store::read_chunks(&self.inner.root, key, encoding, count).await {
            Ok(chunks) => Ok(FetchResult::Hit {
                chunks,
                expiry: entry.expiry,
            }),
            Err(ProxyError::CacheCorruption) => {
                warn!(key = %key, "cache index/disk mismatch, treating as miss");
                Ok(FetchResult::Corrupt)
            }
            Err(e) => Err(e),
        }
    }

    /// Stores `chunks` for `key` under `encoding`. No-op when
    /// `cache_control_tokens` carries `no-store`/`private`, or when the
    /// key is uncacheable.
    pub async fn store(
        &self,
        key: ResourceKey,
        encoding: Encoding,
        cache_control_tokens: &[String],
        date_header: Option<HttpDate>,
        chunks: Vec<Bytes>,
    ) -> Result<(), ProxyError> {
        if cache_control_tokens.iter().any(|t| t == "no-store" || t == "private") {
            debug!(key = %key, "not cached: no-store/private");
            return Ok(());
        }

        self.delete_internal(&key).await?;

        let _slot = self.slot_for(&key).lock().await;
        store::write_chunks(&self.inner.root, &key, encoding, &chunks).await?;
        drop(_slot);

        let expiry = compute_expiry(cache_control_tokens, date_header);
        let mut index = self.inner.index.lock().await;
        let mut entry = CacheEntry::new();
        entry.counts.set(encoding, chunks.len() as u32);
        entry.expiry = expiry;
        index.upsert(key.clone(), entry);
        Ok(())
    }

    /// Removes all files for `key` and zeroes its index counts. The
    /// entry itself is physically dropped by `shutdown`.
    pub async fn delete(&self, key: &ResourceKey) -> Result<(), ProxyError> {
        self.delete_internal(key).await
    }

    async fn delete_internal(&self, key: &ResourceKey) -> Result<(), ProxyError> {
        let prior = {
            let index = self.inner.index.lock().await;
            index.find(key).cloned()
        };
        let Some(prior) = prior else {
            return Ok(());
        };

        let _slot = self.slot_for(key).lock().await;
        for encoding in Encoding::ALL {
            let count = prior.counts.get(encoding);
            if count > 0 {
                store::remove_chunks(&self.inner.root, key, encoding, count).await?;
            }
        }
        drop(_slot);

        let mut index = self.inner.index.lock().await;
        if let Some(mut entry) = index.find(key).cloned() {
            entry.counts.zero_all();
            index.upsert(key.clone(), entry);
        }
        Ok(())
    }

    /// Runs a `Store` on a background task so the connection handler is
    /// not blocked on disk I/O. Tracked in an internal `JoinSet` so
    /// `shutdown` can drain outstanding writes before persisting the index.
    pub async fn spawn_store(
        &self,
        key: ResourceKey,
        encoding: Encoding,
        cache_control_tokens: Vec<String>,
        date_header: Option<HttpDate>,
        chunks: Vec<Bytes>,
    ) {
        let engine = self.clone();
        let mut tasks = self.inner.tasks.lock().await;
        tasks.spawn(async move {
            if let Err(e) = engine
                .store(key, encoding, &cache_control_tokens, date_header, chunks)
                .await
            {
                warn!(error = %e, "background cache store failed");
            }
        });
    }

    pub async fn spawn_delete(&self, key: ResourceKey) {
        let engine = self.clone();
        let mut tasks = self.inner.tasks.lock().await;
        tasks.spawn(async move {
            if let Err(e) = engine.delete(&key).await {
                warn!(error = %e, "background cache delete failed");
            }
        });
    }

    /// (a) prunes empty directories, (b) drops dead index entries,
    /// (c) persists the index. Waits for outstanding background
    /// store/delete tasks first.
    pub async fn shutdown(&self) -> Result<(), ProxyError> {
        let mut tasks = self.inner.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
        drop(tasks);

        store::prune_empty_dirs(&self.inner.root).await?;
        let mut index = self.inner.index.lock().await;
        index.prune_dead_entries();
        index.persist(&self.inner.index_path).await
    }
}

fn pick_encoding(accept_encoding: &str, entry: &CacheEntry) -> Option<Encoding> {
    let trimmed = accept_encoding.trim();
    if trimmed.is_empty() || trimmed == "nil" || trimmed.split(',').any(|t| t.trim() == "*") {
        return Encoding::ALL.into_iter().find(|e| entry.counts.get(*e) > 0);
    }
    for token in trimmed.split(',') {
        if let Some(encoding) = Encoding::from_token(token) {
            if entry.counts.get(encoding) > 0 {
                return Some(encoding);
            }
        }
    }
    None
}

/// `max-age=Δ`, then `s-maxage=Δ` overrides it; then `no-cache` /
/// `must-revalidate` / `proxy-revalidate` resets to "unknown". Reference
/// instant is `date_header`, or "now" if absent.
fn compute_expiry(tokens: &[String], date_header: Option<HttpDate>) -> Expiry {
    let reference = date_header.unwrap_or_else(HttpDate::now);
    let mut expiry = Expiry::Unknown;
    for token in tokens {
        if let Some(delta) = token.strip_prefix("max-age=") {
            if let Ok(secs) = delta.parse::<u64>() {
                expiry = Expiry::At(reference.add_secs(secs));
            }
        }
    }
    for token in tokens {
        if let Some(delta) = token.strip_prefix("s-maxage=") {
            if let Ok(secs) = delta.parse::<u64>() {
                expiry = Expiry::At(reference.add_secs(secs));
            }
        }
    }
    if tokens.iter().any(|t| {
        t == "no-cache" || t == "must-revalidate" || t == "proxy-revalidate"
    }) {
        expiry = Expiry::Unknown;
    }
    expiry
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(host: &str, path: &str) -> ResourceKey {
        ResourceKey::new(host, path).unwrap()
    }

    #[tokio::test]
    async fn store_then_fetch_round_trip() {
        let dir = tempdir().unwrap();
        let engine = CacheEngine::new(dir.path().join("cache_responses"), 4)
            .await
            .unwrap();
        let k = key("h", "/x");
        let chunks = vec![Bytes::from_static(b"body")];
        engine
            .store(k.clone(), Encoding::Gzip, &["public".into(), "max-age=60".into()], None, chunks.clone())
            .await
            .unwrap();

        match engine.fetch(&k, "gzip").await.unwrap() {
            FetchResult::Hit { chunks: got, expiry } => {
                assert_eq!(got, chunks);
                assert!(expiry.is_future());
            }
            _ => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn no_store_and_private_are_not_cached() {
        let dir = tempdir().unwrap();
        let engine = CacheEngine::new(dir.path().join("cache_responses"), 2)
            .await
            .unwrap();
        let k = key("h", "/private");
        engine
            .store(k.clone(), Encoding::None, &["private".into()], None, vec![Bytes::from_static(b"x")])
            .await
            .unwrap();
        assert!(matches!(engine.fetch(&k, "*").await.unwrap(), FetchResult::Miss));
    }

    #[tokio::test]
    async fn second_store_replaces_only_that_encoding() {
        let dir = tempdir().unwrap();
        let engine = CacheEngine::new(dir.path().join("cache_responses"), 2)
            .await
            .unwrap();
        let k = key("h", "/x");
        engine
            .store(k.clone(), Encoding::Gzip, &[], None, vec![Bytes::from_static(b"v1")])
            .await
            .unwrap();
        engine
            .store(k.clone(), Encoding::Gzip, &[], None, vec![Bytes::from_static(b"v2")])
            .await
            .unwrap();
        match engine.fetch(&k, "gzip").await.unwrap() {
            FetchResult::Hit { chunks, .. } => assert_eq!(chunks[0], Bytes::from_static(b"v2")),
            _ => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn delete_then_shutdown_removes_entry_and_files() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("cache_responses");
        let engine = CacheEngine::new(root.clone(), 2).await.unwrap();
        let k = key("h", "/x");
        engine
            .store(k.clone(), Encoding::Identity, &[], None, vec![Bytes::from_static(b"v")])
            .await
            .unwrap();
        engine.delete(&k).await.unwrap();
        engine.shutdown().await.unwrap();
        assert!(!root.join("h").join("x, identity, 1").exists());
        assert!(!root.join("h").exists());
    }

    #[tokio::test]
    async fn s_maxage_overrides_max_age() {
        let dir = tempdir().unwrap();
        let engine = CacheEngine::new(dir.path().join("cache_responses"), 2)
            .await
            .unwrap();
        let k = key("h", "/x");
        engine
            .store(
                k.clone(),
                Encoding::None,
                &["max-age=1".into(), "s-maxage=600".into()],
                None,
                vec![Bytes::from_static(b"v")],
            )
            .await
            .unwrap();
        match engine.fetch(&k, "*").await.unwrap() {
            FetchResult::Hit { expiry, .. } => assert!(expiry.is_future()),
            _ => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn cache_has_no_size_bound() {
        // Non-goal per spec.md §1: no cache size bounds or LRU eviction.
        let dir = tempdir().unwrap();
        let engine = CacheEngine::new(dir.path().join("cache_responses"), 2)
            .await
            .unwrap();
        let k = key("h", "/big");
        let big = vec![Bytes::from(vec![0u8; 10 * 1024 * 1024])];
        engine.store(k.clone(), Encoding::None, &[], None, big).await.unwrap();
        assert!(matches!(engine.fetch(&k, "*").await.unwrap(), FetchResult::Hit { .. }));
    }
}
