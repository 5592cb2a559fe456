//! The zip-part cache: a sharded bounded LRU of open zip readers. Each
//! shard has its own lock, LRU list and singleflight group for cold-miss
//! deduplication, and a global weighted semaphore caps concurrent
//! open-and-parse operations across all shards.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::warn;

use super::{shard_index, NUM_SHARDS};
use crate::metrics::Metrics;
use crate::singleflight::SingleFlight;

/// A cached, already-opened zip reader with its central-directory index
/// built. `zip::ZipArchive` keeps its own name -> entry-descriptor hash map
/// internally, giving O(1) entry lookup.
pub type CachedZip = Arc<Mutex<zip::ZipArchive<std::fs::File>>>;

#[derive(Debug, Clone)]
pub enum OpenError {
    NotFound,
    Invalid(String),
}

struct Shard {
    lru: Mutex<LruCache<PathBuf, CachedZip>>,
    singleflight: SingleFlight<PathBuf, Result<CachedZip, OpenError>>,
}

impl Shard {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            lru: Mutex::new(LruCache::new(capacity)),
            singleflight: SingleFlight::new(),
        }
    }

    fn get_promoting(&self, path: &Path) -> Option<CachedZip> {
        self.lru.lock().get(path).cloned()
    }

    /// Inserts `path` (never already present -- callers only insert after
    /// a confirmed miss). Returns `true` if a capacity eviction dropped a
    /// different entry to make room.
    fn insert(&self, path: PathBuf, zip: CachedZip) -> bool {
        self.lru.lock().push(path, zip).is_some()
    }
}

pub struct ZipPartCache {
    shards: Vec<Shard>,
    open_semaphore: Arc<Semaphore>,
    metrics: Arc<Metrics>,
    /// `max_open == 0` disables caching entirely: every `get` opens and
    /// indexes the zip fresh, and the result is never inserted into a
    /// shard.
    enabled: bool,
}

impl ZipPartCache {
    pub fn new(max_open: usize, max_concurrent_opens: usize, metrics: Arc<Metrics>) -> Self {
        let enabled = max_open > 0;
        let per_shard = (max_open / NUM_SHARDS).max(1);
        let capacity = NonZeroUsize::new(per_shard).expect("at least 1");
        let shards = (0..NUM_SHARDS).map(|_| Shard::new(capacity)).collect();
        Self {
            shards,
            open_semaphore: Arc::new(Semaphore::new(max_concurrent_opens.max(1))),
            metrics,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn shard_for(&self, path: &Path) -> &Shard {
        &self.shards[shard_index(path.to_string_lossy().as_bytes())]
    }

    /// Returns a reader for `path` only if it's already cached -- never
    /// opens the file. Used to distinguish a true cache hit from a miss
    /// that still needs integrity verification before opening.
    pub fn peek(&self, path: &Path) -> Option<CachedZip> {
        if !self.enabled {
            return None;
        }
        self.shard_for(path).get_promoting(path)
    }

    /// Returns a cached reader for `path`, opening and indexing it on a
    /// cold miss. Concurrent misses for the same path perform exactly one
    /// open (per shard, via singleflight). When the cache is disabled,
    /// every call opens the zip fresh and discards it once the caller is
    /// done -- the reader is never shared or stored.
    pub async fn get(&self, path: &Path) -> Result<CachedZip, OpenError> {
        if !self.enabled {
            let _permit = self
                .open_semaphore
                .acquire()
                .await
                .expect("open semaphore is never closed");
            return open_and_index(path.to_path_buf()).await;
        }

        let shard = self.shard_for(path);

        if let Some(hit) = shard.get_promoting(path) {
            return Ok(hit);
        }

        let path_buf = path.to_path_buf();
        let semaphore = self.open_semaphore.clone();
        let metrics = self.metrics.clone();

        shard
            .singleflight
            .do_once(path_buf.clone(), move || {
                let path_for_check = path_buf.clone();
                async move {
                    // Re-check: another caller may have populated the cache
                    // while we were waiting to enter the singleflight.
                    if let Some(hit) = shard.get_promoting(&path_for_check) {
                        return Ok(hit);
                    }

                    let _permit = semaphore
                        .acquire()
                        .await
                        .expect("open semaphore is never closed");

                    let opened = open_and_index(path_for_check.clone()).await?;

                    if shard.insert(path_for_check.clone(), opened.clone()) {
                        metrics.zip_cache_evictions_total.inc();
                    }
                    Ok(opened)
                }
            })
            .await
    }

    /// Evicts `path` from its shard, e.g. after a read-time failure
    /// against the cached reader.
    pub fn remove(&self, path: &Path) {
        let shard = self.shard_for(path);
        if shard.lru.lock().pop(path).is_some() {
            warn!(path = %path.display(), "removed zip from zip-part cache after read failure");
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lru.lock().len()).sum()
    }
}

async fn open_and_index(path: PathBuf) -> Result<CachedZip, OpenError> {
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OpenError::NotFound
            } else {
                OpenError::Invalid(e.to_string())
            }
        })?;
        let archive = zip::ZipArchive::new(file).map_err(|e| OpenError::Invalid(e.to_string()))?;
        Ok(Arc::new(Mutex::new(archive)))
    })
    .await
    .map_err(|e| OpenError::Invalid(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, contents) in entries {
            zip.start_file(*name, zip::write::FileOptions::default())
                .unwrap();
            zip.write_all(contents).unwrap();
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn get_caches_open_reader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000.zip");
        write_zip(&path, &[("checkpoint", b"hello")]);

        let cache = ZipPartCache::new(2048, 64, Arc::new(Metrics::new()));
        let first = cache.get(&path).await.unwrap();
        assert_eq!(cache.len(), 1);

        // Deleting the file must not affect an already-cached reader.
        std::fs::remove_file(&path).unwrap();
        let second = cache.get(&path).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn concurrent_miss_opens_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000.zip");
        write_zip(&path, &[("checkpoint", b"hello")]);

        let cache = Arc::new(ZipPartCache::new(2048, 64, Arc::new(Metrics::new())));
        let opens = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = cache.clone();
            let path = path.clone();
            let opens = opens.clone();
            handles.push(tokio::spawn(async move {
                let zip = cache.get(&path).await.unwrap();
                opens.fetch_add(1, Ordering::SeqCst);
                zip
            }));
        }
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        assert_eq!(opens.load(Ordering::SeqCst), 50);
        // Every caller observed the same cached reader.
        for r in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], r));
        }
    }

    #[tokio::test]
    async fn eviction_drops_lru_tail_and_counts_it() {
        let dir = tempdir().unwrap();
        // Force a single shard with capacity 1 by using max_open == NUM_SHARDS.
        let metrics = Arc::new(Metrics::new());
        let cache = ZipPartCache::new(NUM_SHARDS, 64, metrics.clone());

        let shard = 0usize;
        // Find two filenames that land in the same shard as `shard`.
        let mut names = Vec::new();
        let mut i = 0u32;
        while names.len() < 2 {
            let name = format!("f{i}.zip");
            if shard_index(name.as_bytes()) == shard {
                names.push(name);
            }
            i += 1;
        }

        let path_a = dir.path().join(&names[0]);
        let path_b = dir.path().join(&names[1]);
        write_zip(&path_a, &[("x", b"a")]);
        write_zip(&path_b, &[("x", b"b")]);

        let _a = cache.get(&path_a).await.unwrap();
        let _b = cache.get(&path_b).await.unwrap();
        // `a` should have been evicted to make room for `b` in this shard.
        assert_eq!(cache.shards[shard].lru.lock().len(), 1);
        assert_eq!(metrics.zip_cache_evictions_total.get(), 1);
    }

    #[tokio::test]
    async fn disabled_cache_never_retains_reader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000.zip");
        write_zip(&path, &[("checkpoint", b"hello")]);

        let cache = ZipPartCache::new(0, 64, Arc::new(Metrics::new()));
        assert!(!cache.is_enabled());
        let _first = cache.get(&path).await.unwrap();
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn missing_zip_is_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.zip");
        let cache = ZipPartCache::new(2048, 64, Arc::new(Metrics::new()));
        match cache.get(&path).await {
            Err(OpenError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
