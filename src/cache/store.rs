// RNVideoCache - Native video prefetch/cache core for mobile playback
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Cache-key-addressed asset store
//!
//! The cache owns two maps under one mutex: cache key -> entry, and cache
//! key -> live download operation. Holding both under the same lock is what
//! makes the dedup guarantee airtight: a second request for a key either
//! sees the Ready entry, attaches a waiter to the Downloading entry, or
//! creates the entry and the single operation, never a duplicate download.
//!
//! Every waiter is notified exactly once: waiters are drained from an entry
//! under the lock by whichever path removes or resolves it (worker
//! completion, worker failure, clear, invalidate).
//!
//! Ready entries are persisted to `index.json` inside the cache directory so
//! prefetched assets survive a process restart.

use crate::cache::key::{derive_key_from_url, storage_name_for_key, urls_share_base};
use crate::download::executor::storage_path_for;
use crate::download::operation::{DownloadKind, DownloadOperation, DownloadRequest};
use crate::download::progress::ProgressCallback;
use crate::download::queue::DownloadQueue;
use crate::error::{Result, VideoCacheError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

/// File name of the persisted cache index
const INDEX_FILE: &str = "index.json";

/// Resolved location of a cached asset, shared read-only with playback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetHandle {
    /// Key the asset is cached under
    pub cache_key: String,

    /// File (progressive) or directory (aggregate) holding the bytes
    pub storage_path: PathBuf,

    /// Download kind the asset was fetched as
    pub kind: DownloadKind,
}

impl AssetHandle {
    /// Path playback should open: the file itself, or the local playlist
    /// inside an aggregate directory.
    pub fn playback_path(&self) -> PathBuf {
        match self.kind {
            DownloadKind::Progressive => self.storage_path.clone(),
            DownloadKind::Aggregate => self.storage_path.join("index.m3u8"),
        }
    }
}

/// Lifecycle status of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    /// A download operation is filling this entry
    Downloading,
    /// Bytes are on disk and servable
    Ready,
    /// Download failed; entry is being torn down
    Invalid,
}

type Waiter = oneshot::Sender<Result<AssetHandle>>;

/// One cached (or downloading) asset
struct CacheEntry {
    cache_key: String,
    source_url: String,
    storage_path: PathBuf,
    kind: DownloadKind,
    status: EntryStatus,
    created_at: String,
    waiters: Vec<Waiter>,
}

impl CacheEntry {
    fn handle(&self) -> AssetHandle {
        AssetHandle {
            cache_key: self.cache_key.clone(),
            storage_path: self.storage_path.clone(),
            kind: self.kind,
        }
    }
}

/// A download currently owned by the queue
struct LiveOperation {
    operation: Arc<DownloadOperation>,
    #[allow(dead_code)]
    handle: JoinHandle<()>,
}

/// Persisted form of a Ready entry
#[derive(Debug, Serialize, Deserialize)]
struct IndexRecord {
    cache_key: String,
    source_url: String,
    storage_name: String,
    kind: DownloadKind,
    created_at: String,
}

/// Entry and live-operation maps, mutated by exactly one writer at a time
#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    operations: HashMap<String, LiveOperation>,
}

/// Cache-key-addressed asset cache with in-flight download dedup
pub struct AssetCache {
    cache_dir: PathBuf,
    state: Arc<Mutex<CacheState>>,
    queue: Arc<DownloadQueue>,
    progress_callbacks: Arc<RwLock<HashMap<String, ProgressCallback>>>,
}

impl AssetCache {
    /// Open (or create) a cache directory and load the persisted index.
    ///
    /// Index records whose files vanished are dropped silently.
    pub async fn open(cache_dir: PathBuf, queue: Arc<DownloadQueue>) -> Result<Self> {
        fs::create_dir_all(&cache_dir).await.map_err(|e| {
            VideoCacheError::storage(format!("Cannot create cache dir {:?}: {}", cache_dir, e))
        })?;

        let cache = Self {
            cache_dir,
            state: Arc::new(Mutex::new(CacheState::default())),
            queue,
            progress_callbacks: Arc::new(RwLock::new(HashMap::new())),
        };
        cache.load_index().await;
        Ok(cache)
    }

    /// True iff a Ready entry exists for the key and its bytes are on disk.
    /// Never errors; any doubt is `false`.
    pub async fn has_cached_asset(&self, cache_key: &str) -> bool {
        let state = self.state.lock().await;
        match state.entries.get(cache_key) {
            Some(entry) => entry.status == EntryStatus::Ready && entry.storage_path.exists(),
            None => false,
        }
    }

    /// Get the asset for a request, downloading it if necessary.
    ///
    /// Ready entries return immediately. A Downloading entry registers a
    /// waiter and suspends until the in-flight operation settles. An absent
    /// entry creates one, submits exactly one download operation, and waits.
    pub async fn get_asset(&self, request: DownloadRequest) -> Result<AssetHandle> {
        let cache_key = request.cache_key.clone();
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock().await;

            match state.entries.get_mut(&cache_key) {
                Some(entry) if entry.status == EntryStatus::Ready => {
                    if entry.storage_path.exists() {
                        return Ok(entry.handle());
                    }
                    // Bytes vanished underneath us; re-download
                    state.entries.remove(&cache_key);
                    self.start_download_locked(&mut state, request, tx);
                }
                Some(entry) => {
                    entry.waiters.push(tx);
                }
                None => {
                    self.start_download_locked(&mut state, request, tx);
                }
            }
        }

        // A dropped sender means the entry was torn down without notifying,
        // which only happens on cache teardown.
        rx.await.unwrap_or(Err(VideoCacheError::Cancelled))
    }

    /// Remove a key's entry and storage. Safe while Downloading: the
    /// operation is cancelled and every pending waiter is rejected with
    /// `Cancelled`.
    pub async fn clear_cached_asset(&self, cache_key: &str) -> Result<()> {
        let storage = {
            let mut state = self.state.lock().await;
            let storage = Self::clear_key_locked(&mut state, cache_key);
            self.persist_index_locked(&state).await;
            storage
        };

        if let Some(path) = storage {
            Self::remove_storage(&path).await;
        }
        Ok(())
    }

    /// Cancel every in-flight operation, reject every pending waiter with
    /// `Cancelled`, and remove all entries and their storage.
    pub async fn invalidate(&self) -> Result<()> {
        let paths = {
            let mut state = self.state.lock().await;
            let keys: Vec<String> = state.entries.keys().cloned().collect();
            let mut paths = Vec::new();
            for key in keys {
                if let Some(path) = Self::clear_key_locked(&mut state, &key) {
                    paths.push(path);
                }
            }
            // Operations without entries should not survive either
            for (_, live) in state.operations.drain() {
                live.operation.cancel();
            }
            self.persist_index_locked(&state).await;
            paths
        };

        for path in paths {
            Self::remove_storage(&path).await;
        }
        self.progress_callbacks.write().await.clear();
        Ok(())
    }

    /// Clear every entry derived from a base URL, regardless of the explicit
    /// key it was stored under. Matches on the entry's recorded source URL
    /// (query/fragment ignored) or on a key equal to the URL-derived key.
    pub async fn clear_cache_for_url(&self, url: &str) -> Result<()> {
        let derived_key = derive_key_from_url(url).ok();

        let matching: Vec<String> = {
            let state = self.state.lock().await;
            state
                .entries
                .values()
                .filter(|entry| {
                    urls_share_base(&entry.source_url, url)
                        || derived_key.as_deref() == Some(entry.cache_key.as_str())
                })
                .map(|entry| entry.cache_key.clone())
                .collect()
        };

        for key in matching {
            self.clear_cached_asset(&key).await?;
        }
        Ok(())
    }

    /// Register a progress callback for a cache key's download
    pub async fn register_progress_callback(&self, cache_key: String, callback: ProgressCallback) {
        self.progress_callbacks
            .write()
            .await
            .insert(cache_key, callback);
    }

    /// Deregister a key's progress callback
    pub async fn remove_progress_callback(&self, cache_key: &str) {
        self.progress_callbacks.write().await.remove(cache_key);
    }

    /// Number of live download operations, for the plugin's debug surface
    pub async fn active_download_count(&self) -> usize {
        self.state.lock().await.operations.len()
    }

    // ========================================================================
    // Internal
    // ========================================================================

    /// Create the Downloading entry and spawn its single worker. Caller
    /// holds the state lock, which is what guarantees no duplicate operation
    /// for the key.
    fn start_download_locked(
        &self,
        state: &mut CacheState,
        request: DownloadRequest,
        waiter: Waiter,
    ) {
        let cache_key = request.cache_key.clone();
        let storage_name = storage_name_for_key(&cache_key);
        let storage_path = storage_path_for(&self.cache_dir, &storage_name, &request);

        state.entries.insert(
            cache_key.clone(),
            CacheEntry {
                cache_key: cache_key.clone(),
                source_url: request.url.clone(),
                storage_path: storage_path.clone(),
                kind: request.kind,
                status: EntryStatus::Downloading,
                created_at: chrono::Utc::now().to_rfc3339(),
                waiters: vec![waiter],
            },
        );

        let operation = Arc::new(DownloadOperation::new(request));

        let worker_op = Arc::clone(&operation);
        let worker_state = Arc::clone(&self.state);
        let worker_queue = Arc::clone(&self.queue);
        let worker_callbacks = Arc::clone(&self.progress_callbacks);
        let worker_key = cache_key.clone();
        let worker_dir = self.cache_dir.clone();

        let handle = tokio::spawn(async move {
            let progress = worker_callbacks.read().await.get(&worker_key).cloned();
            let result = worker_queue
                .run_operation(&worker_op, &storage_path, progress)
                .await;

            let cleanup_path = {
                let mut state = worker_state.lock().await;

                // A clear may have raced this download: the key can now be
                // absent, or owned by a successor operation. Only this
                // worker's own operation may finalize the key; a stale
                // worker must leave the maps and storage untouched.
                let owns_key = state
                    .operations
                    .get(&worker_key)
                    .map(|live| Arc::ptr_eq(&live.operation, &worker_op))
                    .unwrap_or(false);
                if !owns_key {
                    return;
                }
                state.operations.remove(&worker_key);

                match result {
                    Ok(_) => {
                        let resolved = match state.entries.get_mut(&worker_key) {
                            Some(entry) => {
                                entry.status = EntryStatus::Ready;
                                let handle = entry.handle();
                                for waiter in std::mem::take(&mut entry.waiters) {
                                    let _ = waiter.send(Ok(handle.clone()));
                                }
                                true
                            }
                            None => false,
                        };
                        if resolved {
                            Self::write_index(&worker_dir, &state).await;
                        }
                        None
                    }
                    Err(err) => {
                        // clear_cached_asset may already have removed the
                        // entry and rejected its waiters; removal under the
                        // lock keeps notification exactly-once.
                        state.entries.remove(&worker_key).map(|mut entry| {
                            entry.status = EntryStatus::Invalid;
                            for waiter in std::mem::take(&mut entry.waiters) {
                                let _ = waiter.send(Err(err.duplicate()));
                            }
                            entry.storage_path
                        })
                    }
                }
            };

            // Partial bytes from a failed download are useless to playback
            if let Some(path) = cleanup_path {
                Self::remove_storage(&path).await;
            }
        });

        state
            .operations
            .insert(cache_key, LiveOperation { operation, handle });
    }

    /// Cancel the live operation and drain the entry for one key. Returns
    /// the storage path to delete, if any. Caller holds the lock.
    fn clear_key_locked(state: &mut CacheState, cache_key: &str) -> Option<PathBuf> {
        if let Some(live) = state.operations.remove(cache_key) {
            live.operation.cancel();
        }

        state.entries.remove(cache_key).map(|mut entry| {
            entry.status = EntryStatus::Invalid;
            for waiter in std::mem::take(&mut entry.waiters) {
                let _ = waiter.send(Err(VideoCacheError::Cancelled));
            }
            entry.storage_path
        })
    }

    /// Best-effort storage deletion; a missing path is not an error
    async fn remove_storage(path: &Path) {
        if path.is_dir() {
            let _ = fs::remove_dir_all(path).await;
        } else {
            let _ = fs::remove_file(path).await;
        }
    }

    async fn persist_index_locked(&self, state: &CacheState) {
        Self::write_index(&self.cache_dir, state).await;
    }

    /// Persist Ready entries; best effort, an unwritable index only costs
    /// cache warmth on the next launch.
    async fn write_index(cache_dir: &Path, state: &CacheState) {
        let records: Vec<IndexRecord> = state
            .entries
            .values()
            .filter(|entry| entry.status == EntryStatus::Ready)
            .map(|entry| IndexRecord {
                cache_key: entry.cache_key.clone(),
                source_url: entry.source_url.clone(),
                storage_name: entry
                    .storage_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                kind: entry.kind,
                created_at: entry.created_at.clone(),
            })
            .collect();

        if let Ok(json) = serde_json::to_string_pretty(&records) {
            let _ = fs::write(cache_dir.join(INDEX_FILE), json).await;
        }
    }

    /// Load Ready entries recorded by a previous run
    async fn load_index(&self) {
        let index_path = self.cache_dir.join(INDEX_FILE);
        let json = match fs::read_to_string(&index_path).await {
            Ok(json) => json,
            Err(_) => return,
        };
        let records: Vec<IndexRecord> = match serde_json::from_str(&json) {
            Ok(records) => records,
            Err(_) => return,
        };

        let mut state = self.state.lock().await;
        for record in records {
            let storage_path = self.cache_dir.join(&record.storage_name);
            if !storage_path.exists() {
                continue;
            }
            state.entries.insert(
                record.cache_key.clone(),
                CacheEntry {
                    cache_key: record.cache_key,
                    source_url: record.source_url,
                    storage_path,
                    kind: record.kind,
                    status: EntryStatus::Ready,
                    created_at: record.created_at,
                    waiters: Vec::new(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::executor::{AssetDownloadExecutor, DownloadControl};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Writes a marker file after an optional hold-off, counting invocations
    struct CountingExecutor {
        calls: AtomicU32,
        delay_ms: u64,
    }

    impl CountingExecutor {
        fn new(delay_ms: u64) -> Self {
            Self {
                calls: AtomicU32::new(0),
                delay_ms,
            }
        }
    }

    #[async_trait]
    impl AssetDownloadExecutor for CountingExecutor {
        async fn execute(
            &self,
            _request: &DownloadRequest,
            dest: &Path,
            mut control: DownloadControl,
        ) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                let mut waited = 0;
                while waited < self.delay_ms {
                    control.checkpoint().await?;
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    waited += 5;
                }
            }
            fs::write(dest, b"video-bytes").await?;
            Ok(11)
        }
    }

    /// First invocation stalls well past its cancellation before unwinding;
    /// later invocations write immediately.
    struct SlowToCancelExecutor {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AssetDownloadExecutor for SlowToCancelExecutor {
        async fn execute(
            &self,
            _request: &DownloadRequest,
            dest: &Path,
            mut control: DownloadControl,
        ) -> Result<u64> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                control.checkpoint().await?;
            }
            fs::write(dest, b"video-bytes").await?;
            Ok(11)
        }
    }

    /// Always fails with a non-retryable error
    struct FailingExecutor;

    #[async_trait]
    impl AssetDownloadExecutor for FailingExecutor {
        async fn execute(
            &self,
            _request: &DownloadRequest,
            _dest: &Path,
            _control: DownloadControl,
        ) -> Result<u64> {
            Err(VideoCacheError::network_error("403 forbidden", false))
        }
    }

    async fn make_cache(
        dir: &TempDir,
        executor: Arc<dyn AssetDownloadExecutor>,
    ) -> Arc<AssetCache> {
        let queue = Arc::new(DownloadQueue::new(3, 0, executor));
        Arc::new(
            AssetCache::open(dir.path().to_path_buf(), queue)
                .await
                .unwrap(),
        )
    }

    fn request(key: &str) -> DownloadRequest {
        DownloadRequest::new(
            format!("https://example.com/{}.mp4", key),
            key.to_string(),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn test_get_asset_downloads_and_caches() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(CountingExecutor::new(0));
        let cache = make_cache(&dir, executor.clone()).await;

        assert!(!cache.has_cached_asset("K1").await);

        let handle = cache.get_asset(request("K1")).await.unwrap();
        assert!(handle.storage_path.exists());
        assert!(cache.has_cached_asset("K1").await);

        // Second fetch is served from the cache, no second download
        let again = cache.get_asset(request("K1")).await.unwrap();
        assert_eq!(again.storage_path, handle.storage_path);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_operation() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(CountingExecutor::new(50));
        let cache = make_cache(&dir, executor.clone()).await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.get_asset(request("K1")).await
            }));
        }

        for handle in handles {
            let asset = handle.await.unwrap().unwrap();
            assert_eq!(asset.cache_key, "K1");
        }
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_rejects_all_waiters_and_removes_entry() {
        let dir = TempDir::new().unwrap();
        let cache = make_cache(&dir, Arc::new(FailingExecutor)).await;

        let first = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_asset(request("K1")).await })
        };
        let second = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_asset(request("K1")).await })
        };

        assert!(first.await.unwrap().is_err());
        assert!(second.await.unwrap().is_err());

        // Entry must not be left in Downloading
        assert!(!cache.has_cached_asset("K1").await);
        assert_eq!(cache.active_download_count().await, 0);
    }

    #[tokio::test]
    async fn test_clear_during_download_cancels_waiters() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(CountingExecutor::new(10_000));
        let cache = make_cache(&dir, executor).await;

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_asset(request("K1")).await })
        };

        // Give the download a moment to start
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cache.clear_cached_asset("K1").await.unwrap();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_cancellation());
        assert!(!cache.has_cached_asset("K1").await);
    }

    #[tokio::test]
    async fn test_refetch_after_clear_survives_stale_worker() {
        let dir = TempDir::new().unwrap();
        let cache = make_cache(
            &dir,
            Arc::new(SlowToCancelExecutor {
                calls: AtomicU32::new(0),
            }),
        )
        .await;

        let first = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_asset(request("K1")).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cache.clear_cached_asset("K1").await.unwrap();
        assert!(first.await.unwrap().unwrap_err().is_cancellation());

        // Re-request the same key while the cancelled worker is still
        // unwinding; the fresh download must complete and stay cached.
        let handle = cache.get_asset(request("K1")).await.unwrap();
        assert!(cache.has_cached_asset("K1").await);

        // Let the stale worker finish; it must not tear down the fresh entry
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert!(cache.has_cached_asset("K1").await);
        assert!(handle.storage_path.exists());
        assert_eq!(cache.active_download_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalidate_rejects_everything() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(CountingExecutor::new(10_000));
        let cache = make_cache(&dir, executor).await;

        let w1 = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_asset(request("K1")).await })
        };
        let w2 = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_asset(request("K2")).await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cache.invalidate().await.unwrap();

        assert!(w1.await.unwrap().unwrap_err().is_cancellation());
        assert!(w2.await.unwrap().unwrap_err().is_cancellation());
        assert!(!cache.has_cached_asset("K1").await);
        assert!(!cache.has_cached_asset("K2").await);
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(CountingExecutor::new(0));
        {
            let cache = make_cache(&dir, executor.clone()).await;
            cache.get_asset(request("K1")).await.unwrap();
            assert!(cache.has_cached_asset("K1").await);
        }

        let reopened = make_cache(&dir, executor.clone()).await;
        assert!(reopened.has_cached_asset("K1").await);

        // Served from disk, not re-downloaded
        reopened.get_asset(request("K1")).await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_cache_for_url_matches_by_base() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(CountingExecutor::new(0));
        let cache = make_cache(&dir, executor).await;

        // Stored under an explicit key, from a signed URL
        let req = DownloadRequest::new(
            "https://ex.com/a.mp4?sig=one".to_string(),
            "K1".to_string(),
            Vec::new(),
        );
        cache.get_asset(req).await.unwrap();
        assert!(cache.has_cached_asset("K1").await);

        // Differently signed URL for the same asset still clears it
        cache
            .clear_cache_for_url("https://ex.com/a.mp4?sig=two")
            .await
            .unwrap();
        assert!(!cache.has_cached_asset("K1").await);
    }
}
