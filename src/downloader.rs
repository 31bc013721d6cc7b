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


//! Downloader facade
//!
//! Entry point the plugin layer talks to. One instance is built explicitly
//! per process (by the FFI bridge in the app, or directly in tests) and
//! wires together the cache, the download queue, and the resource-loader
//! delegate. `invalidate` cancels everything in flight and rejects every
//! pending waiter, after which the instance can be dropped or reused.

use crate::cache::key::normalize_key;
use crate::cache::store::{AssetCache, AssetHandle};
use crate::download::executor::{AssetDownloadExecutor, HttpDownloadExecutor};
use crate::download::operation::{CookiePair, DownloadRequest};
use crate::download::progress::ProgressCallback;
use crate::download::queue::DownloadQueue;
use crate::error::Result;
use crate::loader::ResourceLoaderDelegate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding cached assets and the index
    pub cache_dir: PathBuf,

    /// Maximum concurrent downloads
    pub max_concurrent_downloads: usize,

    /// Maximum automatic retries after a transient failure
    pub retry_attempts: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("video-cache"),
            max_concurrent_downloads: 3,
            retry_attempts: 3,
        }
    }
}

/// Process-wide video prefetch/cache service
pub struct VideoDownloader {
    cache: Arc<AssetCache>,
    loader: ResourceLoaderDelegate,
}

impl VideoDownloader {
    /// Build a downloader with the production HTTP executor
    pub async fn new(config: CacheConfig) -> Result<Self> {
        let executor = Arc::new(HttpDownloadExecutor::new()?);
        Self::with_executor(config, executor).await
    }

    /// Build a downloader with a custom download executor (host-provided
    /// transport, or a mock in tests)
    pub async fn with_executor(
        config: CacheConfig,
        executor: Arc<dyn AssetDownloadExecutor>,
    ) -> Result<Self> {
        let queue = Arc::new(DownloadQueue::new(
            config.max_concurrent_downloads,
            config.retry_attempts,
            executor,
        ));
        let cache = Arc::new(AssetCache::open(config.cache_dir, queue).await?);
        let loader = ResourceLoaderDelegate::new(Arc::clone(&cache))?;
        Ok(Self { cache, loader })
    }

    /// Download an asset ahead of playback. Resolves once the asset reaches
    /// Ready; a concurrent prefetch for the same key attaches to the
    /// in-flight download instead of starting a second one.
    pub async fn prefetch(
        &self,
        uri: &str,
        cache_key: Option<&str>,
        cookies: Vec<CookiePair>,
    ) -> Result<()> {
        self.get_asset(uri, cache_key, cookies).await.map(|_| ())
    }

    /// Get a playable handle for an asset, downloading it if necessary
    pub async fn get_asset(
        &self,
        uri: &str,
        cache_key: Option<&str>,
        cookies: Vec<CookiePair>,
    ) -> Result<AssetHandle> {
        let key = normalize_key(uri, cache_key)?;
        let request = DownloadRequest::new(uri.to_string(), key, cookies);
        self.cache.get_asset(request).await
    }

    /// Whether a Ready asset exists for the key; never errors
    pub async fn has_cached_asset(&self, cache_key: &str) -> bool {
        self.cache.has_cached_asset(cache_key).await
    }

    /// Remove one key's cached bytes, cancelling its in-flight download
    pub async fn clear_cached_asset(&self, cache_key: &str) -> Result<()> {
        self.cache.clear_cached_asset(cache_key).await
    }

    /// Remove every cached entry derived from a base URL
    pub async fn clear_cache_for_url(&self, url: &str) -> Result<()> {
        self.cache.clear_cache_for_url(url).await
    }

    /// Cancel all in-flight operations and reject all pending waiters; the
    /// subsystem is safe to tear down or rebuild afterwards
    pub async fn invalidate(&self) -> Result<()> {
        self.cache.invalidate().await
    }

    /// Register a progress callback for a cache key
    pub async fn register_progress_callback(&self, cache_key: String, callback: ProgressCallback) {
        self.cache.register_progress_callback(cache_key, callback).await;
    }

    /// Deregister a key's progress callback
    pub async fn remove_progress_callback(&self, cache_key: &str) {
        self.cache.remove_progress_callback(cache_key).await;
    }

    /// Live download count, surfaced on the plugin's debug screen
    pub async fn active_download_count(&self) -> usize {
        self.cache.active_download_count().await
    }

    /// The resource-loader delegate for playback-side integration
    pub fn loader(&self) -> &ResourceLoaderDelegate {
        &self.loader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::executor::DownloadControl;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct WritingExecutor {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AssetDownloadExecutor for WritingExecutor {
        async fn execute(
            &self,
            _request: &DownloadRequest,
            dest: &Path,
            _control: DownloadControl,
        ) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(dest, b"bytes").await?;
            Ok(5)
        }
    }

    async fn make_downloader(dir: &TempDir) -> (VideoDownloader, Arc<WritingExecutor>) {
        let executor = Arc::new(WritingExecutor {
            calls: AtomicU32::new(0),
        });
        let config = CacheConfig {
            cache_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let downloader = VideoDownloader::with_executor(config, executor.clone())
            .await
            .unwrap();
        (downloader, executor)
    }

    #[tokio::test]
    async fn test_prefetch_then_get_hits_cache() {
        let dir = TempDir::new().unwrap();
        let (downloader, executor) = make_downloader(&dir).await;

        downloader
            .prefetch("https://ex.com/a.mp4", Some("K1"), Vec::new())
            .await
            .unwrap();
        assert!(downloader.has_cached_asset("K1").await);

        // Signed URL variation for the same key is served from the cache
        let handle = downloader
            .get_asset("https://ex.com/a.mp4?sig=xyz", Some("K1"), Vec::new())
            .await
            .unwrap();
        assert_eq!(handle.cache_key, "K1");
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_key_derived_when_absent() {
        let dir = TempDir::new().unwrap();
        let (downloader, _) = make_downloader(&dir).await;

        downloader
            .prefetch("https://ex.com/b.mp4?token=1", None, Vec::new())
            .await
            .unwrap();
        assert!(downloader.has_cached_asset("https://ex.com/b.mp4").await);
    }

    #[tokio::test]
    async fn test_clear_cached_asset_forgets_key() {
        let dir = TempDir::new().unwrap();
        let (downloader, _) = make_downloader(&dir).await;

        downloader
            .prefetch("https://ex.com/a.mp4", Some("K1"), Vec::new())
            .await
            .unwrap();
        downloader.clear_cached_asset("K1").await.unwrap();
        assert!(!downloader.has_cached_asset("K1").await);
    }
}
