//! Integration tests for VideoDownloader
//!
//! Exercises the full prefetch/playback flow through the public surface
//! with a mock download executor, so no network access is needed.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use video_cache_core::{
    AssetDownloadExecutor, CacheConfig, DownloadControl, DownloadKind, DownloadProgress,
    DownloadRequest, VideoCacheError, VideoDownloader,
};

const VIDEO_URL: &str = "https://cdn.example.com/movies/trailer.mp4";
const PLAYLIST_URL: &str = "https://cdn.example.com/movies/feature.m3u8";

/// Writes a fixed payload to the destination, optionally pausing at
/// checkpoints so cancellation tests can interrupt it mid-flight.
struct MockExecutor {
    calls: AtomicU32,
    payload: Vec<u8>,
    chunk_delay: Duration,
}

impl MockExecutor {
    fn new(payload: &[u8]) -> Self {
        Self {
            calls: AtomicU32::new(0),
            payload: payload.to_vec(),
            chunk_delay: Duration::ZERO,
        }
    }

    fn slow(payload: &[u8], chunk_delay: Duration) -> Self {
        Self {
            calls: AtomicU32::new(0),
            payload: payload.to_vec(),
            chunk_delay,
        }
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetDownloadExecutor for MockExecutor {
    async fn execute(
        &self,
        request: &DownloadRequest,
        dest: &Path,
        mut control: DownloadControl,
    ) -> video_cache_core::Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let total = self.payload.len() as u64;
        let mut progress =
            DownloadProgress::new(request.cache_key.clone(), request.url.clone(), total);

        // One checkpoint per simulated chunk, like the HTTP executor
        for written in [total / 2, total] {
            control.checkpoint().await?;
            if !self.chunk_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.chunk_delay) => {}
                    _ = control.wait_cancelled() => return Err(VideoCacheError::Cancelled),
                }
            }
            progress.update(written);
            control.report(progress.clone());
        }

        match request.kind {
            DownloadKind::Progressive => {
                tokio::fs::write(dest, &self.payload).await?;
            }
            DownloadKind::Aggregate => {
                tokio::fs::create_dir_all(dest).await?;
                tokio::fs::write(dest.join("seg00000.ts"), &self.payload).await?;
                tokio::fs::write(
                    dest.join("index.m3u8"),
                    "#EXTM3U\n#EXTINF:4.0,\nseg00000.ts\n#EXT-X-ENDLIST\n",
                )
                .await?;
            }
        }
        Ok(total)
    }
}

/// Always fails with a non-retryable HTTP status
struct NotFoundExecutor {
    calls: AtomicU32,
}

#[async_trait]
impl AssetDownloadExecutor for NotFoundExecutor {
    async fn execute(
        &self,
        request: &DownloadRequest,
        _dest: &Path,
        _control: DownloadControl,
    ) -> video_cache_core::Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Fail slowly enough for concurrent requests to attach as waiters
        tokio::time::sleep(Duration::from_millis(100)).await;
        Err(VideoCacheError::UnexpectedStatusCode {
            status_code: 404,
            url: request.url.clone(),
        })
    }
}

fn test_config(dir: &TempDir) -> CacheConfig {
    CacheConfig {
        cache_dir: dir.path().join("cache"),
        max_concurrent_downloads: 3,
        retry_attempts: 2,
    }
}

#[tokio::test]
async fn test_prefetch_then_playback_hits_cache() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let executor = Arc::new(MockExecutor::new(b"mp4 payload"));
    let downloader = VideoDownloader::with_executor(
        test_config(&dir),
        executor.clone() as Arc<dyn AssetDownloadExecutor>,
    )
    .await?;

    downloader.prefetch(VIDEO_URL, None, Vec::new()).await?;
    assert_eq!(executor.call_count(), 1);

    // Playback of the same URI must come straight from storage
    let handle = downloader.get_asset(VIDEO_URL, None, Vec::new()).await?;
    assert_eq!(executor.call_count(), 1);
    assert!(handle.playback_path().exists());
    assert_eq!(
        tokio::fs::read(handle.playback_path()).await?,
        b"mp4 payload"
    );
    assert!(downloader.has_cached_asset(&handle.cache_key).await);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_share_one_download() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let executor = Arc::new(MockExecutor::slow(b"shared", Duration::from_millis(20)));
    let downloader = Arc::new(
        VideoDownloader::with_executor(
            test_config(&dir),
            executor.clone() as Arc<dyn AssetDownloadExecutor>,
        )
        .await?,
    );

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let downloader = Arc::clone(&downloader);
        tasks.push(tokio::spawn(async move {
            downloader.get_asset(VIDEO_URL, None, Vec::new()).await
        }));
    }

    let mut keys = Vec::new();
    for task in tasks {
        let handle = task.await??;
        keys.push(handle.cache_key);
    }
    keys.dedup();
    assert_eq!(keys.len(), 1);
    assert_eq!(executor.call_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_clear_during_download_cancels_waiter() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let executor = Arc::new(MockExecutor::slow(b"never lands", Duration::from_secs(30)));
    let downloader = Arc::new(
        VideoDownloader::with_executor(
            test_config(&dir),
            executor.clone() as Arc<dyn AssetDownloadExecutor>,
        )
        .await?,
    );

    let waiter = {
        let downloader = Arc::clone(&downloader);
        tokio::spawn(async move { downloader.get_asset(VIDEO_URL, None, Vec::new()).await })
    };

    // Let the download get in flight, then rip the entry out underneath it
    tokio::time::sleep(Duration::from_millis(50)).await;
    let key = video_cache_core::cache::normalize_key(VIDEO_URL, None)?;
    downloader.clear_cached_asset(&key).await?;

    let result = waiter.await?;
    assert!(matches!(result, Err(VideoCacheError::Cancelled)));
    assert!(!downloader.has_cached_asset(&key).await);
    Ok(())
}

#[tokio::test]
async fn test_failure_rejects_every_waiter() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let executor = Arc::new(NotFoundExecutor {
        calls: AtomicU32::new(0),
    });
    let downloader = Arc::new(
        VideoDownloader::with_executor(
            test_config(&dir),
            executor.clone() as Arc<dyn AssetDownloadExecutor>,
        )
        .await?,
    );

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let downloader = Arc::clone(&downloader);
        tasks.push(tokio::spawn(async move {
            downloader.get_asset(VIDEO_URL, None, Vec::new()).await
        }));
    }

    for task in tasks {
        let result = task.await?;
        assert!(matches!(
            result,
            Err(VideoCacheError::UnexpectedStatusCode {
                status_code: 404,
                ..
            })
        ));
    }

    // 404 is not retryable, so exactly one attempt was made
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

    // A failed download leaves no entry behind; a later request retries
    let key = video_cache_core::cache::normalize_key(VIDEO_URL, None)?;
    assert!(!downloader.has_cached_asset(&key).await);
    Ok(())
}

#[tokio::test]
async fn test_cache_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let config = test_config(&dir);

    let key = {
        let executor = Arc::new(MockExecutor::new(b"persisted"));
        let downloader =
            VideoDownloader::with_executor(config.clone(), executor).await?;
        let handle = downloader.get_asset(VIDEO_URL, None, Vec::new()).await?;
        handle.cache_key
    };

    // A fresh instance over the same directory reloads the index and never
    // touches the network for the cached asset
    let executor = Arc::new(MockExecutor::new(b"should not be fetched"));
    let downloader = VideoDownloader::with_executor(
        config,
        executor.clone() as Arc<dyn AssetDownloadExecutor>,
    )
    .await?;
    assert!(downloader.has_cached_asset(&key).await);

    let handle = downloader.get_asset(VIDEO_URL, None, Vec::new()).await?;
    assert_eq!(executor.call_count(), 0);
    assert_eq!(tokio::fs::read(handle.playback_path()).await?, b"persisted");
    Ok(())
}

#[tokio::test]
async fn test_aggregate_asset_plays_from_local_playlist() -> Result<(), Box<dyn std::error::Error>>
{
    let dir = TempDir::new()?;
    let executor = Arc::new(MockExecutor::new(b"segment bytes"));
    let downloader =
        VideoDownloader::with_executor(test_config(&dir), executor).await?;

    let handle = downloader.get_asset(PLAYLIST_URL, None, Vec::new()).await?;
    assert_eq!(handle.kind, DownloadKind::Aggregate);

    let playback = handle.playback_path();
    assert!(playback.ends_with("index.m3u8"));
    let playlist = tokio::fs::read_to_string(&playback).await?;
    assert!(playlist.contains("seg00000.ts"));
    Ok(())
}

#[tokio::test]
async fn test_explicit_key_and_clear_by_url() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let executor = Arc::new(MockExecutor::new(b"keyed"));
    let downloader =
        VideoDownloader::with_executor(test_config(&dir), executor).await?;

    // Caller-provided keys are used verbatim, not derived from the URL
    downloader
        .prefetch(&format!("{}?token=abc", VIDEO_URL), Some("movie-42"), Vec::new())
        .await?;
    assert!(downloader.has_cached_asset("movie-42").await);

    // Clearing by base URL removes entries cached from any variant of it
    downloader.clear_cache_for_url(VIDEO_URL).await?;
    assert!(!downloader.has_cached_asset("movie-42").await);
    Ok(())
}

#[tokio::test]
async fn test_progress_callback_receives_snapshots() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let executor = Arc::new(MockExecutor::new(b"progress payload"));
    let downloader =
        VideoDownloader::with_executor(test_config(&dir), executor).await?;

    let key = video_cache_core::cache::normalize_key(VIDEO_URL, None)?;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    downloader
        .register_progress_callback(
            key.clone(),
            Arc::new(move |progress| {
                let _ = tx.send(progress);
            }),
        )
        .await;

    downloader.prefetch(VIDEO_URL, None, Vec::new()).await?;
    downloader.remove_progress_callback(&key).await;

    let mut snapshots: Vec<DownloadProgress> = Vec::new();
    while let Ok(progress) = rx.try_recv() {
        snapshots.push(progress);
    }
    assert!(!snapshots.is_empty());
    let last = snapshots.last().unwrap();
    assert_eq!(last.cache_key, key);
    assert_eq!(last.bytes_downloaded, b"progress payload".len() as u64);
    assert!((last.percent_complete - 100.0).abs() < f64::EPSILON);
    Ok(())
}
