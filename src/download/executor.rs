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


//! Asset download executor
//!
//! The executor is the boundary to the platform download primitive: it takes
//! a request and a destination, streams bytes to disk, and honors the
//! suspend/cancel signals of the owning operation. The trait exists so the
//! queue can be driven by a mock in tests and so hosts can substitute their
//! own transport.
//!
//! Two kinds are supported:
//! - **Progressive**: one file, resumed with HTTP Range when a partial file
//!   is already on disk.
//! - **Aggregate (HLS)**: master playlist -> one variant (highest listed
//!   bandwidth) -> media playlist -> every segment, stored as a directory
//!   with a rewritten local `index.m3u8`.

use crate::download::operation::{DownloadKind, DownloadRequest};
use crate::download::progress::{DownloadProgress, ProgressCallback};
use crate::error::{Result, VideoCacheError};
use async_trait::async_trait;
use futures_util::StreamExt;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use url::Url;

/// Chunk-loop progress reporting interval
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Redirect-free request timeout, matching the platform download primitive
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

lazy_static! {
    // "#EXT-X-STREAM-INF:...BANDWIDTH=n...\n<variant uri>"
    static ref VARIANT_RE: Regex =
        Regex::new(r"#EXT-X-STREAM-INF:[^\r\n]*BANDWIDTH=(\d+)[^\r\n]*\r?\n([^#\r\n][^\r\n]*)")
            .unwrap();
}

/// Suspend/cancel signals and progress sink handed to the executor for one
/// attempt.
pub struct DownloadControl {
    suspended: watch::Receiver<bool>,
    cancelled: watch::Receiver<bool>,
    progress: Option<ProgressCallback>,
}

impl DownloadControl {
    pub fn new(suspended: watch::Receiver<bool>, cancelled: watch::Receiver<bool>) -> Self {
        Self {
            suspended,
            cancelled,
            progress: None,
        }
    }

    /// Attach a progress callback for this attempt
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Whether cancellation has been signalled
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Report a progress snapshot to the registered callback, if any
    pub fn report(&self, progress: DownloadProgress) {
        if let Some(cb) = &self.progress {
            cb(progress);
        }
    }

    /// Yield until the operation is neither suspended nor cancelled.
    ///
    /// Returns `Err(Cancelled)` on cancellation; a dropped signal sender
    /// means the owning operation is gone, which counts as cancellation.
    pub async fn checkpoint(&mut self) -> Result<()> {
        loop {
            if *self.cancelled.borrow() {
                return Err(VideoCacheError::Cancelled);
            }
            if !*self.suspended.borrow() {
                return Ok(());
            }
            tokio::select! {
                changed = self.suspended.changed() => {
                    if changed.is_err() {
                        return Err(VideoCacheError::Cancelled);
                    }
                }
                changed = self.cancelled.changed() => {
                    if changed.is_err() {
                        return Err(VideoCacheError::Cancelled);
                    }
                }
            }
        }
    }

    /// Resolve once cancellation is signalled; used inside `select!` against
    /// network reads so a cancel interrupts an in-flight chunk wait.
    pub async fn wait_cancelled(&mut self) {
        loop {
            if *self.cancelled.borrow() {
                return;
            }
            if self.cancelled.changed().await.is_err() {
                return;
            }
        }
    }
}

/// External download primitive: stream one request into `dest`.
///
/// Implementations must honor `control`: park while suspended, stop with
/// `Err(Cancelled)` when cancelled, and report progress when a callback is
/// attached. Returns the number of bytes written.
#[async_trait]
pub trait AssetDownloadExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &DownloadRequest,
        dest: &Path,
        control: DownloadControl,
    ) -> Result<u64>;
}

/// reqwest-backed executor used in production
pub struct HttpDownloadExecutor {
    client: Client,
}

impl HttpDownloadExecutor {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .cookie_store(true)
            .build()?;
        Ok(Self { client })
    }

    fn build_request(&self, request: &DownloadRequest, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(url);
        for (key, value) in &request.headers {
            if !key.eq_ignore_ascii_case("range") {
                builder = builder.header(key, value);
            }
        }
        if let Some(cookie) = request.cookie_header() {
            builder = builder.header("Cookie", cookie);
        }
        builder
    }

    /// Fetch a playlist body as text
    async fn fetch_text(&self, request: &DownloadRequest, url: &str) -> Result<String> {
        let response = self
            .build_request(request, url)
            .send()
            .await
            .map_err(|e| VideoCacheError::network_error(format!("Request failed: {}", e), true))?;

        if !response.status().is_success() {
            return Err(VideoCacheError::UnexpectedStatusCode {
                status_code: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| VideoCacheError::network_error(format!("Body read failed: {}", e), true))
    }

    /// Stream a response body into an open file, honoring suspend/cancel
    /// between chunks and reporting throttled progress.
    async fn stream_body(
        &self,
        request: &DownloadRequest,
        response: reqwest::Response,
        file: &mut tokio::fs::File,
        control: &mut DownloadControl,
        written: &mut u64,
        total_bytes: u64,
    ) -> Result<()> {
        let mut stream = response.bytes_stream();
        let mut snapshot =
            DownloadProgress::new(request.cache_key.clone(), request.url.clone(), total_bytes);
        let mut last_report = tokio::time::Instant::now();

        loop {
            control.checkpoint().await?;

            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                _ = control.wait_cancelled() => {
                    return Err(VideoCacheError::Cancelled);
                }
            };

            let chunk = match chunk {
                Some(result) => result.map_err(|e| {
                    VideoCacheError::network_error(format!("Stream error: {}", e), true)
                })?,
                None => break,
            };

            file.write_all(&chunk).await?;
            *written += chunk.len() as u64;

            if last_report.elapsed() >= PROGRESS_INTERVAL {
                snapshot.update(*written);
                control.report(snapshot.clone());
                last_report = tokio::time::Instant::now();
            }
        }

        file.flush().await?;
        snapshot.update(*written);
        control.report(snapshot);
        Ok(())
    }

    /// Progressive download with Range-based resume of a partial file
    async fn download_progressive(
        &self,
        request: &DownloadRequest,
        dest: &Path,
        mut control: DownloadControl,
    ) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut write_position = match fs::metadata(dest).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut builder = self.build_request(request, &request.url);
        if write_position > 0 {
            builder = builder.header("Range", format!("bytes={}-", write_position));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| VideoCacheError::network_error(format!("Request failed: {}", e), true))?;

        let total_bytes = match response.status() {
            StatusCode::OK => {
                // Server ignored the Range header; start over from byte zero
                if write_position > 0 {
                    fs::remove_file(dest).await?;
                    write_position = 0;
                }
                response.content_length().unwrap_or(0)
            }
            StatusCode::PARTIAL_CONTENT => {
                // Content-Range: bytes 1000-1999/2000
                response
                    .headers()
                    .get("content-range")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.split('/').nth(1))
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0)
            }
            StatusCode::RANGE_NOT_SATISFIABLE => {
                // Partial file no longer matches the remote; restart clean
                fs::remove_file(dest).await?;
                return Err(VideoCacheError::network_error(
                    "Range not satisfiable, partial file discarded",
                    true,
                ));
            }
            status => {
                return Err(VideoCacheError::UnexpectedStatusCode {
                    status_code: status.as_u16(),
                    url: request.url.clone(),
                });
            }
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dest)
            .await?;

        let mut written = write_position;
        self.stream_body(request, response, &mut file, &mut control, &mut written, total_bytes)
            .await?;

        if total_bytes > 0 && written < total_bytes {
            return Err(VideoCacheError::DownloadIncomplete {
                received: written,
                expected: total_bytes,
            });
        }

        Ok(written)
    }

    /// Pick the variant with the highest listed bandwidth from a master
    /// playlist; `None` when the playlist has no variant tags (it is already
    /// a media playlist).
    fn select_variant(master: &str) -> Option<String> {
        VARIANT_RE
            .captures_iter(master)
            .filter_map(|cap| {
                let bandwidth: u64 = cap.get(1)?.as_str().parse().ok()?;
                Some((bandwidth, cap.get(2)?.as_str().trim().to_string()))
            })
            .max_by_key(|(bandwidth, _)| *bandwidth)
            .map(|(_, uri)| uri)
    }

    /// Segment URIs of a media playlist, in order
    fn segment_uris(media: &str) -> Vec<String> {
        media
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    }

    /// Rewrite a media playlist so segment URIs point at the local files
    fn localize_playlist(media: &str, local_names: &[String]) -> String {
        let mut next = 0usize;
        let mut out = String::with_capacity(media.len());
        for line in media.lines() {
            let trimmed = line.trim();
            if !trimmed.is_empty() && !trimmed.starts_with('#') && next < local_names.len() {
                out.push_str(&local_names[next]);
                next += 1;
            } else {
                out.push_str(line);
            }
            out.push('\n');
        }
        out
    }

    /// Aggregate/HLS download into a directory, one logical unit
    async fn download_aggregate(
        &self,
        request: &DownloadRequest,
        dest: &Path,
        mut control: DownloadControl,
    ) -> Result<u64> {
        fs::create_dir_all(dest).await?;

        let base = Url::parse(&request.url)
            .map_err(|e| VideoCacheError::InvalidDownloadUrl(format!("{}: {}", request.url, e)))?;

        control.checkpoint().await?;
        let master = self.fetch_text(request, &request.url).await?;

        let (media_url, media) = match Self::select_variant(&master) {
            Some(variant_uri) => {
                let media_url = base.join(&variant_uri).map_err(|e| {
                    VideoCacheError::InvalidPlaylist(format!(
                        "Bad variant URI {}: {}",
                        variant_uri, e
                    ))
                })?;
                control.checkpoint().await?;
                let media = self.fetch_text(request, media_url.as_str()).await?;
                (media_url, media)
            }
            None => (base.clone(), master),
        };

        let segments = Self::segment_uris(&media);
        if segments.is_empty() {
            return Err(VideoCacheError::InvalidPlaylist(format!(
                "No segments in playlist {}",
                media_url
            )));
        }

        let mut total_written = 0u64;
        let mut local_names = Vec::with_capacity(segments.len());

        for (index, segment_uri) in segments.iter().enumerate() {
            control.checkpoint().await?;

            let segment_url = media_url.join(segment_uri).map_err(|e| {
                VideoCacheError::InvalidPlaylist(format!("Bad segment URI {}: {}", segment_uri, e))
            })?;

            let extension = Path::new(segment_url.path())
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("ts");
            let local_name = format!("seg{:05}.{}", index, extension);
            let segment_path = dest.join(&local_name);

            let response = self
                .build_request(request, segment_url.as_str())
                .send()
                .await
                .map_err(|e| {
                    VideoCacheError::network_error(format!("Segment request failed: {}", e), true)
                })?;

            if !response.status().is_success() {
                return Err(VideoCacheError::UnexpectedStatusCode {
                    status_code: response.status().as_u16(),
                    url: segment_url.to_string(),
                });
            }

            let mut file = fs::File::create(&segment_path).await?;
            self.stream_body(
                request,
                response,
                &mut file,
                &mut control,
                &mut total_written,
                0,
            )
            .await?;

            local_names.push(local_name);
        }

        let localized = Self::localize_playlist(&media, &local_names);
        fs::write(dest.join("index.m3u8"), localized).await?;

        Ok(total_written)
    }
}

#[async_trait]
impl AssetDownloadExecutor for HttpDownloadExecutor {
    async fn execute(
        &self,
        request: &DownloadRequest,
        dest: &Path,
        control: DownloadControl,
    ) -> Result<u64> {
        match request.kind {
            DownloadKind::Progressive => self.download_progressive(request, dest, control).await,
            DownloadKind::Aggregate => self.download_aggregate(request, dest, control).await,
        }
    }
}

/// Storage location for a request's payload under `cache_dir`.
///
/// Progressive assets are a single file named by the hashed key (original
/// extension kept when present); aggregate assets are a directory of
/// segments plus a local playlist.
pub fn storage_path_for(cache_dir: &Path, storage_name: &str, request: &DownloadRequest) -> PathBuf {
    match request.kind {
        DownloadKind::Aggregate => cache_dir.join(storage_name),
        DownloadKind::Progressive => {
            let extension = Url::parse(&request.url)
                .ok()
                .and_then(|u| {
                    Path::new(u.path())
                        .extension()
                        .and_then(|e| e.to_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "mp4".to_string());
            cache_dir.join(format!("{}.{}", storage_name, extension))
        }
    }
}
