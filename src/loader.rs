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


//! Resource-loader delegate
//!
//! Playback asks for the bytes of an asset whose cache key may not be known
//! yet: resolving the key can itself take a network round trip, because CDN
//! URLs redirect to the canonical location the key is derived from. While
//! that resolution is pending, any number of playback requests may attach a
//! completion handler to the asset; every handler fires exactly once with
//! the outcome, including when resolution fails.

use crate::cache::key::derive_key_from_url;
use crate::cache::store::{AssetCache, AssetHandle};
use crate::download::operation::{CookiePair, DownloadRequest};
use crate::error::{Result, VideoCacheError};
use reqwest::redirect::Policy;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

/// Maximum redirect hops followed while resolving a canonical URL
const MAX_REDIRECT_HOPS: usize = 8;

/// Handler invoked once with (success, error) when an asset's resolution
/// settles
pub type CompletionHandler = Box<dyn FnOnce(bool, Option<VideoCacheError>) + Send>;

/// Intercepts playback requests for assets under key resolution and
/// multiplexes them onto the shared cache.
pub struct ResourceLoaderDelegate {
    client: Client,
    cache: Arc<AssetCache>,
    handlers: Mutex<HashMap<String, Vec<CompletionHandler>>>,
}

impl ResourceLoaderDelegate {
    pub fn new(cache: Arc<AssetCache>) -> Result<Self> {
        // Redirects are followed manually so the final hop is observable
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            cache,
            handlers: Mutex::new(HashMap::new()),
        })
    }

    /// Register a completion handler for an asset still resolving its key.
    /// Multiple handlers may attach to the same asset; each fires exactly
    /// once.
    pub async fn add_completion_handler_for_asset(
        &self,
        asset_id: &str,
        handler: CompletionHandler,
    ) {
        self.handlers
            .lock()
            .await
            .entry(asset_id.to_string())
            .or_default()
            .push(handler);
    }

    /// Deregister an asset's handlers without firing them (playback
    /// cancelled before resolution finished).
    pub async fn remove_completion_handler_for_asset(&self, asset_id: &str) {
        self.handlers.lock().await.remove(asset_id);
    }

    /// Resolve the asset's cache key, fetch (or attach to) its download, and
    /// fire every registered handler exactly once with the outcome.
    pub async fn resolve_and_load(
        &self,
        asset_id: &str,
        url: &str,
        cookies: Vec<CookiePair>,
    ) -> Result<AssetHandle> {
        let result = self.load_inner(url, cookies).await;

        let success = result.is_ok();
        let error = result.as_ref().err().map(|e| e.duplicate());
        self.flush_handlers(asset_id, success, error).await;

        result
    }

    /// Process-wide invalidation of every cached entry derived from a base
    /// URL, independent of any single asset instance.
    pub async fn clear_cache_for_url(&self, url: &str) -> Result<()> {
        self.cache.clear_cache_for_url(url).await
    }

    /// Chase redirects to the canonical URL and derive the cache key from it
    pub async fn resolve_cache_key(&self, url: &str, cookies: &[CookiePair]) -> Result<String> {
        let mut current = Url::parse(url)
            .map_err(|e| VideoCacheError::KeyResolutionFailed(format!("{}: {}", url, e)))?;

        let cookie_header = if cookies.is_empty() {
            None
        } else {
            Some(
                cookies
                    .iter()
                    .map(|c| format!("{}={}", c.name, c.value))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };

        for _ in 0..MAX_REDIRECT_HOPS {
            let mut builder = self.client.get(current.clone());
            if let Some(cookie) = &cookie_header {
                builder = builder.header("Cookie", cookie.clone());
            }

            let response = builder.send().await.map_err(|e| {
                VideoCacheError::KeyResolutionFailed(format!("Resolving {}: {}", current, e))
            })?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get("location")
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        VideoCacheError::KeyResolutionFailed(format!(
                            "Redirect without Location from {}",
                            current
                        ))
                    })?;
                current = current.join(location).map_err(|e| {
                    VideoCacheError::KeyResolutionFailed(format!(
                        "Bad redirect target {}: {}",
                        location, e
                    ))
                })?;
                continue;
            }

            if status.is_success() {
                return derive_key_from_url(current.as_str());
            }

            return Err(VideoCacheError::KeyResolutionFailed(format!(
                "HTTP {} resolving {}",
                status, current
            )));
        }

        Err(VideoCacheError::TooManyRedirects(url.to_string()))
    }

    async fn load_inner(&self, url: &str, cookies: Vec<CookiePair>) -> Result<AssetHandle> {
        let cache_key = self.resolve_cache_key(url, &cookies).await?;
        let request = DownloadRequest::new(url.to_string(), cache_key, cookies);
        self.cache.get_asset(request).await
    }

    /// Drain and invoke an asset's handlers; draining under the lock is what
    /// keeps each handler at exactly one invocation.
    async fn flush_handlers(
        &self,
        asset_id: &str,
        success: bool,
        error: Option<VideoCacheError>,
    ) {
        let handlers = self.handlers.lock().await.remove(asset_id);
        if let Some(handlers) = handlers {
            for handler in handlers {
                // Each handler gets its own copy of the error
                handler(success, error.as_ref().map(|e| e.duplicate()));
            }
        }
    }
}
