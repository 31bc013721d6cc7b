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


//! Cache-key normalization and storage-path mapping
//!
//! A cache key is the sole identity of a logical asset: dedup, waiter
//! registration and storage lookup all go through it. Callers normally
//! supply the key explicitly; when they don't, one is derived from the URL
//! with the query string and fragment stripped, so signed or expiring query
//! tokens never fragment the cache.

use crate::error::{Result, VideoCacheError};
use sha2::{Digest, Sha256};
use url::Url;

/// Normalize a caller-supplied key, falling back to URL derivation.
///
/// An explicit key is authoritative and used verbatim (trimmed). An empty
/// or missing key falls back to [`derive_key_from_url`].
pub fn normalize_key(url: &str, cache_key: Option<&str>) -> Result<String> {
    match cache_key.map(str::trim) {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => derive_key_from_url(url),
    }
}

/// Derive a cache key from a URL: scheme + host + path, query and fragment
/// stripped.
pub fn derive_key_from_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url)
        .map_err(|e| VideoCacheError::InvalidDownloadUrl(format!("{}: {}", url, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(VideoCacheError::InvalidDownloadUrl(format!(
            "Unsupported scheme: {}",
            url
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| VideoCacheError::InvalidDownloadUrl(format!("No host in URL: {}", url)))?;

    Ok(format!("{}://{}{}", parsed.scheme(), host, parsed.path()))
}

/// Whether two URLs address the same asset once query/fragment are ignored.
pub fn urls_share_base(a: &str, b: &str) -> bool {
    match (derive_key_from_url(a), derive_key_from_url(b)) {
        (Ok(ka), Ok(kb)) => ka == kb,
        _ => false,
    }
}

/// Map a cache key to a filesystem-safe storage name.
///
/// Keys are caller-chosen opaque strings and may contain path separators or
/// characters invalid on the target filesystem, so the storage name is the
/// SHA-256 of the key in hex.
pub fn storage_name_for_key(cache_key: &str) -> String {
    let digest = Sha256::digest(cache_key.as_bytes());
    hex::encode(digest)
}
