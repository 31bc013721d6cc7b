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


//! C FFI bridge - exposes the cache core to the host media-playback plugin
//!
//! The plugin's native layer (Swift/Objective-C or Kotlin via its own shim)
//! calls these functions and maps the JSON envelope onto its promise
//! primitives: `success: true` resolves, `success: false` rejects with
//! `error`.
//!
//! # Design Patterns
//! 1. **JSON Communication**: complex data crosses the FFI as JSON
//! 2. **Error Handling**: every error is caught and returned as a JSON error
//! 3. **Async Runtime**: a process-wide tokio runtime drives the async core
//! 4. **No Panics**: panics are caught so they never unwind across the FFI
//! 5. **Memory Safety**: every returned string must be freed with
//!    `video_cache_free_string()`
//!
//! # Response Format
//! ```json
//! { "success": true, "data": { ... } }
//! ```
//! or on error:
//! ```json
//! { "success": false, "error": "message" }
//! ```

use crate::download::operation::CookiePair;
use crate::downloader::{CacheConfig, VideoDownloader};
use crate::error::VideoCacheError;
use serde::Serialize;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic;
use std::sync::{Arc, RwLock};

lazy_static::lazy_static! {
    static ref RUNTIME: tokio::runtime::Runtime =
        tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    static ref DOWNLOADER: RwLock<Option<Arc<VideoDownloader>>> = RwLock::new(None);
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Safely convert C string pointer to Rust String
///
/// # Safety
/// Caller must ensure ptr is a valid null-terminated C string
fn c_str_to_string(ptr: *const c_char) -> crate::Result<String> {
    if ptr.is_null() {
        return Err(VideoCacheError::InvalidInput(
            "Null pointer received".to_string(),
        ));
    }
    unsafe {
        CStr::from_ptr(ptr)
            .to_str()
            .map(|s| s.to_string())
            .map_err(|e| VideoCacheError::InvalidInput(format!("Invalid UTF-8: {}", e)))
    }
}

/// Optional C string: null or empty means absent
fn c_str_to_option(ptr: *const c_char) -> crate::Result<Option<String>> {
    if ptr.is_null() {
        return Ok(None);
    }
    let s = c_str_to_string(ptr)?;
    Ok(if s.trim().is_empty() { None } else { Some(s) })
}

/// Parse the cookies JSON array forwarded by the plugin layer
fn parse_cookies(ptr: *const c_char) -> crate::Result<Vec<CookiePair>> {
    match c_str_to_option(ptr)? {
        Some(json) => {
            let cookies: Vec<CookiePair> = serde_json::from_str(&json)
                .map_err(|e| VideoCacheError::InvalidInput(format!("Invalid cookies: {}", e)))?;
            Ok(cookies)
        }
        None => Ok(Vec::new()),
    }
}

/// Convert Rust string to C string pointer
///
/// # Safety
/// Caller MUST free the returned pointer using `video_cache_free_string()`
fn string_to_c_str(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(c_string) => c_string.into_raw(),
        Err(_) => {
            let error_json = error_response("String contains null bytes");
            CString::new(error_json).unwrap().into_raw()
        }
    }
}

/// Create success response JSON
fn success_response<T: Serialize>(data: T) -> String {
    serde_json::json!({
        "success": true,
        "data": data
    })
    .to_string()
}

/// Create error response JSON
fn error_response(error: &str) -> String {
    serde_json::json!({
        "success": false,
        "error": error
    })
    .to_string()
}

/// Wrap a function call with panic catching
fn catch_panic<F>(f: F) -> String
where
    F: FnOnce() -> crate::Result<String> + panic::UnwindSafe,
{
    match panic::catch_unwind(f) {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => error_response(&e.user_message()),
        Err(panic_err) => {
            let panic_msg = if let Some(s) = panic_err.downcast_ref::<String>() {
                s.clone()
            } else if let Some(s) = panic_err.downcast_ref::<&str>() {
                s.to_string()
            } else {
                "Unknown panic occurred".to_string()
            };
            error_response(&format!("Rust panic: {}", panic_msg))
        }
    }
}

/// The process-wide downloader, or an error if the plugin forgot to
/// initialize
fn downloader() -> crate::Result<Arc<VideoDownloader>> {
    DOWNLOADER
        .read()
        .map_err(|_| VideoCacheError::InvalidState("Downloader lock poisoned".to_string()))?
        .clone()
        .ok_or_else(|| {
            VideoCacheError::InvalidState("Video cache not initialized".to_string())
        })
}

// ============================================================================
// CACHE LIFECYCLE
// ============================================================================

/// Initialize the process-wide cache instance.
///
/// `config_json` is a serialized [`CacheConfig`]; null applies the defaults.
/// Re-initializing replaces the instance after invalidating the old one.
///
/// # Safety
/// Caller must free the returned string with `video_cache_free_string()`
#[no_mangle]
pub extern "C" fn video_cache_initialize(config_json: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let config = match c_str_to_option(config_json)? {
            Some(json) => serde_json::from_str::<CacheConfig>(&json)
                .map_err(|e| VideoCacheError::InvalidInput(format!("Invalid config: {}", e)))?,
            None => CacheConfig::default(),
        };

        let new_downloader = RUNTIME.block_on(VideoDownloader::new(config))?;

        let previous = {
            let mut slot = DOWNLOADER.write().map_err(|_| {
                VideoCacheError::InvalidState("Downloader lock poisoned".to_string())
            })?;
            slot.replace(Arc::new(new_downloader))
        };
        if let Some(previous) = previous {
            RUNTIME.block_on(previous.invalidate())?;
        }

        Ok(success_response(serde_json::json!({ "initialized": true })))
    });

    string_to_c_str(response)
}

/// Cancel all in-flight downloads and reject pending waiters.
///
/// # Safety
/// Caller must free the returned string with `video_cache_free_string()`
#[no_mangle]
pub extern "C" fn video_cache_invalidate() -> *mut c_char {
    let response = catch_panic(|| {
        let downloader = downloader()?;
        RUNTIME.block_on(downloader.invalidate())?;
        Ok(success_response(serde_json::json!({ "invalidated": true })))
    });

    string_to_c_str(response)
}

// ============================================================================
// CACHE OPERATIONS
// ============================================================================

/// Prefetch a video into the cache ahead of playback.
///
/// `cache_key` may be null (derived from the URI); `cookies_json` is a JSON
/// array of `{name, value}` objects or null. Blocks until the asset is
/// Ready or the download fails; the plugin resolves its promise from the
/// envelope.
///
/// # Safety
/// Caller must free the returned string with `video_cache_free_string()`
#[no_mangle]
pub extern "C" fn video_cache_prefetch(
    uri: *const c_char,
    cache_key: *const c_char,
    cookies_json: *const c_char,
) -> *mut c_char {
    let response = catch_panic(|| {
        let uri = c_str_to_string(uri)?;
        let cache_key = c_str_to_option(cache_key)?;
        let cookies = parse_cookies(cookies_json)?;

        let downloader = downloader()?;
        RUNTIME.block_on(downloader.prefetch(&uri, cache_key.as_deref(), cookies))?;

        Ok(success_response(serde_json::json!({ "prefetched": true })))
    });

    string_to_c_str(response)
}

/// Get a playable asset handle, downloading it if it is not cached.
///
/// Returns `{cache_key, storage_path, playback_path, kind}` on success.
///
/// # Safety
/// Caller must free the returned string with `video_cache_free_string()`
#[no_mangle]
pub extern "C" fn video_cache_get_asset(
    uri: *const c_char,
    cache_key: *const c_char,
    cookies_json: *const c_char,
) -> *mut c_char {
    let response = catch_panic(|| {
        let uri = c_str_to_string(uri)?;
        let cache_key = c_str_to_option(cache_key)?;
        let cookies = parse_cookies(cookies_json)?;

        let downloader = downloader()?;
        let handle =
            RUNTIME.block_on(downloader.get_asset(&uri, cache_key.as_deref(), cookies))?;

        Ok(success_response(serde_json::json!({
            "cache_key": handle.cache_key,
            "storage_path": handle.storage_path,
            "playback_path": handle.playback_path(),
            "kind": handle.kind,
        })))
    });

    string_to_c_str(response)
}

/// Whether a Ready asset exists for the key. Never fails: any internal
/// doubt reports `false`.
///
/// # Safety
/// Caller must free the returned string with `video_cache_free_string()`
#[no_mangle]
pub extern "C" fn video_cache_has_cached_asset(cache_key: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let cached = match (c_str_to_string(cache_key), downloader()) {
            (Ok(key), Ok(downloader)) => RUNTIME.block_on(downloader.has_cached_asset(&key)),
            _ => false,
        };
        Ok(success_response(serde_json::json!({ "cached": cached })))
    });

    string_to_c_str(response)
}

/// Remove one key's cached bytes, cancelling its in-flight download.
///
/// # Safety
/// Caller must free the returned string with `video_cache_free_string()`
#[no_mangle]
pub extern "C" fn video_cache_clear_cached_asset(cache_key: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let key = c_str_to_string(cache_key)?;
        let downloader = downloader()?;
        RUNTIME.block_on(downloader.clear_cached_asset(&key))?;
        Ok(success_response(serde_json::json!({ "cleared": true })))
    });

    string_to_c_str(response)
}

/// Remove every cached entry derived from a base URL.
///
/// # Safety
/// Caller must free the returned string with `video_cache_free_string()`
#[no_mangle]
pub extern "C" fn video_cache_clear_cache_for_url(url: *const c_char) -> *mut c_char {
    let response = catch_panic(|| {
        let url = c_str_to_string(url)?;
        let downloader = downloader()?;
        RUNTIME.block_on(downloader.clear_cache_for_url(&url))?;
        Ok(success_response(serde_json::json!({ "cleared": true })))
    });

    string_to_c_str(response)
}

// ============================================================================
// MEMORY MANAGEMENT
// ============================================================================

/// Free a string returned by any `video_cache_*` function.
///
/// # Safety
/// `ptr` must be a pointer previously returned by this library and not yet
/// freed.
#[no_mangle]
pub unsafe extern "C" fn video_cache_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(ptr: *mut c_char) -> serde_json::Value {
        let s = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        unsafe { video_cache_free_string(ptr) };
        serde_json::from_str(&s).unwrap()
    }

    #[test]
    fn test_uninitialized_calls_report_error() {
        let key = CString::new("K1").unwrap();
        let response = decode(video_cache_clear_cached_asset(key.as_ptr()));
        assert_eq!(response["success"], false);
    }

    #[test]
    fn test_has_cached_asset_never_errors() {
        // Null key and missing downloader both degrade to "not cached"
        let response = decode(video_cache_has_cached_asset(std::ptr::null()));
        assert_eq!(response["success"], true);
        assert_eq!(response["data"]["cached"], false);
    }

    #[test]
    fn test_null_uri_rejected() {
        let response = decode(video_cache_prefetch(
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
        ));
        assert_eq!(response["success"], false);
    }
}
