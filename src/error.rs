//! Error types for the video cache core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are categorized by the failure domain the cache distinguishes:
//!
//! - **Network**: transient or permanent transport failures; transient ones
//!   are eligible for automatic retry by the download queue.
//! - **Cancelled**: user- or invalidate-triggered; terminal, never retried.
//! - **Key resolution**: the canonical URL for an asset could not be
//!   determined; fatal for that asset's waiters only.
//! - **Storage**: disk full, permission denied, missing cache directory;
//!   terminal.
//! - **State**: an operation was asked to do something its state machine
//!   does not allow (e.g. `retry()` on a running operation).

use thiserror::Error;

/// Result type alias using our VideoCacheError type
pub type Result<T> = std::result::Result<T, VideoCacheError>;

/// Main error type for the video cache core
#[derive(Error, Debug)]
pub enum VideoCacheError {
    // ===== Network Errors =====

    /// Network connectivity or transport error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        /// Whether this error might be transient
        is_transient: bool,
    },

    /// Server returned an unexpected status code
    #[error("Server responded with unexpected status code: {status_code}")]
    UnexpectedStatusCode {
        status_code: u16,
        url: String,
    },

    /// Download finished short of the advertised content length
    #[error("Download incomplete: {received}/{expected} bytes")]
    DownloadIncomplete {
        received: u64,
        expected: u64,
    },

    /// Invalid download URL format or protocol
    #[error("Invalid download URL: {0}")]
    InvalidDownloadUrl(String),

    // ===== Cancellation =====

    /// Operation was cancelled via clear_cached_asset or invalidate
    #[error("Operation cancelled")]
    Cancelled,

    // ===== Key Resolution Errors =====

    /// The canonical URL (and thus the cache key) could not be resolved
    #[error("Cache key resolution failed: {0}")]
    KeyResolutionFailed(String),

    /// Redirect chain exceeded the configured hop limit
    #[error("Too many redirects resolving {0}")]
    TooManyRedirects(String),

    // ===== Storage Errors =====

    /// Cache storage error (disk full, permission, missing directory)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Cached file expected on disk was not found
    #[error("Cached asset missing from storage: {0}")]
    CachedAssetMissing(String),

    // ===== Playlist Errors (aggregate downloads) =====

    /// HLS playlist could not be parsed or listed no usable variant
    #[error("Invalid playlist: {0}")]
    InvalidPlaylist(String),

    // ===== State Errors =====

    /// Operation state machine rejected the requested transition
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ===== External Library Errors =====
    // Automatic conversions from external error types

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl VideoCacheError {
    /// Shorthand for a transient network error
    pub fn network_error<S: Into<String>>(message: S, is_transient: bool) -> Self {
        VideoCacheError::NetworkError {
            message: message.into(),
            is_transient,
        }
    }

    /// Shorthand for a storage error
    pub fn storage<S: Into<String>>(message: S) -> Self {
        VideoCacheError::StorageError(message.into())
    }

    /// Whether the download queue may retry after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            VideoCacheError::NetworkError { is_transient, .. } => *is_transient,
            VideoCacheError::UnexpectedStatusCode { status_code, .. } => {
                // Retry server-side failures, never client errors
                *status_code >= 500
            }
            VideoCacheError::DownloadIncomplete { .. } => true,
            VideoCacheError::ReqwestError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Whether this error came from an explicit cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, VideoCacheError::Cancelled)
    }

    /// Rebuild an equivalent error for fan-out to multiple waiters.
    ///
    /// Foreign errors wrapped via `#[from]` are not `Clone`, so waiter
    /// notification flattens them into message-bearing variants.
    pub fn duplicate(&self) -> Self {
        match self {
            VideoCacheError::NetworkError { message, is_transient } => {
                VideoCacheError::NetworkError {
                    message: message.clone(),
                    is_transient: *is_transient,
                }
            }
            VideoCacheError::UnexpectedStatusCode { status_code, url } => {
                VideoCacheError::UnexpectedStatusCode {
                    status_code: *status_code,
                    url: url.clone(),
                }
            }
            VideoCacheError::DownloadIncomplete { received, expected } => {
                VideoCacheError::DownloadIncomplete {
                    received: *received,
                    expected: *expected,
                }
            }
            VideoCacheError::InvalidDownloadUrl(s) => {
                VideoCacheError::InvalidDownloadUrl(s.clone())
            }
            VideoCacheError::Cancelled => VideoCacheError::Cancelled,
            VideoCacheError::KeyResolutionFailed(s) => {
                VideoCacheError::KeyResolutionFailed(s.clone())
            }
            VideoCacheError::TooManyRedirects(s) => VideoCacheError::TooManyRedirects(s.clone()),
            VideoCacheError::StorageError(s) => VideoCacheError::StorageError(s.clone()),
            VideoCacheError::CachedAssetMissing(s) => {
                VideoCacheError::CachedAssetMissing(s.clone())
            }
            VideoCacheError::InvalidPlaylist(s) => VideoCacheError::InvalidPlaylist(s.clone()),
            VideoCacheError::InvalidState(s) => VideoCacheError::InvalidState(s.clone()),
            VideoCacheError::InvalidInput(s) => VideoCacheError::InvalidInput(s.clone()),
            VideoCacheError::ReqwestError(e) => VideoCacheError::NetworkError {
                message: e.to_string(),
                is_transient: e.is_timeout() || e.is_connect(),
            },
            VideoCacheError::SerdeJsonError(e) => VideoCacheError::InvalidInput(e.to_string()),
            VideoCacheError::IoError(e) => VideoCacheError::StorageError(e.to_string()),
        }
    }

    /// User-facing message for the plugin bridge
    pub fn user_message(&self) -> String {
        match self {
            VideoCacheError::NetworkError { .. }
            | VideoCacheError::ReqwestError(_)
            | VideoCacheError::UnexpectedStatusCode { .. }
            | VideoCacheError::DownloadIncomplete { .. } => {
                "Network error while downloading video. Please check your connection.".to_string()
            }
            VideoCacheError::Cancelled => "Download was cancelled.".to_string(),
            VideoCacheError::KeyResolutionFailed(_) | VideoCacheError::TooManyRedirects(_) => {
                "Could not resolve the video location.".to_string()
            }
            VideoCacheError::StorageError(_)
            | VideoCacheError::IoError(_)
            | VideoCacheError::CachedAssetMissing(_) => {
                "Could not store the video on this device.".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_network_error_is_retryable() {
        let err = VideoCacheError::network_error("connection reset", true);
        assert!(err.is_retryable());

        let err = VideoCacheError::network_error("404 not found", false);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_server_errors_are_retryable() {
        let err = VideoCacheError::UnexpectedStatusCode {
            status_code: 503,
            url: "https://example.com/v.mp4".to_string(),
        };
        assert!(err.is_retryable());

        let err = VideoCacheError::UnexpectedStatusCode {
            status_code: 403,
            url: "https://example.com/v.mp4".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_cancelled_is_terminal() {
        let err = VideoCacheError::Cancelled;
        assert!(err.is_cancellation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_duplicate_preserves_variant() {
        let err = VideoCacheError::KeyResolutionFailed("redirect loop".to_string());
        let dup = err.duplicate();
        assert!(matches!(dup, VideoCacheError::KeyResolutionFailed(m) if m == "redirect loop"));
    }
}
