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


//! Download operation state machine
//!
//! A [`DownloadOperation`] wraps one external download task as a schedulable
//! unit of work. It owns the retry count, the suspend flag, and the
//! cancellation signal; the queue owns the operation itself while it is
//! queued or running.
//!
//! State machine:
//!
//! ```text
//! Pending -> Running -> { Completed | Failed | Suspended | Cancelled }
//! Suspended -> Running        (resume)
//! Failed -> Running           (retry, increments attempts)
//! ```
//!
//! Completed and Cancelled are terminal. The operation only counts attempts;
//! the maximum is queue policy.

use crate::download::executor::DownloadControl;
use crate::error::{Result, VideoCacheError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

/// Kind of download a request describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadKind {
    /// Single progressive file (e.g. mp4)
    #[serde(rename = "progressive")]
    Progressive,
    /// Aggregate/HLS download: master playlist, one variant, its segments
    #[serde(rename = "aggregate")]
    Aggregate,
}

impl DownloadKind {
    /// Infer the kind from a URL: `.m3u8` paths are aggregate
    pub fn infer_from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.to_ascii_lowercase().ends_with(".m3u8") {
            DownloadKind::Aggregate
        } else {
            DownloadKind::Progressive
        }
    }
}

/// One cookie forwarded from the plugin layer, order-preserving
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookiePair {
    pub name: String,
    pub value: String,
}

/// Immutable description of one download
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Source URL
    pub url: String,

    /// Cache key the downloaded asset is stored under
    pub cache_key: String,

    /// Cookies to send, in the order the caller supplied them
    pub cookies: Vec<CookiePair>,

    /// Extra request headers
    pub headers: HashMap<String, String>,

    /// Progressive or aggregate
    pub kind: DownloadKind,
}

impl DownloadRequest {
    /// Build a request, inferring the kind from the URL
    pub fn new(url: String, cache_key: String, cookies: Vec<CookiePair>) -> Self {
        let kind = DownloadKind::infer_from_url(&url);
        Self {
            url,
            cache_key,
            cookies,
            headers: HashMap::new(),
            kind,
        }
    }

    /// Serialize the cookie pairs into a `Cookie` header value
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let value = self
            .cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        Some(value)
    }
}

/// Lifecycle state of a download operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    /// Built but not yet started by the queue
    Pending,
    /// Actively driving the download executor
    Running,
    /// Paused; yields network/CPU until resumed
    Suspended,
    /// Finished successfully (terminal)
    Completed,
    /// Last attempt failed; eligible for retry
    Failed,
    /// Explicitly cancelled (terminal)
    Cancelled,
}

impl OperationState {
    /// Whether the operation can never run again
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Completed | OperationState::Cancelled)
    }
}

struct OperationInner {
    state: OperationState,
    attempts: u32,
}

/// A schedulable download bound to one external download task.
///
/// The small state machine lives behind a std `Mutex`; no lock is held
/// across await points. Suspend and cancel propagate to the running
/// executor through watch channels so the worker observes them between
/// chunks.
pub struct DownloadOperation {
    id: String,
    request: DownloadRequest,
    inner: Mutex<OperationInner>,
    suspend_tx: watch::Sender<bool>,
    cancel_tx: watch::Sender<bool>,
}

impl DownloadOperation {
    /// Build an operation for a request; it does not start until the queue
    /// runs it.
    pub fn new(request: DownloadRequest) -> Self {
        let (suspend_tx, _) = watch::channel(false);
        let (cancel_tx, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4().to_string(),
            request,
            inner: Mutex::new(OperationInner {
                state: OperationState::Pending,
                attempts: 0,
            }),
            suspend_tx,
            cancel_tx,
        }
    }

    /// Unique operation id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The request this operation was built from
    pub fn request(&self) -> &DownloadRequest {
        &self.request
    }

    /// Cache key this operation fills
    pub fn cache_key(&self) -> &str {
        &self.request.cache_key
    }

    /// Current state
    pub fn state(&self) -> OperationState {
        self.inner.lock().unwrap().state
    }

    /// How many times this operation has been (re)submitted after a failure
    pub fn attempts(&self) -> u32 {
        self.inner.lock().unwrap().attempts
    }

    /// Whether the suspend flag is currently set
    pub fn suspended(&self) -> bool {
        *self.suspend_tx.borrow()
    }

    /// Subscribe the executor to this operation's suspend/cancel signals
    pub fn control(&self) -> DownloadControl {
        DownloadControl::new(self.suspend_tx.subscribe(), self.cancel_tx.subscribe())
    }

    /// Pending -> Running, called by the queue when a slot is acquired
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            OperationState::Pending => {
                inner.state = OperationState::Running;
                Ok(())
            }
            other => Err(VideoCacheError::InvalidState(format!(
                "Cannot start operation from {:?}",
                other
            ))),
        }
    }

    /// Pause a running operation; the executor parks between chunks
    pub fn suspend(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            OperationState::Running => {
                inner.state = OperationState::Suspended;
                self.suspend_tx.send_replace(true);
                Ok(())
            }
            other => Err(VideoCacheError::InvalidState(format!(
                "Cannot suspend operation from {:?}",
                other
            ))),
        }
    }

    /// Resume a suspended operation without resetting attempts
    pub fn resume(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            OperationState::Suspended => {
                inner.state = OperationState::Running;
                self.suspend_tx.send_replace(false);
                Ok(())
            }
            other => Err(VideoCacheError::InvalidState(format!(
                "Cannot resume operation from {:?}",
                other
            ))),
        }
    }

    /// Failed -> Running; increments the attempt counter by exactly one
    pub fn retry(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            OperationState::Failed => {
                inner.attempts += 1;
                inner.state = OperationState::Running;
                Ok(())
            }
            other => Err(VideoCacheError::InvalidState(format!(
                "Cannot retry operation from {:?}",
                other
            ))),
        }
    }

    /// Mark the operation completed (terminal)
    pub fn complete(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            OperationState::Running | OperationState::Suspended => {
                inner.state = OperationState::Completed;
                Ok(())
            }
            other => Err(VideoCacheError::InvalidState(format!(
                "Cannot complete operation from {:?}",
                other
            ))),
        }
    }

    /// Record a failed attempt; the queue decides whether to retry
    pub fn fail(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.state.is_terminal() {
            inner.state = OperationState::Failed;
        }
    }

    /// Cancel the operation and signal the running executor to stop.
    ///
    /// Idempotent; cancelling a completed operation is a no-op.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.state.is_terminal() {
            inner.state = OperationState::Cancelled;
            self.cancel_tx.send_replace(true);
        }
    }
}

impl std::fmt::Debug for DownloadOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOperation")
            .field("id", &self.id)
            .field("cache_key", &self.request.cache_key)
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .finish()
    }
}
