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


//! Bounded-concurrency download scheduling
//!
//! The queue drives [`DownloadOperation`]s against the executor: it gates
//! parallelism with a semaphore, owns the retry policy (the operation only
//! counts attempts), and applies exponential backoff between retries of
//! transient failures. Key-level deduplication lives with the cache, which
//! holds the key -> live-operation map under the same lock as the entries.

use crate::download::executor::AssetDownloadExecutor;
use crate::download::operation::{DownloadOperation, OperationState};
use crate::download::progress::ProgressCallback;
use crate::error::{Result, VideoCacheError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Cap on the exponential backoff exponent (2^5 = 32s)
const MAX_BACKOFF_EXP: u32 = 5;

/// Scheduler for download operations
pub struct DownloadQueue {
    semaphore: Arc<Semaphore>,
    retry_attempts: u32,
    executor: Arc<dyn AssetDownloadExecutor>,
}

impl DownloadQueue {
    /// Build a queue with a concurrency bound and a retry bound
    pub fn new(
        max_concurrent: usize,
        retry_attempts: u32,
        executor: Arc<dyn AssetDownloadExecutor>,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            retry_attempts,
            executor,
        }
    }

    /// Maximum retries after the first failed attempt
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// Drive one operation to a terminal result.
    ///
    /// Blocks on the semaphore until a download slot frees up, then runs the
    /// executor, retrying transient failures with exponential backoff up to
    /// the configured bound. Returns the bytes written on success; the
    /// operation ends in Completed, Failed or Cancelled accordingly.
    pub async fn run_operation(
        &self,
        operation: &Arc<DownloadOperation>,
        dest: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<u64> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| VideoCacheError::Cancelled)?;

        // A cancel may land while we were waiting for a slot, or race the
        // transition itself; either way the waiters see Cancelled
        operation.start().map_err(|err| match operation.state() {
            OperationState::Cancelled => VideoCacheError::Cancelled,
            _ => err,
        })?;

        loop {
            let mut control = operation.control();
            if let Some(cb) = &progress {
                control = control.with_progress(cb.clone());
            }

            match self.executor.execute(operation.request(), dest, control).await {
                Ok(bytes) => {
                    // Completion races an external cancel; cancel wins
                    if operation.complete().is_err() {
                        return Err(VideoCacheError::Cancelled);
                    }
                    return Ok(bytes);
                }
                Err(err) if err.is_cancellation() => {
                    operation.cancel();
                    return Err(err);
                }
                Err(err) => {
                    operation.fail();

                    if !err.is_retryable() || operation.attempts() >= self.retry_attempts {
                        return Err(err);
                    }

                    self.backoff(operation).await?;

                    // Failed -> Running; fails if a cancel landed meanwhile
                    operation.retry()?;
                }
            }
        }
    }

    /// Exponential backoff between attempts, interruptible by cancel
    async fn backoff(&self, operation: &Arc<DownloadOperation>) -> Result<()> {
        let exp = (operation.attempts() + 1).min(MAX_BACKOFF_EXP);
        let delay = Duration::from_secs(2u64.pow(exp));
        let mut control = operation.control();

        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = control.wait_cancelled() => Err(VideoCacheError::Cancelled),
        }
    }
}
