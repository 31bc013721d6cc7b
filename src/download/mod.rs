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


//! Download scheduling and execution
//!
//! An operation wraps one external download task; the queue schedules
//! operations with bounded concurrency and owns the retry policy; the
//! executor is the transport boundary (reqwest in production, a mock in
//! tests).

pub mod executor;
pub mod operation;
pub mod progress;
pub mod queue;

// Re-export commonly used types
pub use executor::{AssetDownloadExecutor, DownloadControl, HttpDownloadExecutor};
pub use operation::{CookiePair, DownloadKind, DownloadOperation, DownloadRequest, OperationState};
pub use progress::{DownloadProgress, ProgressCallback};
pub use queue::DownloadQueue;
