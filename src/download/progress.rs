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


//! Download progress snapshots
//!
//! Progress is reported per cache key so the plugin layer can surface a
//! prefetch indicator. Aggregate downloads report the running byte total
//! across all segments; `total_bytes` is 0 when the server does not
//! advertise a length.

use serde::{Deserialize, Serialize};

/// Progress snapshot for one in-flight download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Cache key the download is filling
    pub cache_key: String,

    /// Source URL being fetched
    pub url: String,

    /// Bytes downloaded so far
    pub bytes_downloaded: u64,

    /// Total bytes to download (0 if unknown)
    pub total_bytes: u64,

    /// Percentage complete (0.0 - 100.0, 0.0 when total is unknown)
    pub percent_complete: f64,
}

impl DownloadProgress {
    /// Create a new progress snapshot at zero bytes
    pub fn new(cache_key: String, url: String, total_bytes: u64) -> Self {
        Self {
            cache_key,
            url,
            bytes_downloaded: 0,
            total_bytes,
            percent_complete: 0.0,
        }
    }

    /// Update the byte position and recompute the percentage
    pub fn update(&mut self, bytes_downloaded: u64) {
        self.bytes_downloaded = bytes_downloaded;
        if self.total_bytes > 0 {
            self.percent_complete =
                (self.bytes_downloaded as f64 / self.total_bytes as f64) * 100.0;
        } else {
            self.percent_complete = 0.0;
        }
    }
}

/// Callback type for progress updates
pub type ProgressCallback = std::sync::Arc<dyn Fn(DownloadProgress) + Send + Sync>;
