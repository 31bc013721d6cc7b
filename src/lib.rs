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


//! Video prefetch/cache core for a mobile media-playback plugin.
//!
//! The host plugin hands every playback URI to this crate: cached assets
//! play from local storage, uncached ones are downloaded once no matter
//! how many players ask for them. The public surface is
//! [`VideoDownloader`]; the C bridge in [`ffi_bridge`] re-exposes it to
//! the native plugin layer.

pub mod cache;
pub mod download;
pub mod downloader;
pub mod error;
pub mod ffi_bridge;
pub mod loader;

pub use cache::{AssetCache, AssetHandle, EntryStatus};
pub use download::{
    AssetDownloadExecutor, CookiePair, DownloadControl, DownloadKind, DownloadProgress,
    DownloadQueue, DownloadRequest, HttpDownloadExecutor, OperationState, ProgressCallback,
};
pub use downloader::{CacheConfig, VideoDownloader};
pub use error::{Result, VideoCacheError};
pub use loader::ResourceLoaderDelegate;
