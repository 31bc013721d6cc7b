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


//! Cache-key resolution and cache-key-addressed asset storage

pub mod key;
pub mod store;

pub use key::{derive_key_from_url, normalize_key, storage_name_for_key};
pub use store::{AssetCache, AssetHandle, EntryStatus};
