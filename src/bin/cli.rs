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


use clap::{Parser, Subcommand};
use std::path::PathBuf;
use video_cache_core::{CacheConfig, CookiePair, VideoDownloader};

#[derive(Parser)]
#[command(name = "video-cache-cli")]
#[command(about = "Video cache CLI - Desktop testing tool", long_about = None)]
struct Cli {
    /// Cache directory
    #[arg(long, default_value = "video-cache")]
    cache_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prefetch a video into the cache
    Prefetch {
        /// Video URL (mp4 or m3u8)
        url: String,
        /// Explicit cache key (derived from the URL if omitted)
        #[arg(short, long)]
        key: Option<String>,
        /// Cookie in name=value form, repeatable
        #[arg(short, long)]
        cookie: Vec<String>,
    },
    /// Get a playable asset, downloading it if necessary
    Get {
        /// Video URL
        url: String,
        /// Explicit cache key
        #[arg(short, long)]
        key: Option<String>,
    },
    /// Check whether a key is cached
    Has {
        /// Cache key
        key: String,
    },
    /// Remove one cached asset
    Clear {
        /// Cache key
        key: String,
    },
    /// Remove every cached entry derived from a base URL
    ClearUrl {
        /// Base URL
        url: String,
    },
}

fn parse_cookie(raw: &str) -> anyhow::Result<CookiePair> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Cookie must be name=value, got: {}", raw))?;
    Ok(CookiePair {
        name: name.to_string(),
        value: value.to_string(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = CacheConfig {
        cache_dir: cli.cache_dir,
        ..CacheConfig::default()
    };
    let downloader = VideoDownloader::new(config).await?;

    match cli.command {
        Commands::Prefetch { url, key, cookie } => {
            let cookies = cookie
                .iter()
                .map(|c| parse_cookie(c))
                .collect::<anyhow::Result<Vec<_>>>()?;
            println!("Prefetching {}...", url);
            downloader.prefetch(&url, key.as_deref(), cookies).await?;
            println!("Done");
        }
        Commands::Get { url, key } => {
            let handle = downloader.get_asset(&url, key.as_deref(), Vec::new()).await?;
            println!("Cache key: {}", handle.cache_key);
            println!("Playback path: {}", handle.playback_path().display());
        }
        Commands::Has { key } => {
            if downloader.has_cached_asset(&key).await {
                println!("Cached");
            } else {
                println!("Not cached");
            }
        }
        Commands::Clear { key } => {
            downloader.clear_cached_asset(&key).await?;
            println!("Cleared {}", key);
        }
        Commands::ClearUrl { url } => {
            downloader.clear_cache_for_url(&url).await?;
            println!("Cleared entries for {}", url);
        }
    }

    Ok(())
}
