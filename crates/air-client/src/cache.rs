// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! On-disk cache of flight payloads and tile images.
//!
//! Files are named by the SHA256 of their key (flight id or image URL) so
//! server-provided strings never become paths.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::warn;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::flight::FlightId;
use crate::poller::FlightData;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("could not determine cache directory")]
    NoCacheDir,

    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cache encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Flight payload and tile image cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct FlightCache {
    flights_dir: PathBuf,
    tiles_dir: PathBuf,
}

impl FlightCache {
    /// Cache under the platform cache directory (`~/.cache/air` on Linux).
    pub fn new() -> Result<Self, CacheError> {
        let root = dirs::cache_dir().ok_or(CacheError::NoCacheDir)?.join("air");
        Self::at(root)
    }

    /// Cache rooted at `root`, creating it if needed.
    pub fn at(root: impl AsRef<Path>) -> Result<Self, CacheError> {
        let root = root.as_ref();
        let flights_dir = root.join("flights");
        let tiles_dir = root.join("tiles");
        fs::create_dir_all(&flights_dir)?;
        fs::create_dir_all(&tiles_dir)?;

        Ok(Self {
            flights_dir,
            tiles_dir,
        })
    }

    fn flight_path(&self, id: &FlightId) -> PathBuf {
        self.flights_dir.join(format!("{}.json", hash(id.as_str())))
    }

    fn tile_path(&self, url: &str) -> PathBuf {
        self.tiles_dir.join(format!("{}.{}", hash(url), extension(url)))
    }

    /// Persist the payload of a flight.
    pub fn save_flight(&self, id: &FlightId, data: &FlightData) -> Result<(), CacheError> {
        let json = serde_json::to_vec_pretty(data)?;
        fs::write(self.flight_path(id), json)?;
        Ok(())
    }

    /// Previously persisted payload, if any.
    #[must_use]
    pub fn load_flight(&self, id: &FlightId) -> Option<FlightData> {
        let bytes = fs::read(self.flight_path(id)).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!("Discarding unreadable cached data for {}: {}", id, e);
                None
            }
        }
    }

    /// Cached image bytes for a tile URL.
    #[must_use]
    pub fn cached_tile(&self, url: &str) -> Option<Vec<u8>> {
        fs::read(self.tile_path(url)).ok()
    }

    pub fn store_tile(&self, url: &str, bytes: &[u8]) -> Result<(), CacheError> {
        fs::write(self.tile_path(url), bytes)?;
        Ok(())
    }
}

fn hash(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

// Extension of the last path segment, e.g. "png"; "img" when there is none.
fn extension(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    match segment.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric()) => ext,
        _ => "img",
    }
}
