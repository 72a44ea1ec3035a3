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

//! Tile image downloads.
//!
//! A batch downloads every tile of a flight concurrently (bounded by a
//! semaphore) and yields one [`TileOutcome`] per tile as each finishes. A
//! failing tile never aborts the rest of the batch: it is reported with its
//! error and still counts as completed, so progress cannot stall on it.

use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::cache::FlightCache;
use crate::poller::TileRef;
use crate::transport::{Request, Transport, TransportError};

/// Default cap on simultaneous tile downloads.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Why a single tile could not be downloaded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Error: {0}")]
    Status(u16),

    #[error("No Data to retrieve")]
    Empty,

    #[error("Could not connect to server: {0}")]
    Transport(TransportError),
}

/// Result for one tile, tagged with its position in the requested list.
#[derive(Debug, Clone)]
pub struct TileOutcome {
    pub index: usize,
    pub tile: TileRef,
    pub result: Result<Vec<u8>, FetchError>,
}

/// Downloads tile images through a [`Transport`].
#[derive(Debug, Clone)]
pub struct TileFetcher {
    transport: Arc<dyn Transport>,
    max_concurrent: usize,
    cache: Option<FlightCache>,
}

impl TileFetcher {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, max_concurrent: usize) -> Self {
        Self {
            transport,
            max_concurrent: max_concurrent.max(1),
            cache: None,
        }
    }

    /// Serve tiles from, and store them into, `cache`.
    #[must_use]
    pub fn with_cache(mut self, cache: FlightCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Start downloading every tile. Must be called inside a tokio runtime.
    ///
    /// Cancelling `cancel`, or dropping the returned batch, stops the
    /// downloads that have not finished yet.
    #[must_use]
    pub fn fetch_all(&self, tiles: Vec<TileRef>, cancel: &CancellationToken) -> TileBatch {
        let total = tiles.len();
        let (tx, rx) = mpsc::channel(total.max(1));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let batch_cancel = cancel.child_token();

        debug!(
            "Fetching {} tiles ({} at a time)",
            total, self.max_concurrent
        );

        for (index, tile) in tiles.into_iter().enumerate() {
            let transport = Arc::clone(&self.transport);
            let cache = self.cache.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = batch_cancel.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };

                let result = match permit {
                    Some(_permit) => fetch_one(transport.as_ref(), cache.as_ref(), &tile, &cancel).await,
                    None => Err(FetchError::Transport(TransportError::Cancelled)),
                };

                if let Err(e) = &result {
                    warn!("Tile {} ({}) failed: {}", tile.id, tile.url, e);
                }

                // Receiver gone means the batch was abandoned.
                let _ = tx.send(TileOutcome { index, tile, result }).await;
            });
        }

        TileBatch {
            rx,
            total,
            cancel: batch_cancel,
        }
    }
}

async fn fetch_one(
    transport: &dyn Transport,
    cache: Option<&FlightCache>,
    tile: &TileRef,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, FetchError> {
    if let Some(bytes) = cache.and_then(|c| c.cached_tile(&tile.url)) {
        debug!("Tile {} served from cache", tile.id);
        return Ok(bytes);
    }

    let response = transport
        .request(Request::get(tile.url.as_str()), cancel)
        .await
        .map_err(FetchError::Transport)?;

    match response.status {
        200 if response.body.is_empty() => Err(FetchError::Empty),
        200 => {
            if let Some(cache) = cache {
                if let Err(e) = cache.store_tile(&tile.url, &response.body) {
                    warn!("Could not cache tile {}: {}", tile.id, e);
                }
            }
            Ok(response.body)
        }
        status => Err(FetchError::Status(status)),
    }
}

/// Lazily yields the outcome of each tile in completion order.
#[derive(Debug)]
pub struct TileBatch {
    rx: mpsc::Receiver<TileOutcome>,
    total: usize,
    cancel: CancellationToken,
}

impl TileBatch {
    /// Number of tiles in the batch.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Next finished tile, or `None` once every tile has reported.
    pub async fn recv(&mut self) -> Option<TileOutcome> {
        self.rx.recv().await
    }

    /// Stop outstanding downloads.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TileBatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
