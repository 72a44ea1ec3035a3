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

//! Client library for the AiR flight-data service.
//!
//! The service computes per-flight data (path, airports, map tiles) as a
//! slow background job. This crate registers flights, polls the job's
//! progress, downloads the resulting tile images and keeps a local registry
//! of the flights the user created. It is organised in layers that can be
//! used on their own or through the [`Client`] facade:
//!
//! - **Transport layer**: one HTTP exchange, status codes passed through
//! - **Protocol layer**: registration, fetch/refetch/reload polls
//! - **Tile layer**: bounded-concurrency image downloads
//! - **Registry layer**: persisted flight list behind a key-value store
//! - **Session layer**: the poll → download → register workflow
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use air_client::{Client, ClientConfig, CompletionContext, FlightRequest, MemoryStore};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), air_client::Error> {
//!     let client = Client::new(ClientConfig::default(), Arc::new(MemoryStore::new()))?;
//!     let (context, mut events) = CompletionContext::channel();
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{event:?}");
//!         }
//!     });
//!
//!     let request = FlightRequest::parse("BA123", "2024-01-15")?;
//!     let report = client
//!         .register_and_track(&request, &context, &CancellationToken::new())
//!         .await?;
//!     println!("{} tiles downloaded", report.images.len());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod flight;
pub mod poller;
pub mod progress;
pub mod registration;
pub mod registry;
pub mod session;
pub mod tiles;
pub mod transport;

use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;

pub use cache::{CacheError, FlightCache};
pub use error::Error;
pub use flight::{is_valid_flight_number, FlightId, FlightRequest, ValidationError};
pub use poller::{FlightData, JobFailure, JobStatus, ReloadError, TileRef};
pub use progress::AggregateProgress;
pub use registration::RegistrationError;
pub use registry::{FlightRegistry, JsonFileStore, KeyValueStore, MemoryStore, RegistryWriter, StoreError};
pub use session::{
    CompletionContext, PollEndpoint, SessionConfig, TrackEvent, TrackReport, TrackState, TrackingSession,
};
pub use tiles::{FetchError, TileBatch, TileFetcher, TileOutcome};
pub use transport::{HttpTransport, Transport, TransportConfig, TransportError};

/// Configuration for the full-stack client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP transport configuration.
    pub transport: TransportConfig,
    /// Polling policy.
    pub session: SessionConfig,
    /// Cap on simultaneous tile downloads.
    pub max_concurrent_downloads: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
            max_concurrent_downloads: tiles::DEFAULT_MAX_CONCURRENT,
        }
    }
}

/// Full-stack client that wires all layers together.
#[derive(Debug, Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    registry: RegistryWriter,
    cache: Option<FlightCache>,
    config: ClientConfig,
}

impl Client {
    /// Build a client talking HTTP to `config.transport.base_url`.
    ///
    /// Spawns the registry writer, so this must run inside a tokio runtime.
    pub fn new(config: ClientConfig, store: Arc<dyn KeyValueStore>) -> Result<Self, Error> {
        let transport = HttpTransport::new(config.transport.clone())?;
        Ok(Self::with_transport(Arc::new(transport), config, store))
    }

    /// Build a client on top of any [`Transport`].
    #[must_use]
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            transport,
            registry: RegistryWriter::spawn(FlightRegistry::new(store)),
            cache: None,
            config,
        }
    }

    /// Persist payloads and tile images in `cache`.
    #[must_use]
    pub fn with_cache(mut self, cache: FlightCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Register a flight. Sends exactly one request.
    pub async fn create_flight(
        &self,
        request: &FlightRequest,
        cancel: &CancellationToken,
    ) -> Result<FlightId, RegistrationError> {
        registration::create_flight(self.transport.as_ref(), request, cancel).await
    }

    /// Single poll of `/fetch/{id}`.
    pub async fn fetch(&self, id: &FlightId, cancel: &CancellationToken) -> JobStatus {
        poller::fetch(self.transport.as_ref(), id, cancel).await
    }

    /// Single poll of `/refetch/{id}`.
    pub async fn refetch(&self, id: &FlightId, cancel: &CancellationToken) -> JobStatus {
        poller::refetch(self.transport.as_ref(), id, cancel).await
    }

    /// Ask the server to recompute a flight's data.
    pub async fn request_reload(&self, id: &FlightId, cancel: &CancellationToken) -> Result<(), ReloadError> {
        poller::request_reload(self.transport.as_ref(), id, cancel).await
    }

    /// Start downloading a set of tiles.
    #[must_use]
    pub fn fetch_tiles(&self, tiles: Vec<TileRef>, cancel: &CancellationToken) -> TileBatch {
        self.tile_fetcher().fetch_all(tiles, cancel)
    }

    /// Poll, download and register one flight.
    pub async fn track(
        &self,
        id: &FlightId,
        context: &CompletionContext,
        cancel: &CancellationToken,
    ) -> Result<TrackReport, Error> {
        self.session().track(id, context, cancel).await
    }

    /// Request a reload, then track the recomputed data via `/refetch`.
    pub async fn reload_and_track(
        &self,
        id: &FlightId,
        context: &CompletionContext,
        cancel: &CancellationToken,
    ) -> Result<TrackReport, Error> {
        self.request_reload(id, cancel).await?;
        info!("Reload of {} accepted", id);
        self.session()
            .track_from(PollEndpoint::Refetch, id, context, cancel)
            .await
    }

    /// Register a flight and track it to completion.
    pub async fn register_and_track(
        &self,
        request: &FlightRequest,
        context: &CompletionContext,
        cancel: &CancellationToken,
    ) -> Result<TrackReport, Error> {
        let id = self.create_flight(request, cancel).await?;
        self.track(&id, context, cancel).await
    }

    /// Flights registered on this device, oldest first.
    pub async fn flights(&self) -> Result<Vec<FlightId>, Error> {
        Ok(self.registry.list_all().await?)
    }

    /// Payload cached for `id` by an earlier session.
    #[must_use]
    pub fn cached_flight(&self, id: &FlightId) -> Option<FlightData> {
        self.cache.as_ref().and_then(|c| c.load_flight(id))
    }

    fn tile_fetcher(&self) -> TileFetcher {
        let fetcher = TileFetcher::new(Arc::clone(&self.transport), self.config.max_concurrent_downloads);
        match &self.cache {
            Some(cache) => fetcher.with_cache(cache.clone()),
            None => fetcher,
        }
    }

    fn session(&self) -> TrackingSession {
        let session = TrackingSession::new(
            Arc::clone(&self.transport),
            self.tile_fetcher(),
            self.registry.clone(),
            self.config.session.clone(),
        );
        match &self.cache {
            Some(cache) => session.with_cache(cache.clone()),
            None => session,
        }
    }
}
