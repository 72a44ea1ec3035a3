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

//! Tracking session: drives one flight from "registered" to "complete".
//!
//! ```text
//! Polling ──(progress == 1.0)──▶ MetadataReady ──▶ ImagesDownloading ──▶ Complete
//!    └──────────────────────────── any failure ─────────────────────────▶ Failed
//! ```
//!
//! Every state change and progress update is delivered through a
//! [`CompletionContext`], so the consumer decides which thread or task
//! applies them. The flight is appended to the registry exactly once, only
//! after all tiles have reported, and never for a cancelled session.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::FlightCache;
use crate::error::Error;
use crate::flight::FlightId;
use crate::poller::{self, FlightData, JobFailure, JobStatus, TileRef};
use crate::progress::AggregateProgress;
use crate::registry::RegistryWriter;
use crate::tiles::{FetchError, TileFetcher};
use crate::transport::{Transport, TransportError};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Polling,
    MetadataReady,
    ImagesDownloading,
    Complete,
    Failed,
}

/// Update emitted by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    StateChanged(TrackState),
    /// Aggregate progress in 0..=1, never decreasing within a session.
    Progress(f64),
    TileFinished { index: usize, tile_id: String, ok: bool },
    Completed { id: FlightId, failed_tiles: usize },
    Failed(String),
}

/// Sink for [`TrackEvent`]s, drained by whoever owns the UI-visible state.
///
/// Sending never blocks the session; events for a dropped receiver are
/// discarded.
#[derive(Debug, Clone)]
pub struct CompletionContext {
    tx: mpsc::UnboundedSender<TrackEvent>,
}

impl CompletionContext {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TrackEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A context nobody listens to.
    #[must_use]
    pub fn detached() -> Self {
        Self::channel().0
    }

    fn emit(&self, event: TrackEvent) {
        let _ = self.tx.send(event);
    }
}

/// Polling policy.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay between polls while the job is pending.
    pub poll_interval: Duration,
    /// Consecutive connectivity failures tolerated while polling.
    pub max_poll_retries: u32,
    /// Give up after this many polls. `None` polls until done or cancelled.
    pub max_polls: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_poll_retries: 3,
            max_polls: None,
        }
    }
}

/// Which endpoint a session polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEndpoint {
    /// `/fetch/{id}` for freshly registered flights.
    Fetch,
    /// `/refetch/{id}` after a reload request.
    Refetch,
}

/// A downloaded tile image.
#[derive(Debug, Clone)]
pub struct TileImage {
    pub index: usize,
    pub tile: TileRef,
    pub bytes: Vec<u8>,
}

/// A tile that produced no image. It still counted towards completion.
#[derive(Debug, Clone)]
pub struct FailedTile {
    pub index: usize,
    pub tile: TileRef,
    pub error: FetchError,
}

/// Result of a completed session.
#[derive(Debug, Clone)]
pub struct TrackReport {
    pub id: FlightId,
    pub data: FlightData,
    /// Successful images, ordered by tile index.
    pub images: Vec<TileImage>,
    /// Failed tiles, ordered by tile index.
    pub failed: Vec<FailedTile>,
}

impl TrackReport {
    /// Whether some tiles are missing their image.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Drives the poll → download → register workflow for flights.
#[derive(Debug, Clone)]
pub struct TrackingSession {
    transport: Arc<dyn Transport>,
    fetcher: TileFetcher,
    registry: RegistryWriter,
    cache: Option<FlightCache>,
    config: SessionConfig,
}

impl TrackingSession {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        fetcher: TileFetcher,
        registry: RegistryWriter,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            fetcher,
            registry,
            cache: None,
            config,
        }
    }

    /// Persist ready payloads into `cache`.
    #[must_use]
    pub fn with_cache(mut self, cache: FlightCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Track a newly registered flight via `/fetch`.
    pub async fn track(
        &self,
        id: &FlightId,
        context: &CompletionContext,
        cancel: &CancellationToken,
    ) -> Result<TrackReport, Error> {
        self.track_from(PollEndpoint::Fetch, id, context, cancel).await
    }

    /// Track a flight, polling the given endpoint.
    pub async fn track_from(
        &self,
        endpoint: PollEndpoint,
        id: &FlightId,
        context: &CompletionContext,
        cancel: &CancellationToken,
    ) -> Result<TrackReport, Error> {
        let result = self.run(endpoint, id, context, cancel).await;

        if let Err(e) = &result {
            warn!("Tracking {} ended: {}", id, e);
            context.emit(TrackEvent::StateChanged(TrackState::Failed));
            context.emit(TrackEvent::Failed(e.user_message()));
        }

        result
    }

    async fn run(
        &self,
        endpoint: PollEndpoint,
        id: &FlightId,
        context: &CompletionContext,
        cancel: &CancellationToken,
    ) -> Result<TrackReport, Error> {
        let mut progress = AggregateProgress::new();

        context.emit(TrackEvent::StateChanged(TrackState::Polling));
        let data = self
            .poll_until_ready(endpoint, id, context, cancel, &mut progress)
            .await?;

        info!("Flight {} metadata ready ({} tiles)", id, data.tiles.len());
        context.emit(TrackEvent::StateChanged(TrackState::MetadataReady));
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save_flight(id, &data) {
                warn!("Could not cache data for {}: {}", id, e);
            }
        }

        context.emit(TrackEvent::StateChanged(TrackState::ImagesDownloading));
        let mut batch = self.fetcher.fetch_all(data.tiles.clone(), cancel);
        context.emit(TrackEvent::Progress(progress.start_tiles(batch.total())));

        let mut images = Vec::new();
        let mut failed = Vec::new();
        loop {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = batch.recv() => outcome,
            };
            let Some(outcome) = outcome else {
                break;
            };

            context.emit(TrackEvent::TileFinished {
                index: outcome.index,
                tile_id: outcome.tile.id.clone(),
                ok: outcome.result.is_ok(),
            });
            context.emit(TrackEvent::Progress(progress.on_tile_done(outcome.index)));

            match outcome.result {
                Ok(bytes) => images.push(TileImage {
                    index: outcome.index,
                    tile: outcome.tile,
                    bytes,
                }),
                Err(error) => failed.push(FailedTile {
                    index: outcome.index,
                    tile: outcome.tile,
                    error,
                }),
            }
        }

        // A tile task can lose the race with cancellation and still report.
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if !failed.is_empty() {
            warn!(
                "{} of {} tiles failed for {}; counted as complete without images",
                failed.len(),
                batch.total(),
                id
            );
        }

        self.registry.append(id.clone()).await?;

        images.sort_by_key(|image| image.index);
        failed.sort_by_key(|tile| tile.index);

        context.emit(TrackEvent::StateChanged(TrackState::Complete));
        context.emit(TrackEvent::Completed {
            id: id.clone(),
            failed_tiles: failed.len(),
        });
        info!("Flight {} complete", id);

        Ok(TrackReport {
            id: id.clone(),
            data,
            images,
            failed,
        })
    }

    async fn poll_until_ready(
        &self,
        endpoint: PollEndpoint,
        id: &FlightId,
        context: &CompletionContext,
        cancel: &CancellationToken,
        progress: &mut AggregateProgress,
    ) -> Result<FlightData, Error> {
        let mut polls = 0u32;
        let mut retries = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(max) = self.config.max_polls {
                if polls >= max {
                    return Err(Error::PollLimit(max));
                }
            }
            polls += 1;

            let status = match endpoint {
                PollEndpoint::Fetch => poller::fetch(self.transport.as_ref(), id, cancel).await,
                PollEndpoint::Refetch => poller::refetch(self.transport.as_ref(), id, cancel).await,
            };

            match status {
                JobStatus::Ready(data) if data.is_metadata_complete() => return Ok(data),
                JobStatus::Ready(data) => {
                    retries = 0;
                    debug!("Flight {} payload at {:.0}%", id, data.server_progress() * 100.0);
                    context.emit(TrackEvent::Progress(progress.on_server_progress(data.server_progress())));
                }
                JobStatus::Pending(fraction) => {
                    retries = 0;
                    debug!("Flight {} not ready yet ({:.0}%)", id, fraction * 100.0);
                    context.emit(TrackEvent::Progress(progress.on_server_progress(fraction)));
                }
                JobStatus::Failed(JobFailure::Connectivity(TransportError::Cancelled)) => {
                    return Err(Error::Cancelled);
                }
                JobStatus::Failed(failure) if failure.is_retryable() && retries < self.config.max_poll_retries => {
                    retries += 1;
                    warn!(
                        "Poll for {} failed ({}), retry {}/{}",
                        id, failure, retries, self.config.max_poll_retries
                    );
                }
                JobStatus::Failed(failure) => return Err(Error::Job(failure)),
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FlightRegistry, MemoryStore};
    use crate::transport::testing::ScriptedTransport;
    use crate::transport::{Request, Response};
    use async_trait::async_trait;

    const TILES: &str = r#"[
        {"id": "0", "url": "https://cdn/0.png"},
        {"id": "1", "url": "https://cdn/1.png"},
        {"id": "2", "url": "https://cdn/2.png"},
        {"id": "3", "url": "https://cdn/3.png"}
    ]"#;

    fn config() -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_millis(1),
            max_poll_retries: 2,
            max_polls: Some(20),
        }
    }

    fn session(transport: Arc<dyn Transport>, store: Arc<MemoryStore>) -> TrackingSession {
        let registry = RegistryWriter::spawn(FlightRegistry::new(store));
        let fetcher = TileFetcher::new(Arc::clone(&transport), 2);
        TrackingSession::new(transport, fetcher, registry, config())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TrackEvent>) -> Vec<TrackEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn progress_values(events: &[TrackEvent]) -> Vec<f64> {
        events
            .iter()
            .filter_map(|e| match e {
                TrackEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_full_flow_with_partial_tile_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .respond("/fetch/abc123", 503, r#"{"progress":0.4}"#)
            .respond("/fetch/abc123", 200, TILES)
            .respond("https://cdn/0.png", 200, b"a".to_vec())
            .respond("https://cdn/1.png", 200, b"b".to_vec())
            .respond("https://cdn/2.png", 500, "")
            .respond("https://cdn/3.png", 200, b"d".to_vec());
        let store = Arc::new(MemoryStore::new());
        let (context, mut rx) = CompletionContext::channel();

        let report = session(transport.clone(), store.clone())
            .track(&FlightId::new("abc123"), &context, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.images.len(), 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].index, 2);
        assert_eq!(report.failed[0].error, FetchError::Status(500));
        assert!(report.is_partial());
        assert_eq!(store.writes(), 1);

        let events = drain(&mut rx);
        let values = progress_values(&events);
        assert!((values[0] - 0.2).abs() < 1e-12);
        assert!((values.last().copied().unwrap() - 1.0).abs() < f64::EPSILON);
        assert!(values.windows(2).all(|w| w[0] <= w[1]));

        let states: Vec<TrackState> = events
            .iter()
            .filter_map(|e| match e {
                TrackEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                TrackState::Polling,
                TrackState::MetadataReady,
                TrackState::ImagesDownloading,
                TrackState::Complete
            ]
        );
        assert!(events.contains(&TrackEvent::Completed {
            id: FlightId::new("abc123"),
            failed_tiles: 1
        }));
    }

    #[tokio::test]
    async fn test_incomplete_payload_keeps_polling() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .respond("/fetch/abc123", 200, r#"{"progress":0.99,"tiles":[]}"#)
            .respond("/fetch/abc123", 200, r#"{"progress":1.0,"tiles":[]}"#);
        let store = Arc::new(MemoryStore::new());

        let report = session(transport.clone(), store.clone())
            .track(&FlightId::new("abc123"), &CompletionContext::detached(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.images.is_empty());
        assert_eq!(transport.request_count("/fetch/abc123"), 2);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_invalid_id_fails_without_registering() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("/fetch/nope", 403, "");
        let store = Arc::new(MemoryStore::new());
        let (context, mut rx) = CompletionContext::channel();

        let err = session(transport, store.clone())
            .track(&FlightId::new("nope"), &context, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Job(JobFailure::InvalidId)));
        assert_eq!(store.writes(), 0);
        let events = drain(&mut rx);
        assert!(events.contains(&TrackEvent::StateChanged(TrackState::Failed)));
        assert!(events.contains(&TrackEvent::Failed("Error with flight ID.".to_string())));
    }

    #[tokio::test]
    async fn test_connectivity_failures_are_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .fail("/fetch/abc123", TransportError::Timeout)
            .fail("/fetch/abc123", TransportError::Timeout)
            .respond("/fetch/abc123", 200, "[]");
        let store = Arc::new(MemoryStore::new());

        session(transport.clone(), store.clone())
            .track(&FlightId::new("abc123"), &CompletionContext::detached(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transport.request_count("/fetch/abc123"), 3);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail("/fetch/abc123", TransportError::Timeout);
        let store = Arc::new(MemoryStore::new());

        let err = session(transport.clone(), store)
            .track(&FlightId::new("abc123"), &CompletionContext::detached(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Job(JobFailure::Connectivity(TransportError::Timeout))));
        assert_eq!(transport.request_count("/fetch/abc123"), 3);
    }

    #[tokio::test]
    async fn test_poll_limit() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("/fetch/abc123", 503, r#"{"progress":0.1}"#);
        let store = Arc::new(MemoryStore::new());

        let err = session(transport.clone(), store)
            .track(&FlightId::new("abc123"), &CompletionContext::detached(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PollLimit(20)));
        assert_eq!(transport.request_count("/fetch/abc123"), 20);
    }

    #[tokio::test]
    async fn test_refetch_endpoint() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("/refetch/abc123", 200, r#"{"tiles":[]}"#);
        let store = Arc::new(MemoryStore::new());

        session(transport.clone(), store)
            .track_from(
                PollEndpoint::Refetch,
                &FlightId::new("abc123"),
                &CompletionContext::detached(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(transport.request_count("/refetch/abc123"), 1);
        assert_eq!(transport.request_count("/fetch/abc123"), 0);
    }

    #[tokio::test]
    async fn test_payload_without_tiles_never_registers() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("/fetch/abc123", 200, r#"{"error":"db locked"}"#);
        let store = Arc::new(MemoryStore::new());

        let err = session(transport, store.clone())
            .track(&FlightId::new("abc123"), &CompletionContext::detached(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Job(JobFailure::Parse)));
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_progress_above_one_completes() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("/fetch/abc123", 200, r#"{"progress":1.5,"tiles":[]}"#);
        let store = Arc::new(MemoryStore::new());

        session(transport.clone(), store.clone())
            .track(&FlightId::new("abc123"), &CompletionContext::detached(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transport.request_count("/fetch/abc123"), 1);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_while_polling_never_registers() {
        let transport: Arc<dyn Transport> = {
            let scripted = ScriptedTransport::new();
            scripted.respond("/fetch/abc123", 503, r#"{"progress":0.3}"#);
            Arc::new(scripted)
        };
        let store = Arc::new(MemoryStore::new());
        let registry = RegistryWriter::spawn(FlightRegistry::new(store.clone()));
        let fetcher = TileFetcher::new(Arc::clone(&transport), 2);
        let session = TrackingSession::new(
            transport,
            fetcher,
            registry,
            SessionConfig {
                max_polls: None,
                ..config()
            },
        );
        let (context, mut rx) = CompletionContext::channel();
        let cancel = CancellationToken::new();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                session
                    .track(&FlightId::new("abc123"), &context, &cancel)
                    .await
            })
        };

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let progressed = matches!(event, TrackEvent::Progress(_));
            events.push(event);
            if progressed {
                break;
            }
        }
        cancel.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(store.writes(), 0);

        events.extend(drain(&mut rx));
        assert!(events.contains(&TrackEvent::StateChanged(TrackState::Failed)));
        assert!(!events.contains(&TrackEvent::StateChanged(TrackState::MetadataReady)));
    }

    /// Serves the tile list, then holds every image request until cancelled.
    #[derive(Debug)]
    struct StallingTransport;

    #[async_trait]
    impl Transport for StallingTransport {
        async fn request(
            &self,
            request: Request,
            cancel: &CancellationToken,
        ) -> Result<Response, TransportError> {
            if request.target.starts_with("/fetch/") {
                return Ok(Response::new(200, TILES));
            }
            cancel.cancelled().await;
            Err(TransportError::Cancelled)
        }
    }

    #[tokio::test]
    async fn test_cancelled_download_never_registers() {
        let store = Arc::new(MemoryStore::new());
        let session = session(Arc::new(StallingTransport), store.clone());
        let (context, mut rx) = CompletionContext::channel();
        let cancel = CancellationToken::new();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                session
                    .track(&FlightId::new("abc123"), &context, &cancel)
                    .await
            })
        };

        while let Some(event) = rx.recv().await {
            if event == TrackEvent::StateChanged(TrackState::ImagesDownloading) {
                break;
            }
        }
        cancel.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(store.writes(), 0);
    }
}
