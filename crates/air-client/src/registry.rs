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

//! Local registry of flights the user has created.
//!
//! The registry is an ordered list of [`FlightId`]s stored under one fixed key
//! of an injected [`KeyValueStore`]. Appends are a read-modify-write and are
//! not atomic, so all writes go through a single [`RegistryWriter`] task.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::flight::FlightId;

/// Key holding the list of registered flight identifiers.
pub const FLIGHT_PATHS_KEY: &str = "flightPaths";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not determine data directory")]
    NoDataDir,

    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("store encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("registry writer has shut down")]
    Closed,

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Persistent string-list slots addressed by key.
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Values under `key`, or `None` if the slot was never written.
    fn load(&self, key: &str) -> Result<Option<Vec<String>>, StoreError>;

    /// Replace the values under `key`.
    fn store(&self, key: &str, values: &[String]) -> Result<(), StoreError>;
}

/// In-process store, mainly for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, Vec<String>>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `store` calls so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<String>>, StoreError> {
        let slots = self.slots.lock().map_err(|_poisoned| StoreError::Poisoned)?;
        Ok(slots.get(key).cloned())
    }

    fn store(&self, key: &str, values: &[String]) -> Result<(), StoreError> {
        let mut slots = self.slots.lock().map_err(|_poisoned| StoreError::Poisoned)?;
        slots.insert(key.to_string(), values.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// All slots in one JSON object file, rewritten atomically on every store.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `store.json` under the platform data directory.
    pub fn default_location() -> Result<Self, StoreError> {
        let dir = dirs::data_dir().ok_or(StoreError::NoDataDir)?.join("air");
        Ok(Self::new(dir.join("store.json")))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, Vec<String>>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Option<Vec<String>>, StoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn store(&self, key: &str, values: &[String]) -> Result<(), StoreError> {
        let mut slots = self.read_all()?;
        slots.insert(key.to_string(), values.to_vec());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&slots)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Ordered list of registered flights.
#[derive(Debug, Clone)]
pub struct FlightRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl FlightRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Add `id` at the end of the list.
    ///
    /// Returns `false` without writing if `id` is already registered.
    pub fn append(&self, id: &FlightId) -> Result<bool, StoreError> {
        let mut ids = self.store.load(FLIGHT_PATHS_KEY)?.unwrap_or_default();
        if ids.iter().any(|existing| existing == id.as_str()) {
            debug!("Flight {} already registered", id);
            return Ok(false);
        }
        ids.push(id.as_str().to_string());
        self.store.store(FLIGHT_PATHS_KEY, &ids)?;
        info!("Registered flight {} ({} total)", id, ids.len());
        Ok(true)
    }

    /// Every registered flight, oldest first. Empty if nothing was written.
    pub fn list_all(&self) -> Result<Vec<FlightId>, StoreError> {
        Ok(self
            .store
            .load(FLIGHT_PATHS_KEY)?
            .unwrap_or_default()
            .into_iter()
            .map(FlightId::from)
            .collect())
    }
}

enum Command {
    Append {
        id: FlightId,
        reply: oneshot::Sender<Result<bool, StoreError>>,
    },
    List {
        reply: oneshot::Sender<Result<Vec<FlightId>, StoreError>>,
    },
}

/// Handle to the task that owns the registry.
///
/// Commands are applied one at a time in arrival order, which keeps the
/// registry single-writer no matter how many sessions complete at once.
/// Store I/O runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct RegistryWriter {
    tx: mpsc::Sender<Command>,
}

impl RegistryWriter {
    /// Spawn the owning task. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(registry: FlightRegistry) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(32);

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Append { id, reply } => {
                        let registry = registry.clone();
                        let _ = reply.send(run_blocking(move || registry.append(&id)).await);
                    }
                    Command::List { reply } => {
                        let registry = registry.clone();
                        let _ = reply.send(run_blocking(move || registry.list_all()).await);
                    }
                }
            }
            debug!("Registry writer stopped");
        });

        Self { tx }
    }

    pub async fn append(&self, id: FlightId) -> Result<bool, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Append { id, reply })
            .await
            .map_err(|_closed| StoreError::Closed)?;
        rx.await.map_err(|_closed| StoreError::Closed)?
    }

    pub async fn list_all(&self) -> Result<Vec<FlightId>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::List { reply })
            .await
            .map_err(|_closed| StoreError::Closed)?;
        rx.await.map_err(|_closed| StoreError::Closed)?
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
