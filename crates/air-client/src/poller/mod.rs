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

//! Job progress protocol.
//!
//! Each call here is a single, stateless poll of the server-side job for one
//! flight. Repeating the poll (and how often) is up to the caller; see
//! [`crate::session`] for the default driver.
//!
//! | Status | Meaning                                   |
//! |--------|-------------------------------------------|
//! | 200    | payload ready ([`JobStatus::Ready`])       |
//! | 503    | still computing, body `{"progress": f}`   |
//! | 403    | unknown flight id                         |

mod payload;

pub use payload::{is_complete, FlightData, TileRef};

use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::flight::FlightId;
use crate::transport::{Request, Response, Transport, TransportError};

/// Why a poll did not produce a usable status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobFailure {
    #[error("invalid id")]
    InvalidId,

    #[error("parse error")]
    Parse,

    #[error("{0} error")]
    Status(u16),

    #[error("connection: {0}")]
    Connectivity(TransportError),
}

impl JobFailure {
    /// Connectivity problems are worth retrying; everything else is final.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connectivity(TransportError::Timeout | TransportError::Connect(_) | TransportError::Other(_))
        )
    }
}

/// Outcome of a single poll.
///
/// 503-with-progress is a legitimate pending state, not a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending(f64),
    Ready(FlightData),
    Failed(JobFailure),
}

/// Why a reload request was refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReloadError {
    #[error("Bad request: id is not valid.")]
    InvalidId,

    #[error("Error {status}")]
    Status { status: u16 },

    #[error("connection: {0}")]
    Connection(TransportError),
}

#[derive(Debug, Deserialize)]
struct ProgressBody {
    progress: f64,
}

/// Poll `GET /fetch/{id}`.
pub async fn fetch(transport: &dyn Transport, id: &FlightId, cancel: &CancellationToken) -> JobStatus {
    poll(transport, format!("/fetch/{id}"), cancel).await
}

/// Poll `GET /refetch/{id}` after a reload was requested.
pub async fn refetch(transport: &dyn Transport, id: &FlightId, cancel: &CancellationToken) -> JobStatus {
    poll(transport, format!("/refetch/{id}"), cancel).await
}

/// Ask the server to recompute the data for a flight (`GET /reload/{id}`).
pub async fn request_reload(
    transport: &dyn Transport,
    id: &FlightId,
    cancel: &CancellationToken,
) -> Result<(), ReloadError> {
    let response = transport
        .request(Request::get(format!("/reload/{id}")), cancel)
        .await
        .map_err(ReloadError::Connection)?;

    match response.status {
        202 => Ok(()),
        403 => Err(ReloadError::InvalidId),
        status => Err(ReloadError::Status { status }),
    }
}

async fn poll(transport: &dyn Transport, target: String, cancel: &CancellationToken) -> JobStatus {
    match transport.request(Request::get(target.as_str()), cancel).await {
        Ok(response) => interpret(&target, &response),
        Err(e) => {
            debug!("Poll {} failed: {}", target, e);
            JobStatus::Failed(JobFailure::Connectivity(e))
        }
    }
}

/// Map a poll response onto a [`JobStatus`].
#[must_use]
pub fn interpret(target: &str, response: &Response) -> JobStatus {
    match response.status {
        200 => match FlightData::from_json(&response.body) {
            Ok(data) => JobStatus::Ready(data),
            Err(e) => {
                warn!("Malformed payload from {}: {}", target, e);
                JobStatus::Failed(JobFailure::Parse)
            }
        },
        503 => match serde_json::from_slice::<ProgressBody>(&response.body) {
            Ok(body) if body.progress.is_finite() => JobStatus::Pending(body.progress.clamp(0.0, 1.0)),
            Ok(_) => JobStatus::Failed(JobFailure::Parse),
            Err(e) => {
                warn!("Malformed progress from {}: {}", target, e);
                JobStatus::Failed(JobFailure::Parse)
            }
        },
        403 => JobStatus::Failed(JobFailure::InvalidId),
        status => JobStatus::Failed(JobFailure::Status(status)),
    }
}
