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

use thiserror::Error;

use crate::flight::ValidationError;
use crate::poller::{JobFailure, ReloadError};
use crate::registration::{RegistrationError, CONNECTION_MESSAGE};
use crate::registry::StoreError;
use crate::transport::TransportError;

/// Errors surfaced by the high-level client operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("could not create flight: {0}")]
    Registration(#[from] RegistrationError),

    #[error("could not reload flight: {0}")]
    Reload(#[from] ReloadError),

    #[error("error getting data for this flight: {0}")]
    Job(JobFailure),

    #[error("flight data still not ready after {0} polls")]
    PollLimit(u32),

    #[error("tracking cancelled")]
    Cancelled,

    #[error("registry error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Message for a user-facing dialog.
    ///
    /// Prefers whatever the server said; connectivity problems fall back to
    /// the generic "check your connection" hint.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Registration(e) => e.user_message(),
            Self::Job(JobFailure::InvalidId) | Self::Reload(ReloadError::InvalidId) => {
                "Error with flight ID.".to_string()
            }
            Self::Job(JobFailure::Connectivity(_))
            | Self::Reload(ReloadError::Connection(_))
            | Self::Transport(_) => CONNECTION_MESSAGE.to_string(),
            Self::Validation(_) => "Please enter a valid flight number".to_string(),
            other => other.to_string(),
        }
    }
}
