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

//! Flight registration (`POST /register`).

use log::{info, warn};
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::flight::{FlightId, FlightRequest};
use crate::transport::{Request, Transport, TransportError};

/// Shown when no server message is available.
pub const CONNECTION_MESSAGE: &str = "Please check your connection and try again.";

/// Why a flight could not be registered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistrationError {
    /// 400 with a server-provided explanation.
    #[error("{message}")]
    Rejected { message: String },

    /// 400 whose body was not the expected JSON.
    #[error("parse error")]
    Parse,

    /// Any other status code.
    #[error("Error: {status}")]
    Status { status: u16 },

    #[error("connection")]
    Connection(TransportError),
}

impl RegistrationError {
    /// Short machine-facing message (`"bad date"`, `"Error: 500"`, `"connection"`).
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Message suitable for showing to a user: the server's text when one was
    /// sent, otherwise the generic connectivity hint.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected { message } => message.clone(),
            Self::Status { status } => format!("Error: {status}"),
            Self::Parse | Self::Connection(_) => CONNECTION_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServerMessage {
    string: String,
}

/// Register a flight and return the server-issued identifier.
///
/// The request is assumed valid; exactly one request is sent.
pub async fn create_flight(
    transport: &dyn Transport,
    request: &FlightRequest,
    cancel: &CancellationToken,
) -> Result<FlightId, RegistrationError> {
    let response = transport
        .request(Request::post_form("/register", request.to_form_body()), cancel)
        .await
        .map_err(|e| {
            warn!("Register {} failed: {}", request.flight_number(), e);
            RegistrationError::Connection(e)
        })?;

    match response.status {
        200 => {
            let text = response.text();
            let id = text.trim();
            if id.is_empty() {
                warn!("Register {} returned an empty identifier", request.flight_number());
                return Err(RegistrationError::Parse);
            }
            let id = FlightId::new(id);
            info!("Registered {} as {}", request.flight_number(), id);
            Ok(id)
        }
        400 => {
            let message = serde_json::from_slice::<ServerMessage>(&response.body)
                .map_err(|e| {
                    warn!("Unreadable 400 body from register: {}", e);
                    RegistrationError::Parse
                })?
                .string;
            Err(RegistrationError::Rejected { message })
        }
        status => Err(RegistrationError::Status { status }),
    }
}
