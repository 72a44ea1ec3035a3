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

//! HTTP transport layer.
//!
//! Issues requests against the flight-data API and hands back the raw status
//! code and body. HTTP-level failures (4xx/5xx) are *not* errors here; only
//! connectivity problems (DNS, refused connection, timeout, TLS) and
//! cancellation produce a [`TransportError`]. Callers own the retry policy.

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Default API root of the flight-data server.
pub const DEFAULT_BASE_URL: &str = "https://air.xsanda.me/api/v1";

/// Connectivity failures. HTTP status codes never end up here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("could not connect: {0}")]
    Connect(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

/// HTTP method subset used by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// A request to send.
///
/// `target` is either a path relative to the API root (`/fetch/abc`) or an
/// absolute `http(s)://` URL, which is used verbatim (tile images).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub target: String,
    /// URL-encoded form body, sent with `application/x-www-form-urlencoded`.
    pub form: Option<String>,
}

impl Request {
    #[must_use]
    pub fn get(target: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            target: target.into(),
            form: None,
        }
    }

    #[must_use]
    pub fn post_form(target: impl Into<String>, form: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            target: target.into(),
            form: Some(form.into()),
        }
    }
}

/// Status code and body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Something that can carry a [`Request`] to the server.
///
/// Implementations must not retry and must resolve promptly once `cancel`
/// fires.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn request(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError>;
}

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// API root, e.g. `https://air.xsanda.me/api/v1`.
    pub base_url: String,
    /// Total per-request timeout.
    pub request_timeout: Duration,
    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve a request target against the API root.
    #[must_use]
    pub fn resolve(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            format!("{}/{}", self.base_url, target.trim_start_matches('/'))
        }
    }

    async fn send(&self, request: Request) -> Result<Response, reqwest::Error> {
        let url = self.resolve(&request.target);
        debug!("{} {}", request.method, url);

        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        if let Some(form) = request.form {
            builder = builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(form);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        debug!("{} -> {} ({} bytes)", url, status, body.len());

        Ok(Response { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        tokio::select! {
            result = self.send(request) => result.map_err(TransportError::from),
            () = cancel.cancelled() => Err(TransportError::Cancelled),
        }
    }
}
