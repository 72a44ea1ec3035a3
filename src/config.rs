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

//! Application configuration management.
//!
//! Settings are stored as TOML through `confy`. Every field has a serde
//! default, so an old or hand-edited file with missing keys still loads.

use std::time::Duration;

use air_client::transport::DEFAULT_BASE_URL;
use air_client::{ClientConfig, SessionConfig, TransportConfig};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "air";
const CONFIG_NAME: &str = "config";

/// Environment variable that overrides the configured server URL.
pub const SERVER_URL_ENV: &str = "AIR_SERVER_URL";

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Configuration schema version
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// API base URL, including the `/api/v1` prefix
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Seconds between progress polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum simultaneous tile downloads
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Consecutive connectivity failures tolerated while polling
    #[serde(default = "default_max_poll_retries")]
    pub max_poll_retries: u32,

    /// Give up after this many polls (unbounded when unset)
    #[serde(default)]
    pub max_polls: Option<u32>,

    /// Keep flight payloads and tile images in the local cache
    #[serde(default = "default_true")]
    pub cache_tiles: bool,
}

fn default_config_version() -> u32 {
    1
}

fn default_server_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_downloads() -> usize {
    air_client::tiles::DEFAULT_MAX_CONCURRENT
}

fn default_max_poll_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            server_url: default_server_url(),
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            max_poll_retries: default_max_poll_retries(),
            max_polls: None,
            cache_tiles: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, writing defaults on first run
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, CONFIG_NAME)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    /// Server URL after applying the `AIR_SERVER_URL` override.
    #[must_use]
    pub fn resolve_server_url(&self) -> String {
        self.server_url_with(std::env::var(SERVER_URL_ENV).ok())
    }

    fn server_url_with(&self, env_override: Option<String>) -> String {
        env_override
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| self.server_url.clone())
    }

    /// Build the library configuration, talking to `server_url`.
    #[must_use]
    pub fn to_client_config(&self, server_url: String) -> ClientConfig {
        ClientConfig {
            transport: TransportConfig {
                base_url: server_url,
                request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
                ..Default::default()
            },
            session: SessionConfig {
                poll_interval: Duration::from_secs(self.poll_interval_secs),
                max_poll_retries: self.max_poll_retries,
                max_polls: self.max_polls,
            },
            max_concurrent_downloads: self.max_concurrent_downloads.max(1),
        }
    }
}
