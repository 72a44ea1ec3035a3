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

//! Flight data payload returned by `fetch`/`refetch`.

use serde::{Deserialize, Deserializer, Serialize};

/// One tile image advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRef {
    #[serde(alias = "tileId", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "imageURL", alias = "imageUrl")]
    pub url: String,
}

impl TileRef {
    #[must_use]
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

/// Payload of a successful poll.
///
/// The descriptive fields are optional; `tiles` is required, so an object
/// without tile data is rejected as malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightData {
    /// Server-side progress embedded in the payload. Absent means done.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,

    pub tiles: Vec<TileRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    /// Flight path as `timestamp,latitude,longitude,altitude` CSV lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WirePayload {
    Tiles(Vec<TileRef>),
    Object(FlightData),
}

impl FlightData {
    /// Decode either a bare tile array or a flight data object.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match serde_json::from_slice::<WirePayload>(bytes)? {
            WirePayload::Tiles(tiles) => Self {
                progress: Some(1.0),
                tiles,
                ..Self::default()
            },
            WirePayload::Object(data) => data,
        })
    }

    /// Progress reported with the payload, treating a missing field as 1.0.
    #[must_use]
    pub fn server_progress(&self) -> f64 {
        self.progress.unwrap_or(1.0).clamp(0.0, 1.0)
    }

    /// Whether the metadata phase is over.
    ///
    /// The boundary is progress *equal to* 1.0, not "close to done": 0.999
    /// still means pending. Values above 1.0 are clamped, as on the 503 path.
    #[must_use]
    pub fn is_metadata_complete(&self) -> bool {
        is_complete(self.server_progress())
    }

    /// `"LHR to JFK"` style label, when both codes are known.
    #[must_use]
    pub fn route_label(&self) -> Option<String> {
        match (&self.origin_code, &self.destination_code) {
            (Some(from), Some(to)) => Some(format!("{from} to {to}")),
            _ => None,
        }
    }
}

/// Exact-completion test for a progress fraction.
#[must_use]
pub fn is_complete(progress: f64) -> bool {
    (progress - 1.0).abs() <= f64::EPSILON
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}
