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

//! Flight requests and identifiers.
//!
//! A [`FlightRequest`] is validated before anything touches the network and
//! serialized into the form body expected by the register endpoint.

use std::fmt;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Date format used on the wire (`yyyy-MM-dd`).
pub const DATE_FORMAT: &str = "%Y-%m-%d";

lazy_static! {
    // Airline designator, 1-4 digit flight number, optional suffix letter.
    static ref FLIGHT_NUMBER: Regex = Regex::new(r"^[A-Z]{2,3}[0-9]{1,4}[A-Za-z]?$")
        .expect("flight number pattern is valid");
}

/// Errors raised before any request is made.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid flight number: '{0}'")]
    FlightNumber(String),

    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    Date(String),
}

/// Check a flight number such as `BA123` or `BAW1234A`.
#[must_use]
pub fn is_valid_flight_number(flight_number: &str) -> bool {
    FLIGHT_NUMBER.is_match(flight_number)
}

/// A flight to register with the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightRequest {
    flight_number: String,
    date: NaiveDate,
}

impl FlightRequest {
    /// Build a request, rejecting malformed flight numbers.
    pub fn new(flight_number: impl Into<String>, date: NaiveDate) -> Result<Self, ValidationError> {
        let flight_number = flight_number.into();
        if !is_valid_flight_number(&flight_number) {
            return Err(ValidationError::FlightNumber(flight_number));
        }
        Ok(Self { flight_number, date })
    }

    /// Build a request from a `YYYY-MM-DD` date string.
    pub fn parse(flight_number: impl Into<String>, date: &str) -> Result<Self, ValidationError> {
        let date = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT)
            .map_err(|_err| ValidationError::Date(date.to_string()))?;
        Self::new(flight_number, date)
    }

    #[must_use]
    pub fn flight_number(&self) -> &str {
        &self.flight_number
    }

    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Form-encoded body for `POST /register`.
    ///
    /// Validated flight numbers only contain ASCII alphanumerics, so no
    /// percent-encoding is needed.
    #[must_use]
    pub fn to_form_body(&self) -> String {
        format!(
            "date={}&flightNumber={}",
            self.date.format(DATE_FORMAT),
            self.flight_number
        )
    }
}

/// Opaque server-issued identifier of a tracked flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlightId(String);

impl FlightId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlightId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for FlightId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for FlightId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flight_number_accepted() {
        assert!(is_valid_flight_number("BA123"));
        assert!(is_valid_flight_number("BA1234A"));
        assert!(is_valid_flight_number("BAW1"));
        assert!(is_valid_flight_number("EZY8512b"));
    }

    #[test]
    fn test_flight_number_rejected() {
        assert!(!is_valid_flight_number("ba123"));
        assert!(!is_valid_flight_number("BA12345"));
        assert!(!is_valid_flight_number(""));
        assert!(!is_valid_flight_number("BA"));
        assert!(!is_valid_flight_number(" BA123"));
        assert!(!is_valid_flight_number("BA123AB"));
    }

    #[test]
    fn test_form_body() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let request = FlightRequest::new("BA123", date).unwrap();
        assert_eq!(request.to_form_body(), "date=2024-01-15&flightNumber=BA123");
    }

    #[test]
    fn test_request_rejects_bad_input() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(
            FlightRequest::new("ba123", date),
            Err(ValidationError::FlightNumber("ba123".to_string()))
        );
        assert_eq!(
            FlightRequest::parse("BA123", "15/01/2024"),
            Err(ValidationError::Date("15/01/2024".to_string()))
        );
    }

    #[test]
    fn test_parse_date() {
        let request = FlightRequest::parse("BA123", "2024-01-15").unwrap();
        assert_eq!(request.date(), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(request.flight_number(), "BA123");
    }
}
