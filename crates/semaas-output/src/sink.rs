// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bulk calls against the SEMAAS backends and classification of their
//! responses.
//!
//! | kind    | request                                                          |
//! |---------|------------------------------------------------------------------|
//! | logs    | `POST {omega}/v1/ns/{ns}/logs`, JSON array of log entries        |
//! | spans   | `POST {rho}/v1/ns/{ns}/spans`, JSON array of spans               |
//! | metrics | `POST {mu}/v0/ns/{ns}/metric-sets/{id}:addMeasurements`, `{"metrics": [...]}` |

use std::fmt;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::errors::SinkError;
use crate::record::Record;
use crate::registry::Kind;

/// Error body returned by the backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiError {
    pub code: i64,
    pub status: i64,
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {} (Code: {})", self.message, self.code)
    }
}

/// A batch item rejected by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvalidEntity {
    pub position: usize,
    pub error: Option<Vec<String>>,
    /// Older backends report `errors` instead of `error`.
    pub errors: Option<Vec<String>>,
}

impl InvalidEntity {
    #[must_use]
    pub fn messages(&self) -> &[String] {
        match (&self.errors, &self.error) {
            (Some(errors), _) if !errors.is_empty() => errors,
            (_, Some(error)) => error,
            _ => &[],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ErrorBody {
    #[serde(flatten)]
    error: ApiError,
    invalid_entities: Vec<InvalidEntity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    /// Some items were rejected. The batch is not resubmitted.
    PartialFailure {
        error: ApiError,
        invalid: Vec<InvalidEntity>,
    },
    /// The whole batch was rejected.
    WholeBatchFailure(ApiError),
    /// Network errors, unexpected statuses and unreadable error bodies.
    TransientFailure(String),
}

/// Classifies a backend response.
#[must_use]
pub fn classify(status: StatusCode, body: &[u8]) -> DeliveryOutcome {
    if status.is_success() {
        return DeliveryOutcome::Success;
    }
    if status.as_u16() < 400 {
        return DeliveryOutcome::TransientFailure(format!("Unexpected status code: {status}"));
    }

    let body: ErrorBody = match serde_json::from_slice(body) {
        Ok(body) => body,
        Err(e) => {
            return DeliveryOutcome::TransientFailure(format!(
                "Status code was {status}, couldn't parse body: {e}"
            ))
        }
    };
    if body.error.code == 0 {
        return DeliveryOutcome::TransientFailure(format!("Unexpected status code: {status}"));
    }
    if body.invalid_entities.is_empty() {
        DeliveryOutcome::WholeBatchFailure(body.error)
    } else {
        DeliveryOutcome::PartialFailure {
            error: body.error,
            invalid: body.invalid_entities,
        }
    }
}

#[derive(Serialize)]
struct Measurements<'a> {
    metrics: &'a [Record],
}

/// Client for one backend endpoint of one namespace.
#[derive(Debug, Clone)]
pub struct SinkClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    wrap_measurements: bool,
}

impl SinkClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        namespace: &str,
        kind: &Kind,
        api_key: Option<String>,
    ) -> Result<Self, SinkError> {
        if namespace.is_empty() {
            return Err(SinkError::MissingNamespace);
        }
        let base_url = base_url.trim_end_matches('/');
        let url = match kind {
            Kind::Logs => format!("{base_url}/v1/ns/{namespace}/logs"),
            Kind::Spans => format!("{base_url}/v1/ns/{namespace}/spans"),
            Kind::Metrics(metric_set_id) => {
                format!("{base_url}/v0/ns/{namespace}/metric-sets/{metric_set_id}:addMeasurements")
            }
        };
        Ok(SinkClient {
            http,
            url,
            api_key,
            wrap_measurements: matches!(kind, Kind::Metrics(_)),
        })
    }

    #[cfg(test)]
    fn url(&self) -> &str {
        &self.url
    }

    /// Sends the batch in a single request.
    pub async fn send(&self, records: &[Record]) -> DeliveryOutcome {
        let mut request = self.http.post(&self.url);
        request = if self.wrap_measurements {
            request.json(&Measurements { metrics: records })
        } else {
            request.json(records)
        };
        if let Some(api_key) = &self.api_key {
            request = request.header("Api-Key", api_key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return DeliveryOutcome::TransientFailure(e.to_string()),
        };
        let status = response.status();
        if status.is_success() {
            return DeliveryOutcome::Success;
        }
        match response.bytes().await {
            Ok(body) => classify(status, &body),
            Err(e) => DeliveryOutcome::TransientFailure(format!(
                "Status code was {status}, couldn't read body: {e}"
            )),
        }
    }
}
