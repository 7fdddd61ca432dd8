// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns decoded events into records, routes them to their bundler and
//! delivers closed bundles to the backends.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::bundler::BatchHandler;
use crate::config::Config;
use crate::constants::{
    KIND_FIELD, KIND_LOG, KIND_SPAN, LEVEL_FIELD, MESSAGE_FIELD, METRIC_SET_ID_FIELD,
    METRIC_VALUES_FIELD, MR_ID_FIELD, PROPERTIES_FIELD, SPAN_DURATION_FIELD, SPAN_FINISH_FIELD,
    SPAN_ID_FIELD, SPAN_NAME_FIELD, SPAN_PARENT_FIELD, SPAN_START_FIELD, TRACE_ID_FIELD,
};
use crate::errors::{DispatchError, SinkError};
use crate::flatten::flatten;
use crate::http::build_client;
use crate::record::{LogEntry, LogLevel, MetricKind, MetricRecord, Record, Span};
use crate::registry::{BundlerKey, BundlerRegistry, HandlerFactory, Kind};
use crate::sink::{DeliveryOutcome, InvalidEntity, SinkClient};
use crate::value::{Event, Fields, Value};

/// Delivers closed bundles for one destination and kind.
///
/// Transient failures are retried once after `retry_backoff`; anything the
/// backend rejects explicitly is logged and dropped.
pub struct SinkHandler {
    key: BundlerKey,
    client: SinkClient,
    retry_backoff: Duration,
}

impl SinkHandler {
    #[must_use]
    pub fn new(key: BundlerKey, client: SinkClient, retry_backoff: Duration) -> Self {
        SinkHandler {
            key,
            client,
            retry_backoff,
        }
    }

    fn log_invalid_entities(&self, batch: &[Record], invalid: &[InvalidEntity]) {
        for entity in invalid {
            let Some(record) = batch.get(entity.position) else {
                continue;
            };
            error!(
                "SEMAAS | Item {} for {} has error {:?}: {}",
                entity.position,
                self.key,
                entity.messages(),
                serde_json::to_string(record).unwrap_or_default()
            );
        }
    }
}

#[async_trait]
impl BatchHandler<Record> for SinkHandler {
    async fn handle(&self, batch: Vec<Record>) {
        let mut retried = false;
        loop {
            match self.client.send(&batch).await {
                DeliveryOutcome::Success => {
                    debug!("SEMAAS | Delivered {} records to {}", batch.len(), self.key);
                }
                DeliveryOutcome::PartialFailure { error, invalid } => {
                    error!(
                        "SEMAAS | Error loading {} records to {}: {error}",
                        batch.len(),
                        self.key
                    );
                    self.log_invalid_entities(&batch, &invalid);
                }
                DeliveryOutcome::WholeBatchFailure(error) => {
                    error!(
                        "SEMAAS | Error loading {} records to {}: {error}",
                        batch.len(),
                        self.key
                    );
                }
                DeliveryOutcome::TransientFailure(cause) if !retried => {
                    warn!(
                        "SEMAAS | Error loading records to {}: {cause}. Retrying in {:?}",
                        self.key, self.retry_backoff
                    );
                    retried = true;
                    tokio::time::sleep(self.retry_backoff).await;
                    continue;
                }
                DeliveryOutcome::TransientFailure(cause) => {
                    error!(
                        "SEMAAS | Error loading records to {} after retry: {cause}. Dropping {} records",
                        self.key,
                        batch.len()
                    );
                }
            }
            return;
        }
    }
}

/// Builds a [`SinkHandler`] against the backend URL configured for each
/// kind.
pub struct SinkFactory {
    config: Arc<Config>,
}

impl SinkFactory {
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        SinkFactory { config }
    }

    fn base_url(&self, kind: &Kind) -> Result<&str, SinkError> {
        let (url, name) = match kind {
            Kind::Logs => (&self.config.omega_url, "logs"),
            Kind::Spans => (&self.config.rho_url, "spans"),
            Kind::Metrics(_) => (&self.config.mu_url, "metrics"),
        };
        url.as_deref()
            .filter(|url| !url.is_empty())
            .ok_or(SinkError::MissingUrl(name))
    }
}

impl HandlerFactory<Record> for SinkFactory {
    fn build(&self, key: &BundlerKey) -> Result<Arc<dyn BatchHandler<Record>>, SinkError> {
        let base_url = self.base_url(&key.kind)?;
        let client = SinkClient::new(
            build_client(&self.config)?,
            base_url,
            &key.destination,
            &key.kind,
            self.config.api_key.clone(),
        )?;
        Ok(Arc::new(SinkHandler::new(
            key.clone(),
            client,
            self.config.retry_backoff(),
        )))
    }
}

/// Entry point for producers.
pub struct DispatchClient {
    config: Arc<Config>,
    registry: BundlerRegistry<Record>,
}

impl DispatchClient {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let factory = Arc::new(SinkFactory::new(config.clone()));
        Self::with_factory(config, factory)
    }

    #[must_use]
    pub fn with_factory(config: Arc<Config>, factory: Arc<dyn HandlerFactory<Record>>) -> Self {
        let registry = BundlerRegistry::new(factory, config.bundler_options());
        DispatchClient { config, registry }
    }

    /// Adds `record` to the bundler for `(destination, kind)`, waiting while
    /// the bundler's buffered byte limit is saturated.
    pub async fn enqueue(
        &self,
        destination: &str,
        kind: Kind,
        record: Record,
        size: usize,
    ) -> Result<(), DispatchError> {
        let Some(bundler) = self.registry.get_or_create(destination, kind.clone()).await else {
            return Err(DispatchError::NoBundler {
                destination: destination.to_string(),
                kind: kind.to_string(),
            });
        };
        bundler.add(record, size).await?;
        Ok(())
    }

    /// Extracts a record from each event and enqueues it. Returns the number
    /// of records accepted.
    pub async fn publish(&self, events: &[Event]) -> usize {
        let mut accepted = 0;
        for event in events {
            let Some(namespace) = self.namespace(event) else {
                debug!("SEMAAS | Skipping event without namespace");
                continue;
            };
            let Some((kind, record)) = self.extract(event) else {
                continue;
            };
            let size = record.size_hint();
            match self.enqueue(&namespace, kind, record, size).await {
                Ok(()) => accepted += 1,
                Err(e) => error!("SEMAAS | Error enqueueing record: {e}"),
            }
        }
        accepted
    }

    /// Flushes every bundler and waits for in-flight deliveries.
    pub async fn close(&self) {
        info!("SEMAAS | Flushing pending records");
        self.registry.close_all().await;
        info!("SEMAAS | All records flushed");
    }

    fn namespace(&self, event: &Event) -> Option<String> {
        self.config
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .or_else(|| non_empty(event, &self.config.namespace_field))
            .map(str::to_string)
    }

    fn fallback_mr_id<'a>(&'a self, event: &'a Event) -> &'a str {
        self.config
            .mr_id
            .as_deref()
            .filter(|mr_id| !mr_id.is_empty())
            .or_else(|| non_empty(event, &self.config.mr_id_field))
            .unwrap_or_default()
    }

    fn extract(&self, event: &Event) -> Option<(Kind, Record)> {
        let kind = event.get_str(KIND_FIELD).unwrap_or(KIND_LOG);
        match kind {
            KIND_LOG => self
                .extract_log(event)
                .map(|log| (Kind::Logs, Record::Log(log))),
            KIND_SPAN => Some((Kind::Spans, Record::Span(self.extract_span(event)))),
            _ => match MetricKind::from_discriminator(kind) {
                Some(metric_kind) => self
                    .extract_metric(event, metric_kind)
                    .map(|metric| (Kind::Metrics(metric.metric_set_id.clone()), Record::Metric(metric))),
                None => {
                    debug!("SEMAAS | Skipping event of unknown kind '{kind}'");
                    None
                }
            },
        }
    }

    fn extract_log(&self, event: &Event) -> Option<LogEntry> {
        let Some(message) = non_empty(event, MESSAGE_FIELD) else {
            debug!("SEMAAS | Skipping log with an empty message");
            return None;
        };
        Some(LogEntry {
            mr_id: self.mr_id(event),
            span_id: non_empty(event, SPAN_ID_FIELD).map(str::to_string),
            trace_id: non_empty(event, TRACE_ID_FIELD).map(str::to_string),
            creation_date: event.timestamp,
            level: event
                .get_str(LEVEL_FIELD)
                .map(LogLevel::from_name)
                .unwrap_or_default(),
            message: message.to_string(),
            properties: self.properties(event, false),
        })
    }

    fn extract_span(&self, event: &Event) -> Span {
        Span {
            mr_id: self.mr_id(event),
            name: non_empty(event, SPAN_NAME_FIELD)
                .unwrap_or_default()
                .to_string(),
            span_id: non_empty(event, SPAN_ID_FIELD).map(str::to_string),
            trace_id: non_empty(event, TRACE_ID_FIELD).map(str::to_string),
            parent_span: non_empty(event, SPAN_PARENT_FIELD).map(str::to_string),
            start_date: event.get_field(SPAN_START_FIELD).and_then(Value::as_timestamp),
            finish_date: event.get_field(SPAN_FINISH_FIELD).and_then(Value::as_timestamp),
            duration: event.get_field(SPAN_DURATION_FIELD).and_then(Value::as_i64),
            properties: self.properties(event, false),
        }
        .with_derived_duration()
    }

    fn extract_metric(&self, event: &Event, kind: MetricKind) -> Option<MetricRecord> {
        let Some(metric_set_id) = non_empty(event, METRIC_SET_ID_FIELD) else {
            warn!("SEMAAS | Dropping {} measurement without metric set id", kind.discriminator());
            return None;
        };
        let values: BTreeMap<String, serde_json::Number> = match event.get_field(METRIC_VALUES_FIELD) {
            None => BTreeMap::new(),
            Some(Value::Map(values)) => values
                .iter()
                .filter_map(|(name, value)| Some((name.clone(), value.as_number()?)))
                .collect(),
            Some(_) => {
                debug!("SEMAAS | Skipping measurement for {metric_set_id} with malformed values");
                return None;
            }
        };
        Some(MetricRecord {
            metric_set_id: metric_set_id.to_string(),
            kind,
            timestamp: event.timestamp,
            values,
            properties: self.properties(event, kind == MetricKind::Core),
        })
    }

    fn mr_id(&self, event: &Event) -> String {
        non_empty(event, MR_ID_FIELD)
            .unwrap_or_else(|| self.fallback_mr_id(event))
            .to_string()
    }

    /// Record properties plus the entries of every configured additional
    /// property field holding a map, flattened to valid keys. Core metrics
    /// take string leaves only from the additional fields.
    fn properties(&self, event: &Event, strings_only: bool) -> Fields {
        let mut properties = Fields::new();
        let bags = std::iter::once((PROPERTIES_FIELD, false)).chain(
            self.config
                .additional_property_fields
                .iter()
                .map(|field| (field.as_str(), strings_only)),
        );
        for (field, strings_only) in bags {
            let Some(bag) = event.get_field(field).and_then(Value::as_map) else {
                continue;
            };
            for (key, value) in bag {
                for (path, leaf) in flatten(key, value) {
                    if strings_only && !matches!(leaf, Value::String(_)) {
                        continue;
                    }
                    properties.insert(path, leaf);
                }
            }
        }
        properties
    }
}

fn non_empty<'a>(event: &'a Event, path: &str) -> Option<&'a str> {
    event.get_str(path).filter(|s| !s.is_empty())
}
