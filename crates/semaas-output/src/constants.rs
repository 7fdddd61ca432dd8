// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event field names and bundling defaults.

use std::time::Duration;

pub const MESSAGE_FIELD: &str = "message";
pub const KIND_FIELD: &str = "semaas.kind";
pub const NAMESPACE_FIELD: &str = "semaas.namespace";
pub const MR_ID_FIELD: &str = "semaas.mrId";
pub const SPAN_ID_FIELD: &str = "semaas.spanId";
pub const TRACE_ID_FIELD: &str = "semaas.traceId";
pub const LEVEL_FIELD: &str = "semaas.log.level";
pub const PROPERTIES_FIELD: &str = "semaas.properties";

pub const SPAN_NAME_FIELD: &str = "semaas.span.name";
pub const SPAN_PARENT_FIELD: &str = "semaas.span.parentSpan";
pub const SPAN_DURATION_FIELD: &str = "semaas.span.duration";
pub const SPAN_START_FIELD: &str = "semaas.span.startDate";
pub const SPAN_FINISH_FIELD: &str = "semaas.span.finishDate";

pub const METRIC_VALUES_FIELD: &str = "semaas.metric.values";
pub const METRIC_SET_ID_FIELD: &str = "semaas.metric.metricSetId";

pub const KIND_LOG: &str = "log";
pub const KIND_SPAN: &str = "span";

/// Placeholder message written on span events, which carry none.
pub const SPAN_MESSAGE: &str = "-";

/// Maximum time an item waits in an open bundle.
pub const DEFAULT_DELAY_THRESHOLD: Duration = Duration::from_secs(10);

/// Items per bundle before it is handed off.
pub const DEFAULT_BUNDLE_COUNT_THRESHOLD: usize = 1_000;

/// Estimated bytes per bundle before it is handed off.
pub const DEFAULT_BUNDLE_BYTE_THRESHOLD: usize = 512 * 1_024;

/// Estimated bytes held across the open bundle and every in-flight one.
/// Producers wait once this is reached.
pub const DEFAULT_BUFFERED_BYTE_LIMIT: usize = 2 * 1_024 * 1_024;

/// Wait before the single retry of a batch that failed transiently.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
