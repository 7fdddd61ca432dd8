// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed records held by the bundlers and their wire representation.
//!
//! Timestamps travel as nanoseconds since the Unix epoch. Property bags are
//! already flattened when a record is built.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::value::Fields;

/// Severity of a log entry as understood by the log store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }

    /// Maps the level names used by syslog, Go and Rust loggers. Unknown
    /// names are reported as INFO.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }

    /// Maps a syslog severity (0 emergency .. 7 debug).
    #[must_use]
    pub fn from_severity(severity: i64) -> Self {
        match severity {
            0..=2 => LogLevel::Fatal,
            3 => LogLevel::Error,
            4 => LogLevel::Warning,
            7 => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" | "notice" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" | "err" => Ok(LogLevel::Error),
            "fatal" | "emerg" | "panic" | "crit" | "critical" | "alert" => Ok(LogLevel::Fatal),
            _ => Err(format!("unknown log level: {s}")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(LogLevel::from_name(&name))
    }
}

pub(crate) mod nanos {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::Serializer;

    pub(crate) fn to_nanos(ts: &DateTime<Utc>) -> i64 {
        ts.timestamp_nanos_opt().unwrap_or_default()
    }

    pub(crate) fn from_nanos(nanos: i64) -> DateTime<Utc> {
        Utc.timestamp_nanos(nanos)
    }

    pub(crate) fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(to_nanos(ts))
    }

    pub(crate) fn serialize_option<S: Serializer>(
        ts: &Option<DateTime<Utc>>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => s.serialize_some(&to_nanos(ts)),
            None => s.serialize_none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub mr_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(serialize_with = "nanos::serialize")]
    pub creation_date: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Fields::is_empty")]
    pub properties: Fields,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub mr_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span: Option<String>,
    #[serde(
        serialize_with = "nanos::serialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(
        serialize_with = "nanos::serialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub finish_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Fields::is_empty")]
    pub properties: Fields,
}

impl Span {
    /// Fills in the duration from the start and finish dates when it was not
    /// supplied.
    #[must_use]
    pub fn with_derived_duration(mut self) -> Self {
        if self.duration.unwrap_or_default() == 0 {
            if let (Some(start), Some(finish)) = (self.start_date, self.finish_date) {
                self.duration = (finish - start).num_nanoseconds().filter(|d| *d > 0);
            }
        }
        self
    }
}

/// Metric sets are either standard (`METRIC`) or core (`METRIC.CORE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricKind {
    #[default]
    Standard,
    Core,
}

impl MetricKind {
    /// Value of the `semaas.kind` field for this metric kind.
    #[must_use]
    pub fn discriminator(&self) -> &'static str {
        match self {
            MetricKind::Standard => "metricv1",
            MetricKind::Core => "metriccorev1",
        }
    }

    #[must_use]
    pub fn from_discriminator(kind: &str) -> Option<Self> {
        match kind {
            "metricv1" => Some(MetricKind::Standard),
            "metriccorev1" => Some(MetricKind::Core),
            _ => None,
        }
    }
}

/// One measurement for a metric set. The metric set id and kind are part
/// of the request path, not of the body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    #[serde(skip)]
    pub metric_set_id: String,
    #[serde(skip)]
    pub kind: MetricKind,
    #[serde(serialize_with = "nanos::serialize")]
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, serde_json::Number>,
    #[serde(skip_serializing_if = "Fields::is_empty")]
    pub properties: Fields,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Log(LogEntry),
    Span(Span),
    Metric(MetricRecord),
}

impl Record {
    /// Rough byte estimate used against the bundler thresholds. Never zero.
    #[must_use]
    pub fn size_hint(&self) -> usize {
        let size = match self {
            Record::Log(log) => log.message.len(),
            Record::Span(span) => span.name.len(),
            Record::Metric(metric) => metric.values.keys().map(|k| k.len() + 8).sum(),
        };
        size.max(1)
    }
}

impl From<LogEntry> for Record {
    fn from(value: LogEntry) -> Self {
        Record::Log(value)
    }
}

impl From<Span> for Record {
    fn from(value: Span) -> Self {
        Record::Span(value)
    }
}

impl From<MetricRecord> for Record {
    fn from(value: MetricRecord) -> Self {
        Record::Metric(value)
    }
}
