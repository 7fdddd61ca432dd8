// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decoder for the pipe-delimited SEMAAS envelope.
//!
//! Applications write one line per record:
//!
//! ```text
//! V2|LOG[.<level>]|{"mrId": "...", "message": "...", ...}
//! V2|SPAN|{"name": "...", "startDate": 1700000000000000000, ...}
//! V1|METRIC[.CORE]|{"metricSetId": "...", "metrics": {"cpu": 0.5}, ...}
//! ```
//!
//! Lines without a `V1|` or `V2|` prefix are not envelopes and are left
//! alone. A decoded line rewrites the event with the `semaas.*` fields read
//! by [`crate::dispatch::DispatchClient::publish`].

use serde::Deserialize;
use tracing::debug;

use crate::constants::{
    KIND_FIELD, KIND_LOG, KIND_SPAN, LEVEL_FIELD, MESSAGE_FIELD, METRIC_SET_ID_FIELD,
    METRIC_VALUES_FIELD, MR_ID_FIELD, NAMESPACE_FIELD, PROPERTIES_FIELD, SPAN_DURATION_FIELD,
    SPAN_FINISH_FIELD, SPAN_ID_FIELD, SPAN_MESSAGE, SPAN_NAME_FIELD, SPAN_PARENT_FIELD,
    SPAN_START_FIELD, TRACE_ID_FIELD,
};
use crate::errors::DecodeError;
use crate::flatten::flatten_into;
use crate::processors::Processor;
use crate::record::{nanos, LogLevel, MetricKind};
use crate::value::{Event, Fields, Value};

type JsonMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPayload {
    namespace: Option<String>,
    mr_id: Option<String>,
    span_id: Option<String>,
    trace_id: Option<String>,
    creation_date: Option<i64>,
    level: Option<String>,
    message: Option<String>,
    properties: Option<JsonMap>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanPayload {
    namespace: Option<String>,
    mr_id: Option<String>,
    name: Option<String>,
    span_id: Option<String>,
    trace_id: Option<String>,
    parent_span: Option<String>,
    start_date: Option<i64>,
    finish_date: Option<i64>,
    duration: Option<i64>,
    properties: Option<JsonMap>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPayload {
    namespace: Option<String>,
    metric_set_id: Option<String>,
    timestamp: Option<i64>,
    #[serde(rename = "metrics")]
    values: Option<JsonMap>,
    properties: Option<JsonMap>,
}

/// A successfully parsed envelope, not yet applied to an event.
#[derive(Debug)]
pub enum Envelope {
    Log {
        level: LogLevel,
        payload: Box<LogPayload>,
    },
    Span(Box<SpanPayload>),
    Metric {
        kind: MetricKind,
        payload: Box<MetricPayload>,
    },
}

/// Parses `line`. Returns `Ok(None)` when the line is not an envelope.
pub fn parse(line: &str) -> Result<Option<Envelope>, DecodeError> {
    let version = if line.starts_with("V2|") {
        "V2"
    } else if line.starts_with("V1|") {
        "V1"
    } else {
        return Ok(None);
    };

    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() < 3 {
        return Err(DecodeError::TooFewParts(parts.len()));
    }
    let kind = parts[1];
    let data = parts[2..].join("|");
    let (base, qualifier) = match kind.split_once('.') {
        Some((base, qualifier)) => (base, Some(qualifier)),
        None => (kind, None),
    };

    let envelope = match version {
        "V2" if base.starts_with("LOG") => {
            let payload: LogPayload = from_json("log entry", &data)?;
            let level = match payload.level.as_deref().filter(|l| !l.is_empty()) {
                Some(level) => LogLevel::from_name(level),
                None => qualifier.map(LogLevel::from_name).unwrap_or_default(),
            };
            Envelope::Log {
                level,
                payload: Box::new(payload),
            }
        }
        "V2" if base.starts_with("SPAN") => Envelope::Span(Box::new(from_json("span", &data)?)),
        "V1" if base.starts_with("METRIC") => {
            let kind = match qualifier {
                Some(q) if q.eq_ignore_ascii_case("CORE") => MetricKind::Core,
                _ => MetricKind::Standard,
            };
            Envelope::Metric {
                kind,
                payload: Box::new(from_json("metric", &data)?),
            }
        }
        _ => {
            return Err(DecodeError::UnknownKind {
                version,
                kind: kind.to_string(),
            })
        }
    };
    Ok(Some(envelope))
}

fn from_json<T: for<'de> Deserialize<'de>>(what: &'static str, data: &str) -> Result<T, DecodeError> {
    serde_json::from_str(data).map_err(|source| DecodeError::Payload { what, source })
}

fn put_non_empty(event: &mut Event, path: &str, value: Option<String>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        event.put_field(path, Value::String(value));
    }
}

fn put_properties(event: &mut Event, properties: Option<JsonMap>) {
    for (key, value) in properties.unwrap_or_default() {
        flatten_into(event, PROPERTIES_FIELD, &key, &Value::from(value));
    }
}

impl Envelope {
    /// Writes the decoded record onto the event. Existing properties are
    /// kept unless the envelope carries the same key.
    pub fn apply(self, event: &mut Event) {
        match self {
            Envelope::Log { level, payload } => {
                let p = *payload;
                event.put_field(KIND_FIELD, Value::from(KIND_LOG));
                event.put_field(MESSAGE_FIELD, Value::String(p.message.unwrap_or_default()));
                if let Some(ns) = p.creation_date.filter(|n| *n > 0) {
                    event.timestamp = nanos::from_nanos(ns);
                }
                put_non_empty(event, NAMESPACE_FIELD, p.namespace);
                put_non_empty(event, MR_ID_FIELD, p.mr_id);
                put_non_empty(event, SPAN_ID_FIELD, p.span_id);
                put_non_empty(event, TRACE_ID_FIELD, p.trace_id);
                put_properties(event, p.properties);
                event.put_field(LEVEL_FIELD, Value::from(level.as_str()));
            }
            Envelope::Span(payload) => {
                let p = *payload;
                event.put_field(KIND_FIELD, Value::from(KIND_SPAN));
                event.put_field(MESSAGE_FIELD, Value::from(SPAN_MESSAGE));
                put_non_empty(event, NAMESPACE_FIELD, p.namespace);
                put_non_empty(event, MR_ID_FIELD, p.mr_id);
                put_non_empty(event, SPAN_ID_FIELD, p.span_id);
                put_non_empty(event, TRACE_ID_FIELD, p.trace_id);
                put_properties(event, p.properties);
                put_non_empty(event, SPAN_NAME_FIELD, p.name);
                put_non_empty(event, SPAN_PARENT_FIELD, p.parent_span);
                if let Some(duration) = p.duration.filter(|d| *d != 0) {
                    event.put_field(SPAN_DURATION_FIELD, Value::Int(duration));
                }
                if let Some(start) = p.start_date.filter(|n| *n > 0) {
                    let start = nanos::from_nanos(start);
                    event.timestamp = start;
                    event.put_field(SPAN_START_FIELD, Value::Timestamp(start));
                }
                if let Some(finish) = p.finish_date.filter(|n| *n > 0) {
                    event.put_field(SPAN_FINISH_FIELD, Value::Timestamp(nanos::from_nanos(finish)));
                }
            }
            Envelope::Metric { kind, payload } => {
                let p = *payload;
                event.put_field(KIND_FIELD, Value::from(kind.discriminator()));
                if let Some(ns) = p.timestamp.filter(|n| *n > 0) {
                    event.timestamp = nanos::from_nanos(ns);
                }
                put_non_empty(event, NAMESPACE_FIELD, p.namespace);
                put_properties(event, p.properties);
                let values: Fields = p
                    .values
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|(_, v)| v.is_number())
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect();
                event.put_field(METRIC_VALUES_FIELD, Value::Map(values));
                event.put_field(
                    METRIC_SET_ID_FIELD,
                    Value::String(p.metric_set_id.unwrap_or_default()),
                );
            }
        }
    }
}

/// `decode_semaas` processor: decodes envelopes found in `message`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeDecoder;

impl Processor for EnvelopeDecoder {
    fn name(&self) -> &'static str {
        "decode_semaas"
    }

    fn run(&self, event: &mut Event) -> Result<(), DecodeError> {
        let message = match event.get_field(MESSAGE_FIELD) {
            None => return Err(DecodeError::MissingField(MESSAGE_FIELD)),
            Some(Value::String(message)) => message,
            Some(_) => return Err(DecodeError::NotAString(MESSAGE_FIELD)),
        };
        match parse(message)? {
            Some(envelope) => envelope.apply(event),
            None => debug!("SEMAAS | Message is not an envelope, leaving event unchanged"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(message: &str) -> (Event, Result<(), DecodeError>) {
        let mut event = Event::with_message(message);
        let result = EnvelopeDecoder.run(&mut event);
        (event, result)
    }

    #[test]
    fn test_decode_log() {
        let (event, result) = decode(
            r#"V2|LOG|{"mrId":"mr-1","spanId":"s1","traceId":"t1","creationDate":1700000000000000000,"level":"ERROR","message":"boom","properties":{"user":{"id":7}}}"#,
        );
        assert!(result.is_ok());
        assert_eq!(event.get_str(KIND_FIELD), Some("log"));
        assert_eq!(event.get_str(MESSAGE_FIELD), Some("boom"));
        assert_eq!(event.get_str(MR_ID_FIELD), Some("mr-1"));
        assert_eq!(event.get_str(SPAN_ID_FIELD), Some("s1"));
        assert_eq!(event.get_str(TRACE_ID_FIELD), Some("t1"));
        assert_eq!(event.get_str(LEVEL_FIELD), Some("ERROR"));
        assert_eq!(
            event.get_field("semaas.properties.user_id"),
            Some(&Value::Int(7))
        );
        assert_eq!(event.timestamp, nanos::from_nanos(1_700_000_000_000_000_000));
    }

    #[test]
    fn test_log_level_from_kind_qualifier() {
        let (event, _) = decode(r#"V2|LOG.WARN|{"message":"careful"}"#);
        assert_eq!(event.get_str(LEVEL_FIELD), Some("WARNING"));

        let (event, _) = decode(r#"V2|LOG|{"message":"plain"}"#);
        assert_eq!(event.get_str(LEVEL_FIELD), Some("INFO"));

        let (event, _) = decode(r#"V2|LOG.DEBUG|{"message":"explicit","level":"FATAL"}"#);
        assert_eq!(event.get_str(LEVEL_FIELD), Some("FATAL"));
    }

    #[test]
    fn test_payload_may_contain_pipes() {
        let (event, result) = decode(r#"V2|LOG|{"message":"a|b|c"}"#);
        assert!(result.is_ok());
        assert_eq!(event.get_str(MESSAGE_FIELD), Some("a|b|c"));
    }

    #[test]
    fn test_properties_merge_with_existing_bag() {
        let mut event = Event::with_message(r#"V2|LOG|{"message":"m","properties":{"b":"2"}}"#);
        event.put_field("semaas.properties.a", Value::from("1"));
        EnvelopeDecoder.run(&mut event).expect("decodes");

        assert_eq!(event.get_str("semaas.properties.a"), Some("1"));
        assert_eq!(event.get_str("semaas.properties.b"), Some("2"));
    }

    #[test]
    fn test_decode_span() {
        let (event, result) = decode(
            r#"V2|SPAN|{"namespace":"ns1","mrId":"mr","name":"GET /","spanId":"s","traceId":"t","parentSpan":"p","startDate":1000,"finishDate":5000,"duration":4000}"#,
        );
        assert!(result.is_ok());
        assert_eq!(event.get_str(KIND_FIELD), Some("span"));
        assert_eq!(event.get_str(MESSAGE_FIELD), Some("-"));
        assert_eq!(event.get_str(NAMESPACE_FIELD), Some("ns1"));
        assert_eq!(event.get_str(SPAN_NAME_FIELD), Some("GET /"));
        assert_eq!(event.get_str(SPAN_PARENT_FIELD), Some("p"));
        assert_eq!(event.get_field(SPAN_DURATION_FIELD), Some(&Value::Int(4000)));
        assert_eq!(
            event.get_field(SPAN_START_FIELD),
            Some(&Value::Timestamp(nanos::from_nanos(1000)))
        );
        assert_eq!(
            event.get_field(SPAN_FINISH_FIELD),
            Some(&Value::Timestamp(nanos::from_nanos(5000)))
        );
    }

    #[test]
    fn test_decode_metric_kinds() {
        let (event, _) = decode(
            r#"V1|METRIC|{"metricSetId":"set-1","timestamp":42,"metrics":{"cpu":0.5,"mem":10,"bad":"x"}}"#,
        );
        assert_eq!(event.get_str(KIND_FIELD), Some("metricv1"));
        assert_eq!(event.get_str(METRIC_SET_ID_FIELD), Some("set-1"));
        assert_eq!(
            event.get_field(METRIC_VALUES_FIELD),
            Some(&Value::Map(Fields::from([
                ("cpu".to_string(), Value::Float(0.5)),
                ("mem".to_string(), Value::Int(10)),
            ])))
        );
        assert_eq!(event.timestamp, nanos::from_nanos(42));

        let (event, _) = decode(r#"V1|METRIC.CORE|{"metricSetId":"set-1","metrics":{}}"#);
        assert_eq!(event.get_str(KIND_FIELD), Some("metriccorev1"));
    }

    #[test]
    fn test_too_few_parts_leaves_event_unchanged() {
        let (event, result) = decode("V2|LOG");
        assert!(matches!(result, Err(DecodeError::TooFewParts(2))));
        assert_eq!(event, {
            let mut expected = Event::with_message("V2|LOG");
            expected.timestamp = event.timestamp;
            expected
        });
    }

    #[test]
    fn test_unknown_kind_is_an_error() {
        let (event, result) = decode(r#"V2|METRIC|{}"#);
        assert!(matches!(result, Err(DecodeError::UnknownKind { version: "V2", .. })));
        assert!(event.get_field(KIND_FIELD).is_none());

        let (_, result) = decode(r#"V1|LOG|{}"#);
        assert!(matches!(result, Err(DecodeError::UnknownKind { version: "V1", .. })));
    }

    #[test]
    fn test_invalid_json_leaves_event_unchanged() {
        let (event, result) = decode("V2|LOG|{not json");
        assert!(matches!(result, Err(DecodeError::Payload { what: "log entry", .. })));
        assert_eq!(event.get_str(MESSAGE_FIELD), Some("V2|LOG|{not json"));
        assert!(event.get_field(KIND_FIELD).is_none());
    }

    #[test]
    fn test_other_versions_pass_through() {
        let (event, result) = decode("V3|LOG|{}");
        assert!(result.is_ok());
        assert_eq!(event.get_str(MESSAGE_FIELD), Some("V3|LOG|{}"));
        assert!(event.get_field(KIND_FIELD).is_none());
    }

    #[test]
    fn test_message_must_be_a_string() {
        let mut event = Event::new();
        assert!(matches!(
            EnvelopeDecoder.run(&mut event),
            Err(DecodeError::MissingField("message"))
        ));
        event.put_field(MESSAGE_FIELD, Value::Int(1));
        assert!(matches!(
            EnvelopeDecoder.run(&mut event),
            Err(DecodeError::NotAString("message"))
        ));
    }
}
