// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `nomad_log_parser`: Nomad agents log JSON objects with `@`-prefixed
//! well-known keys.

use chrono::{DateTime, Utc};

use crate::constants::{LEVEL_FIELD, MESSAGE_FIELD, PROPERTIES_FIELD};
use crate::errors::DecodeError;
use crate::flatten::flatten_into;
use crate::processors::{message, Processor};
use crate::record::LogLevel;
use crate::value::{Event, Value};

#[derive(Debug, Default, Clone, Copy)]
pub struct NomadLogParser;

impl Processor for NomadLogParser {
    fn name(&self) -> &'static str {
        "nomad_log_parser"
    }

    fn run(&self, event: &mut Event) -> Result<(), DecodeError> {
        let Some(data) = message(event)
            .and_then(|m| serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(m).ok())
        else {
            return Ok(());
        };

        for (key, value) in data {
            match (key.as_str(), value) {
                ("@message", serde_json::Value::String(msg)) => {
                    event.put_field(MESSAGE_FIELD, Value::String(msg));
                }
                ("@level", serde_json::Value::String(level)) => {
                    event.put_field(LEVEL_FIELD, Value::from(LogLevel::from_name(&level).as_str()));
                }
                ("@timestamp", serde_json::Value::String(ts)) => {
                    if let Ok(ts) = DateTime::parse_from_rfc3339(&ts) {
                        event.timestamp = ts.with_timezone(&Utc);
                    }
                }
                ("@module", serde_json::Value::String(module)) => {
                    event.put_field(&format!("{PROPERTIES_FIELD}.module"), Value::String(module));
                }
                (_, value) => flatten_into(event, PROPERTIES_FIELD, &key, &Value::from(value)),
            }
        }
        Ok(())
    }
}
