// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};

use crate::constants::PROPERTIES_FIELD;
use crate::errors::DecodeError;
use crate::flatten::flatten_into;
use crate::processors::{message, Processor};
use crate::value::{Event, Value};

/// `vault_audit_parser`: flattens a Vault audit record under `V_`.
#[derive(Debug, Default, Clone, Copy)]
pub struct VaultAuditParser;

impl Processor for VaultAuditParser {
    fn name(&self) -> &'static str {
        "vault_audit_parser"
    }

    fn run(&self, event: &mut Event) -> Result<(), DecodeError> {
        let Some(data) = message(event).and_then(|m| serde_json::from_str::<serde_json::Value>(m).ok())
        else {
            return Ok(());
        };
        if !data.is_object() {
            return Ok(());
        }

        if let Some(ts) = data
            .get("time")
            .and_then(serde_json::Value::as_str)
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        {
            event.timestamp = ts.with_timezone(&Utc);
        }
        flatten_into(event, PROPERTIES_FIELD, "V", &Value::from(data));
        Ok(())
    }
}
