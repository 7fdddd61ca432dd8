// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{LEVEL_FIELD, PROPERTIES_FIELD};
use crate::errors::DecodeError;
use crate::processors::Processor;
use crate::record::LogLevel;
use crate::value::{Event, Value};

const SEVERITY_FIELD: &str = "event.severity";

/// Fields of a parsed syslog event copied into the property bag.
const COPIED_FIELDS: [(&str, &str); 6] = [
    ("hostname", "hostname"),
    ("hostname", "source"),
    ("process.program", "service"),
    ("syslog.facility_label", "facility"),
    ("syslog.facility", "facility_id"),
    ("process.pid", "pid"),
];

/// `syslog_semaas`: maps a syslog event to a SEMAAS log.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyslogMapper;

impl Processor for SyslogMapper {
    fn name(&self) -> &'static str {
        "syslog_semaas"
    }

    fn run(&self, event: &mut Event) -> Result<(), DecodeError> {
        if let Some(severity) = event.get_field(SEVERITY_FIELD).and_then(Value::as_i64) {
            event.put_field(LEVEL_FIELD, Value::from(LogLevel::from_severity(severity).as_str()));
        }

        for (source, target) in COPIED_FIELDS {
            if let Some(value) = event.get_field(source).cloned() {
                event.put_field(&format!("{PROPERTIES_FIELD}.{target}"), value);
            }
        }
        Ok(())
    }
}
