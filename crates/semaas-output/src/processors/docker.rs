// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `docker_log_parser`: the Docker daemon logs in logfmt,
//! `time="2024-05-01T10:00:00.5Z" level=error msg="handler failed" error="EOF"`.

use chrono::{DateTime, Utc};

use crate::constants::{LEVEL_FIELD, MESSAGE_FIELD};
use crate::errors::DecodeError;
use crate::processors::{message, Processor};
use crate::record::LogLevel;
use crate::value::{Event, Value};

#[derive(Debug, Default, Clone, Copy)]
pub struct DockerLogParser;

#[derive(Debug, Default, PartialEq)]
struct DockerLogEntry {
    time: Option<DateTime<Utc>>,
    level: Option<String>,
    msg: Option<String>,
    error: Option<String>,
}

impl DockerLogEntry {
    fn parse(line: &str) -> Option<Self> {
        let mut entry = DockerLogEntry::default();
        for pair in logfmt::parse(line) {
            let value = pair.val.unwrap_or_default();
            match pair.key.as_str() {
                "time" => {
                    entry.time = Some(DateTime::parse_from_rfc3339(&value).ok()?.with_timezone(&Utc));
                }
                "level" => entry.level = Some(value),
                "msg" => entry.msg = Some(value),
                "error" => entry.error = Some(value).filter(|e| !e.is_empty()),
                _ => {}
            }
        }
        // Plain text also tokenizes as bare keys, so a `msg` key is required.
        entry.msg.is_some().then_some(entry)
    }
}

impl Processor for DockerLogParser {
    fn name(&self) -> &'static str {
        "docker_log_parser"
    }

    fn run(&self, event: &mut Event) -> Result<(), DecodeError> {
        let Some(entry) = message(event).and_then(DockerLogEntry::parse) else {
            return Ok(());
        };

        let level = entry.level.as_deref().map(LogLevel::from_name).unwrap_or_default();
        event.put_field(LEVEL_FIELD, Value::from(level.as_str()));

        let msg = entry.msg.unwrap_or_default();
        let msg = match entry.error {
            Some(error) => format!("{msg} ({error})"),
            None => msg,
        };
        event.put_field(MESSAGE_FIELD, Value::String(msg));
        if let Some(time) = entry.time {
            event.timestamp = time;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_line_with_error() {
        let mut event = Event::with_message(
            r#"time="2024-05-01T10:00:00.5Z" level=error msg="handler failed" error="EOF""#,
        );
        DockerLogParser.run(&mut event).expect("never fails");

        assert_eq!(event.get_str(MESSAGE_FIELD), Some("handler failed (EOF)"));
        assert_eq!(event.get_str(LEVEL_FIELD), Some("ERROR"));
        assert_eq!(
            event.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "2024-05-01T10:00:00.500Z"
        );
    }

    #[test]
    fn test_docker_line_without_error() {
        let mut event = Event::with_message(r#"level=warning msg="slow request""#);
        DockerLogParser.run(&mut event).expect("never fails");

        assert_eq!(event.get_str(MESSAGE_FIELD), Some("slow request"));
        assert_eq!(event.get_str(LEVEL_FIELD), Some("WARNING"));
    }

    #[test]
    fn test_plain_text_is_untouched() {
        for line in ["just some text", "time=yesterday msg=x"] {
            let mut event = Event::with_message(line);
            let before = event.clone();
            DockerLogParser.run(&mut event).expect("never fails");
            assert_eq!(event, before, "{line}");
        }
    }
}
