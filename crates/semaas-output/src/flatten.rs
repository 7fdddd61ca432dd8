// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Flattening of nested structures into property keys accepted by the
//! backends.
//!
//! Nested maps are joined with `_` (`{"http": {"code": 200}}` becomes
//! `http_code`), lists recurse with their index (`tags_0`, `tags_1`). A list
//! holding any scalar is kept whole under its own key. Keys that fail
//! [`is_valid_key`] are dropped together with everything below them; the
//! rest of the structure is still written.

use lazy_static::lazy_static;
use regex::Regex;

use crate::value::{Event, Value};

lazy_static! {
    /// 1 to 63 characters of letters, digits, `_` or `-`, starting and
    /// ending with a letter or digit. A single `_` is accepted.
    static ref KEY_PATTERN: Regex =
        Regex::new(r"^(?i:[a-z0-9_]|[a-z0-9][a-z0-9\-_]{0,61}[a-z0-9])$")
            .expect("failed creating key regex");
}

#[must_use]
pub fn is_valid_key(key: &str) -> bool {
    KEY_PATTERN.is_match(key)
}

/// Replaces `.` with `_` and validates the result.
#[must_use]
pub fn sanitize_key(key: &str) -> Option<String> {
    let key = key.replace('.', "_");
    is_valid_key(&key).then_some(key)
}

/// Flattens `value` found under `key` into `(key, leaf)` pairs.
#[must_use]
pub fn flatten(key: &str, value: &Value) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    if let Some(key) = sanitize_key(key) {
        flatten_item(&key, value, &mut out);
    }
    out
}

/// Flattens `value` and writes every pair below `prefix` on the event.
pub fn flatten_into(event: &mut Event, prefix: &str, key: &str, value: &Value) {
    for (path, leaf) in flatten(key, value) {
        event.put_field(&format!("{prefix}.{path}"), leaf);
    }
}

fn flatten_item(key: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Map(map) => {
            for (child, child_value) in map {
                if let Some(joined) = join_key(key, child) {
                    flatten_item(&joined, child_value, out);
                }
            }
        }
        Value::List(items) => {
            if items.iter().any(|item| !item.is_nested()) {
                out.push((key.to_string(), value.clone()));
                return;
            }
            for (index, item) in items.iter().enumerate() {
                if let Some(joined) = join_key(key, &index.to_string()) {
                    flatten_item(&joined, item, out);
                }
            }
        }
        Value::String(s) if s.is_empty() => {}
        Value::Null => {}
        _ => out.push((key.to_string(), value.clone())),
    }
}

fn join_key(parent: &str, child: &str) -> Option<String> {
    let child = sanitize_key(child)?;
    let joined = format!("{parent}_{child}");
    is_valid_key(&joined).then_some(joined)
}
