// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while decoding an event into a SEMAAS record.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("error getting field '{0}' from event")]
    MissingField(&'static str),

    #[error("could not get a string from field '{0}'")]
    NotAString(&'static str),

    #[error("message isn't in a correct semaas format: expected at least 3 parts, got {0}")]
    TooFewParts(usize),

    #[error("message isn't in a correct semaas {version} format: unsupported kind '{kind}'")]
    UnknownKind { version: &'static str, kind: String },

    #[error("error decoding {what}: {source}")]
    Payload {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors returned by [`crate::bundler::Bundler::add`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BundlerError {
    #[error("item of {size} bytes exceeds the buffered byte limit of {limit}")]
    Overflow { size: usize, limit: usize },

    #[error("bundler is closed")]
    Closed,
}

/// Errors building a client for one of the SEMAAS backends.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("no url configured for {0}")]
    MissingUrl(&'static str),

    #[error("namespace is empty")]
    MissingNamespace,

    #[error("failed to read {path}: {source}")]
    ReadCertificate {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Errors returned to producers by [`crate::dispatch::DispatchClient`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no bundler available for {destination}/{kind}")]
    NoBundler { destination: String, kind: String },

    #[error(transparent)]
    Bundler(#[from] BundlerError),
}
