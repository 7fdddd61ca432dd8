// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lazily built bundlers, one per destination and kind.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::bundler::{BatchHandler, Bundler, BundlerOptions};
use crate::errors::SinkError;

/// What a bundler carries, which selects the backend endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    Logs,
    Spans,
    /// Measurements for one metric set.
    Metrics(String),
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Logs => f.write_str("logs"),
            Kind::Spans => f.write_str("spans"),
            Kind::Metrics(metric_set_id) => write!(f, "metrics/{metric_set_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundlerKey {
    pub destination: String,
    pub kind: Kind,
}

impl fmt::Display for BundlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.destination, self.kind)
    }
}

/// Builds the handler that delivers bundles for a key.
pub trait HandlerFactory<T: Send + 'static>: Send + Sync {
    fn build(&self, key: &BundlerKey) -> Result<Arc<dyn BatchHandler<T>>, SinkError>;
}

pub struct BundlerRegistry<T: Send + 'static> {
    factory: Arc<dyn HandlerFactory<T>>,
    options: BundlerOptions,
    bundlers: Mutex<HashMap<BundlerKey, Bundler<T>>>,
}

impl<T: Send + 'static> BundlerRegistry<T> {
    #[must_use]
    pub fn new(factory: Arc<dyn HandlerFactory<T>>, options: BundlerOptions) -> Self {
        BundlerRegistry {
            factory,
            options,
            bundlers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the bundler for `(destination, kind)`, building it on first
    /// use. Returns `None` when its handler cannot be built; the next call
    /// tries again.
    pub async fn get_or_create(&self, destination: &str, kind: Kind) -> Option<Bundler<T>> {
        let key = BundlerKey {
            destination: destination.to_string(),
            kind,
        };
        let mut bundlers = self.bundlers.lock().await;
        if let Some(bundler) = bundlers.get(&key) {
            return Some(bundler.clone());
        }

        match self.factory.build(&key) {
            Ok(handler) => {
                debug!("SEMAAS | Creating bundler for {key}");
                let bundler = Bundler::new(handler, self.options);
                bundlers.insert(key, bundler.clone());
                Some(bundler)
            }
            Err(e) => {
                error!("SEMAAS | Error creating bundler for {key}: {e}");
                None
            }
        }
    }

    /// Flushes every bundler concurrently and waits for all of them. The
    /// registry is locked meanwhile, so no bundler is created during
    /// shutdown.
    pub async fn close_all(&self) {
        let bundlers = self.bundlers.lock().await;
        debug!("SEMAAS | Flushing {} bundlers", bundlers.len());
        join_all(bundlers.values().map(|bundler| bundler.flush())).await;
    }
}

#[cfg(test)]
impl<T: Send + 'static> BundlerRegistry<T> {
    async fn len(&self) -> usize {
        self.bundlers.lock().await.len()
    }
}
