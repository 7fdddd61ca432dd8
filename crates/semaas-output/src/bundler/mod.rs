// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Threshold-driven batching of items for a single destination.
//!
//! A [`Bundler`] accumulates items into an open bundle and hands the bundle
//! to its [`BatchHandler`] when any threshold is crossed:
//!
//! - the bundle holds `bundle_count_threshold` items,
//! - the estimated size reaches `bundle_byte_threshold`,
//! - `delay_threshold` elapsed since the first item was added.
//!
//! Handed-off bundles are handled concurrently in their own tasks, so a slow
//! backend never holds the bundle lock. The estimated size of the open bundle
//! plus every in-flight one is capped by `buffered_byte_limit`; producers
//! calling [`Bundler::add`] wait for room, with no timeout.
//!
//! ```text
//!   add ──> [ open bundle ] ──(threshold)──> spawn ──> handler.handle(batch)
//!              │                                            │
//!              └── bytes acquired ◄──── released on completion
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::debug;

use crate::constants::{
    DEFAULT_BUFFERED_BYTE_LIMIT, DEFAULT_BUNDLE_BYTE_THRESHOLD, DEFAULT_BUNDLE_COUNT_THRESHOLD,
    DEFAULT_DELAY_THRESHOLD,
};
use crate::errors::BundlerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundlerOptions {
    pub delay_threshold: Duration,
    pub bundle_count_threshold: usize,
    pub bundle_byte_threshold: usize,
    pub buffered_byte_limit: usize,
}

impl Default for BundlerOptions {
    fn default() -> Self {
        BundlerOptions {
            delay_threshold: DEFAULT_DELAY_THRESHOLD,
            bundle_count_threshold: DEFAULT_BUNDLE_COUNT_THRESHOLD,
            bundle_byte_threshold: DEFAULT_BUNDLE_BYTE_THRESHOLD,
            buffered_byte_limit: DEFAULT_BUFFERED_BYTE_LIMIT,
        }
    }
}

/// Receives every bundle handed off by a [`Bundler`], exactly once.
#[async_trait]
pub trait BatchHandler<T: Send + 'static>: Send + Sync {
    async fn handle(&self, batch: Vec<T>);
}

struct OpenBundle<T> {
    items: Vec<T>,
    bytes: usize,
    /// Sequence number of this bundle. Bumped on every hand-off.
    seq: u64,
}

struct Inner<T: Send + 'static> {
    options: BundlerOptions,
    handler: Arc<dyn BatchHandler<T>>,
    open: Mutex<OpenBundle<T>>,
    buffered: Semaphore,
    in_flight: watch::Sender<BTreeSet<u64>>,
}

pub struct Bundler<T: Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> Clone for Bundler<T> {
    fn clone(&self) -> Self {
        Bundler {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for Bundler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundler")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

/// Returns the bundle's bytes to the buffer and marks it complete when the
/// handler task ends, including by panic.
struct InFlightGuard<T: Send + 'static> {
    inner: Arc<Inner<T>>,
    seq: u64,
    bytes: usize,
}

impl<T: Send + 'static> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        self.inner.buffered.add_permits(self.bytes);
        self.inner.in_flight.send_modify(|pending| {
            pending.remove(&self.seq);
        });
    }
}

impl<T: Send + 'static> Bundler<T> {
    #[must_use]
    pub fn new(handler: Arc<dyn BatchHandler<T>>, options: BundlerOptions) -> Self {
        let mut options = options;
        // Permits are acquired as u32.
        options.buffered_byte_limit = options.buffered_byte_limit.min(u32::MAX as usize);
        options.bundle_count_threshold = options.bundle_count_threshold.max(1);

        let (in_flight, _) = watch::channel(BTreeSet::new());
        Bundler {
            inner: Arc::new(Inner {
                options,
                handler,
                open: Mutex::new(OpenBundle {
                    items: Vec::new(),
                    bytes: 0,
                    seq: 0,
                }),
                buffered: Semaphore::new(options.buffered_byte_limit),
                in_flight,
            }),
        }
    }

    #[must_use]
    pub fn options(&self) -> &BundlerOptions {
        &self.inner.options
    }

    /// Whether both handles point to the same bundler.
    #[must_use]
    pub fn ptr_eq(&self, other: &Bundler<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Adds an item with an estimated size of `size` bytes, waiting while
    /// the buffered byte limit is reached.
    pub async fn add(&self, item: T, size: usize) -> Result<(), BundlerError> {
        let limit = self.inner.options.buffered_byte_limit;
        let permits = u32::try_from(size)
            .ok()
            .filter(|_| size <= limit)
            .ok_or(BundlerError::Overflow { size, limit })?;
        if permits > 0 {
            self.inner
                .buffered
                .acquire_many(permits)
                .await
                .map_err(|_| BundlerError::Closed)?
                .forget();
        }

        let mut open = self.inner.open.lock().await;
        open.items.push(item);
        open.bytes += size;
        if open.items.len() == 1 {
            self.schedule_delay(open.seq);
        }
        if open.items.len() >= self.inner.options.bundle_count_threshold
            || open.bytes >= self.inner.options.bundle_byte_threshold
        {
            Inner::hand_off(&self.inner, &mut open);
        }
        Ok(())
    }

    /// Hands off the open bundle and waits until it, and every bundle handed
    /// off before it, has been handled.
    pub async fn flush(&self) {
        let target = {
            let mut open = self.inner.open.lock().await;
            if !open.items.is_empty() {
                Inner::hand_off(&self.inner, &mut open);
            }
            open.seq
        };
        let mut pending = self.inner.in_flight.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = pending
            .wait_for(|seqs| seqs.first().map_or(true, |first| *first >= target))
            .await;
    }

    fn schedule_delay(&self, seq: u64) {
        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        let delay = self.inner.options.delay_threshold;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut open = inner.open.lock().await;
            if open.seq == seq && !open.items.is_empty() {
                debug!("SEMAAS | Delay threshold reached, handing off bundle {seq}");
                Inner::hand_off(&inner, &mut open);
            }
        });
    }
}

impl<T: Send + 'static> Inner<T> {
    /// Closes the open bundle and handles it in a new task. Must be called
    /// with the open bundle locked.
    fn hand_off(inner: &Arc<Inner<T>>, open: &mut OpenBundle<T>) {
        let batch = std::mem::take(&mut open.items);
        let bytes = std::mem::take(&mut open.bytes);
        let seq = open.seq;
        open.seq += 1;

        inner.in_flight.send_modify(|pending| {
            pending.insert(seq);
        });
        let guard = InFlightGuard {
            inner: Arc::clone(inner),
            seq,
            bytes,
        };
        let handler = Arc::clone(&inner.handler);
        tokio::spawn(async move {
            let _guard = guard;
            handler.handle(batch).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Instant};

    struct Recorder {
        batches: std::sync::Mutex<Vec<Vec<u32>>>,
        delay: Duration,
        gate: Option<Arc<Semaphore>>,
        notify: Option<mpsc::UnboundedSender<Vec<u32>>>,
    }

    impl Recorder {
        fn new() -> Self {
            Recorder {
                batches: std::sync::Mutex::new(Vec::new()),
                delay: Duration::ZERO,
                gate: None,
                notify: None,
            }
        }

        fn batches(&self) -> Vec<Vec<u32>> {
            self.batches.lock().expect("lock poisoned").clone()
        }
    }

    #[async_trait]
    impl BatchHandler<u32> for Recorder {
        async fn handle(&self, batch: Vec<u32>) {
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.expect("gate open");
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(notify) = &self.notify {
                let _ = notify.send(batch.clone());
            }
            self.batches.lock().expect("lock poisoned").push(batch);
        }
    }

    fn options(count: usize) -> BundlerOptions {
        BundlerOptions {
            delay_threshold: Duration::from_secs(10),
            bundle_count_threshold: count,
            bundle_byte_threshold: 1024 * 1024,
            buffered_byte_limit: 2 * 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn test_count_threshold_hands_off_in_order() {
        let recorder = Arc::new(Recorder::new());
        let bundler = Bundler::<u32>::new(recorder.clone(), options(3));

        for i in 1..=3 {
            bundler.add(i, 1).await.expect("added");
        }
        bundler.flush().await;

        assert_eq!(recorder.batches(), vec![vec![1, 2, 3]]);
    }

    #[tokio::test]
    async fn test_byte_threshold_hands_off() {
        let recorder = Arc::new(Recorder::new());
        let mut opts = options(100);
        opts.bundle_byte_threshold = 10;
        let bundler = Bundler::<u32>::new(recorder.clone(), opts);

        bundler.add(1, 6).await.expect("added");
        bundler.add(2, 6).await.expect("added");
        bundler.add(3, 1).await.expect("added");
        bundler.flush().await;

        assert_eq!(recorder.batches(), vec![vec![1, 2], vec![3]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_threshold_hands_off() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut recorder = Recorder::new();
        recorder.notify = Some(tx);
        let bundler = Bundler::<u32>::new(Arc::new(recorder), options(100));

        let start = Instant::now();
        bundler.add(7, 1).await.expect("added");
        let batch = rx.recv().await.expect("handed off");

        assert_eq!(batch, vec![7]);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_does_not_hand_off_next_bundle() {
        let recorder = Arc::new(Recorder::new());
        let bundler = Bundler::<u32>::new(recorder.clone(), options(2));

        bundler.add(1, 1).await.expect("added");
        bundler.add(2, 1).await.expect("added");
        tokio::time::sleep(Duration::from_secs(5)).await;
        bundler.add(3, 1).await.expect("added");
        // The first bundle's timer fires here and must leave item 3 alone.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(recorder.batches(), vec![vec![1, 2]]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(recorder.batches(), vec![vec![1, 2], vec![3]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_waits_for_in_flight_bundles() {
        let mut recorder = Recorder::new();
        recorder.delay = Duration::from_secs(1);
        let recorder = Arc::new(recorder);
        let bundler = Bundler::<u32>::new(recorder.clone(), options(2));

        for i in 1..=5 {
            bundler.add(i, 1).await.expect("added");
        }
        bundler.flush().await;

        let mut batches = recorder.batches();
        batches.sort();
        assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[tokio::test]
    async fn test_flush_of_empty_bundler_returns() {
        let recorder = Arc::new(Recorder::new());
        let bundler = Bundler::<u32>::new(recorder.clone(), options(2));
        bundler.flush().await;
        assert!(recorder.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_waits_for_buffered_bytes() {
        let gate = Arc::new(Semaphore::new(0));
        let mut recorder = Recorder::new();
        recorder.gate = Some(gate.clone());
        let recorder = Arc::new(recorder);
        let mut opts = options(1);
        opts.buffered_byte_limit = 10;
        let bundler = Bundler::<u32>::new(recorder.clone(), opts);

        bundler.add(1, 6).await.expect("added");
        let blocked = timeout(Duration::from_millis(100), bundler.add(2, 6)).await;
        assert!(blocked.is_err(), "second add should wait for room");

        gate.add_permits(1);
        timeout(Duration::from_secs(1), bundler.add(2, 6))
            .await
            .expect("room after first bundle completes")
            .expect("added");
        gate.add_permits(1);
        bundler.flush().await;

        assert_eq!(recorder.batches(), vec![vec![1], vec![2]]);
    }

    #[tokio::test]
    async fn test_item_larger_than_buffer_overflows() {
        let recorder = Arc::new(Recorder::new());
        let mut opts = options(1);
        opts.buffered_byte_limit = 10;
        let bundler = Bundler::<u32>::new(recorder, opts);

        assert_eq!(
            bundler.add(1, 11).await,
            Err(BundlerError::Overflow { size: 11, limit: 10 })
        );
    }
}
