// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching delivery of telemetry records to the SEMAAS ingestion backends.
//!
//! Events handed over by a host pipeline are decoded into typed records
//! (log entries, spans, metric measurements), grouped per destination and
//! kind into bundlers, and shipped as bulk HTTP requests:
//!
//! ```text
//!   Event ──> Processor chain ──> DispatchClient::publish
//!                                        │
//!                                        v
//!                               BundlerRegistry (namespace, kind)
//!                                        │
//!                                        v
//!                                 Bundler::add ──> SinkHandler ──> HTTP POST
//! ```

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::module_name_repetitions)]

pub mod bundler;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod envelope;
pub mod errors;
pub mod flatten;
pub mod http;
pub mod processors;
pub mod record;
pub mod registry;
pub mod sink;
pub mod value;
