// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use semaas_output::config::Config;
use semaas_output::dispatch::DispatchClient;
use semaas_output::processors::{self, Processor};
use semaas_output::value::{Event, Value};

#[tokio::main]
pub async fn main() {
    let config_path = env::var("SEMAAS_CONFIG").ok().map(PathBuf::from);
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Unable to load configuration: {e}");
            return;
        }
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", config.log_level.to_lowercase());

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let chain = match processors::from_names(&config.processors) {
        Ok(chain) => chain,
        Err(e) => {
            error!("Invalid processor chain: {e}");
            return;
        }
    };

    let client = DispatchClient::new(config);
    let cancel_token = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel_token.clone()));

    info!("SEMAAS | Reading events from stdin");
    forward_stdin(&client, &chain, &cancel_token).await;

    client.close().await;
    info!("SEMAAS | Shutting down");
}

async fn cancel_on_ctrl_c(cancel_token: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            debug!("SEMAAS | Received Ctrl-C");
            cancel_token.cancel();
        }
        Err(e) => error!("SEMAAS | Unable to listen for Ctrl-C: {e}"),
    }
}

async fn forward_stdin(
    client: &DispatchClient,
    chain: &[Box<dyn Processor>],
    cancel_token: &CancellationToken,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = cancel_token.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => {
                let mut event = event_from_line(&line);
                for processor in chain {
                    if let Err(e) = processor.run(&mut event) {
                        debug!("SEMAAS | Processor {} failed: {e}", processor.name());
                    }
                }
                client.publish(&[event]).await;
            }
            Ok(None) => break,
            Err(e) => {
                error!("SEMAAS | Error reading stdin: {e}");
                break;
            }
        }
    }
}

/// A JSON object line provides the event fields, anything else is the
/// message.
fn event_from_line(line: &str) -> Event {
    match serde_json::from_str::<serde_json::Value>(line).map(Value::from) {
        Ok(Value::Map(fields)) => Event {
            fields,
            ..Event::new()
        },
        _ => Event::with_message(line),
    }
}
