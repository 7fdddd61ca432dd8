// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client shared by every backend sink.

use core::time::Duration;

use reqwest::Identity;

use crate::config::Config;
use crate::errors::SinkError;

/// Builds a client with the configured timeout and, when `cert_file` and
/// `key_file` are set, the client certificate the backends authenticate.
pub fn build_client(config: &Config) -> Result<reqwest::Client, SinkError> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(config.timeout())
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if let (Some(cert_file), Some(key_file)) = (&config.cert_file, &config.key_file) {
        let mut pem = read_pem(cert_file)?;
        pem.push(b'\n');
        pem.extend(read_pem(key_file)?);
        builder = builder.identity(Identity::from_pem(&pem)?);
    }

    if config.tls_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    Ok(builder.build()?)
}

fn read_pem(path: &str) -> Result<Vec<u8>, SinkError> {
    std::fs::read(path).map_err(|source| SinkError::ReadCertificate {
        path: path.to_string(),
        source,
    })
}
