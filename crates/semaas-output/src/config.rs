// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Output configuration.
//!
//! Sources, lowest priority first:
//!
//! 1. built-in defaults,
//! 2. `OMEGA_URL`, `RHO_URL` and `MU_URL` from the environment,
//! 3. an optional YAML file,
//! 4. `SEMAAS_`-prefixed environment variables (`SEMAAS_NAMESPACE=ns1`).
//!
//! ```yaml
//! omega_url: https://omega.example.com
//! rho_url: https://rho.example.com
//! mu_url: https://mu.example.com
//! cert_file: /etc/semaas/client.crt
//! key_file: /etc/semaas/client.key
//! namespace_field: kubernetes.namespace
//! additional_property_fields:
//!   - kubernetes.labels
//! processors: [syslog_semaas, decode_semaas]
//! ```

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::Deserialize;

use crate::bundler::BundlerOptions;
use crate::constants::{
    DEFAULT_BUFFERED_BYTE_LIMIT, DEFAULT_BUNDLE_BYTE_THRESHOLD, DEFAULT_BUNDLE_COUNT_THRESHOLD,
    DEFAULT_DELAY_THRESHOLD, DEFAULT_RETRY_BACKOFF, DEFAULT_TIMEOUT, MR_ID_FIELD, NAMESPACE_FIELD,
};
use crate::processors;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("unknown processor '{0}'")]
    UnknownProcessor(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// PEM client certificate presented to the backends.
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub tls_skip_verify: bool,
    /// Sent as the `Api-Key` header when set.
    pub api_key: Option<String>,

    /// Log store.
    pub omega_url: Option<String>,
    /// Span store.
    pub rho_url: Option<String>,
    /// Metrics store.
    pub mu_url: Option<String>,

    /// Destination used for every event. When unset it is read from
    /// `namespace_field`.
    pub namespace: Option<String>,
    pub namespace_field: String,
    /// Resource id used for every record. When unset it is read from
    /// `mr_id_field`, then from the record itself.
    pub mr_id: Option<String>,
    pub mr_id_field: String,
    /// Event fields holding maps merged into each record's properties.
    pub additional_property_fields: Vec<String>,

    pub timeout_secs: u64,
    pub retry_backoff_ms: u64,
    pub bundle_delay_ms: u64,
    pub bundle_count_threshold: usize,
    pub bundle_byte_threshold: usize,
    pub buffered_byte_limit: usize,

    pub processors: Vec<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cert_file: None,
            key_file: None,
            tls_skip_verify: false,
            api_key: None,
            omega_url: None,
            rho_url: None,
            mu_url: None,
            namespace: None,
            namespace_field: NAMESPACE_FIELD.to_string(),
            mr_id: None,
            mr_id_field: MR_ID_FIELD.to_string(),
            additional_property_fields: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            retry_backoff_ms: u64::try_from(DEFAULT_RETRY_BACKOFF.as_millis()).unwrap_or(5_000),
            bundle_delay_ms: u64::try_from(DEFAULT_DELAY_THRESHOLD.as_millis()).unwrap_or(10_000),
            bundle_count_threshold: DEFAULT_BUNDLE_COUNT_THRESHOLD,
            bundle_byte_threshold: DEFAULT_BUNDLE_BYTE_THRESHOLD,
            buffered_byte_limit: DEFAULT_BUFFERED_BYTE_LIMIT,
            processors: vec!["decode_semaas".to_string()],
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads and validates the configuration, reading `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut figment =
            Figment::new().merge(Env::raw().only(&["omega_url", "rho_url", "mu_url"]));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed("SEMAAS_"));

        let config: Config = figment
            .extract()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err(ConfigError::Invalid(
                "cert_file and key_file must be set together".to_string(),
            ));
        }
        if self.bundle_count_threshold == 0 {
            return Err(ConfigError::Invalid(
                "bundle_count_threshold must be greater than 0".to_string(),
            ));
        }
        processors::from_names(&self.processors)?;
        Ok(())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    #[must_use]
    pub fn bundler_options(&self) -> BundlerOptions {
        BundlerOptions {
            delay_threshold: Duration::from_millis(self.bundle_delay_ms),
            bundle_count_threshold: self.bundle_count_threshold,
            bundle_byte_threshold: self.bundle_byte_threshold,
            buffered_byte_limit: self.buffered_byte_limit,
        }
    }
}
