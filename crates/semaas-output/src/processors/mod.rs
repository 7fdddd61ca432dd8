// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event processors run before publishing.
//!
//! Each processor rewrites an event in place into the `semaas.*` layout
//! understood by [`crate::dispatch::DispatchClient::publish`]. Processors
//! that do not recognise an event leave it untouched.

use crate::config::ConfigError;
use crate::envelope::EnvelopeDecoder;
use crate::errors::DecodeError;
use crate::value::Event;

pub mod docker;
pub mod nomad;
pub mod syslog;
pub mod vault;

pub use docker::DockerLogParser;
pub use nomad::NomadLogParser;
pub use syslog::SyslogMapper;
pub use vault::VaultAuditParser;

pub trait Processor: Send + Sync {
    /// Name used to select the processor in the configuration.
    fn name(&self) -> &'static str;

    /// On error the event must be left as it was.
    fn run(&self, event: &mut Event) -> Result<(), DecodeError>;
}

/// Builds the processor chain from configured names, keeping their order.
pub fn from_names(names: &[String]) -> Result<Vec<Box<dyn Processor>>, ConfigError> {
    names
        .iter()
        .map(|name| -> Result<Box<dyn Processor>, ConfigError> {
            match name.as_str() {
                "decode_semaas" => Ok(Box::new(EnvelopeDecoder)),
                "nomad_log_parser" => Ok(Box::new(NomadLogParser)),
                "vault_audit_parser" => Ok(Box::new(VaultAuditParser)),
                "syslog_semaas" => Ok(Box::new(SyslogMapper)),
                "docker_log_parser" => Ok(Box::new(DockerLogParser)),
                other => Err(ConfigError::UnknownProcessor(other.to_string())),
            }
        })
        .collect()
}

/// Returns the message as a string, if the event has one.
pub(crate) fn message(event: &Event) -> Option<&str> {
    event.get_str(crate::constants::MESSAGE_FIELD)
}
