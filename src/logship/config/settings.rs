use std::path::PathBuf;

use serde::Deserialize;

use crate::logship::common::{Error, Result};

/// Per-handler configuration: the single remote endpoint and the options
/// that govern how events reach it.
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerConfig {
    pub host: String,
    pub port: u16,

    /// If set, events survive a clean process restart. If absent, the
    /// buffer is in-memory only.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Name of a registered transport constructor (see `transport::registry`).
    #[serde(default = "default_transport")]
    pub transport: String,

    #[serde(default)]
    pub ssl_enable: bool,

    #[serde(default = "default_true")]
    pub ssl_verify: bool,

    #[serde(default)]
    pub keyfile: Option<PathBuf>,
    #[serde(default)]
    pub certfile: Option<PathBuf>,
    #[serde(default)]
    pub ca_certs: Option<PathBuf>,

    /// If false, `Handler::emit` drops the record silently.
    #[serde(default = "default_true")]
    pub enable: bool,

    /// Drop buffered events older than this many seconds.
    #[serde(default)]
    pub event_ttl_seconds: Option<u64>,

    /// Events whose payload exceeds this are dropped and logged rather
    /// than ever handed to the durable buffer.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

fn default_transport() -> String {
    "tcp".to_string()
}

fn default_true() -> bool {
    true
}

const fn default_max_payload_bytes() -> usize {
    1024 * 1024
}

impl HandlerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::new("host cannot be empty"));
        }
        if self.port == 0 {
            return Err(Error::new("port cannot be 0"));
        }
        if self.ssl_enable && self.keyfile.is_some() != self.certfile.is_some() {
            return Err(Error::new(
                "keyfile and certfile must both be set, or neither, for client auth",
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(Error::new("max_payload_bytes cannot be 0"));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Process-wide tunable constants, captured once at worker start as an
/// immutable snapshot. There is deliberately no mutable global holder:
/// runtime mutation after the worker starts must have no effect.
#[derive(Debug, Clone, Deserialize)]
pub struct Tunables {
    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,
    #[serde(default = "default_queue_check_interval_ms")]
    pub queue_check_interval_ms: u64,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_flush_count")]
    pub flush_count: usize,
    #[serde(default = "default_database_event_chunk_size")]
    pub database_event_chunk_size: usize,
    #[serde(default = "default_database_timeout_ms")]
    pub database_timeout_ms: u64,
    #[serde(default)]
    pub error_log_rate_limit: Option<String>,
}

const fn default_socket_timeout_ms() -> u64 {
    5_000
}
const fn default_queue_check_interval_ms() -> u64 {
    2_000
}
const fn default_flush_interval_ms() -> u64 {
    10_000
}
const fn default_flush_count() -> usize {
    50
}
const fn default_database_event_chunk_size() -> usize {
    750
}
const fn default_database_timeout_ms() -> u64 {
    5_000
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            socket_timeout_ms: default_socket_timeout_ms(),
            queue_check_interval_ms: default_queue_check_interval_ms(),
            flush_interval_ms: default_flush_interval_ms(),
            flush_count: default_flush_count(),
            database_event_chunk_size: default_database_event_chunk_size(),
            database_timeout_ms: default_database_timeout_ms(),
            error_log_rate_limit: None,
        }
    }
}

/// Top-level YAML document shape: `handler:` and an optional `tunables:`
/// section. Kept private -- callers only ever see the two structs above.
#[derive(Debug, Deserialize)]
pub(crate) struct SettingsFile {
    pub handler: HandlerConfig,
    #[serde(default)]
    pub tunables: Tunables,
}
