//! Ships framed payloads to the remote collector over a pluggable
//! connection type, selected by name from config. Implementations
//! self-register at startup via `#[ctor::ctor]` into a safe
//! `name -> constructor` map; this handler only ever runs exactly one
//! transport at a time, so there is no ordering or dispatch-chain concept.

mod tcp;
mod verifier;

pub use tcp::TcpTransport;
pub use verifier::DangerousServerCertVerifier;

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;

use crate::logship::common::Result;
use crate::logship::config::{HandlerConfig, Tunables};

/// A single outbound connection to the collector. `open` establishes it
/// (including any TLS handshake); `send` writes a whole batch of
/// already-framed payloads, in order, as one atomic unit -- a partial
/// write is a failure for the whole batch; `close` tears the connection
/// down. Implementations reconnect lazily on the next `send` after a
/// failure -- the worker owns the retry loop and backoff, not the
/// transport.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&mut self) -> Result<()>;
    async fn send(&mut self, payloads: &[Bytes]) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

type Constructor = fn(&HandlerConfig, &Tunables) -> Result<Box<dyn Transport>>;

fn registry() -> &'static Mutex<HashMap<&'static str, Constructor>> {
    static REGISTRY: OnceLock<Mutex<HashMap<&'static str, Constructor>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register a named transport constructor. Called from `#[ctor::ctor]`
/// functions before `main` runs; safe to call again in tests.
pub fn register(name: &'static str, ctor: Constructor) {
    registry().lock().expect("registry mutex poisoned").insert(name, ctor);
}

/// Build the transport named by `config.transport`, failing with a
/// `TransportError` if no such name was ever registered.
pub fn build(config: &HandlerConfig, tunables: &Tunables) -> Result<Box<dyn Transport>> {
    let table = registry().lock().expect("registry mutex poisoned");
    match table.get(config.transport.as_str()) {
        Some(ctor) => ctor(config, tunables),
        None => Err(crate::logship::common::Error::transport(format!(
            "no transport registered under the name {:?}",
            config.transport
        ))),
    }
}

#[ctor::ctor]
fn register_tcp() {
    register("tcp", |config, tunables| {
        Ok(Box::new(TcpTransport::new(config.clone(), tunables.socket_timeout_ms)))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config(transport: &str) -> HandlerConfig {
        HandlerConfig {
            host: "127.0.0.1".to_string(),
            port: 9999,
            database_path: None,
            transport: transport.to_string(),
            ssl_enable: false,
            ssl_verify: true,
            keyfile: None,
            certfile: None,
            ca_certs: None,
            enable: true,
            event_ttl_seconds: None,
            max_payload_bytes: 1024,
        }
    }

    #[test]
    fn tcp_is_registered_by_default() {
        let tunables = Tunables::default();
        assert!(build(&sample_config("tcp"), &tunables).is_ok());
        assert!(build(&sample_config("no-such-transport"), &tunables).is_err());
    }
}
