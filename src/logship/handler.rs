//! The public surface applications call. Never raises; errors are
//! rate-limited and logged internally via the diagnostic sink rather than
//! propagated to the caller.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::logship::buffer::{DurableBuffer, MemoryBuffer, SqliteBuffer};
use crate::logship::config::{load_handler_config, HandlerConfig, Tunables};
use crate::logship::diagnostic::{DiagnosticSink, Severity, TracingDiagnosticSink};
use crate::logship::event::Event;
use crate::logship::formatter::{Formatter, LogRecord};
use crate::logship::intake::{intake_channel, IntakeSender};
use crate::logship::rate_limit::{RateLimiter, RateSpec};
use crate::logship::worker;
use crate::logship::Result;

/// Signal/join surface over the spawned worker task.
struct WorkerControl {
    flush_notify: Arc<Notify>,
    shutdown: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    join: AsyncMutex<Option<JoinHandle<()>>>,
}

/// The log-shipping handler applications hold onto. Cheaply `Clone`-able
/// (it's a handle over a shared intake sender and worker control block);
/// cloning does not duplicate the worker -- callers must explicitly
/// `close()` to shut it down, and only the first call among all clones
/// takes effect.
#[derive(Clone)]
pub struct Handler {
    intake: IntakeSender,
    formatter: Arc<dyn Formatter>,
    handler_diagnostics: Arc<dyn DiagnosticSink>,
    worker: Arc<WorkerControl>,
    closed: Arc<AtomicBool>,
    enabled: bool,
}

impl Handler {
    /// Build a `Handler` from an already-loaded config snapshot and the
    /// formatter that turns `emit`'s records into wire payloads.
    pub async fn new(config: HandlerConfig, tunables: Tunables, formatter: Box<dyn Formatter>) -> Result<Self> {
        let buffer: Arc<dyn DurableBuffer> = match &config.database_path {
            Some(path) => Arc::new(SqliteBuffer::open(path, tunables.database_timeout_ms).await?),
            None => Arc::new(MemoryBuffer::new()),
        };

        let transport = crate::logship::transport::build(&config, &tunables)?;

        let diagnostic_limiter = match &tunables.error_log_rate_limit {
            Some(spec) => RateLimiter::new(Some(RateSpec::parse(spec)?)),
            None => RateLimiter::disabled(),
        };
        let diagnostics: Arc<dyn DiagnosticSink> = Arc::new(TracingDiagnosticSink::new(diagnostic_limiter));

        let (intake_tx, intake_rx) = intake_channel();

        let enabled = config.enable;
        let handles = worker::spawn(
            &config,
            tunables,
            buffer,
            transport,
            intake_rx,
            diagnostics.clone(),
        );

        Ok(Handler {
            intake: intake_tx,
            formatter: Arc::from(formatter),
            handler_diagnostics: diagnostics,
            worker: Arc::new(WorkerControl {
                flush_notify: handles.flush_notify,
                shutdown: handles.shutdown,
                shutdown_notify: handles.shutdown_notify,
                join: AsyncMutex::new(Some(handles.join)),
            }),
            closed: Arc::new(AtomicBool::new(false)),
            enabled,
        })
    }

    /// Load config from a YAML file at `path` and build a `Handler` using
    /// the given formatter.
    pub async fn from_config_file(path: &Path, formatter: Box<dyn Formatter>) -> Result<Self> {
        let (config, tunables) = load_handler_config(path)?;
        Handler::new(config, tunables, formatter).await
    }

    /// Format `record` and enqueue the result for shipping. Never blocks,
    /// never raises: drops silently if `enable=false` or the worker has
    /// shut down, and logs (rate-limited) if formatting fails or the
    /// intake queue itself has gone away unexpectedly.
    pub fn emit(&self, record: LogRecord) {
        if !self.enabled || self.closed.load(Ordering::Relaxed) {
            return;
        }

        let payload = match self.formatter.format(&record) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                self.handler_diagnostics.emit(
                    Severity::Error,
                    "handler.format_failed",
                    &format!("dropped a record the formatter could not render: {}", e),
                );
                return;
            }
        };

        let event = Event::new(payload, Utc::now());
        if self.intake.try_send(event).is_err() {
            self.handler_diagnostics.emit(
                Severity::Error,
                "handler.emit_after_shutdown",
                "dropped an event because the worker has already stopped",
            );
        }
    }

    /// Request an out-of-cycle flush. Non-blocking: sets the edge-triggered
    /// signal the worker checks at the top of its next loop iteration.
    pub fn flush(&self) {
        self.worker.flush_notify.notify_one();
    }

    /// Signal shutdown and wait for the worker to drain, flush once more,
    /// and close the transport and buffer. Idempotent: subsequent calls
    /// after the first return immediately.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.worker.shutdown.store(true, Ordering::SeqCst);
        self.worker.shutdown_notify.notify_one();

        let handle = self.worker.join.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(?e, "worker task panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logship::config::HandlerConfig;
    use crate::logship::formatter::{FormatterOptions, LogstashFormatter};
    use std::collections::BTreeMap;

    fn config(port: u16) -> HandlerConfig {
        HandlerConfig {
            host: "127.0.0.1".to_string(),
            port,
            database_path: None,
            transport: "tcp".to_string(),
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

    fn formatter() -> Box<dyn Formatter> {
        Box::new(LogstashFormatter::new(FormatterOptions::default()))
    }

    fn record(message: &str) -> LogRecord {
        LogRecord {
            message: message.to_string(),
            level: "INFO".to_string(),
            timestamp: Utc::now(),
            pid: std::process::id(),
            program: "logship-test".to_string(),
            fields: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn emit_is_a_no_op_when_disabled() {
        let mut cfg = config(9);
        cfg.enable = false;
        let handler = Handler::new(cfg, Tunables::default(), formatter()).await.unwrap();
        handler.emit(record("hello"));
        handler.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let handler = Handler::new(config(9), Tunables::default(), formatter()).await.unwrap();
        handler.close().await;
        handler.close().await;
    }

    #[tokio::test]
    async fn emit_after_close_does_not_panic() {
        let handler = Handler::new(config(9), Tunables::default(), formatter()).await.unwrap();
        handler.close().await;
        handler.emit(record("too late"));
    }
}
