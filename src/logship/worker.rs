//! The pipeline core: a single background task draining the intake queue
//! into the durable buffer and periodically flushing the buffer to the
//! transport. The buffer has exactly one writer -- this task -- so no
//! locking is needed around claim/ack/requeue ordering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::logship::buffer::DurableBuffer;
use crate::logship::common::monotonic_now_ms;
use crate::logship::config::{HandlerConfig, Tunables};
use crate::logship::diagnostic::{DiagnosticSink, Severity};
use crate::logship::intake::IntakeReceiver;
use crate::logship::transport::Transport;

/// Handles the facade keeps to signal and join the worker.
pub struct WorkerHandles {
    pub flush_notify: Arc<Notify>,
    pub shutdown: Arc<AtomicBool>,
    pub shutdown_notify: Arc<Notify>,
    pub join: JoinHandle<()>,
}

struct Worker {
    tunables: Tunables,
    buffer: Arc<dyn DurableBuffer>,
    transport: Box<dyn Transport>,
    transport_open: bool,
    intake: IntakeReceiver,
    diagnostics: Arc<dyn DiagnosticSink>,
    event_ttl_ms: Option<i64>,
    max_payload_bytes: usize,

    flush_notify: Arc<Notify>,
    shutdown: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,

    flush_requested: bool,
    consecutive_failures: u32,
    backoff_deadline_ms: Option<i64>,
}

/// Spawn the worker task, returning the handles the `Handler` facade uses
/// to signal flush/shutdown and to join on completion.
pub fn spawn(
    config: &HandlerConfig,
    tunables: Tunables,
    buffer: Arc<dyn DurableBuffer>,
    transport: Box<dyn Transport>,
    intake: IntakeReceiver,
    diagnostics: Arc<dyn DiagnosticSink>,
) -> WorkerHandles {
    let flush_notify = Arc::new(Notify::new());
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_notify = Arc::new(Notify::new());

    let worker = Worker {
        event_ttl_ms: config.event_ttl_seconds.map(|s| s as i64 * 1_000),
        max_payload_bytes: config.max_payload_bytes,
        tunables,
        buffer,
        transport,
        transport_open: false,
        intake,
        diagnostics,
        flush_notify: flush_notify.clone(),
        shutdown: shutdown.clone(),
        shutdown_notify: shutdown_notify.clone(),
        flush_requested: false,
        consecutive_failures: 0,
        backoff_deadline_ms: None,
    };

    let join = tokio::task::spawn(worker.run());

    WorkerHandles {
        flush_notify,
        shutdown,
        shutdown_notify,
        join,
    }
}

/// `min(cap, base * 2^(n-1)) * uniform(0.5, 1.5)`. `n` saturates so
/// `base * 2^(n-1)` never overflows before the cap takes over.
fn backoff_duration(base: Duration, cap: Duration, consecutive_failures: u32) -> Duration {
    let n = consecutive_failures.max(1);
    let shift = n.saturating_sub(1).min(32);
    let scaled = base.checked_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX)).unwrap_or(cap);
    let bounded = scaled.min(cap);
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    bounded.mul_f64(jitter)
}

impl Worker {
    async fn run(mut self) {
        info!("worker started");

        let mut queue_interval = interval(Duration::from_millis(self.tunables.queue_check_interval_ms));
        queue_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flush_interval = interval(Duration::from_millis(self.tunables.flush_interval_ms));
        flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut flush_due_by_interval = false;

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            let backoff_instant = self
                .backoff_deadline_ms
                .map(|deadline_ms| {
                    let remaining = deadline_ms.saturating_sub(monotonic_now_ms() as i64).max(0);
                    Instant::now() + Duration::from_millis(remaining as u64)
                });

            tokio::select! {
                _ = queue_interval.tick() => {}
                _ = flush_interval.tick() => { flush_due_by_interval = true; }
                _ = self.flush_notify.notified() => { self.flush_requested = true; }
                _ = self.shutdown_notify.notified() => {}
                _ = sleep_until(backoff_instant.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))), if backoff_instant.is_some() => {}
            }

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            self.intake_drain_step().await;
            self.ttl_step().await;

            let interval_elapsed = std::mem::take(&mut flush_due_by_interval);
            self.flush_step(self.flush_requested || interval_elapsed).await;
        }

        self.shutdown_sequence().await;
        info!("worker stopped");
    }

    async fn intake_drain_step(&mut self) {
        let batch = self
            .intake
            .drain_batch(Duration::from_millis(0), 1024)
            .await;
        if batch.is_empty() {
            return;
        }

        for event in batch {
            // pending_since is persisted across restarts, so it must be wall-clock
            // time, not this process's monotonic epoch -- see ttl_step below.
            let now_ms = Utc::now().timestamp_millis();
            match self.buffer.enqueue(event.payload.clone(), now_ms, self.max_payload_bytes).await {
                Ok(_) => {}
                Err(e) => {
                    if matches!(e.kind(), crate::logship::common::ErrorKind::PayloadTooLarge { .. }) {
                        self.diagnostics.emit(
                            Severity::Warning,
                            "worker.payload_too_large",
                            &format!("dropped oversized event: {}", e),
                        );
                    } else {
                        self.diagnostics.emit(
                            Severity::Error,
                            "worker.enqueue_failed",
                            &format!("failed to persist event into durable buffer: {}", e),
                        );
                    }
                }
            }
        }

        if let Ok(size) = self.buffer.size().await {
            if size >= self.tunables.flush_count {
                self.flush_requested = true;
            }
        }
    }

    async fn ttl_step(&mut self) {
        let Some(ttl_ms) = self.event_ttl_ms else {
            return;
        };
        let now_ms = Utc::now().timestamp_millis();
        match self.buffer.expire(now_ms, ttl_ms).await {
            Ok(n) if n > 0 => debug!(expired = n, "dropped events past their ttl"),
            Ok(_) => {}
            Err(e) => self.diagnostics.emit(
                Severity::Error,
                "worker.expire_failed",
                &format!("ttl expiry pass failed: {}", e),
            ),
        }
    }

    async fn flush_step(&mut self, should_attempt: bool) {
        let now_ms = monotonic_now_ms() as i64;
        if let Some(deadline) = self.backoff_deadline_ms {
            if now_ms < deadline {
                return;
            }
        }
        if !should_attempt {
            return;
        }

        let claimed = match self.buffer.claim_batch(self.tunables.flush_count, self.tunables.database_event_chunk_size).await {
            Ok(rows) => rows,
            Err(e) => {
                self.diagnostics.emit(
                    Severity::Error,
                    "worker.claim_batch_failed",
                    &format!("failed to claim events from durable buffer: {}", e),
                );
                return;
            }
        };

        if claimed.is_empty() {
            self.flush_requested = false;
            return;
        }

        if !self.transport_open {
            if let Err(e) = self.transport.open().await {
                self.diagnostics.emit(
                    Severity::Warning,
                    "worker.transport_open_failed",
                    &format!("failed to open transport: {}", e),
                );
                self.on_flush_failure(&claimed).await;
                return;
            }
            self.transport_open = true;
        }

        let ids: Vec<i64> = claimed.iter().map(|e| e.id).collect();
        let payloads: Vec<bytes::Bytes> = claimed.iter().map(|e| e.payload.clone()).collect();

        if let Err(e) = self.transport.send(&payloads).await {
            self.diagnostics.emit(
                Severity::Warning,
                "worker.send_failed",
                &format!("failed to send batch to collector: {}", e),
            );
            let _ = self.transport.close().await;
            self.transport_open = false;
            self.on_flush_failure(&claimed).await;
            return;
        }

        if let Err(e) = self.buffer.ack(&ids, self.tunables.database_event_chunk_size).await {
            self.diagnostics.emit(
                Severity::Error,
                "worker.ack_failed",
                &format!("failed to ack delivered events: {}", e),
            );
        }

        self.consecutive_failures = 0;
        self.backoff_deadline_ms = None;

        if let Ok(size) = self.buffer.size().await {
            self.flush_requested = size > 0;
        } else {
            self.flush_requested = false;
        }
    }

    async fn on_flush_failure(&mut self, claimed: &[crate::logship::event::BufferedEvent]) {
        let ids: Vec<i64> = claimed.iter().map(|e| e.id).collect();
        if let Err(e) = self.buffer.requeue(&ids, self.tunables.database_event_chunk_size).await {
            self.diagnostics.emit(
                Severity::Error,
                "worker.requeue_failed",
                &format!("failed to requeue events after a send failure: {}", e),
            );
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let base = Duration::from_millis(self.tunables.socket_timeout_ms);
        let cap = Duration::from_millis(self.tunables.flush_interval_ms).max(Duration::from_secs(60));
        let backoff = backoff_duration(base, cap, self.consecutive_failures);
        self.backoff_deadline_ms = Some(monotonic_now_ms() as i64 + backoff.as_millis() as i64);

        self.diagnostics.emit(
            Severity::Warning,
            "worker.flush_backoff",
            &format!(
                "flush attempt {} failed, backing off for {:?}",
                self.consecutive_failures, backoff
            ),
        );
    }

    /// Drain remaining intake, attempt one final flush, then close the
    /// transport and buffer.
    async fn shutdown_sequence(mut self) {
        self.intake_drain_step().await;
        self.flush_step(true).await;

        if self.transport_open {
            let _ = self.transport.close().await;
        }
        if let Err(e) = self.buffer.close().await {
            self.diagnostics.emit(
                Severity::Error,
                "worker.buffer_close_failed",
                &format!("failed to close durable buffer cleanly: {}", e),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_saturates_at_cap() {
        let base = Duration::from_millis(1_000);
        let cap = Duration::from_secs(60);
        // with jitter in [0.5, 1.5), the first failure should stay well under the cap
        let d1 = backoff_duration(base, cap, 1);
        assert!(d1 >= Duration::from_millis(400) && d1 <= Duration::from_millis(1_600));

        // many failures should saturate at the cap (times jitter)
        let d_many = backoff_duration(base, cap, 20);
        assert!(d_many <= cap.mul_f64(1.5));
    }
}
