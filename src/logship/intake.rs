//! An unbounded, non-blocking handoff from application threads to the
//! worker.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;

use crate::logship::event::Event;

/// The writer half, held by `Handler` and cloned freely -- any thread
/// emitting a log record gets its own clone and never blocks.
#[derive(Clone)]
pub struct IntakeSender {
    tx: UnboundedSender<Event>,
}

impl IntakeSender {
    /// Non-blocking insert. Only fails if the worker has dropped its
    /// receiver (i.e. the handler has shut down).
    pub fn try_send(&self, event: Event) -> Result<(), Event> {
        self.tx.send(event).map_err(|e| e.0)
    }
}

/// The reader half, owned exclusively by the worker task.
pub struct IntakeReceiver {
    rx: UnboundedReceiver<Event>,
}

impl IntakeReceiver {
    /// Wait up to `max_wait` for at least one item, then take whatever else
    /// is immediately available, up to `limit` total. Returns an empty
    /// batch on timeout or if the queue is empty and all senders dropped.
    pub async fn drain_batch(&mut self, max_wait: Duration, limit: usize) -> Vec<Event> {
        let mut batch = Vec::new();
        if limit == 0 {
            return batch;
        }

        match timeout(max_wait, self.rx.recv()).await {
            Ok(Some(event)) => batch.push(event),
            Ok(None) | Err(_) => return batch,
        }

        while batch.len() < limit {
            match self.rx.try_recv() {
                Ok(event) => batch.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        batch
    }
}

pub fn intake_channel() -> (IntakeSender, IntakeReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (IntakeSender { tx }, IntakeReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;

    fn event(n: u8) -> Event {
        Event::new(Bytes::from(vec![n]), Utc::now())
    }

    #[tokio::test]
    async fn drains_available_items_up_to_limit() {
        let (tx, mut rx) = intake_channel();
        for i in 0..5 {
            tx.try_send(event(i)).unwrap();
        }
        let batch = rx.drain_batch(Duration::from_millis(50), 3).await;
        assert_eq!(batch.len(), 3);
        let rest = rx.drain_batch(Duration::from_millis(10), 10).await;
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn times_out_when_empty() {
        let (_tx, mut rx) = intake_channel();
        let start = std::time::Instant::now();
        let batch = rx.drain_batch(Duration::from_millis(30), 10).await;
        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn preserves_order_for_a_single_emitter() {
        let (tx, mut rx) = intake_channel();
        for i in 0..10u8 {
            tx.try_send(event(i)).unwrap();
        }
        let batch = rx.drain_batch(Duration::from_millis(50), 100).await;
        let got: Vec<u8> = batch.iter().map(|e| e.payload[0]).collect();
        assert_eq!(got, (0..10).collect::<Vec<u8>>());
    }
}
