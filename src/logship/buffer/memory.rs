//! In-memory `DurableBuffer` used when `database_path` is unset. Events do
//! not survive a process restart.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::logship::buffer::DurableBuffer;
use crate::logship::common::{Error, Result};
use crate::logship::event::{BufferedEvent, SendState};

struct Row {
    id: i64,
    payload: Bytes,
    pending_since_ms: i64,
    state: SendState,
}

pub struct MemoryBuffer {
    next_id: AtomicI64,
    rows: Mutex<VecDeque<Row>>,
}

impl Default for MemoryBuffer {
    fn default() -> Self {
        MemoryBuffer {
            next_id: AtomicI64::new(1),
            rows: Mutex::new(VecDeque::new()),
        }
    }
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableBuffer for MemoryBuffer {
    async fn enqueue(&self, payload: Bytes, now_ms: i64, max_payload_bytes: usize) -> Result<i64> {
        if payload.len() > max_payload_bytes {
            return Err(Error::payload_too_large(payload.len(), max_payload_bytes));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock()?;
        rows.push_back(Row {
            id,
            payload,
            pending_since_ms: now_ms,
            state: SendState::Queued,
        });
        Ok(id)
    }

    async fn claim_batch(&self, limit: usize, _chunk_size: usize) -> Result<Vec<BufferedEvent>> {
        let mut rows = self.rows.lock()?;
        let mut claimed = Vec::new();
        for row in rows.iter_mut() {
            if claimed.len() >= limit {
                break;
            }
            if row.state == SendState::Queued {
                row.state = SendState::InFlight;
                claimed.push(BufferedEvent {
                    id: row.id,
                    payload: row.payload.clone(),
                    pending_since_ms: row.pending_since_ms,
                    state: SendState::InFlight,
                });
            }
        }
        Ok(claimed)
    }

    async fn ack(&self, ids: &[i64], _chunk_size: usize) -> Result<()> {
        let mut rows = self.rows.lock()?;
        rows.retain(|r| !ids.contains(&r.id));
        Ok(())
    }

    async fn requeue(&self, ids: &[i64], _chunk_size: usize) -> Result<()> {
        let mut rows = self.rows.lock()?;
        for row in rows.iter_mut() {
            if ids.contains(&row.id) {
                row.state = SendState::Queued;
            }
        }
        Ok(())
    }

    async fn expire(&self, now_ms: i64, ttl_ms: i64) -> Result<usize> {
        let cutoff = now_ms - ttl_ms;
        let mut rows = self.rows.lock()?;
        let before = rows.len();
        rows.retain(|r| r.pending_since_ms >= cutoff);
        Ok(before - rows.len())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.rows.lock()?.len())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_claim_ack_round_trip() {
        let buf = MemoryBuffer::new();
        let id = buf
            .enqueue(Bytes::from_static(b"hi"), 1_000, 1024)
            .await
            .unwrap();
        assert_eq!(buf.size().await.unwrap(), 1);

        let claimed = buf.claim_batch(10, 750).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, id);

        assert!(buf.claim_batch(10, 750).await.unwrap().is_empty());

        buf.ack(&[id], 750).await.unwrap();
        assert_eq!(buf.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn requeue_allows_reclaim() {
        let buf = MemoryBuffer::new();
        let id = buf
            .enqueue(Bytes::from_static(b"hi"), 1_000, 1024)
            .await
            .unwrap();
        buf.claim_batch(10, 750).await.unwrap();
        buf.requeue(&[id], 750).await.unwrap();
        let reclaimed = buf.claim_batch(10, 750).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
    }

    #[tokio::test]
    async fn claim_respects_limit_and_fifo_order() {
        let buf = MemoryBuffer::new();
        for i in 0..5u8 {
            buf.enqueue(Bytes::from(vec![i]), 1_000, 1024).await.unwrap();
        }
        let claimed = buf.claim_batch(3, 750).await.unwrap();
        assert_eq!(claimed.len(), 3);
        let got: Vec<u8> = claimed.iter().map(|e| e.payload[0]).collect();
        assert_eq!(got, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn expire_drops_old_rows_only() {
        let buf = MemoryBuffer::new();
        buf.enqueue(Bytes::from_static(b"old"), 1_000, 1024)
            .await
            .unwrap();
        buf.enqueue(Bytes::from_static(b"new"), 9_000, 1024)
            .await
            .unwrap();
        let deleted = buf.expire(10_000, 5_000).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(buf.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn enqueue_rejects_oversized_payload() {
        let buf = MemoryBuffer::new();
        let err = buf.enqueue(Bytes::from(vec![0u8; 50]), 1_000, 10).await;
        assert!(err.is_err());
        assert_eq!(buf.size().await.unwrap(), 0);
    }
}
