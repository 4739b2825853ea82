//! A persistent FIFO of pending events with claim/ack/requeue/expire
//! semantics. Two backends share one trait: file-backed (`sqlite`, built
//! on `rusqlite`'s bundled SQLite) and in-memory (`memory`, a `VecDeque`
//! behind a `Mutex`).

mod memory;
mod sqlite;

pub use memory::MemoryBuffer;
pub use sqlite::SqliteBuffer;

use async_trait::async_trait;

use crate::logship::common::Result;
use crate::logship::event::BufferedEvent;

#[async_trait]
pub trait DurableBuffer: Send + Sync {
    /// Insert a new row as `(id, payload, now, Queued)`. Rejects payloads
    /// larger than `max_payload_bytes` with `Error::payload_too_large`.
    async fn enqueue(&self, payload: bytes::Bytes, now_ms: i64, max_payload_bytes: usize) -> Result<i64>;

    /// Select up to `limit` `Queued` rows in ascending `id` order, flip them
    /// to `InFlight`, and return them. Never called concurrently with
    /// itself (single-worker contract).
    async fn claim_batch(&self, limit: usize, chunk_size: usize) -> Result<Vec<BufferedEvent>>;

    /// Delete the given ids (successful delivery), chunked at `chunk_size`.
    async fn ack(&self, ids: &[i64], chunk_size: usize) -> Result<()>;

    /// Reset the given ids back to `Queued` (failed delivery).
    async fn requeue(&self, ids: &[i64], chunk_size: usize) -> Result<()>;

    /// Delete rows whose `pending_since` is older than `now_ms - ttl_ms`.
    /// Returns the number of rows deleted.
    async fn expire(&self, now_ms: i64, ttl_ms: i64) -> Result<usize>;

    /// Number of rows currently buffered (any state).
    async fn size(&self) -> Result<usize>;

    async fn close(&self) -> Result<()>;
}
