//! File-backed `DurableBuffer` using `rusqlite`'s bundled SQLite.
//!
//! `rusqlite::Connection` is synchronous and `!Send` across await points in
//! the way the API is normally used, so every operation here runs inside
//! `tokio::task::spawn_blocking` on a `Mutex<Connection>` held by an `Arc`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::logship::buffer::DurableBuffer;
use crate::logship::common::{Error, Result};
use crate::logship::event::{BufferedEvent, SendState};

pub struct SqliteBuffer {
    conn: Arc<AsyncMutex<Connection>>,
}

impl SqliteBuffer {
    /// Open (creating if absent) the database at `path`, apply
    /// `database_timeout_ms` as SQLite's `busy_timeout`, and reset any row
    /// left `InFlight` by an unclean shutdown back to `Queued` so a crash
    /// mid-send can never strand events.
    pub async fn open(path: &Path, database_timeout_ms: u64) -> Result<Self> {
        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path)?;
            conn.busy_timeout(std::time::Duration::from_millis(database_timeout_ms))?;
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 CREATE TABLE IF NOT EXISTS events (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     payload BLOB NOT NULL,
                     pending_since INTEGER NOT NULL,
                     send_state INTEGER NOT NULL
                 );",
            )?;
            let reset = conn.execute(
                "UPDATE events SET send_state = ?1 WHERE send_state = ?2",
                rusqlite::params![SendState::Queued as i64, SendState::InFlight as i64],
            )?;
            if reset > 0 {
                info!(reset, "reset in-flight rows to queued on startup");
            }
            Ok(conn)
        })
        .await
        .map_err(|e| Error::buffer(e.to_string()))??;

        Ok(SqliteBuffer {
            conn: Arc::new(AsyncMutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.blocking_lock();
            f(&guard).map_err(Error::from)
        })
        .await
        .map_err(|e| Error::buffer(e.to_string()))?
    }
}

#[async_trait]
impl DurableBuffer for SqliteBuffer {
    async fn enqueue(&self, payload: Bytes, now_ms: i64, max_payload_bytes: usize) -> Result<i64> {
        if payload.len() > max_payload_bytes {
            return Err(Error::payload_too_large(payload.len(), max_payload_bytes));
        }
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO events (payload, pending_since, send_state) VALUES (?1, ?2, ?3)",
                rusqlite::params![payload.as_ref(), now_ms, SendState::Queued as i64],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn claim_batch(&self, limit: usize, chunk_size: usize) -> Result<Vec<BufferedEvent>> {
        let chunk_size = chunk_size.max(1);
        self.with_conn(move |conn| {
            let mut rows = Vec::new();
            let mut remaining = limit;
            while remaining > 0 {
                let take = remaining.min(chunk_size);
                let mut stmt = conn.prepare(
                    "SELECT id, payload, pending_since FROM events \
                     WHERE send_state = ?1 ORDER BY id ASC LIMIT ?2",
                )?;
                let ids_and_rows: Vec<(i64, Vec<u8>, i64)> = stmt
                    .query_map(
                        rusqlite::params![SendState::Queued as i64, take as i64],
                        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                drop(stmt);

                if ids_and_rows.is_empty() {
                    break;
                }

                let ids: Vec<i64> = ids_and_rows.iter().map(|(id, _, _)| *id).collect();
                let placeholders = vec!["?"; ids.len()].join(",");
                let in_flight = SendState::InFlight as i64;
                let mut params: Vec<&dyn rusqlite::ToSql> = vec![&in_flight];
                params.extend(ids.iter().map(|i| i as &dyn rusqlite::ToSql));
                conn.execute(
                    &format!(
                        "UPDATE events SET send_state = ? WHERE id IN ({})",
                        placeholders
                    ),
                    params_from_iter(params),
                )?;

                let got = ids_and_rows.len();
                for (id, payload, pending_since) in ids_and_rows {
                    rows.push(BufferedEvent {
                        id,
                        payload: Bytes::from(payload),
                        pending_since_ms: pending_since,
                        state: SendState::InFlight,
                    });
                }
                remaining -= got;
                if got < take {
                    break;
                }
            }
            Ok(rows)
        })
        .await
    }

    async fn ack(&self, ids: &[i64], chunk_size: usize) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids = ids.to_vec();
        let chunk_size = chunk_size.max(1);
        self.with_conn(move |conn| {
            for chunk in ids.chunks(chunk_size) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                conn.execute(
                    &format!("DELETE FROM events WHERE id IN ({})", placeholders),
                    params_from_iter(chunk.iter()),
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn requeue(&self, ids: &[i64], chunk_size: usize) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids = ids.to_vec();
        let chunk_size = chunk_size.max(1);
        self.with_conn(move |conn| {
            for chunk in ids.chunks(chunk_size) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                conn.execute(
                    &format!(
                        "UPDATE events SET send_state = {} WHERE id IN ({})",
                        SendState::Queued as i64,
                        placeholders
                    ),
                    params_from_iter(chunk.iter()),
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn expire(&self, now_ms: i64, ttl_ms: i64) -> Result<usize> {
        let cutoff = now_ms - ttl_ms;
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM events WHERE pending_since < ?1",
                rusqlite::params![cutoff],
            )?;
            Ok(deleted)
        })
        .await
    }

    async fn size(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get::<_, i64>(0))
                .optional()
                .map(|v| v.unwrap_or(0) as usize)
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        debug!("closing sqlite buffer");
        Ok(())
    }
}
