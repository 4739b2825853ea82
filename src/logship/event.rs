use bytes::Bytes;
use chrono::{DateTime, Utc};
use strum::Display;

/// An immutable formatted log record awaiting transmission.
///
/// `id` and `pending_since` are `None` until the event has been persisted
/// into the durable buffer (component C); before that it only exists in the
/// intake queue (component D).
#[derive(Debug, Clone)]
pub struct Event {
    pub payload: Bytes,
    pub intake_time: DateTime<Utc>,
    pub id: Option<i64>,
    pub pending_since: Option<DateTime<Utc>>,
}

impl Event {
    pub fn new(payload: Bytes, intake_time: DateTime<Utc>) -> Self {
        Event {
            payload,
            intake_time,
            id: None,
            pending_since: None,
        }
    }
}

/// Durable buffer row state. `InFlight` means a worker cycle has claimed the
/// row for a transmission attempt; the only backward transition allowed is
/// `InFlight -> Queued` on send failure (see buffer::DurableBuffer::requeue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(i64)]
pub enum SendState {
    Queued = 0,
    InFlight = 1,
}

/// A row in the durable buffer: `(id, payload, pending_since, send_state)`.
#[derive(Debug, Clone)]
pub struct BufferedEvent {
    pub id: i64,
    pub payload: Bytes,
    pub pending_since_ms: i64,
    pub state: SendState,
}
