use std::sync::OnceLock;
use std::time::Instant;

/// A monotonic millisecond clock shared by the rate limiter, the durable
/// buffer's `pending_since` bookkeeping, and the worker's backoff math.
/// Reads `Instant::now()` on every call rather than a cached snapshot.
static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Milliseconds elapsed since the first call to any clock function in this
/// process. Monotonic, never decreases, safe to call from any thread.
pub fn monotonic_now_ms() -> u64 {
    epoch().elapsed().as_millis() as u64
}

/// A small handle type so call sites can depend on "a clock" rather than the
/// free function directly, which keeps rate-limit and backoff unit tests
/// deterministic without needing to mock global state.
#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    pub fn now_ms(&self) -> u64 {
        monotonic_now_ms()
    }
}
