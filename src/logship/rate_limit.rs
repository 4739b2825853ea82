//! A parser for `"<N> per <unit>"` rate specs and a sliding fixed-window
//! limiter keyed by an error fingerprint.

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Mutex;

use fnv::FnvHasher;
use regex::Regex;
use strum::{Display, EnumString};

use crate::logship::common::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RateUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl RateUnit {
    fn as_millis(self) -> u64 {
        match self {
            RateUnit::Second => 1_000,
            RateUnit::Minute => 60_000,
            RateUnit::Hour => 3_600_000,
            RateUnit::Day => 86_400_000,
        }
    }
}

/// A parsed `"<N> per <unit>"` rate specification, e.g. `"3 per minute"`.
#[derive(Debug, Clone, Copy)]
pub struct RateSpec {
    pub count: u32,
    pub unit: RateUnit,
}

impl RateSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        // Built once per call; rate specs are parsed at worker start, not on
        // the hot path, so a fresh Regex here costs nothing that matters.
        let re = Regex::new(r"(?i)^\s*(\d+)\s*per\s*(second|minute|hour|day)s?\s*$")
            .expect("static regex is valid");
        let caps = re
            .captures(spec)
            .ok_or_else(|| Error::new(format!("invalid rate spec: {:?}", spec)))?;
        let count: u32 = caps[1]
            .parse()
            .map_err(|_| Error::new(format!("invalid rate spec count: {:?}", spec)))?;
        let unit: RateUnit = caps[2]
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| Error::new(format!("invalid rate spec unit: {:?}", spec)))?;
        Ok(RateSpec { count, unit })
    }

    fn window_ms(&self) -> u64 {
        self.unit.as_millis()
    }
}

/// Hash an error's kind plus its bare (variable-field-free) message into a
/// fingerprint used to key the rate limiter's per-error-class bucket.
pub fn fingerprint(kind: &str, bare_message: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(kind.as_bytes());
    hasher.write_u8(0);
    hasher.write(bare_message.as_bytes());
    hasher.finish()
}

struct Bucket {
    window_start_ms: u64,
    count_in_window: u32,
    suppressed_count: u32,
}

/// Suppresses repeated emissions of the same fingerprint beyond the
/// configured rate, reporting how many were suppressed once emission
/// resumes. Disabled (always emits) when constructed without a `RateSpec`.
pub struct RateLimiter {
    spec: Option<RateSpec>,
    buckets: Mutex<HashMap<u64, Bucket>>,
}

/// Outcome of a `should_emit` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub emit: bool,
    /// Set when this call is the first emission after a suppressed streak;
    /// carries how many prior emissions of this fingerprint were dropped.
    pub suppressed_since_last: Option<u32>,
}

impl RateLimiter {
    pub fn new(spec: Option<RateSpec>) -> Self {
        RateLimiter {
            spec,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        RateLimiter::new(None)
    }

    pub fn should_emit(&self, fingerprint: u64, now_ms: u64) -> RateDecision {
        let spec = match self.spec {
            Some(spec) => spec,
            None => {
                return RateDecision {
                    emit: true,
                    suppressed_since_last: None,
                }
            }
        };

        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets.entry(fingerprint).or_insert_with(|| Bucket {
            window_start_ms: now_ms,
            count_in_window: 0,
            suppressed_count: 0,
        });

        let mut reported_suppression = None;
        if now_ms.saturating_sub(bucket.window_start_ms) >= spec.window_ms() {
            if bucket.suppressed_count > 0 {
                reported_suppression = Some(bucket.suppressed_count);
            }
            bucket.window_start_ms = now_ms;
            bucket.count_in_window = 0;
            bucket.suppressed_count = 0;
        }

        bucket.count_in_window += 1;
        if bucket.count_in_window <= spec.count {
            RateDecision {
                emit: true,
                suppressed_since_last: reported_suppression,
            }
        } else {
            bucket.suppressed_count += 1;
            RateDecision {
                emit: false,
                suppressed_since_last: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_specs() {
        let s = RateSpec::parse("3 per minute").unwrap();
        assert_eq!(s.count, 3);
        assert_eq!(s.unit, RateUnit::Minute);

        let s = RateSpec::parse("10 Per Hour").unwrap();
        assert_eq!(s.count, 10);
        assert_eq!(s.unit, RateUnit::Hour);
    }

    #[test]
    fn rejects_garbage() {
        assert!(RateSpec::parse("lots per minute").is_err());
        assert!(RateSpec::parse("3 per fortnight").is_err());
    }

    #[test]
    fn disabled_limiter_always_emits() {
        let limiter = RateLimiter::disabled();
        for i in 0..100 {
            let d = limiter.should_emit(fingerprint("x", "y"), i);
            assert!(d.emit);
            assert_eq!(d.suppressed_since_last, None);
        }
    }

    #[test]
    fn suppresses_beyond_n_and_reports_on_resume() {
        let spec = RateSpec::parse("2 per second").unwrap();
        let limiter = RateLimiter::new(Some(spec));
        let fp = fingerprint("connect", "connection refused");

        assert!(limiter.should_emit(fp, 0).emit);
        assert!(limiter.should_emit(fp, 10).emit);
        let d = limiter.should_emit(fp, 20);
        assert!(!d.emit);
        let d = limiter.should_emit(fp, 30);
        assert!(!d.emit);

        // New window: first emission reports how many were suppressed.
        let d = limiter.should_emit(fp, 1_500);
        assert!(d.emit);
        assert_eq!(d.suppressed_since_last, Some(2));

        // Suppression counter reset for the new window.
        let d = limiter.should_emit(fp, 1_510);
        assert!(d.emit);
        assert_eq!(d.suppressed_since_last, None);
    }

    #[test]
    fn fingerprints_are_distinct_per_kind_and_message() {
        assert_ne!(fingerprint("a", "b"), fingerprint("a", "c"));
        assert_ne!(fingerprint("a", "b"), fingerprint("c", "b"));
        assert_eq!(fingerprint("a", "b"), fingerprint("a", "b"));
    }
}
