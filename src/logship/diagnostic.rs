//! An injected diagnostic sink -- a logger handle distinct from the one
//! that owns the handler itself -- so the worker can report its own errors
//! without re-entering `Handler::emit` and causing a feedback loop.

use tracing::{error, warn};

use crate::logship::rate_limit::{fingerprint, RateDecision, RateLimiter};

/// Severity for a worker-internal diagnostic. `Warning` covers transient,
/// recoverable failures; `Error` covers cases the worker can't tell apart
/// from fatal ones at runtime but that deserve attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Where the worker sends its own errors. Never implemented by `Handler`
/// itself -- that would reintroduce the feedback loop this type exists to
/// avoid.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, severity: Severity, kind: &str, message: &str);
}

/// The default sink: routes through `tracing`, rate-limited per
/// fingerprint(kind, message).
pub struct TracingDiagnosticSink {
    limiter: RateLimiter,
}

impl TracingDiagnosticSink {
    pub fn new(limiter: RateLimiter) -> Self {
        TracingDiagnosticSink { limiter }
    }
}

impl DiagnosticSink for TracingDiagnosticSink {
    fn emit(&self, severity: Severity, kind: &str, message: &str) {
        let fp = fingerprint(kind, message);
        let now = crate::logship::common::monotonic_now_ms();
        let RateDecision {
            emit,
            suppressed_since_last,
        } = self.limiter.should_emit(fp, now);

        if !emit {
            return;
        }

        let suffix = match suppressed_since_last {
            Some(n) if n > 0 => {
                format!(
                    " ({} messages of this kind were suppressed since the last one logged; \
                     further messages of this kind will be dropped for the remainder of \
                     any window in which the rate limit is exceeded again)",
                    n
                )
            }
            _ => String::new(),
        };

        match severity {
            Severity::Warning => warn!(kind, "{}{}", message, suffix),
            Severity::Error => error!(kind, "{}{}", message, suffix),
        }
    }
}
