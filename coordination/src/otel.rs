//! OpenTelemetry-Compatible Span Helpers
//!
//! Structured `tracing` span builders for the audit orchestration pipeline.
//! All spans use dot-notation field names compatible with OpenTelemetry
//! semantic conventions.
//!
//! # Span Hierarchy
//!
//! ```text
//! audit.request              (root — one per audit_thought call)
//!   ├─ audit.cache_lookup     (fingerprint cache consult)
//!   ├─ audit.invocation       (auditor subprocess invocation, via C2/C3)
//!   └─ audit.completion       (C6 tiered completion decision)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordination::otel;
//!
//! let span = otel::request_span(&session_id, thought_number);
//! let guard = span.enter();
//! // ... run the audit ...
//! otel::record_request_result(&span, true, current_loop, 1450);
//! drop(guard);
//! ```

use serde::{Deserialize, Serialize};
use tracing::Span;

// ── Span Name Constants ──────────────────────────────────────────────

/// Root span for one `audit_thought` call end-to-end.
pub const SPAN_AUDIT_REQUEST: &str = "audit.request";

/// Fingerprint cache consult (C1).
pub const SPAN_CACHE_LOOKUP: &str = "audit.cache_lookup";

/// Auditor subprocess invocation, including queue wait (C2/C3).
pub const SPAN_INVOCATION: &str = "audit.invocation";

/// Tiered completion evaluation (C6).
pub const SPAN_COMPLETION: &str = "audit.completion";

// ── Field Name Constants ─────────────────────────────────────────────
// Using OpenTelemetry-style dot notation for structured export.

pub const FIELD_SESSION_ID: &str = "audit.session_id";
pub const FIELD_THOUGHT_NUMBER: &str = "audit.thought_number";
pub const FIELD_LOOP_NUMBER: &str = "audit.loop_number";
pub const FIELD_CACHE_HIT: &str = "audit.cache_hit";
pub const FIELD_SCORE: &str = "audit.score";
pub const FIELD_VERDICT: &str = "audit.verdict";
pub const FIELD_COMPLETION_REASON: &str = "audit.completion_reason";
pub const FIELD_STAGNATION_DETECTED: &str = "audit.stagnation_detected";
pub const FIELD_SUCCESS: &str = "audit.success";
pub const FIELD_DURATION_MS: &str = "audit.duration_ms";
pub const FIELD_QUEUE_WAIT_MS: &str = "audit.queue_wait_ms";

// ── Span Builders ────────────────────────────────────────────────────

/// Create the root span for one `audit_thought` request.
///
/// Fields filled at creation: session id, thought number.
/// Fields filled later via [`record_request_result`]: success, loop number, duration.
pub fn request_span(session_id: &str, thought_number: u32) -> Span {
    tracing::info_span!(
        "audit.request",
        "audit.session_id" = %session_id,
        "audit.thought_number" = thought_number,
        "audit.success" = tracing::field::Empty,
        "audit.loop_number" = tracing::field::Empty,
        "audit.duration_ms" = tracing::field::Empty,
    )
}

/// Record the final result on a request span.
pub fn record_request_result(span: &Span, success: bool, loop_number: u32, duration_ms: u64) {
    span.record("audit.success", success);
    span.record("audit.loop_number", loop_number);
    span.record("audit.duration_ms", duration_ms);
}

/// Create a span for a fingerprint cache consult.
///
/// Fields filled at creation: session id.
/// Fields filled later via [`record_cache_result`]: hit/miss.
pub fn cache_lookup_span(session_id: &str) -> Span {
    tracing::info_span!(
        "audit.cache_lookup",
        "audit.session_id" = %session_id,
        "audit.cache_hit" = tracing::field::Empty,
    )
}

/// Record whether a cache consult hit.
pub fn record_cache_result(span: &Span, hit: bool) {
    span.record("audit.cache_hit", hit);
}

/// Create a span for an auditor subprocess invocation.
///
/// Fields filled at creation: session id, loop number.
/// Fields filled later via [`record_invocation_result`]: success, score,
/// queue wait time, total duration.
pub fn invocation_span(session_id: &str, loop_number: u32) -> Span {
    tracing::info_span!(
        "audit.invocation",
        "audit.session_id" = %session_id,
        "audit.loop_number" = loop_number,
        "audit.success" = tracing::field::Empty,
        "audit.score" = tracing::field::Empty,
        "audit.queue_wait_ms" = tracing::field::Empty,
        "audit.duration_ms" = tracing::field::Empty,
    )
}

/// Record the result of an auditor invocation.
pub fn record_invocation_result(
    span: &Span,
    success: bool,
    score: Option<u8>,
    queue_wait_ms: u64,
    duration_ms: u64,
) {
    span.record("audit.success", success);
    if let Some(score) = score {
        span.record("audit.score", score);
    }
    span.record("audit.queue_wait_ms", queue_wait_ms);
    span.record("audit.duration_ms", duration_ms);
}

/// Create a span for a tiered completion decision.
///
/// All fields filled at creation since the decision is a point-in-time event.
pub fn completion_span(
    session_id: &str,
    loop_number: u32,
    is_complete: bool,
    reason: Option<&str>,
    stagnation_detected: bool,
) -> Span {
    tracing::info_span!(
        "audit.completion",
        "audit.session_id" = %session_id,
        "audit.loop_number" = loop_number,
        "audit.success" = is_complete,
        "audit.completion_reason" = reason.unwrap_or("none"),
        "audit.stagnation_detected" = stagnation_detected,
    )
}

// ── Batch Span Summary ───────────────────────────────────────────────

/// Summary of span activity for a single session's lifetime. Useful for
/// telemetry aggregation and post-run analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanSummary {
    /// Total number of requests (loop iterations) processed.
    pub requests: u32,
    /// Total number of auditor invocations actually run (excludes cache hits).
    pub invocations: u32,
    /// Number of invocations that completed successfully.
    pub invocations_succeeded: u32,
    /// Number of invocations that failed (timeout, parse error, crash).
    pub invocations_failed: u32,
    /// Number of requests served from the cache.
    pub cache_hits: u32,
    /// Number of times stagnation was detected.
    pub stagnation_events: u32,
    /// Total duration across all invocation spans (ms).
    pub total_invocation_duration_ms: u64,
}

impl SpanSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one processed request.
    pub fn record_request(&mut self) {
        self.requests += 1;
    }

    /// Record a cache hit (no invocation was run).
    pub fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    /// Record an auditor invocation's outcome.
    pub fn record_invocation(&mut self, succeeded: bool, duration_ms: u64) {
        self.invocations += 1;
        if succeeded {
            self.invocations_succeeded += 1;
        } else {
            self.invocations_failed += 1;
        }
        self.total_invocation_duration_ms += duration_ms;
    }

    /// Record a stagnation detection event.
    pub fn record_stagnation(&mut self) {
        self.stagnation_events += 1;
    }

    /// Fraction of requests served from cache.
    pub fn cache_hit_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / self.requests as f64
    }

    /// Average invocation duration in milliseconds.
    pub fn avg_invocation_duration_ms(&self) -> f64 {
        if self.invocations == 0 {
            return 0.0;
        }
        self.total_invocation_duration_ms as f64 / self.invocations as f64
    }
}

impl std::fmt::Display for SpanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "requests={} invocations={}/{} cache_hits={} stagnation_events={}",
            self.requests,
            self.invocations_succeeded,
            self.invocations,
            self.cache_hits,
            self.stagnation_events,
        )
    }
}
