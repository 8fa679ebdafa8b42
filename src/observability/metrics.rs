//! Metrics collection.
//!
//! # Metrics
//! - `http_client_requests_total` (counter): round-trips by outcome
//!   (completed, failed, timeout, canceled)
//! - `http_client_request_duration_seconds` (histogram): round-trip latency
//! - `http_client_cache_lookups_total` (counter): cache lookups by result
//!   (hit, miss, stale, revalidated, bypass, error)

use std::time::Instant;

/// Record the outcome and latency of one round-trip.
pub fn record_round_trip(outcome: &'static str, started: Instant) {
    ::metrics::counter!("http_client_requests_total", "outcome" => outcome).increment(1);
    ::metrics::histogram!("http_client_request_duration_seconds", "outcome" => outcome)
        .record(started.elapsed().as_secs_f64());
}

/// Record the result of one cache lookup.
pub fn record_cache_lookup(result: &'static str) {
    ::metrics::counter!("http_client_cache_lookups_total", "result" => result).increment(1);
}
