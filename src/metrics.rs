//! Engine Metrics
//!
//! Process-global prometheus counters, exported on the metrics server's
//! `/metrics` endpoint. Registration happens on first use and can only fail
//! on a duplicate metric name.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

/// Requests handled, by operation kind.
pub static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "meshcse_requests_total",
        "Total request primitives handled",
        &["op"]
    )
    .expect("register meshcse_requests_total")
});

/// Requests relayed to federation peers, by outcome.
pub static FORWARDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "meshcse_forwards_total",
        "Total requests relayed to federation peers",
        &["outcome"]
    )
    .expect("register meshcse_forwards_total")
});

/// Notifications attempted, by outcome.
pub static NOTIFICATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "meshcse_notifications_total",
        "Total subscription notifications attempted",
        &["outcome"]
    )
    .expect("register meshcse_notifications_total")
});

/// List members evicted to restore capacity bounds.
pub static EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "meshcse_evictions_total",
        "Total list members evicted to restore capacity bounds"
    )
    .expect("register meshcse_evictions_total")
});

/// Encode every registered metric family in the text exposition format.
pub fn render() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        buffer.clear();
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        REQUESTS_TOTAL.with_label_values(&["retrieve"]).inc();
        FORWARDS_TOTAL.with_label_values(&["relayed"]).inc();
        NOTIFICATIONS_TOTAL.with_label_values(&["delivered"]).inc();
        EVICTIONS_TOTAL.inc();

        let rendered = String::from_utf8(render()).unwrap();
        assert!(rendered.contains("meshcse_requests_total"));
        assert!(rendered.contains("meshcse_evictions_total"));
    }
}
