//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Once;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Inbound federation
    pub static ref INBOX_ACTIVITIES_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("blogfed_inbox_activities_received_total", "Total number of verified inbound activities"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref INBOX_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("blogfed_inbox_requests_total", "Total number of inbox requests by outcome"),
        &["outcome"]
    ).expect("metric can be created");

    // Outbound delivery
    pub static ref DELIVERY_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("blogfed_delivery_attempts_total", "Total number of queue iterations by outcome"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "blogfed_queue_depth",
        "Current number of pending deliveries"
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; registration happens on the first call.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(INBOX_ACTIVITIES_RECEIVED.clone()))
            .expect("INBOX_ACTIVITIES_RECEIVED can be registered");
        REGISTRY
            .register(Box::new(INBOX_REQUESTS_TOTAL.clone()))
            .expect("INBOX_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(DELIVERY_ATTEMPTS_TOTAL.clone()))
            .expect("DELIVERY_ATTEMPTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(QUEUE_DEPTH.clone()))
            .expect("QUEUE_DEPTH can be registered");

        tracing::info!("Metrics registry initialized");
    });
}

/// Count an inbox request outcome (`accepted`, `unauthorized`, `forbidden`, `invalid`)
pub fn record_inbox_outcome(outcome: &str) {
    INBOX_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();

        record_inbox_outcome("accepted");
        let families = REGISTRY.gather();
        assert!(
            families
                .iter()
                .any(|family| family.get_name() == "blogfed_inbox_requests_total")
        );
    }
}
