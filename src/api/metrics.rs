//! `GET /metrics`
//!
//! Text exposition of the federation series registered in
//! [`crate::metrics`]:
//! - `blogfed_inbox_activities_received_total{activity_type}`
//! - `blogfed_inbox_requests_total{outcome}`
//! - `blogfed_delivery_attempts_total{outcome}`
//! - `blogfed_queue_depth`

use axum::{
    Router,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::metrics::REGISTRY;

/// Encode every registered series
fn render() -> Result<(String, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let text = encoder.encode_to_string(&REGISTRY.gather())?;
    Ok((encoder.format_type().to_string(), text))
}

async fn metrics_handler() -> Response {
    match render() {
        Ok((content_type, text)) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], text).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Router serving `/metrics`, mergeable into any state type
pub fn metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(metrics_handler))
}
