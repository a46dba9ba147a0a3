//! API layer
//!
//! HTTP handlers for:
//! - ActivityPub (blog actors, inbox, followers)
//! - Discovery (WebFinger, host-meta)
//! - Metrics (Prometheus)

mod activitypub;
pub mod metrics;
mod wellknown;

pub use activitypub::{INBOX_BODY_LIMIT, activitypub_router};
pub use metrics::metrics_router;
pub use wellknown::wellknown_router;
