//! Well-known endpoints
//!
//! - /.well-known/webfinger
//! - /.well-known/host-meta

use axum::{
    Router,
    extract::{Query, State},
    response::Json,
    routing::get,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::federation::{ACTIVITY_JSON, LocalBlog};

/// Create well-known router
///
/// Routes:
/// - GET /.well-known/webfinger
/// - GET /.well-known/host-meta
pub fn wellknown_router() -> Router<AppState> {
    Router::new()
        .route("/.well-known/webfinger", get(webfinger))
        .route("/.well-known/host-meta", get(host_meta))
}

/// WebFinger query parameters
#[derive(Debug, Deserialize)]
struct WebFingerQuery {
    resource: String,
}

/// Find the blog a WebFinger resource names
///
/// Accepts `acct:<blog>@<domain>` (domain with or without port) and the
/// blog's actor IRI.
fn find_blog<'a>(state: &'a AppState, resource: &str) -> Result<&'a LocalBlog, AppError> {
    if let Some(acct) = resource.strip_prefix("acct:") {
        let (username, domain) = acct
            .split_once('@')
            .ok_or_else(|| AppError::Validation("Invalid acct format".to_string()))?;

        let server = &state.config.server;
        if !domain.eq_ignore_ascii_case(&server.domain)
            && !domain.eq_ignore_ascii_case(&server.public_hostname())
        {
            return Err(AppError::NotFound);
        }

        return state.blog(username).ok_or(AppError::NotFound);
    }

    if resource.starts_with("http://") || resource.starts_with("https://") {
        let wanted = resource.trim_end_matches('/');
        return state
            .blogs
            .iter()
            .find(|blog| blog.iri.trim_end_matches('/') == wanted)
            .ok_or(AppError::NotFound);
    }

    Err(AppError::Validation(
        "Resource must be an acct: address or an actor IRI".to_string(),
    ))
}

/// GET /.well-known/webfinger
///
/// Responds to WebFinger queries for configured blogs.
///
/// Query: ?resource=acct:blog@domain
async fn webfinger(
    State(state): State<AppState>,
    Query(query): Query<WebFingerQuery>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let blog = find_blog(&state, &query.resource)?;
    let subject = format!("acct:{}@{}", blog.name, state.config.server.public_hostname());

    Ok((
        [(http::header::CONTENT_TYPE, "application/jrd+json")],
        Json(serde_json::json!({
            "subject": subject,
            "aliases": [blog.iri],
            "links": [
                {
                    "rel": "self",
                    "type": ACTIVITY_JSON,
                    "href": blog.iri
                },
                {
                    "rel": "http://webfinger.net/rel/profile-page",
                    "type": "text/html",
                    "href": blog.iri
                }
            ]
        })),
    ))
}

/// GET /.well-known/host-meta
///
/// Returns host-meta XML for WebFinger discovery.
async fn host_meta(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    let base_url = state.config.server.base_url();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<XRD xmlns="http://docs.oasis-open.org/ns/xri/xrd-1.0">
  <Link rel="lrdd" template="{}/.well-known/webfinger?resource={{uri}}"/>
</XRD>"#,
        base_url
    );

    ([("Content-Type", "application/xrd+xml")], xml)
}
