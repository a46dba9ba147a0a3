//! ActivityPub endpoints
//!
//! - Blog actor documents (served at each blog's own address)
//! - Inbox (activity receiving)
//! - Followers collection

use axum::body::Bytes;
use axum::{
    Router,
    extract::{DefaultBodyLimit, OriginalUri, Path, State},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use http::HeaderMap;

use crate::AppState;
use crate::error::AppError;
use crate::federation::{ACTIVITY_JSON, Activity, LocalBlog, builder};
use crate::metrics::record_inbox_outcome;

/// Largest accepted inbox body
pub const INBOX_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Create ActivityPub router
///
/// Routes:
/// - GET <blog path> - Actor document, one route per blog
/// - POST /activitypub/inbox/:blog - Inbox
/// - GET /activitypub/followers/:blog - Followers collection
pub fn activitypub_router(blogs: &[LocalBlog]) -> Router<AppState> {
    let mut router = Router::new()
        .route(
            "/activitypub/inbox/:blog",
            post(inbox).layer(DefaultBodyLimit::max(INBOX_BODY_LIMIT)),
        )
        .route("/activitypub/followers/:blog", get(followers));

    for blog in blogs {
        let path = actor_route(blog);
        let name = blog.name.clone();
        router = router.route(
            &path,
            get(move |State(state): State<AppState>| {
                let name = name.clone();
                async move { actor(state, &name).await }
            }),
        );
    }

    router
}

/// Route path of a blog's actor document
fn actor_route(blog: &LocalBlog) -> String {
    match url::Url::parse(&blog.iri) {
        Ok(iri) if iri.path() != "/" => iri.path().to_string(),
        _ => "/".to_string(),
    }
}

fn activity_json(document: serde_json::Value) -> Response {
    (
        [(http::header::CONTENT_TYPE, ACTIVITY_JSON)],
        Json(document),
    )
        .into_response()
}

/// GET <blog path>
///
/// Returns the blog's Person document.
///
/// Content-Type: application/activity+json
async fn actor(state: AppState, name: &str) -> Result<Response, AppError> {
    let blog = state.blog(name).ok_or(AppError::NotFound)?;
    Ok(activity_json(builder::person(
        blog,
        state.key.public_key_pem(),
    )))
}

/// POST /activitypub/inbox/:blog
///
/// Receives incoming ActivityPub activities.
///
/// # Steps
/// 1. Verify HTTP Signature (401)
/// 2. Parse activity (400)
/// 3. Check the signer is the declared actor (403)
/// 4. Dispatch; side-effect failures are logged and still answered with 200
async fn inbox(
    State(state): State<AppState>,
    Path(blog_name): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(), AppError> {
    let blog = state.blog(&blog_name).ok_or(AppError::NotFound)?;

    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    // 1. Verify the HTTP signature
    let signer = match state
        .verifier
        .verify("POST", path, &headers, &body, &blog.iri)
        .await
    {
        Ok(signer) => signer,
        Err(e) => {
            tracing::info!(blog = %blog.name, error = %e, "Rejected inbox request");
            record_inbox_outcome("unauthorized");
            return Err(AppError::Unauthorized);
        }
    };

    // 2. Parse the activity
    let activity = serde_json::from_slice::<serde_json::Value>(&body)
        .map_err(|e| AppError::Validation(format!("Invalid JSON: {}", e)))
        .and_then(Activity::from_value)
        .inspect_err(|_| record_inbox_outcome("invalid"))?;

    // 3. The signer may only speak for itself
    if activity.actor != signer.id {
        tracing::info!(
            signer = %signer.id,
            actor = %activity.actor,
            "Signer does not match activity actor"
        );
        record_inbox_outcome("forbidden");
        return Err(AppError::Forbidden);
    }

    // 4. Dispatch
    let kind = activity.intent.kind().to_string();
    if let Err(e) = state.inbox.process(blog, activity, &signer).await {
        tracing::warn!(
            blog = %blog.name,
            activity_type = %kind,
            actor = %signer.id,
            error = %e,
            "Failed to apply inbound activity"
        );
    }

    record_inbox_outcome("accepted");
    Ok(())
}

/// GET /activitypub/followers/:blog
///
/// Returns Followers collection.
async fn followers(
    State(state): State<AppState>,
    Path(blog_name): Path<String>,
) -> Result<Response, AppError> {
    let blog = state.blog(&blog_name).ok_or(AppError::NotFound)?;

    let items: Vec<String> = state
        .db
        .get_followers(&blog.name)
        .await?
        .into_iter()
        .map(|follower| follower.follower)
        .collect();

    Ok(activity_json(serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "type": "OrderedCollection",
        "id": blog.followers,
        "totalItems": items.len(),
        "orderedItems": items
    })))
}
