//! Activity delivery
//!
//! Sends one serialized activity to one remote inbox as a signed POST.
//! Retry accounting lives in the queue worker; this module only reports
//! whether a single attempt succeeded.

use std::sync::Arc;
use std::time::Duration;

use super::signature::{RequestSigner, key_id_for};
use crate::error::DeliveryError;

/// Media type of ActivityPub documents
pub const ACTIVITY_JSON: &str = "application/activity+json";

/// Statuses that count as a successful delivery
pub const SUCCESS_STATUSES: [u16; 4] = [200, 201, 202, 204];

/// Longest response body kept in a `DeliveryError::Status`
const ERROR_BODY_LIMIT: usize = 256;

pub fn is_success_status(status: u16) -> bool {
    SUCCESS_STATUSES.contains(&status)
}

/// Activity delivery service
///
/// Sends activities to remote inbox endpoints.
pub struct ActivityDelivery {
    http_client: reqwest::Client,
    signer: Arc<RequestSigner>,
    user_agent: String,
    /// Hard limit of a single send
    timeout: Duration,
}

impl ActivityDelivery {
    /// Create new delivery service
    pub fn new(
        http_client: reqwest::Client,
        signer: Arc<RequestSigner>,
        user_agent: String,
        timeout: Duration,
    ) -> Self {
        Self {
            http_client,
            signer,
            user_agent,
            timeout,
        }
    }

    /// Deliver a serialized activity to a single inbox
    ///
    /// # Arguments
    /// * `actor_iri` - Local blog actor the request is signed as
    /// * `inbox` - Target inbox URL
    /// * `body` - Serialized activity
    ///
    /// # Errors
    /// Any non-success status, timeout, transport or signing failure.
    /// Nothing is sent when signing fails.
    pub async fn send_signed(
        &self,
        actor_iri: &str,
        inbox: &str,
        body: &[u8],
    ) -> Result<(), DeliveryError> {
        let sig_headers = self
            .signer
            .sign("POST", inbox, Some(body), &key_id_for(actor_iri))
            .map_err(|e| DeliveryError::Signing(e.to_string()))?;

        let mut request = self
            .http_client
            .post(inbox)
            .timeout(self.timeout)
            .header(reqwest::header::ACCEPT_CHARSET, "utf-8")
            .header(reqwest::header::DATE, sig_headers.date)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header(reqwest::header::ACCEPT, ACTIVITY_JSON)
            .header(reqwest::header::CONTENT_TYPE, ACTIVITY_JSON)
            .header(reqwest::header::HOST, sig_headers.host)
            .header("Signature", sig_headers.signature);

        if let Some(digest) = sig_headers.digest {
            request = request.header("Digest", digest);
        }

        let response = request.body(body.to_vec()).send().await?;
        let status = response.status().as_u16();

        if !is_success_status(status) {
            let body = read_error_body(response).await;
            return Err(DeliveryError::Status { status, body });
        }

        tracing::debug!(inbox = %inbox, status, "Delivered activity");
        Ok(())
    }
}

/// First `ERROR_BODY_LIMIT` bytes of a rejection body; the rest is never read
async fn read_error_body(mut response: reqwest::Response) -> String {
    let mut buf = Vec::new();
    while buf.len() < ERROR_BODY_LIMIT {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            _ => break,
        }
    }
    buf.truncate(ERROR_BODY_LIMIT);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Build ActivityPub activity JSON
pub mod builder {
    use serde_json::Value;

    use crate::federation::activity::PUBLIC_COLLECTION;
    use crate::federation::actor::LocalBlog;
    use crate::federation::outbox::Post;
    use crate::federation::signature::key_id_for;

    const CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

    /// Fresh activity id below a blog actor
    pub fn new_activity_id(blog_iri: &str) -> String {
        format!("{}#{}", blog_iri, crate::data::EntityId::new().0)
    }

    /// Build an Accept activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (accepter)
    /// * `follower` - Actor whose Follow is accepted
    /// * `follow` - Original Follow activity
    pub fn accept(id: &str, actor: &str, follower: &str, follow: Value) -> Value {
        serde_json::json!({
            "@context": CONTEXT,
            "type": "Accept",
            "id": id,
            "actor": actor,
            "to": [follower],
            "object": follow
        })
    }

    /// Build a Create activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Blog actor IRI
    /// * `followers` - Followers collection of the blog (cc)
    /// * `object` - Object being created (usually a Note)
    pub fn create(id: &str, actor: &str, followers: &str, object: Value) -> Value {
        wrap("Create", id, actor, followers, object)
    }

    /// Build an Update activity
    pub fn update(id: &str, actor: &str, followers: &str, object: Value) -> Value {
        wrap("Update", id, actor, followers, object)
    }

    fn wrap(kind: &str, id: &str, actor: &str, followers: &str, object: Value) -> Value {
        serde_json::json!({
            "@context": CONTEXT,
            "type": kind,
            "id": id,
            "actor": actor,
            "to": [PUBLIC_COLLECTION],
            "cc": [followers],
            "object": object,
            "published": chrono::Utc::now().to_rfc3339()
        })
    }

    /// Build a Delete activity for an object IRI
    pub fn delete(id: &str, actor: &str, object: &str) -> Value {
        serde_json::json!({
            "@context": CONTEXT,
            "type": "Delete",
            "id": id,
            "actor": actor,
            "to": [PUBLIC_COLLECTION],
            "object": {
                "type": "Tombstone",
                "id": object
            }
        })
    }

    /// Build a Note object for a blog post
    ///
    /// # Arguments
    /// * `id` - Note ID (post URL)
    /// * `attributed_to` - Blog actor IRI
    /// * `followers` - Followers collection of the blog
    pub fn note(id: &str, attributed_to: &str, followers: &str, post: &Post) -> Value {
        let mut note = serde_json::json!({
            "type": "Note",
            "id": id,
            "url": post.url,
            "attributedTo": attributed_to,
            "content": post.content,
            "mediaType": "text/html",
            "published": post.published.to_rfc3339(),
            "to": [PUBLIC_COLLECTION],
            "cc": [followers]
        });

        if let Some(updated) = post.updated {
            note["updated"] = Value::String(updated.to_rfc3339());
        }
        if let Some(ref title) = post.title {
            note["name"] = Value::String(title.clone());
        }

        note
    }

    /// Build the Person document of a local blog
    ///
    /// The actor IRI is the blog address itself.
    pub fn person(blog: &LocalBlog, public_key_pem: &str) -> Value {
        serde_json::json!({
            "@context": [CONTEXT, "https://w3id.org/security/v1"],
            "type": "Person",
            "id": blog.iri,
            "url": blog.iri,
            "preferredUsername": blog.name,
            "name": blog.title,
            "summary": blog.description,
            "inbox": blog.inbox,
            "followers": blog.followers,
            "publicKey": {
                "id": key_id_for(&blog.iri),
                "owner": blog.iri,
                "publicKeyPem": public_key_pem
            }
        })
    }
}
