//! Outbound publishing
//!
//! Turns publishing events into activities and fans each one out to every
//! follower inbox of the blog through the durable queue.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::actor::LocalBlog;
use super::delivery::builder;
use super::keys::ActorKey;
use super::queue::DeliveryQueue;
use crate::data::Database;
use crate::error::AppError;

/// A published blog post as seen by federation
#[derive(Debug, Clone, Deserialize)]
pub struct Post {
    /// Canonical URL, also the Note id
    pub url: String,
    /// Rendered HTML
    pub content: String,
    pub published: DateTime<Utc>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Publisher
///
/// Builds outbound activities for local blogs and queues them for every
/// follower inbox.
pub struct Publisher {
    db: Arc<Database>,
    queue: Arc<DeliveryQueue>,
    key: Arc<ActorKey>,
    blogs: Vec<LocalBlog>,
    /// Caps concurrent enqueue operations of one fan-out
    fanout_concurrency: usize,
}

impl Publisher {
    pub fn new(
        db: Arc<Database>,
        queue: Arc<DeliveryQueue>,
        key: Arc<ActorKey>,
        blogs: Vec<LocalBlog>,
        fanout_concurrency: usize,
    ) -> Self {
        Self {
            db,
            queue,
            key,
            blogs,
            fanout_concurrency: fanout_concurrency.max(1),
        }
    }

    /// Queue an activity for every follower inbox of a blog
    ///
    /// Each inbox gets its own enqueue; at most `fanout_concurrency` of them
    /// run at once. A failed enqueue is logged and does not stop the others.
    ///
    /// # Returns
    /// Number of inboxes the activity was queued for
    pub async fn deliver_to_all_followers(
        &self,
        blog: &LocalBlog,
        activity: &Value,
    ) -> Result<usize, AppError> {
        let inboxes = self.db.get_follower_inboxes(&blog.name).await?;
        if inboxes.is_empty() {
            tracing::debug!(blog = %blog.name, "No followers to deliver to");
            return Ok(0);
        }

        let body: Arc<[u8]> = serde_json::to_vec(activity)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode activity: {}", e)))?
            .into();
        let semaphore = Arc::new(Semaphore::new(self.fanout_concurrency));
        let mut join_set = JoinSet::new();

        for inbox in inboxes {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::Internal(anyhow::anyhow!("Fan-out closed: {}", e)))?;
            let queue = self.queue.clone();
            let actor = blog.iri.clone();
            let body = body.clone();

            join_set.spawn(async move {
                let result = queue.enqueue(&actor, &inbox, body.to_vec()).await;
                drop(permit);
                (inbox, result)
            });
        }

        let mut queued = 0;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => queued += 1,
                Ok((inbox, Err(e))) => {
                    tracing::warn!(inbox = %inbox, error = %e, "Failed to queue delivery");
                }
                Err(e) => tracing::error!(error = %e, "Fan-out task panicked"),
            }
        }

        tracing::info!(
            blog = %blog.name,
            activity_type = activity["type"].as_str().unwrap_or_default(),
            queued,
            "Activity queued for followers"
        );
        Ok(queued)
    }

    /// Announce a new post
    pub async fn post_created(&self, blog: &LocalBlog, post: &Post) -> Result<usize, AppError> {
        let note = builder::note(&post.url, &blog.iri, &blog.followers, post);
        let activity = builder::create(
            &builder::new_activity_id(&blog.iri),
            &blog.iri,
            &blog.followers,
            note,
        );
        self.deliver_to_all_followers(blog, &activity).await
    }

    /// Announce an edited post
    pub async fn post_updated(&self, blog: &LocalBlog, post: &Post) -> Result<usize, AppError> {
        let note = builder::note(&post.url, &blog.iri, &blog.followers, post);
        let activity = builder::update(
            &builder::new_activity_id(&blog.iri),
            &blog.iri,
            &blog.followers,
            note,
        );
        self.deliver_to_all_followers(blog, &activity).await
    }

    /// Announce a deleted post
    pub async fn post_deleted(&self, blog: &LocalBlog, post_url: &str) -> Result<usize, AppError> {
        let activity = builder::delete(&builder::new_activity_id(&blog.iri), &blog.iri, post_url);
        self.deliver_to_all_followers(blog, &activity).await
    }

    /// Announce a post that was deleted and published again
    ///
    /// Remote servers keep tombstones, so the Note gets a fresh id.
    pub async fn post_restored(&self, blog: &LocalBlog, post: &Post) -> Result<usize, AppError> {
        let versioned_id = versioned_object_id(&post.url, Utc::now());
        let note = builder::note(&versioned_id, &blog.iri, &blog.followers, post);
        let activity = builder::create(
            &builder::new_activity_id(&blog.iri),
            &blog.iri,
            &blog.followers,
            note,
        );
        self.deliver_to_all_followers(blog, &activity).await
    }

    /// Broadcast the current Person document of every blog
    pub async fn send_profile_updates(&self) -> Result<(), AppError> {
        for blog in &self.blogs {
            let person = builder::person(blog, self.key.public_key_pem());
            let activity = builder::update(
                &builder::new_activity_id(&blog.iri),
                &blog.iri,
                &blog.followers,
                person,
            );
            if let Err(e) = self.deliver_to_all_followers(blog, &activity).await {
                tracing::warn!(blog = %blog.name, error = %e, "Failed to queue profile update");
            }
        }
        Ok(())
    }

    /// Configured blog by name
    pub fn blog(&self, name: &str) -> Option<&LocalBlog> {
        self.blogs.iter().find(|blog| blog.name == name)
    }
}

/// Object id carrying an `activityPubVersion` query parameter
fn versioned_object_id(url: &str, at: DateTime<Utc>) -> String {
    let version = at
        .timestamp_nanos_opt()
        .unwrap_or_else(|| at.timestamp_micros().saturating_mul(1000))
        .to_string();

    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed
                .query_pairs_mut()
                .append_pair("activityPubVersion", &version);
            parsed.to_string()
        }
        Err(_) => {
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{}{}activityPubVersion={}", url, separator, version)
        }
    }
}
