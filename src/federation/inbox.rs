//! Inbox dispatcher
//!
//! Applies the side effects of a verified inbound activity. The caller has
//! already checked that the signer is the declared actor, and passes the
//! resolved signer along so that no second fetch is needed.

use std::sync::Arc;

use super::activity::{Activity, Intent, RemoteObject};
use super::actor::{LocalBlog, RemoteActor};
use super::delivery::builder;
use super::queue::DeliveryQueue;
use crate::data::{Database, NewComment};
use crate::error::AppError;
use crate::metrics::INBOX_ACTIVITIES_RECEIVED;
use crate::service::NotificationService;

/// Inbox processor
///
/// Processes verified activities addressed to a local blog.
pub struct InboxProcessor {
    db: Arc<Database>,
    queue: Arc<DeliveryQueue>,
    notifier: NotificationService,
    /// Reply targets with this origin are local content
    local_origin: Option<url::Origin>,
}

impl InboxProcessor {
    /// Create new inbox processor
    pub fn new(
        db: Arc<Database>,
        queue: Arc<DeliveryQueue>,
        notifier: NotificationService,
        base_url: String,
    ) -> Self {
        let local_origin = url::Url::parse(&base_url).ok().map(|url| url.origin());
        Self {
            db,
            queue,
            notifier,
            local_origin,
        }
    }

    /// Process a verified activity
    ///
    /// # Arguments
    /// * `blog` - Blog whose inbox received the activity
    /// * `activity` - Parsed activity
    /// * `sender` - Resolved signer, identical to the declared actor
    ///
    /// # Errors
    /// Data-layer failures. The inbox endpoint logs them and still
    /// answers 200.
    pub async fn process(
        &self,
        blog: &LocalBlog,
        activity: Activity,
        sender: &RemoteActor,
    ) -> Result<(), AppError> {
        let label = match activity.intent {
            Intent::Unsupported(_) => "Other",
            ref intent => intent.kind(),
        };
        INBOX_ACTIVITIES_RECEIVED.with_label_values(&[label]).inc();

        match &activity.intent {
            Intent::Follow => self.handle_follow(blog, &activity, sender).await,
            Intent::Undo(inner) => self.handle_undo(blog, &activity, inner.as_deref()).await,
            Intent::Create(object) | Intent::Update(object) => {
                self.handle_comment(&activity, object.as_ref(), sender).await
            }
            Intent::Delete { target } | Intent::Block { target } => {
                self.handle_removal(blog, &activity, target.as_deref()).await
            }
            Intent::Announce { target } => {
                self.notifier
                    .notify(format!(
                        "{} ({}) announced {}",
                        sender.display_name(),
                        sender.id,
                        target.as_deref().unwrap_or("an unknown object")
                    ))
                    .await;
                Ok(())
            }
            Intent::Like { target } => {
                self.notifier
                    .notify(format!(
                        "{} ({}) liked {}",
                        sender.display_name(),
                        sender.id,
                        target.as_deref().unwrap_or("an unknown object")
                    ))
                    .await;
                Ok(())
            }
            Intent::Unsupported(kind) => {
                tracing::debug!(activity_type = %kind, actor = %activity.actor, "Ignoring unsupported activity");
                Ok(())
            }
        }
    }

    /// Handle Follow activity
    async fn handle_follow(
        &self,
        blog: &LocalBlog,
        activity: &Activity,
        sender: &RemoteActor,
    ) -> Result<(), AppError> {
        // 1. Without an inbox there is nowhere to deliver to
        let Some(inbox) = sender.delivery_inbox() else {
            tracing::warn!(actor = %sender.id, "Follower has no inbox, ignoring Follow");
            return Ok(());
        };

        // 2. Upsert the follower
        self.db
            .add_follower(&blog.name, &sender.id, inbox, sender.display_name())
            .await?;
        tracing::info!(blog = %blog.name, follower = %sender.id, inbox = %inbox, "Follower added");

        // 3. Queue the Accept
        let accept = builder::accept(
            &builder::new_activity_id(&blog.iri),
            &blog.iri,
            &sender.id,
            activity.raw.clone(),
        );
        let body = serde_json::to_vec(&accept)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode Accept: {}", e)))?;
        self.queue.enqueue(&blog.iri, inbox, body).await?;

        // 4. Tell the operator
        self.notifier
            .notify(format!(
                "{} ({}) started following {}",
                sender.display_name(),
                sender.id,
                blog.title
            ))
            .await;

        Ok(())
    }

    /// Handle Undo activity
    ///
    /// Only an embedded Follow by the same actor has an effect.
    async fn handle_undo(
        &self,
        blog: &LocalBlog,
        activity: &Activity,
        inner: Option<&Activity>,
    ) -> Result<(), AppError> {
        match inner {
            Some(inner) if inner.intent == Intent::Follow && inner.actor == activity.actor => {
                self.remove_follower(blog, &activity.actor).await
            }
            Some(inner) => {
                tracing::debug!(
                    actor = %activity.actor,
                    inner_type = %inner.intent.kind(),
                    "Ignoring Undo"
                );
                Ok(())
            }
            None => {
                tracing::debug!(actor = %activity.actor, "Ignoring Undo without embedded activity");
                Ok(())
            }
        }
    }

    /// Same scheme, host and port as this server
    fn is_local_content(&self, target: &str) -> bool {
        let Some(local) = &self.local_origin else {
            return false;
        };
        url::Url::parse(target).is_ok_and(|target| target.origin() == *local)
    }

    /// Handle Create and Update
    ///
    /// Public notes and articles replying to local content become comments.
    async fn handle_comment(
        &self,
        activity: &Activity,
        object: Option<&RemoteObject>,
        sender: &RemoteActor,
    ) -> Result<(), AppError> {
        let Some(object) = object.filter(|o| o.is_comment_type()) else {
            return Ok(());
        };

        let Some(target) = object
            .in_reply_to
            .as_deref()
            .filter(|target| self.is_local_content(target))
        else {
            return Ok(());
        };

        if !object.is_public() || object.id.is_empty() {
            tracing::debug!(object = %object.id, "Ignoring non-public reply");
            return Ok(());
        }

        let comment = NewComment {
            target: target.to_string(),
            content: ammonia::clean(&object.content),
            name: sender.display_name().to_string(),
            website: sender.profile_url().to_string(),
            original: object.id.clone(),
        };
        let comment_id = self.db.create_comment(&comment).await?;

        tracing::info!(
            comment = %comment_id,
            target = %target,
            actor = %activity.actor,
            "Comment received"
        );
        self.notifier
            .notify(format!("New comment on {} by {}", target, comment.name))
            .await;

        Ok(())
    }

    /// Handle Delete and Block
    ///
    /// A self-targeted one is an implicit unfollow; otherwise the target
    /// may be a previously ingested comment.
    async fn handle_removal(
        &self,
        blog: &LocalBlog,
        activity: &Activity,
        target: Option<&str>,
    ) -> Result<(), AppError> {
        let Some(target) = target else {
            return Ok(());
        };

        if target == activity.actor {
            return self.remove_follower(blog, &activity.actor).await;
        }

        if let Some(comment_id) = self.db.comment_id_by_original(target).await? {
            self.db.delete_comment_with_origin(&comment_id, target).await?;
            tracing::info!(comment = %comment_id, original = %target, "Comment deleted");
        }

        Ok(())
    }

    async fn remove_follower(&self, blog: &LocalBlog, actor: &str) -> Result<(), AppError> {
        if self.db.remove_follower(&blog.name, actor).await? {
            tracing::info!(blog = %blog.name, follower = %actor, "Follower removed");
        }
        Ok(())
    }
}
