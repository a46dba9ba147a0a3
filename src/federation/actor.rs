//! Actors
//!
//! Local blog actors and the resolver for remote ones. Remote actor
//! documents are fetched with a GET signed as the calling blog, since
//! many servers refuse unsigned fetches.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::activity::iri_of;
use super::delivery::ACTIVITY_JSON;
use super::key_cache::ActorCache;
use super::signature::{RequestSigner, key_id_for};
use crate::config::{AppConfig, BlogConfig};
use crate::error::AppError;

/// A configured blog acting as an ActivityPub actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBlog {
    /// Config key, also the webfinger username
    pub name: String,
    /// Actor IRI (base URL plus blog path)
    pub iri: String,
    pub title: String,
    pub description: String,
    pub inbox: String,
    pub followers: String,
}

impl LocalBlog {
    pub fn from_config(name: &str, blog: &BlogConfig, config: &AppConfig) -> Self {
        let base_url = config.server.base_url();
        Self {
            name: name.to_string(),
            iri: config.blog_iri(blog),
            title: blog.title.clone(),
            description: blog.description.clone(),
            inbox: format!("{}/activitypub/inbox/{}", base_url, name),
            followers: format!("{}/activitypub/followers/{}", base_url, name),
        }
    }

    /// All configured blogs, ordered by name
    pub fn all(config: &AppConfig) -> Vec<Self> {
        config
            .blogs
            .iter()
            .map(|(name, blog)| Self::from_config(name, blog, config))
            .collect()
    }
}

/// Snapshot of a remote actor document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteActor {
    pub id: String,
    pub inbox: Option<String>,
    pub shared_inbox: Option<String>,
    pub name: Option<String>,
    pub preferred_username: Option<String>,
    pub url: Option<String>,
    pub public_key_pem: String,
}

impl RemoteActor {
    /// Parse an actor document
    ///
    /// # Errors
    /// `Federation` when the document has no id or no usable public key
    pub fn from_value(value: &Value) -> Result<Self, AppError> {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Federation("Actor document has no id".to_string()))?
            .to_string();

        let public_key = match value.get("publicKey") {
            Some(Value::Array(keys)) => keys.first(),
            other => other,
        };
        let public_key_pem = public_key
            .and_then(|key| key.get("publicKeyPem"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|pem| !pem.is_empty())
            .ok_or_else(|| {
                AppError::Federation(format!("Actor {} has no usable public key", id))
            })?
            .to_string();

        let non_empty = |v: Option<&Value>| {
            v.and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Ok(Self {
            inbox: value.get("inbox").and_then(iri_of),
            shared_inbox: value
                .get("endpoints")
                .and_then(|endpoints| endpoints.get("sharedInbox"))
                .and_then(iri_of),
            name: non_empty(value.get("name")),
            preferred_username: non_empty(value.get("preferredUsername")),
            url: value.get("url").and_then(|url| match url {
                Value::Array(urls) => urls.first().and_then(iri_of),
                other => iri_of(other),
            }),
            public_key_pem,
            id,
        })
    }

    /// Inbox used for delivery, preferring the shared inbox
    pub fn delivery_inbox(&self) -> Option<&str> {
        self.shared_inbox
            .as_deref()
            .or(self.inbox.as_deref())
            .filter(|inbox| !inbox.is_empty())
    }

    /// Display name, falling back to the handle and then the IRI
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.preferred_username.as_deref())
            .unwrap_or(&self.id)
    }

    /// Human-facing profile address, falling back to the IRI
    pub fn profile_url(&self) -> &str {
        self.url.as_deref().unwrap_or(&self.id)
    }
}

/// Fetches remote actors over signed GETs
pub struct ActorResolver {
    http_client: reqwest::Client,
    signer: Arc<RequestSigner>,
    user_agent: String,
    fetch_timeout: Duration,
    cache: Option<ActorCache>,
}

impl ActorResolver {
    /// Create a resolver
    ///
    /// # Arguments
    /// * `cache_ttl` - Actor cache lifetime; zero fetches on every call
    pub fn new(
        http_client: reqwest::Client,
        signer: Arc<RequestSigner>,
        user_agent: String,
        fetch_timeout: Duration,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            http_client,
            signer,
            user_agent,
            fetch_timeout,
            cache: (!cache_ttl.is_zero()).then(|| ActorCache::new(cache_ttl)),
        }
    }

    pub fn caching_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub fn cache(&self) -> Option<&ActorCache> {
        self.cache.as_ref()
    }

    /// Resolve an actor, from cache when enabled
    ///
    /// # Arguments
    /// * `iri` - Remote actor IRI
    /// * `blog_iri` - Local blog the fetch is signed as
    ///
    /// # Errors
    /// Network failure, non-success status, unparseable document or
    /// missing public key. No retry.
    pub async fn resolve(&self, iri: &str, blog_iri: &str) -> Result<RemoteActor, AppError> {
        if let Some(cache) = &self.cache {
            if let Some(actor) = cache.get(iri).await {
                return Ok(actor);
            }
        }
        self.fetch_and_store(iri, blog_iri).await
    }

    /// Drop any cached copy and fetch the actor again
    pub async fn refresh(&self, iri: &str, blog_iri: &str) -> Result<RemoteActor, AppError> {
        if let Some(cache) = &self.cache {
            cache.invalidate(iri).await;
        }
        self.fetch_and_store(iri, blog_iri).await
    }

    async fn fetch_and_store(&self, iri: &str, blog_iri: &str) -> Result<RemoteActor, AppError> {
        let actor = self.fetch(iri, blog_iri).await?;
        if let Some(cache) = &self.cache {
            cache.insert(iri, actor.clone()).await;
        }
        Ok(actor)
    }

    async fn fetch(&self, iri: &str, blog_iri: &str) -> Result<RemoteActor, AppError> {
        let sig_headers = self.signer.sign("GET", iri, None, &key_id_for(blog_iri))?;

        let response = self
            .http_client
            .get(iri)
            .timeout(self.fetch_timeout)
            .header(reqwest::header::ACCEPT, ACTIVITY_JSON)
            .header(reqwest::header::ACCEPT_CHARSET, "utf-8")
            .header(reqwest::header::DATE, sig_headers.date)
            .header(reqwest::header::HOST, sig_headers.host)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header("Signature", sig_headers.signature)
            .send()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to fetch actor {}: {}", iri, e)))?;

        if !response.status().is_success() {
            return Err(AppError::Federation(format!(
                "Failed to fetch actor {}: HTTP {}",
                iri,
                response.status()
            )));
        }

        let document: Value = response
            .json()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to parse actor {}: {}", iri, e)))?;

        let actor = RemoteActor::from_value(&document)?;
        if actor.id != iri {
            return Err(AppError::Federation(format!(
                "Actor document at {} claims id {}",
                iri, actor.id
            )));
        }
        Ok(actor)
    }
}
