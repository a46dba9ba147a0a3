//! Remote actor caching
//!
//! Caches fetched actor documents to reduce remote requests. Disabled
//! unless a TTL is configured; a rejected key invalidates its entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::actor::RemoteActor;

/// Cached actor entry
#[derive(Debug, Clone)]
struct CachedActor {
    actor: RemoteActor,
    /// When this entry was cached
    cached_at: Instant,
}

/// Remote actor cache
///
/// Thread-safe cache keyed by actor IRI.
#[derive(Clone)]
pub struct ActorCache {
    cache: Arc<RwLock<HashMap<String, CachedActor>>>,
    ttl: Duration,
}

impl ActorCache {
    /// Create new actor cache
    ///
    /// # Arguments
    /// * `ttl` - Lifetime of an entry
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Get a cached actor if it has not expired
    pub async fn get(&self, iri: &str) -> Option<RemoteActor> {
        let cache = self.cache.read().await;
        match cache.get(iri) {
            Some(cached) if cached.cached_at.elapsed() < self.ttl => {
                tracing::debug!("Actor cache hit for {}", iri);
                Some(cached.actor.clone())
            }
            Some(_) => {
                tracing::debug!("Actor cache expired for {}", iri);
                None
            }
            None => None,
        }
    }

    /// Store an actor under the IRI it was requested with
    pub async fn insert(&self, iri: &str, actor: RemoteActor) {
        let mut cache = self.cache.write().await;
        cache.insert(
            iri.to_string(),
            CachedActor {
                actor,
                cached_at: Instant::now(),
            },
        );
    }

    /// Invalidate a cached actor
    ///
    /// Used when its key no longer verifies a signature.
    pub async fn invalidate(&self, iri: &str) {
        let mut cache = self.cache.write().await;
        cache.remove(iri);
        tracing::debug!("Invalidated actor cache for {}", iri);
    }

    /// Number of entries, expired ones included
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Prune expired entries
    ///
    /// Should be called periodically to clean up expired entries.
    pub async fn prune_expired(&self) {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        let ttl = self.ttl;
        cache.retain(|_, v| v.cached_at.elapsed() < ttl);
        let removed = before - cache.len();

        if removed > 0 {
            tracing::info!("Pruned {} expired actor cache entries", removed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(iri: &str) -> RemoteActor {
        RemoteActor {
            id: iri.to_string(),
            inbox: Some(format!("{}/inbox", iri)),
            shared_inbox: None,
            name: None,
            preferred_username: Some("alice".to_string()),
            url: None,
            public_key_pem: "pem".to_string(),
        }
    }

    #[tokio::test]
    async fn test_cache_expiry() {
        let cache = ActorCache::new(Duration::from_millis(100));
        cache
            .insert("https://remote.example/users/alice", actor("https://remote.example/users/alice"))
            .await;

        // Should be valid immediately
        assert!(cache.get("https://remote.example/users/alice").await.is_some());

        // Wait for expiry
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.get("https://remote.example/users/alice").await.is_none());

        // Prune should remove it
        cache.prune_expired().await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let cache = ActorCache::new(Duration::from_secs(60));
        cache.insert("a", actor("a")).await;
        cache.insert("b", actor("b")).await;

        cache.invalidate("a").await;

        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_some());
        assert_eq!(cache.len().await, 1);
    }
}
