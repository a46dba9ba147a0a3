//! Data models
//!
//! Rust structs representing database entities.
//! Generated IDs use ULID and timestamps use chrono.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Followers
// =============================================================================

/// A remote actor following one of the local blogs
///
/// `(blog, follower)` is the natural key; a repeated follow overwrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Follower {
    /// Local blog name
    pub blog: String,
    /// Follower actor IRI
    pub follower: String,
    /// Inbox used for delivery (shared inbox when advertised)
    pub inbox: String,
    /// Display name or handle at follow time
    pub username: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Comments
// =============================================================================

/// Comment ingested from a public remote reply
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: String,
    /// Local content IRI the reply points at
    pub target: String,
    /// Sanitized HTML content
    pub content: String,
    /// Author display name
    pub name: String,
    /// Author profile URL
    pub website: String,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a comment from a remote object
#[derive(Debug, Clone)]
pub struct NewComment {
    pub target: String,
    pub content: String,
    pub name: String,
    pub website: String,
    /// Remote object IRI; deleting that object deletes the comment
    pub original: String,
}

// =============================================================================
// Notifications
// =============================================================================

/// Operator notification (follows, likes, announces)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
