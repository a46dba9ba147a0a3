//! SQLite database operations
//!
//! All database access goes through this module.
//! Uses SQLx with embedded migrations.

use chrono::Utc;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Database connection pool wrapper
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to the SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        // Create connection string
        let connection_string = format!("sqlite:{}?mode=rwc", path.display());

        // Create connection pool
        let pool = SqlitePool::connect(&connection_string).await?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Followers
    // =========================================================================

    /// Insert or replace a follower
    ///
    /// A repeated follow from the same actor overwrites inbox and username.
    pub async fn add_follower(
        &self,
        blog: &str,
        follower: &str,
        inbox: &str,
        username: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO followers (blog, follower, inbox, username, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(blog, follower) DO UPDATE SET
                inbox = excluded.inbox,
                username = excluded.username
            "#,
        )
        .bind(blog)
        .bind(follower)
        .bind(inbox)
        .bind(username)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete a follower of a blog
    ///
    /// # Returns
    /// Whether a row was removed (no error when absent)
    pub async fn remove_follower(&self, blog: &str, follower: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM followers WHERE blog = ? AND follower = ?")
            .bind(blog)
            .bind(follower)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every follower delivered through an inbox, across all blogs
    ///
    /// # Returns
    /// Number of removed rows
    pub async fn remove_followers_by_inbox(&self, inbox: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM followers WHERE inbox = ?")
            .bind(inbox)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Get all followers of a blog
    pub async fn get_followers(&self, blog: &str) -> Result<Vec<Follower>, AppError> {
        let followers = sqlx::query_as::<_, Follower>(
            "SELECT blog, follower, inbox, username, created_at FROM followers WHERE blog = ? ORDER BY created_at, follower",
        )
        .bind(blog)
        .fetch_all(&self.pool)
        .await?;

        Ok(followers)
    }

    /// Get distinct follower inboxes of a blog for delivery
    pub async fn get_follower_inboxes(&self, blog: &str) -> Result<Vec<String>, AppError> {
        let inboxes = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT inbox FROM followers WHERE blog = ? ORDER BY inbox",
        )
        .bind(blog)
        .fetch_all(&self.pool)
        .await?;

        Ok(inboxes)
    }

    // =========================================================================
    // Persistent cache
    // =========================================================================

    /// Read a persisted value
    pub async fn retrieve_persistent(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        let value =
            sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM persistent_cache WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value)
    }

    /// Store a value that survives restarts
    pub async fn store_persistent(&self, key: &str, value: &[u8]) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO persistent_cache (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Comments
    // =========================================================================

    /// Create a comment together with its provenance record
    ///
    /// # Returns
    /// ID of the created comment. Re-ingesting the same original
    /// (an `Update`) replaces the earlier comment.
    pub async fn create_comment(&self, comment: &NewComment) -> Result<String, AppError> {
        let mut tx = self.pool.begin().await?;

        let previous = sqlx::query_scalar::<_, String>(
            "SELECT comment_id FROM comment_origins WHERE original = ?",
        )
        .bind(&comment.original)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(previous_id) = previous {
            sqlx::query("DELETE FROM comment_origins WHERE original = ?")
                .bind(&comment.original)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM comments WHERE id = ?")
                .bind(&previous_id)
                .execute(&mut *tx)
                .await?;
        }

        let id = EntityId::new().0;
        sqlx::query(
            "INSERT INTO comments (id, target, content, name, website, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&comment.target)
        .bind(&comment.content)
        .bind(&comment.name)
        .bind(&comment.website)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO comment_origins (original, comment_id) VALUES (?, ?)")
            .bind(&comment.original)
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Look up the comment created from a remote object
    pub async fn comment_id_by_original(&self, original: &str) -> Result<Option<String>, AppError> {
        let id = sqlx::query_scalar::<_, String>(
            "SELECT comment_id FROM comment_origins WHERE original = ?",
        )
        .bind(original)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    /// Delete a comment and its provenance record in one transaction
    pub async fn delete_comment_with_origin(
        &self,
        comment_id: &str,
        original: &str,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM comment_origins WHERE original = ?")
            .bind(original)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(comment_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Get comments attached to a local content IRI
    pub async fn get_comments_for_target(&self, target: &str) -> Result<Vec<Comment>, AppError> {
        let comments = sqlx::query_as::<_, Comment>(
            "SELECT id, target, content, name, website, created_at FROM comments WHERE target = ? ORDER BY id",
        )
        .bind(target)
        .fetch_all(&self.pool)
        .await?;

        Ok(comments)
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Insert notification
    pub async fn insert_notification(&self, notification: &Notification) -> Result<(), AppError> {
        sqlx::query("INSERT INTO notifications (id, message, created_at) VALUES (?, ?, ?)")
            .bind(&notification.id)
            .bind(&notification.message)
            .bind(notification.created_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Get most recent notifications
    pub async fn get_notifications(&self, limit: i64) -> Result<Vec<Notification>, AppError> {
        let notifications = sqlx::query_as::<_, Notification>(
            "SELECT id, message, created_at FROM notifications ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }
}
