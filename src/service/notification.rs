//! Notification service
//!
//! Operator notifications for follows, likes and announces. Every
//! notification is logged and stored; a storage failure is logged and
//! otherwise ignored.

use std::sync::Arc;

use chrono::Utc;

use crate::data::{Database, EntityId, Notification};
use crate::error::AppError;

/// Notification service
#[derive(Clone)]
pub struct NotificationService {
    db: Arc<Database>,
}

impl NotificationService {
    /// Create new notification service
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record a notification for the operator
    pub async fn notify(&self, message: impl Into<String>) {
        let notification = Notification {
            id: EntityId::new().0,
            message: message.into(),
            created_at: Utc::now(),
        };

        tracing::info!(notification = %notification.message, "Notification");

        if let Err(e) = self.db.insert_notification(&notification).await {
            tracing::warn!(error = %e, "Failed to store notification");
        }
    }

    /// Most recent notifications, newest first
    pub async fn recent(&self, limit: i64) -> Result<Vec<Notification>, AppError> {
        self.db.get_notifications(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn notify_persists_message() {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            Database::connect(&temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );
        let service = NotificationService::new(db);

        service
            .notify("alice (https://remote.example/users/alice) started following Main")
            .await;

        let recent = service.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert!(recent[0].message.contains("started following"));
    }
}
