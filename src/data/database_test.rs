//! Database tests

use super::*;
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::connect(&db_path).await.unwrap();
    (db, temp_dir)
}

fn new_comment(original: &str, content: &str) -> NewComment {
    NewComment {
        target: "https://blog.example/posts/42".to_string(),
        content: content.to_string(),
        name: "Alice".to_string(),
        website: "https://remote.example/@alice".to_string(),
        original: original.to_string(),
    }
}

#[tokio::test]
async fn test_database_connection() {
    let (_db, _temp_dir) = create_test_db().await;
    // Connection successful if we get here without panicking
}

#[tokio::test]
async fn test_repeated_follow_overwrites_record() {
    let (db, _temp_dir) = create_test_db().await;

    db.add_follower(
        "main",
        "https://remote.example/users/alice",
        "https://remote.example/users/alice/inbox",
        "alice",
    )
    .await
    .unwrap();
    db.add_follower(
        "main",
        "https://remote.example/users/alice",
        "https://remote.example/inbox",
        "Alice",
    )
    .await
    .unwrap();

    let followers = db.get_followers("main").await.unwrap();
    assert_eq!(followers.len(), 1);
    assert_eq!(followers[0].inbox, "https://remote.example/inbox");
    assert_eq!(followers[0].username, "Alice");
}

#[tokio::test]
async fn test_followers_are_scoped_per_blog() {
    let (db, _temp_dir) = create_test_db().await;

    db.add_follower("main", "https://a.example/u/1", "https://a.example/inbox", "one")
        .await
        .unwrap();
    db.add_follower("de", "https://a.example/u/1", "https://a.example/inbox", "one")
        .await
        .unwrap();

    assert_eq!(db.get_followers("main").await.unwrap().len(), 1);
    assert_eq!(db.get_followers("de").await.unwrap().len(), 1);
    assert!(db.get_followers("other").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_follower_is_noop_when_absent() {
    let (db, _temp_dir) = create_test_db().await;

    let removed = db
        .remove_follower("main", "https://remote.example/users/nobody")
        .await
        .unwrap();
    assert!(!removed);

    db.add_follower("main", "https://a.example/u/1", "https://a.example/inbox", "one")
        .await
        .unwrap();
    assert!(db.remove_follower("main", "https://a.example/u/1").await.unwrap());
    assert!(db.get_followers("main").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_followers_by_inbox_spans_blogs() {
    let (db, _temp_dir) = create_test_db().await;

    db.add_follower("main", "https://a.example/u/1", "https://a.example/inbox", "one")
        .await
        .unwrap();
    db.add_follower("de", "https://a.example/u/2", "https://a.example/inbox", "two")
        .await
        .unwrap();
    db.add_follower("main", "https://b.example/u/3", "https://b.example/inbox", "three")
        .await
        .unwrap();

    let removed = db
        .remove_followers_by_inbox("https://a.example/inbox")
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let remaining = db.get_followers("main").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].follower, "https://b.example/u/3");
    assert!(db.get_followers("de").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_follower_inboxes_are_distinct() {
    let (db, _temp_dir) = create_test_db().await;

    db.add_follower("main", "https://a.example/u/1", "https://a.example/inbox", "one")
        .await
        .unwrap();
    db.add_follower("main", "https://a.example/u/2", "https://a.example/inbox", "two")
        .await
        .unwrap();
    db.add_follower("main", "https://b.example/u/3", "https://b.example/inbox", "three")
        .await
        .unwrap();

    let inboxes = db.get_follower_inboxes("main").await.unwrap();
    assert_eq!(
        inboxes,
        vec![
            "https://a.example/inbox".to_string(),
            "https://b.example/inbox".to_string()
        ]
    );
}

#[tokio::test]
async fn test_persistent_cache_roundtrip_and_overwrite() {
    let (db, _temp_dir) = create_test_db().await;

    assert!(db.retrieve_persistent("activitypub_key").await.unwrap().is_none());

    db.store_persistent("activitypub_key", b"first").await.unwrap();
    db.store_persistent("activitypub_key", b"second").await.unwrap();

    let value = db.retrieve_persistent("activitypub_key").await.unwrap();
    assert_eq!(value.as_deref(), Some(&b"second"[..]));
}

#[tokio::test]
async fn test_comment_lifecycle() {
    let (db, _temp_dir) = create_test_db().await;

    let id = db
        .create_comment(&new_comment("https://remote.example/notes/1", "<p>hi</p>"))
        .await
        .unwrap();

    assert_eq!(
        db.comment_id_by_original("https://remote.example/notes/1")
            .await
            .unwrap(),
        Some(id.clone())
    );

    let comments = db
        .get_comments_for_target("https://blog.example/posts/42")
        .await
        .unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].name, "Alice");

    db.delete_comment_with_origin(&id, "https://remote.example/notes/1")
        .await
        .unwrap();

    assert!(db
        .comment_id_by_original("https://remote.example/notes/1")
        .await
        .unwrap()
        .is_none());
    assert!(db
        .get_comments_for_target("https://blog.example/posts/42")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_reingested_original_replaces_comment() {
    let (db, _temp_dir) = create_test_db().await;

    let first = db
        .create_comment(&new_comment("https://remote.example/notes/1", "<p>v1</p>"))
        .await
        .unwrap();
    let second = db
        .create_comment(&new_comment("https://remote.example/notes/1", "<p>v2</p>"))
        .await
        .unwrap();
    assert_ne!(first, second);

    let comments = db
        .get_comments_for_target("https://blog.example/posts/42")
        .await
        .unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].content, "<p>v2</p>");
}

#[tokio::test]
async fn test_notifications_newest_first() {
    let (db, _temp_dir) = create_test_db().await;

    for message in ["first", "second"] {
        db.insert_notification(&Notification {
            id: EntityId::new().0,
            message: message.to_string(),
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
        // ULIDs generated within the same millisecond are not ordered
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let notifications = db.get_notifications(10).await.unwrap();
    assert_eq!(notifications.len(), 2);
    assert_eq!(notifications[0].message, "second");
}
