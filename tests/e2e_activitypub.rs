//! E2E tests for ActivityPub endpoints
//!
//! Actor documents, the followers collection, and the inbox's
//! rejection paths.

mod common;

use axum::http::StatusCode;
use common::{RemoteServer, TestServer, VICTIM_ACTOR, remote_signer};
use serde_json::{Value, json};

#[tokio::test]
async fn test_blog_actor_documents() {
    let server = TestServer::new().await;

    for (path, name) in [("/", "main"), ("/de", "de")] {
        let response = server
            .client
            .get(&server.url(path))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()["content-type"],
            "application/activity+json"
        );

        let json: Value = response.json().await.unwrap();
        let iri = server.url(path).trim_end_matches('/').to_string();
        assert_eq!(json["type"], "Person");
        assert_eq!(json["id"], iri);
        assert_eq!(json["preferredUsername"], name);
        assert_eq!(
            json["inbox"],
            server.url(&format!("/activitypub/inbox/{}", name))
        );
        assert_eq!(json["publicKey"]["id"], format!("{}#main-key", iri));
        assert!(
            json["publicKey"]["publicKeyPem"]
                .as_str()
                .unwrap()
                .starts_with("-----BEGIN PUBLIC KEY-----")
        );
    }
}

#[tokio::test]
async fn test_followers_collection() {
    let server = TestServer::new().await;
    server
        .state
        .db
        .add_follower(
            "main",
            "https://remote.example/users/alice",
            "https://remote.example/inbox",
            "Alice",
        )
        .await
        .unwrap();

    let response = server
        .client
        .get(&server.url("/activitypub/followers/main"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["type"], "OrderedCollection");
    assert_eq!(json["totalItems"], 1);
    assert_eq!(json["orderedItems"][0], "https://remote.example/users/alice");

    let empty: Value = server
        .client
        .get(&server.url("/activitypub/followers/de"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(empty["totalItems"], 0);

    let unknown = server
        .client
        .get(&server.url("/activitypub/followers/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), 404);
}

#[tokio::test]
async fn test_inbox_unknown_blog_is_404() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(&server.inbox_url("nope"))
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_inbox_requires_signature() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(&server.inbox_url("main"))
        .header("Content-Type", "application/activity+json")
        .json(&json!({
            "type": "Follow",
            "actor": "https://remote.example/users/alice",
            "object": server.url("")
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_inbox_rejects_tampered_body() {
    let server = TestServer::new().await;
    let remote = RemoteServer::start(StatusCode::ACCEPTED).await;
    let signer = remote_signer();

    let signed_body = serde_json::to_vec(&json!({
        "type": "Follow",
        "actor": remote.alice(),
        "object": server.url("")
    }))
    .unwrap();
    let headers = signer
        .sign(
            "POST",
            &server.inbox_url("main"),
            Some(&signed_body),
            &format!("{}#main-key", remote.alice()),
        )
        .unwrap();

    let mut tampered = signed_body.clone();
    tampered.push(b' ');

    let response = server
        .client
        .post(&server.inbox_url("main"))
        .header("Date", headers.date)
        .header("Host", headers.host)
        .header("Digest", headers.digest.unwrap())
        .header("Signature", headers.signature)
        .body(tampered)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert!(server.state.db.get_followers("main").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_inbox_rejects_actor_mismatch() {
    let server = TestServer::new().await;
    let remote = RemoteServer::start(StatusCode::ACCEPTED).await;

    let body = serde_json::to_vec(&json!({
        "type": "Follow",
        "actor": "https://remote.example/users/mallory",
        "object": server.url("")
    }))
    .unwrap();

    let response = server
        .signed_post(&server.inbox_url("main"), &body, &remote_signer(), &remote.alice())
        .await;

    assert_eq!(response.status(), 403);
    assert!(server.state.db.get_followers("main").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_inbox_rejects_key_whose_document_claims_another_actor() {
    let server = TestServer::new().await;
    let remote = RemoteServer::start(StatusCode::ACCEPTED).await;

    let body = serde_json::to_vec(&json!({
        "type": "Follow",
        "actor": VICTIM_ACTOR,
        "object": server.url("")
    }))
    .unwrap();

    // Signed with keyId <impostor>#main-key; the document there says it is Bob
    let response = server
        .signed_post(&server.inbox_url("main"), &body, &remote_signer(), &remote.impostor())
        .await;

    assert_eq!(response.status(), 401);
    assert!(server.state.db.get_followers("main").await.unwrap().is_empty());
    assert!(server.wait_for_empty_queue().await);
}

#[tokio::test]
async fn test_inbox_rejects_malformed_activity() {
    let server = TestServer::new().await;
    let remote = RemoteServer::start(StatusCode::ACCEPTED).await;

    for body in [b"not json".to_vec(), br#"{"actor":"x"}"#.to_vec()] {
        let response = server
            .signed_post(&server.inbox_url("main"), &body, &remote_signer(), &remote.alice())
            .await;
        assert_eq!(response.status(), 400);
    }
}

#[tokio::test]
async fn test_inbox_accepts_unsupported_activity() {
    let server = TestServer::new().await;
    let remote = RemoteServer::start(StatusCode::ACCEPTED).await;

    let body = serde_json::to_vec(&json!({
        "type": "Move",
        "actor": remote.alice(),
        "object": remote.alice()
    }))
    .unwrap();

    let response = server
        .signed_post(&server.inbox_url("de"), &body, &remote_signer(), &remote.alice())
        .await;

    assert_eq!(response.status(), 200);
}
