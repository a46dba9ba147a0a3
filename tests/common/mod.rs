//! Common test utilities for E2E tests
//!
//! `TestServer` runs the full router with a running queue worker.
//! `RemoteServer` stands in for another instance: it serves Alice's actor
//! document and records what arrives at her shared inbox.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use blogfed::federation::{ActorKey, KEY_CACHE_NAME, RequestSigner, key_id_for};
use blogfed::{AppState, config};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;

pub const LOCAL_PRIVATE_KEY: &str = include_str!("../fixtures/local_private_key.pem");
pub const REMOTE_PRIVATE_KEY: &str = include_str!("../fixtures/remote_private_key.pem");
pub const REMOTE_PUBLIC_KEY: &str = include_str!("../fixtures/remote_public_key.pem");

/// Actor on a server the tests never contact
pub const VICTIM_ACTOR: &str = "https://victim.example/users/bob";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
    shutdown: watch::Sender<bool>,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        // Create temporary directory for database and queue
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Bind first so the public domain carries the real port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut blogs = BTreeMap::new();
        blogs.insert(
            "main".to_string(),
            config::BlogConfig {
                path: String::new(),
                title: "Main".to_string(),
                description: "The main blog".to_string(),
            },
        );
        blogs.insert(
            "de".to_string(),
            config::BlogConfig {
                path: "/de".to_string(),
                title: "Deutsch".to_string(),
                description: String::new(),
            },
        );

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: addr.port(),
                domain: addr.to_string(),
                protocol: "http".to_string(),
            },
            database: config::DatabaseConfig {
                path: db_path.clone(),
            },
            queue: config::QueueConfig {
                path: temp_dir.path().join("queue"),
                max_attempts: 20,
                backoff_step_secs: 600,
                pause_millis: 10,
                send_timeout_secs: 5,
            },
            federation: config::FederationConfig {
                user_agent: "blogfed-test".to_string(),
                fetch_timeout_secs: 5,
                actor_cache_ttl_secs: 0,
                fanout_concurrency: 4,
                max_signature_age_secs: 43_200,
                profile_update_delay_secs: 0,
            },
            blogs,
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };
        config.validate().unwrap();

        // Seed the fixture key so no 2048-bit key is generated per test
        {
            let db = blogfed::data::Database::connect(&db_path).await.unwrap();
            db.store_persistent(KEY_CACHE_NAME, LOCAL_PRIVATE_KEY.as_bytes())
                .await
                .unwrap();
        }

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        let (shutdown, shutdown_rx) = watch::channel(false);
        state.spawn_queue_worker(shutdown_rx);

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        // Build router and spawn server in background
        let app = blogfed::build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: format!("http://{}", addr),
            state,
            _temp_dir: temp_dir,
            client,
            shutdown,
        }
    }

    /// Get URL for a path on this server
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Inbox URL of a blog
    pub fn inbox_url(&self, blog: &str) -> String {
        self.url(&format!("/activitypub/inbox/{}", blog))
    }

    /// POST a body signed by `signer` on behalf of `actor_iri`
    pub async fn signed_post(
        &self,
        url: &str,
        body: &[u8],
        signer: &RequestSigner,
        actor_iri: &str,
    ) -> reqwest::Response {
        let headers = signer
            .sign("POST", url, Some(body), &key_id_for(actor_iri))
            .unwrap();

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/activity+json")
            .header("Date", headers.date)
            .header("Host", headers.host)
            .header("Signature", headers.signature);
        if let Some(digest) = headers.digest {
            request = request.header("Digest", digest);
        }

        request.body(body.to_vec()).send().await.unwrap()
    }

    /// Wait until the delivery queue is empty
    pub async fn wait_for_empty_queue(&self) -> bool {
        for _ in 0..250 {
            if self.state.queue.is_empty().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Signer holding the remote fixture key
pub fn remote_signer() -> RequestSigner {
    RequestSigner::new(Arc::new(ActorKey::from_pem(REMOTE_PRIVATE_KEY).unwrap()))
}

#[derive(Clone)]
struct RemoteState {
    base: String,
    inbox_status: StatusCode,
    received: Arc<Mutex<Vec<Value>>>,
}

/// Stand-in for a remote instance hosting Alice
pub struct RemoteServer {
    pub base: String,
    received: Arc<Mutex<Vec<Value>>>,
}

impl RemoteServer {
    /// Start a remote instance whose inbox answers with `inbox_status`
    pub async fn start(inbox_status: StatusCode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let received = Arc::new(Mutex::new(Vec::new()));

        let app = Router::new()
            .route("/users/alice", get(alice_document))
            .route("/users/mallory", get(impostor_document))
            .route("/inbox", post(shared_inbox))
            .with_state(RemoteState {
                base: base.clone(),
                inbox_status,
                received: received.clone(),
            });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base, received }
    }

    pub fn alice(&self) -> String {
        format!("{}/users/alice", self.base)
    }

    /// Actor whose document claims to be someone else
    pub fn impostor(&self) -> String {
        format!("{}/users/mallory", self.base)
    }

    pub fn shared_inbox(&self) -> String {
        format!("{}/inbox", self.base)
    }

    /// Activities received at the shared inbox so far
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }
}

async fn alice_document(State(state): State<RemoteState>) -> Json<Value> {
    let id = format!("{}/users/alice", state.base);
    Json(serde_json::json!({
        "@context": [
            "https://www.w3.org/ns/activitystreams",
            "https://w3id.org/security/v1"
        ],
        "type": "Person",
        "id": id,
        "preferredUsername": "alice",
        "name": "Alice",
        "url": format!("{}/@alice", state.base),
        "inbox": format!("{}/inbox", id),
        "endpoints": { "sharedInbox": format!("{}/inbox", state.base) },
        "publicKey": {
            "id": format!("{}#main-key", id),
            "owner": id,
            "publicKeyPem": REMOTE_PUBLIC_KEY
        }
    }))
}

/// Signed with the same key as Alice, but claims a third-party id
async fn impostor_document(State(state): State<RemoteState>) -> Json<Value> {
    Json(serde_json::json!({
        "type": "Person",
        "id": VICTIM_ACTOR,
        "preferredUsername": "bob",
        "inbox": format!("{}/inbox", state.base),
        "publicKey": {
            "id": format!("{}#main-key", VICTIM_ACTOR),
            "owner": VICTIM_ACTOR,
            "publicKeyPem": REMOTE_PUBLIC_KEY
        }
    }))
}

async fn shared_inbox(State(state): State<RemoteState>, body: Bytes) -> StatusCode {
    if let Ok(activity) = serde_json::from_slice::<Value>(&body) {
        state.received.lock().unwrap().push(activity);
    }
    state.inbox_status
}
