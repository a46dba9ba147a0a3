//! blogfed - ActivityPub federation for a multi-blog publishing service
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Blog actor documents, inbox, followers collection        │
//! │  - WebFinger / host-meta                                    │
//! │  - Metrics, health                                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Federation Layer                          │
//! │  - HTTP Signatures, actor resolution                        │
//! │  - Inbox dispatch, publishing fan-out                       │
//! │  - Durable delivery queue + worker                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx): followers, key, comments, notifications   │
//! │  - Queue directory: one file per pending delivery           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers for ActivityPub and discovery
//! - `service`: Operator notifications
//! - `federation`: ActivityPub federation handling
//! - `data`: Database layer
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use federation::{
    ActivityDelivery, ActorKey, ActorResolver, DeliveryQueue, InboxProcessor, LocalBlog,
    Publisher, QueueWorker, RequestSigner, RetryPolicy, SignatureVerifier,
};

/// Application state shared across all handlers
///
/// This struct is cloned for each request and contains
/// shared resources like database pool, signer, and delivery queue.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Instance signing key
    pub key: Arc<ActorKey>,

    /// Remote actor resolver (signed fetches, optional cache)
    pub resolver: Arc<ActorResolver>,

    /// Inbound signature verification
    pub verifier: Arc<SignatureVerifier>,

    /// Durable outbound queue
    pub queue: Arc<DeliveryQueue>,

    /// Single-attempt signed sender used by the queue worker
    pub delivery: Arc<ActivityDelivery>,

    /// Inbound activity dispatcher
    pub inbox: Arc<InboxProcessor>,

    /// Outbound publishing and fan-out
    pub publisher: Arc<Publisher>,

    /// Operator notifications
    pub notifications: service::NotificationService,

    /// Configured blogs, ordered by name
    pub blogs: Arc<Vec<LocalBlog>>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Load or generate the signing key
    /// 3. Open the delivery queue
    /// 4. Wire up resolver, verifier, inbox and publisher
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = Arc::new(data::Database::connect(&config.database.path).await?);
        tracing::info!("Database connected");

        // 2. Signing key
        let key = Arc::new(ActorKey::load_or_generate(&db).await?);
        let signer = Arc::new(RequestSigner::new(key.clone()));

        // 3. Delivery queue
        let queue = Arc::new(DeliveryQueue::open(&config.queue.path)?);

        // 4. HTTP client shared by resolver and delivery
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;

        let federation = &config.federation;
        let resolver = Arc::new(ActorResolver::new(
            http_client.clone(),
            signer.clone(),
            federation.user_agent.clone(),
            Duration::from_secs(federation.fetch_timeout_secs),
            Duration::from_secs(federation.actor_cache_ttl_secs),
        ));
        let verifier = Arc::new(SignatureVerifier::new(
            resolver.clone(),
            federation.max_signature_age_secs,
        ));
        let delivery = Arc::new(ActivityDelivery::new(
            http_client,
            signer,
            federation.user_agent.clone(),
            config.queue.send_timeout(),
        ));

        let notifications = service::NotificationService::new(db.clone());
        let inbox = Arc::new(InboxProcessor::new(
            db.clone(),
            queue.clone(),
            notifications.clone(),
            config.server.base_url(),
        ));

        let blogs = LocalBlog::all(&config);
        let publisher = Arc::new(Publisher::new(
            db.clone(),
            queue.clone(),
            key.clone(),
            blogs.clone(),
            federation.fanout_concurrency,
        ));

        tracing::info!(blogs = blogs.len(), "Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            key,
            resolver,
            verifier,
            queue,
            delivery,
            inbox,
            publisher,
            notifications,
            blogs: Arc::new(blogs),
        })
    }

    /// Configured blog by name
    pub fn blog(&self, name: &str) -> Option<&LocalBlog> {
        self.blogs.iter().find(|blog| blog.name == name)
    }

    /// Spawn the single queue worker
    ///
    /// The worker stops when `shutdown` flips to true.
    pub fn spawn_queue_worker(
        &self,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let worker = Arc::new(QueueWorker::new(
            self.queue.clone(),
            self.delivery.clone(),
            self.db.clone(),
            RetryPolicy::from_config(&self.config.queue),
        ));
        tokio::spawn(worker.run(shutdown))
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::wellknown_router())
        .merge(api::activitypub_router(&state.blogs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}
