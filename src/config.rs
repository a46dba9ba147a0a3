//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use std::{net::IpAddr, path::PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub federation: FederationConfig,
    /// Blogs keyed by name (the name is the webfinger username)
    pub blogs: BTreeMap<String, BlogConfig>,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "blog.example.com"), may carry a port
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://blog.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }

    /// Domain without port, used in `acct:` addresses
    pub fn public_hostname(&self) -> String {
        normalized_server_host(&self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Durable outbound queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Directory holding one file per pending delivery
    pub path: PathBuf,
    /// Failed attempts tolerated before an inbox is dropped (default: 20)
    pub max_attempts: u32,
    /// Backoff per recorded failure in seconds (default: 600)
    pub backoff_step_secs: u64,
    /// Pause between worker iterations in milliseconds (default: 1000)
    pub pause_millis: u64,
    /// Hard timeout of a single outbound POST in seconds (default: 60)
    pub send_timeout_secs: u64,
}

impl QueueConfig {
    pub fn backoff_step(&self) -> Duration {
        Duration::from_secs(self.backoff_step_secs)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_millis)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

/// Federation tuning
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// User-Agent sent with every outbound request
    pub user_agent: String,
    /// Timeout for remote actor fetches in seconds (default: 30)
    pub fetch_timeout_secs: u64,
    /// Remote actor cache TTL in seconds; 0 disables caching (default: 0)
    pub actor_cache_ttl_secs: u64,
    /// Concurrent enqueue operations during fan-out (default: 8)
    pub fanout_concurrency: usize,
    /// Accepted skew of the signed `Date` header in seconds (default: 43200)
    pub max_signature_age_secs: i64,
    /// Delay before broadcasting profile updates at startup (default: 10)
    pub profile_update_delay_secs: u64,
}

/// A single publishing identity
#[derive(Debug, Clone, Deserialize)]
pub struct BlogConfig {
    /// Path below the base URL ("" for the root, otherwise "/name")
    #[serde(default)]
    pub path: String,
    /// Display name of the actor
    pub title: String,
    /// Actor summary
    #[serde(default)]
    pub description: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (BLOGFED__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/blogfed.db")?
            .set_default("queue.path", "data/queue")?
            .set_default("queue.max_attempts", 20)?
            .set_default("queue.backoff_step_secs", 600)?
            .set_default("queue.pause_millis", 1000)?
            .set_default("queue.send_timeout_secs", 60)?
            .set_default("federation.user_agent", "blogfed/0.1.0")?
            .set_default("federation.fetch_timeout_secs", 30)?
            .set_default("federation.actor_cache_ttl_secs", 0)?
            .set_default("federation.fanout_concurrency", 8)?
            .set_default("federation.max_signature_age_secs", 43_200)?
            .set_default("federation.profile_update_delay_secs", 10)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (BLOGFED__*)
            .add_source(
                Environment::with_prefix("BLOGFED")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Actor IRI of a configured blog
    pub fn blog_iri(&self, blog: &BlogConfig) -> String {
        format!("{}{}", self.server.base_url(), blog.path)
    }

    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        if self.blogs.is_empty() {
            return Err(AppError::Config(
                "at least one blog must be configured".to_string(),
            ));
        }

        for (name, blog) in &self.blogs {
            if !blog.path.is_empty() && !blog.path.starts_with('/') {
                return Err(AppError::Config(format!(
                    "blogs.{}.path must be empty or start with '/'",
                    name
                )));
            }

            if blog.path.contains([':', '*']) {
                return Err(AppError::Config(format!(
                    "blogs.{}.path must not contain ':' or '*'",
                    name
                )));
            }

            if let Some(reserved) = reserved_route_prefix(&blog.path) {
                return Err(AppError::Config(format!(
                    "blogs.{}.path collides with the built-in route {}",
                    name, reserved
                )));
            }
        }

        if self.queue.max_attempts == 0 {
            return Err(AppError::Config(
                "queue.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.federation.fanout_concurrency == 0 {
            return Err(AppError::Config(
                "federation.fanout_concurrency must be greater than 0".to_string(),
            ));
        }

        let mut actor_paths = std::collections::HashSet::new();
        for blog in self.blogs.values() {
            if !actor_paths.insert(blog.path.trim_end_matches('/')) {
                return Err(AppError::Config(format!(
                    "blog path '{}' is used by more than one blog",
                    blog.path
                )));
            }
        }

        if !self.server.protocol.eq_ignore_ascii_case("https")
            && !is_local_server_domain(&self.server.domain)
        {
            return Err(AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

/// Fixed routes served next to the blog actors
const RESERVED_ROUTE_PREFIXES: [&str; 4] = ["/health", "/metrics", "/.well-known", "/activitypub"];

fn reserved_route_prefix(path: &str) -> Option<&'static str> {
    let path = path.trim_end_matches('/');
    RESERVED_ROUTE_PREFIXES.into_iter().find(|prefix| {
        path == *prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
