//! Data layer module
//!
//! Handles all data persistence:
//! - Follower relation per blog
//! - Persistent key-value entries (signing key)
//! - Comments ingested from remote replies
//! - Operator notifications

mod database;
mod models;

pub use database::Database;
pub use models::*;

#[cfg(test)]
mod database_test;
