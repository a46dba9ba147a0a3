//! Service layer
//!
//! Contains logic shared by HTTP handlers and the federation layer
//! that is not federation-specific.

mod notification;

pub use notification::NotificationService;
