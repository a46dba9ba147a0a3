//! ActivityPub federation module
//!
//! Handles:
//! - Instance key lifecycle
//! - HTTP Signatures (signing and verification)
//! - Remote actor resolution and caching
//! - Inbound activity dispatch (inbox)
//! - Outbound publishing and fan-out (outbox)
//! - Durable delivery queue and its worker

mod activity;
mod actor;
mod delivery;
mod inbox;
mod key_cache;
mod keys;
mod outbox;
mod queue;
mod signature;

pub use activity::{Activity, Intent, PUBLIC_COLLECTION, RemoteObject};
pub use actor::{ActorResolver, LocalBlog, RemoteActor};
pub use delivery::{ACTIVITY_JSON, ActivityDelivery, builder, is_success_status};
pub use inbox::InboxProcessor;
pub use key_cache::ActorCache;
pub use keys::{ActorKey, KEY_CACHE_NAME};
pub use outbox::{Post, Publisher};
pub use queue::{
    DeliveryQueue, PendingDelivery, ProcessOutcome, QueueWorker, QueuedEntry, RetryPolicy,
};
pub use signature::{
    ParsedSignature, RequestSigner, SignatureHeaders, SignatureVerifier, check_signed_request,
    generate_digest, key_id_for, parse_signature_header, verify_parsed_signature,
};
