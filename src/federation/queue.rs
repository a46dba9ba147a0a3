//! Durable outbound queue
//!
//! Pending deliveries live in a directory, one JSON file per entry, named
//! by a zero-padded sequence number so that directory order is queue
//! order. An entry is written to a temporary file, synced and renamed
//! into place before `enqueue` returns, so it is either complete on disk
//! or absent.
//!
//! A single [`QueueWorker`] drains the queue. Failed entries are written
//! back at the tail with their attempt count and the time of the failure;
//! entries still inside their backoff window are moved to the tail
//! untouched. Neither step gives a strict time ordering across inboxes.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, watch};

use super::delivery::ActivityDelivery;
use crate::data::Database;
use crate::error::AppError;
use crate::metrics::{DELIVERY_ATTEMPTS_TOTAL, QUEUE_DEPTH};

const ENTRY_EXTENSION: &str = "json";
const TEMP_PREFIX: &str = ".tmp-";

/// A message waiting to be delivered to one inbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelivery {
    /// Blog actor the request is signed as
    pub actor: String,
    /// Destination inbox
    pub inbox: String,
    /// Serialized activity
    #[serde(with = "message_bytes")]
    pub message: Vec<u8>,
    /// Failed attempts so far
    pub attempts: u32,
    /// Time of the last failure, unset until the first one
    pub last_attempt: Option<DateTime<Utc>>,
}

impl PendingDelivery {
    pub fn new(actor: String, inbox: String, message: Vec<u8>) -> Self {
        Self {
            actor,
            inbox,
            message,
            attempts: 0,
            last_attempt: None,
        }
    }

    /// Whether the backoff window after the last failure is still open
    pub fn is_backing_off(&self, now: DateTime<Utc>, step: Duration) -> bool {
        let Some(last_attempt) = self.last_attempt else {
            return false;
        };
        let step = chrono::Duration::from_std(step).unwrap_or(chrono::Duration::MAX);
        let window = step.checked_mul(self.attempts as i32).unwrap_or(chrono::Duration::MAX);
        match last_attempt.checked_add_signed(window) {
            Some(retry_at) => now < retry_at,
            None => true,
        }
    }
}

mod message_bytes {
    use super::{BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Head of the queue as handed to the worker
#[derive(Debug, Clone)]
pub struct QueuedEntry {
    seq: u64,
    pub delivery: PendingDelivery,
}

struct QueueState {
    /// Sequence numbers of entries on disk, oldest first
    entries: VecDeque<u64>,
    next_seq: u64,
}

/// Crash-surviving FIFO of pending deliveries
pub struct DeliveryQueue {
    dir: PathBuf,
    state: Mutex<QueueState>,
    notify: Notify,
}

fn entry_file_name(seq: u64) -> String {
    format!("{:020}.{}", seq, ENTRY_EXTENSION)
}

fn parse_entry_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(&format!(".{}", ENTRY_EXTENSION))?;
    if stem.len() != 20 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

fn read_entry(path: &Path) -> Result<PendingDelivery, AppError> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::Storage(format!("Corrupt queue entry {}: {}", path.display(), e)))
}

fn write_entry(dir: &Path, seq: u64, delivery: &PendingDelivery) -> Result<(), AppError> {
    let bytes = serde_json::to_vec(delivery)
        .map_err(|e| AppError::Storage(format!("Failed to encode queue entry: {}", e)))?;

    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)?;
    file.write_all(&bytes)?;
    file.as_file().sync_all()?;
    file.persist(dir.join(entry_file_name(seq)))
        .map_err(|e| AppError::Storage(format!("Failed to persist queue entry: {}", e)))?;

    Ok(())
}

fn remove_entry_file(dir: &Path, seq: u64) -> Result<(), AppError> {
    match std::fs::remove_file(dir.join(entry_file_name(seq))) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Run queue file I/O on the blocking pool
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Queue I/O task failed: {}", e)))?
}

/// Keep `entries` ordered by sequence number
fn insert_sorted(entries: &mut VecDeque<u64>, seq: u64) {
    let pos = entries.partition_point(|&s| s < seq);
    entries.insert(pos, seq);
}

impl DeliveryQueue {
    /// Open the queue directory, creating it if needed
    ///
    /// Leftover temporary files are removed, unreadable entries are
    /// discarded with a warning, and numbering resumes after the highest
    /// existing entry.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut sequences = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if name.starts_with(TEMP_PREFIX) {
                tracing::debug!(file = %name, "Removing interrupted queue write");
                std::fs::remove_file(entry.path())?;
                continue;
            }

            let Some(seq) = parse_entry_file_name(&name) else {
                continue;
            };

            match read_entry(&entry.path()) {
                Ok(_) => sequences.push(seq),
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding unreadable queue entry");
                    std::fs::remove_file(entry.path())?;
                }
            }
        }

        sequences.sort_unstable();
        let next_seq = sequences.last().map_or(1, |last| last + 1);

        tracing::info!(
            path = %dir.display(),
            pending = sequences.len(),
            "Opened delivery queue"
        );
        QUEUE_DEPTH.set(sequences.len() as i64);

        Ok(Self {
            dir,
            state: Mutex::new(QueueState {
                entries: sequences.into(),
                next_seq,
            }),
            notify: Notify::new(),
        })
    }

    /// Append a delivery durably
    ///
    /// Returns once the entry is on disk.
    pub async fn enqueue(&self, actor: &str, inbox: &str, message: Vec<u8>) -> Result<(), AppError> {
        let delivery = PendingDelivery::new(actor.to_string(), inbox.to_string(), message);
        self.push(delivery).await?;
        tracing::debug!(inbox = %inbox, actor = %actor, "Queued delivery");
        Ok(())
    }

    /// Write `delivery` under a fresh sequence number and publish it
    ///
    /// Only the number is taken under the lock; the write runs on the
    /// blocking pool, so concurrent pushes may land out of order and are
    /// inserted by sequence number.
    async fn push(&self, delivery: PendingDelivery) -> Result<(), AppError> {
        let seq = {
            let mut state = self.state.lock().await;
            let seq = state.next_seq;
            state.next_seq += 1;
            seq
        };

        let dir = self.dir.clone();
        blocking(move || write_entry(&dir, seq, &delivery)).await?;

        {
            let mut state = self.state.lock().await;
            insert_sorted(&mut state.entries, seq);
            QUEUE_DEPTH.set(state.entries.len() as i64);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Forget `seq` and delete its file
    async fn discard(&self, seq: u64) -> Result<(), AppError> {
        {
            let mut state = self.state.lock().await;
            state.entries.retain(|&s| s != seq);
            QUEUE_DEPTH.set(state.entries.len() as i64);
        }
        let dir = self.dir.clone();
        blocking(move || remove_entry_file(&dir, seq)).await
    }

    /// Head of the queue without removing it, or `None` when empty
    pub async fn try_peek(&self) -> Result<Option<QueuedEntry>, AppError> {
        loop {
            let Some(seq) = self.state.lock().await.entries.front().copied() else {
                return Ok(None);
            };

            let path = self.dir.join(entry_file_name(seq));
            match blocking(move || read_entry(&path)).await {
                Ok(delivery) => return Ok(Some(QueuedEntry { seq, delivery })),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping unreadable queue entry");
                    self.discard(seq).await?;
                }
            }
        }
    }

    /// Head of the queue, waiting while the queue is empty
    pub async fn peek(&self) -> Result<QueuedEntry, AppError> {
        loop {
            let notified = self.notify.notified();
            if let Some(entry) = self.try_peek().await? {
                return Ok(entry);
            }
            notified.await;
        }
    }

    /// Remove an entry permanently
    pub async fn remove(&self, entry: &QueuedEntry) -> Result<(), AppError> {
        self.discard(entry.seq).await
    }

    /// Move an entry to the tail with its current contents
    ///
    /// The new tail is written before the old file is removed, so a crash
    /// in between leaves a duplicate rather than a lost delivery.
    pub async fn requeue(&self, entry: QueuedEntry) -> Result<(), AppError> {
        let QueuedEntry { seq, delivery } = entry;
        self.push(delivery).await?;
        self.discard(seq).await
    }

    /// Number of pending entries
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of every pending delivery, oldest first
    ///
    /// Entries removed while the snapshot is read are skipped.
    pub async fn pending(&self) -> Result<Vec<PendingDelivery>, AppError> {
        let sequences: Vec<u64> = self.state.lock().await.entries.iter().copied().collect();
        let dir = self.dir.clone();

        blocking(move || {
            sequences
                .into_iter()
                .map(|seq| dir.join(entry_file_name(seq)))
                .filter(|path| path.exists())
                .map(|path| read_entry(&path))
                .collect()
        })
        .await
    }
}

/// Result of one worker iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Sent and removed
    Delivered,
    /// Backoff window still open, moved to the tail untouched
    Deferred,
    /// Failed, written back with the new attempt count
    Retrying { attempts: u32 },
    /// Failed beyond the retry ceiling, removed with its inbox's followers
    Dropped,
}

impl ProcessOutcome {
    fn label(&self) -> &'static str {
        match self {
            ProcessOutcome::Delivered => "success",
            ProcessOutcome::Deferred => "deferred",
            ProcessOutcome::Retrying { .. } => "retry",
            ProcessOutcome::Dropped => "dropped",
        }
    }
}

/// Retry policy of the worker
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Failures tolerated; the next one drops the entry
    pub max_attempts: u32,
    /// Backoff per recorded failure
    pub backoff_step: Duration,
    /// Pause after every iteration
    pub pause: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &crate::config::QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_step: config.backoff_step(),
            pause: config.pause(),
        }
    }
}

/// The single consumer of the delivery queue
pub struct QueueWorker {
    queue: Arc<DeliveryQueue>,
    delivery: Arc<ActivityDelivery>,
    db: Arc<Database>,
    policy: RetryPolicy,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<DeliveryQueue>,
        delivery: Arc<ActivityDelivery>,
        db: Arc<Database>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            delivery,
            db,
            policy,
        }
    }

    /// Run the delivery loop until `shutdown` flips to true
    ///
    /// Shutdown is observed while waiting for work and during the pause;
    /// an in-flight send always completes. Pending entries stay on disk.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            max_attempts = self.policy.max_attempts,
            backoff_step_secs = self.policy.backoff_step.as_secs(),
            "Delivery worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let entry = tokio::select! {
                _ = shutdown.changed() => break,
                entry = self.queue.peek() => entry,
            };

            match entry {
                Ok(entry) => {
                    if let Err(e) = self.process_entry(entry, Utc::now()).await {
                        tracing::error!(error = %e, "Delivery queue iteration failed");
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to read delivery queue"),
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.policy.pause) => {}
            }
        }

        tracing::info!("Delivery worker stopped");
    }

    /// Process the head entry, if any, as of `now`
    pub async fn process_next(&self, now: DateTime<Utc>) -> Result<Option<ProcessOutcome>, AppError> {
        match self.queue.try_peek().await? {
            Some(entry) => self.process_entry(entry, now).await.map(Some),
            None => Ok(None),
        }
    }

    async fn process_entry(
        &self,
        mut entry: QueuedEntry,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, AppError> {
        let outcome = if entry.delivery.is_backing_off(now, self.policy.backoff_step) {
            self.queue.requeue(entry).await?;
            ProcessOutcome::Deferred
        } else {
            let delivery = &entry.delivery;
            match self
                .delivery
                .send_signed(&delivery.actor, &delivery.inbox, &delivery.message)
                .await
            {
                Ok(()) => {
                    self.queue.remove(&entry).await?;
                    ProcessOutcome::Delivered
                }
                Err(e) => {
                    entry.delivery.attempts += 1;
                    let attempts = entry.delivery.attempts;

                    if attempts > self.policy.max_attempts {
                        tracing::error!(
                            inbox = %entry.delivery.inbox,
                            attempts,
                            error = %e,
                            "Giving up on inbox"
                        );
                        self.queue.remove(&entry).await?;
                        match self.db.remove_followers_by_inbox(&entry.delivery.inbox).await {
                            Ok(removed) => tracing::info!(
                                inbox = %entry.delivery.inbox,
                                removed,
                                "Removed followers of unreachable inbox"
                            ),
                            Err(e) => tracing::warn!(
                                inbox = %entry.delivery.inbox,
                                error = %e,
                                "Failed to remove followers of unreachable inbox"
                            ),
                        }
                        ProcessOutcome::Dropped
                    } else {
                        tracing::warn!(
                            inbox = %entry.delivery.inbox,
                            attempts,
                            error = %e,
                            "Delivery failed, will retry"
                        );
                        entry.delivery.last_attempt = Some(now);
                        self.queue.requeue(entry).await?;
                        ProcessOutcome::Retrying { attempts }
                    }
                }
            }
        };

        DELIVERY_ATTEMPTS_TOTAL
            .with_label_values(&[outcome.label()])
            .inc();
        Ok(outcome)
    }
}
