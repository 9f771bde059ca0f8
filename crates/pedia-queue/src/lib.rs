//! Offline action queue with bounded retry for Pedia.
//!
//! Actions that cannot be delivered while offline wait here and are
//! replayed in enqueue order when connectivity returns. Each item gets a
//! bounded number of delivery attempts; exhausted items are dropped and
//! logged rather than retried forever.

use chrono::{DateTime, Utc};
use pedia_storage::{Storage, StorageError, read_json, slot, write_json};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Delivery attempts an item gets when none is specified.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// What kind of action an item replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemKind {
    Chat,
    Calculation,
    Sync,
}

/// An action waiting for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: QueueItemKind,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl QueueItem {
    /// New item with default retry budget.
    pub fn new(kind: QueueItemKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Override the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Why a delivery attempt failed. The queue only logs it.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct DeliveryError(pub String);

/// Outcome counts of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub requeued: usize,
    pub dropped: usize,
}

impl DrainReport {
    /// Total items the pass attempted.
    pub fn attempted(&self) -> usize {
        self.delivered + self.requeued + self.dropped
    }
}

/// The persisted offline queue.
///
/// Exclusive access (`&mut self`) is the whole concurrency story: under
/// the cooperative scheduling model a drain pass and an enqueue can never
/// interleave, so items are neither lost nor duplicated.
pub struct OfflineQueue {
    storage: Arc<dyn Storage>,
    items: VecDeque<QueueItem>,
}

impl OfflineQueue {
    /// Create an empty queue.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            items: VecDeque::new(),
        }
    }

    /// Create a queue hydrated from the `offline-queue` slot.
    ///
    /// A missing, unreadable, or corrupt slot degrades to an empty queue.
    pub async fn load(storage: Arc<dyn Storage>) -> Self {
        let mut queue = Self::new(storage);
        match read_json::<Vec<QueueItem>>(queue.storage.as_ref(), slot::OFFLINE_QUEUE).await {
            Ok(Some(items)) => queue.items = items.into(),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Failed to load offline queue, starting empty: {e}");
            }
        }
        queue
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in delivery order.
    pub fn items(&self) -> impl Iterator<Item = &QueueItem> {
        self.items.iter()
    }

    /// Append an item and persist the queue.
    ///
    /// The retry count always starts at zero here, and a zero retry
    /// budget is treated as unset and replaced with the default.
    pub async fn enqueue(&mut self, mut item: QueueItem) -> Uuid {
        item.retry_count = 0;
        if item.max_retries == 0 {
            item.max_retries = DEFAULT_MAX_RETRIES;
        }
        let id = item.id;
        tracing::debug!(%id, kind = ?item.kind, "Enqueued offline item");
        self.items.push_back(item);
        self.persist_best_effort().await;
        id
    }

    /// Attempt delivery of every queued item, in enqueue order.
    ///
    /// Successful items are removed. Failed items get their retry count
    /// bumped and move to the back of the queue; items that exhaust their
    /// budget are dropped with a warning.
    pub async fn drain<F>(&mut self, mut deliver: F) -> DrainReport
    where
        F: AsyncFnMut(QueueItem) -> Result<(), DeliveryError>,
    {
        let mut report = DrainReport::default();
        // Only the items present when the pass started.
        let batch = self.items.len();
        for _ in 0..batch {
            let Some(mut item) = self.items.pop_front() else {
                break;
            };
            match deliver(item.clone()).await {
                Ok(()) => {
                    tracing::debug!(id = %item.id, "Delivered offline item");
                    report.delivered += 1;
                }
                Err(e) => {
                    item.retry_count += 1;
                    if item.retry_count >= item.max_retries {
                        tracing::warn!(
                            id = %item.id,
                            kind = ?item.kind,
                            attempts = item.retry_count,
                            "Dropping offline item after exhausting retries: {e}"
                        );
                        report.dropped += 1;
                    } else {
                        tracing::debug!(
                            id = %item.id,
                            attempt = item.retry_count,
                            "Delivery failed, requeueing: {e}"
                        );
                        report.requeued += 1;
                        self.items.push_back(item);
                    }
                }
            }
        }
        self.persist_best_effort().await;
        report
    }

    /// Discard all queued items.
    pub async fn clear(&mut self) {
        self.items.clear();
        self.persist_best_effort().await;
    }

    /// Write the queue to its slot.
    pub async fn persist(&self) -> Result<(), StorageError> {
        let items: Vec<&QueueItem> = self.items.iter().collect();
        write_json(self.storage.as_ref(), slot::OFFLINE_QUEUE, &items).await
    }

    async fn persist_best_effort(&self) {
        if let Err(e) = self.persist().await {
            tracing::warn!("Failed to persist offline queue, continuing in memory: {e}");
        }
    }
}
