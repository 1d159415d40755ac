//! Offline transmission queue.
//!
//! Scans that cannot be sent immediately are queued here, persisted
//! through the [`Storage`] collaborator, and drained in FIFO order once
//! the connection reports ready. Items that keep failing are frozen at
//! the retry ceiling and left in place for manual inspection rather than
//! silently dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use scanlink_barcode::{self as barcode, BarcodeFormat};
use scanlink_protocol::{BatchDataPayload, DataPayload, Message, MessagePayload};

use crate::config::QueueConfig;
use crate::events::EventKind;
use crate::manager::ConnectionManager;
use crate::storage::Storage;
use crate::QueueError;

/// One queued scan awaiting transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Stable id, unique across the queue's lifetime.
    pub id: String,
    /// Decoded barcode content.
    pub barcode: String,
    /// Symbology of the scan.
    pub format: BarcodeFormat,
    /// When the scan was queued.
    pub created_at: DateTime<Utc>,
    /// Failed send attempts so far.
    pub retry_count: u32,
    /// Whether the payload is compressed for transmission.
    pub compressed: bool,
    /// Caller-provided metadata forwarded with the payload.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

struct QueueState {
    items: Vec<QueueItem>,
    max_retries: u32,
    auto_retry: bool,
}

/// Durable FIFO of outbound scan records.
///
/// Cloneable; all clones share the same queue. The item list lives behind
/// an async mutex that is never held across a send, and drains are
/// guarded by an atomic flag so re-entry is a no-op.
#[derive(Clone)]
pub struct TransmissionQueue {
    state: Arc<Mutex<QueueState>>,
    draining: Arc<AtomicBool>,
    connection: ConnectionManager,
    storage: Arc<dyn Storage>,
    storage_key: Arc<str>,
    drain_interval: Duration,
}

impl TransmissionQueue {
    /// Create a queue over a connection and a storage backend.
    pub fn new(
        connection: ConnectionManager,
        storage: Arc<dyn Storage>,
        config: QueueConfig,
    ) -> Self {
        TransmissionQueue {
            state: Arc::new(Mutex::new(QueueState {
                items: Vec::new(),
                max_retries: config.max_retries,
                auto_retry: config.auto_retry,
            })),
            draining: Arc::new(AtomicBool::new(false)),
            connection,
            storage,
            storage_key: config.storage_key.into(),
            drain_interval: config.drain_interval,
        }
    }

    /// Restore the persisted queue.
    ///
    /// A missing or unparsable blob yields an empty queue; restore
    /// failures are never fatal.
    pub async fn load(&self) {
        let blob = match self.storage.get(&self.storage_key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "failed to read persisted queue");
                return;
            }
        };
        match serde_json::from_str::<Vec<QueueItem>>(&blob) {
            Ok(items) => {
                info!(count = items.len(), "restored persisted queue");
                self.state.lock().await.items = items;
            }
            Err(e) => warn!(error = %e, "discarding unparsable persisted queue"),
        }
    }

    /// Start the periodic auto-drain and the readiness watcher.
    pub fn start(&self) {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(queue.drain_interval);
            loop {
                tick.tick().await;
                if queue.connection.is_closed() {
                    break;
                }
                let (auto_retry, empty) = {
                    let state = queue.state.lock().await;
                    (state.auto_retry, state.items.is_empty())
                };
                if auto_retry && !empty && queue.connection.is_ready() {
                    queue.process_queue().await;
                }
            }
        });

        let queue = self.clone();
        tokio::spawn(async move {
            let Ok(mut sub) = queue.connection.subscribe(EventKind::Connected).await else {
                return;
            };
            while sub.events.recv().await.is_some() {
                queue.process_queue().await;
            }
        });
    }

    /// Validate and queue one scan.
    ///
    /// Persists the queue and, when the connection is ready and no drain
    /// is running, kicks off an immediate drain in the background.
    pub async fn add_to_queue(
        &self,
        data: &str,
        format: BarcodeFormat,
        compress: bool,
        extra: Map<String, Value>,
    ) -> Result<QueueItem, QueueError> {
        barcode::check(data, format)?;
        let item = QueueItem {
            id: Uuid::new_v4().to_string(),
            barcode: data.to_string(),
            format,
            created_at: Utc::now(),
            retry_count: 0,
            compressed: compress,
            extra,
        };
        self.state.lock().await.items.push(item.clone());
        self.persist().await;
        debug!(id = %item.id, format = %format, "queued scan");

        if self.connection.is_ready() && !self.draining.load(Ordering::SeqCst) {
            let queue = self.clone();
            tokio::spawn(async move {
                queue.process_queue().await;
            });
        }
        Ok(item)
    }

    /// Remove an item by id. Returns whether anything was removed.
    pub async fn remove_from_queue(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.state.lock().await;
            let before = state.items.len();
            state.items.retain(|item| item.id != id);
            state.items.len() != before
        };
        if removed {
            self.persist().await;
        }
        removed
    }

    /// One full drain pass over the queue.
    ///
    /// No-op when a drain is already running, the queue is empty, or the
    /// connection is not ready. Items at the retry ceiling are skipped in
    /// place; each failed send increments the item's retry count and the
    /// pass moves on. Persistence and the drain flag are cleaned up
    /// whatever happens inside the pass.
    pub async fn process_queue(&self) {
        if !self.connection.is_ready() {
            return;
        }
        let ids: Vec<String> = {
            let state = self.state.lock().await;
            state.items.iter().map(|item| item.id.clone()).collect()
        };
        if ids.is_empty() {
            return;
        }
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut sent = 0u32;
        let mut failed = 0u32;
        let mut skipped = 0u32;
        for id in ids {
            // Snapshot by id: the item may have been removed or mutated
            // since the pass started.
            let (item, max_retries) = {
                let state = self.state.lock().await;
                (
                    state.items.iter().find(|item| item.id == id).cloned(),
                    state.max_retries,
                )
            };
            let Some(item) = item else { continue };
            if item.retry_count >= max_retries {
                skipped += 1;
                continue;
            }
            match self.send_item(&item).await {
                Ok(()) => {
                    self.state.lock().await.items.retain(|i| i.id != id);
                    sent += 1;
                }
                Err(e) => {
                    debug!(id = %id, error = %e, "queued send failed");
                    let mut state = self.state.lock().await;
                    if let Some(entry) = state.items.iter_mut().find(|i| i.id == id) {
                        entry.retry_count += 1;
                    }
                    failed += 1;
                }
            }
        }

        // Unconditional cleanup: persist, then release the drain flag.
        self.persist().await;
        self.draining.store(false, Ordering::SeqCst);
        info!(sent, failed, skipped, "queue drain pass finished");
    }

    /// Send the matched items as one atomic batch.
    ///
    /// On success every included item is removed; on failure the queue is
    /// left untouched. Returns how many items were sent.
    pub async fn send_batch(&self, item_ids: &[String]) -> Result<u32, QueueError> {
        if !self.connection.is_ready() {
            return Err(QueueError::NotReady);
        }
        let matched: Vec<QueueItem> = {
            let state = self.state.lock().await;
            state
                .items
                .iter()
                .filter(|item| item_ids.contains(&item.id))
                .cloned()
                .collect()
        };
        if matched.is_empty() {
            return Err(QueueError::NoSuchItems);
        }

        let mut items = Vec::with_capacity(matched.len());
        for item in &matched {
            items.push(build_data_payload(item)?);
        }
        let payload = BatchDataPayload {
            batch_id: Uuid::new_v4().to_string(),
            item_count: items.len() as u32,
            items,
        };
        let message = Message::new(MessagePayload::BatchData(payload));
        match self.connection.send(message).await {
            Ok(_ack) => {
                let count = matched.len() as u32;
                {
                    let mut state = self.state.lock().await;
                    state
                        .items
                        .retain(|item| !matched.iter().any(|m| m.id == item.id));
                }
                self.persist().await;
                info!(count, "batch sent and acknowledged");
                Ok(count)
            }
            Err(e) => Err(QueueError::SendFailed(e.to_string())),
        }
    }

    /// Change the per-item retry ceiling.
    pub async fn set_max_retries(&self, max_retries: u32) {
        self.state.lock().await.max_retries = max_retries;
    }

    /// Enable or disable the periodic auto-drain.
    pub async fn set_auto_retry(&self, auto_retry: bool) {
        self.state.lock().await.auto_retry = auto_retry;
    }

    /// Whether a drain pass is currently running.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Number of queued items, frozen ones included.
    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }

    /// Snapshot of all queued items in FIFO order.
    pub async fn items(&self) -> Vec<QueueItem> {
        self.state.lock().await.items.clone()
    }

    /// Items frozen at the retry ceiling, awaiting manual inspection.
    pub async fn stalled_items(&self) -> Vec<QueueItem> {
        let state = self.state.lock().await;
        state
            .items
            .iter()
            .filter(|item| item.retry_count >= state.max_retries)
            .cloned()
            .collect()
    }

    async fn send_item(&self, item: &QueueItem) -> Result<(), QueueError> {
        let payload = build_data_payload(item)?;
        let message = Message::new(MessagePayload::Data(payload));
        self.connection
            .send(message)
            .await
            .map(|_ack| ())
            .map_err(|e| QueueError::SendFailed(e.to_string()))
    }

    /// Best-effort write-through of the full queue.
    async fn persist(&self) {
        let blob = {
            let state = self.state.lock().await;
            match serde_json::to_string(&state.items) {
                Ok(blob) => blob,
                Err(e) => {
                    warn!(error = %e, "failed to serialize queue");
                    return;
                }
            }
        };
        if let Err(e) = self.storage.set(&self.storage_key, &blob).await {
            warn!(error = %e, "failed to persist queue");
        }
    }
}

/// Build the wire payload for one item, compressing when asked.
fn build_data_payload(item: &QueueItem) -> Result<DataPayload, QueueError> {
    let (content, compressed) = barcode::pack_content(&item.barcode, item.compressed)?;
    Ok(DataPayload {
        kind: "barcode".to_string(),
        data: content,
        format: item.format.to_string(),
        timestamp: item.created_at.timestamp_millis() as f64 / 1000.0,
        compressed,
        extra: item.extra.clone(),
    })
}
