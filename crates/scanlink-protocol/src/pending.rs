//! Pending-request correlation table.
//!
//! Every message sent with acknowledgment gets an entry keyed by its id.
//! The entry resolves on a matching `ACK`, rejects on a matching `NACK`,
//! and is swept out with a timeout error once it is older than the
//! message timeout.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::{AckPayload, ProtocolError};

/// Outcome of an acknowledged send.
pub type AckResult = Result<AckPayload, ProtocolError>;

/// Future side of a registered request.
#[derive(Debug)]
pub struct AckWait {
    rx: oneshot::Receiver<AckResult>,
}

impl AckWait {
    /// Wait for the acknowledgment outcome.
    pub async fn wait(self) -> AckResult {
        match self.rx.await {
            Ok(result) => result,
            // The table was dropped wholesale; treat as a reset.
            Err(_) => Err(ProtocolError::ConnectionReset),
        }
    }
}

struct PendingRequest {
    created_at: Instant,
    reply: oneshot::Sender<AckResult>,
}

/// Table of requests awaiting acknowledgment, keyed by message id.
#[derive(Default)]
pub struct PendingTable {
    entries: HashMap<String, PendingRequest>,
}

impl PendingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        PendingTable::default()
    }

    /// Register a request. At most one entry per id may exist.
    pub fn register(&mut self, id: &str) -> Result<AckWait, ProtocolError> {
        if self.entries.contains_key(id) {
            return Err(ProtocolError::DuplicateId(id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            id.to_string(),
            PendingRequest {
                created_at: Instant::now(),
                reply: tx,
            },
        );
        Ok(AckWait { rx })
    }

    /// Resolve the entry for `id`. Returns whether an entry matched.
    pub fn resolve(&mut self, id: &str, ack: AckPayload) -> bool {
        match self.entries.remove(id) {
            Some(entry) => {
                let _ = entry.reply.send(Ok(ack));
                true
            }
            None => false,
        }
    }

    /// Reject the entry for `id`. Returns whether an entry matched.
    pub fn reject(&mut self, id: &str, error: ProtocolError) -> bool {
        match self.entries.remove(id) {
            Some(entry) => {
                let _ = entry.reply.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Reject every entry older than `timeout` with a timeout error.
    /// Returns the ids that were swept.
    pub fn sweep(&mut self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.created_at) >= timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            if let Some(entry) = self.entries.remove(id) {
                let _ = entry.reply.send(Err(ProtocolError::Timeout));
            }
        }
        expired
    }

    /// Reject every entry. Used on reset and disconnect.
    pub fn reject_all(&mut self, error: ProtocolError) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            let _ = entry.reply.send(Err(error.clone()));
        }
        count
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no outstanding requests.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn ack_for(id: &str) -> AckPayload {
        AckPayload {
            original_message_id: id.to_string(),
            extra: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_resolve_delivers_ack() {
        let mut table = PendingTable::new();
        let wait = table.register("m-1").expect("register");
        assert!(table.resolve("m-1", ack_for("m-1")));
        assert!(table.is_empty());
        let ack = wait.wait().await.expect("resolved");
        assert_eq!(ack.original_message_id, "m-1");
    }

    #[tokio::test]
    async fn test_reject_delivers_error() {
        let mut table = PendingTable::new();
        let wait = table.register("m-1").expect("register");
        assert!(table.reject("m-1", ProtocolError::Nack("bad".to_string())));
        let err = wait.wait().await.expect_err("rejected");
        assert_eq!(err, ProtocolError::Nack("bad".to_string()));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut table = PendingTable::new();
        let _wait = table.register("m-1").expect("register");
        let err = table.register("m-1").expect_err("duplicate");
        assert_eq!(err, ProtocolError::DuplicateId("m-1".to_string()));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unmatched_resolve_is_noop() {
        let mut table = PendingTable::new();
        assert!(!table.resolve("nope", ack_for("nope")));
        assert!(!table.reject("nope", ProtocolError::Timeout));
    }

    #[tokio::test]
    async fn test_sweep_times_out_old_entries() {
        let mut table = PendingTable::new();
        let old = table.register("old").expect("register");
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fresh = table.register("fresh").expect("register");

        let swept = table.sweep(Duration::from_millis(10));
        assert_eq!(swept, vec!["old".to_string()]);
        assert_eq!(table.len(), 1);

        let err = old.wait().await.expect_err("timed out");
        assert_eq!(err, ProtocolError::Timeout);

        // The fresh entry is untouched and still resolvable
        assert!(table.resolve("fresh", ack_for("fresh")));
        assert!(fresh.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_reject_all_clears_table() {
        let mut table = PendingTable::new();
        let a = table.register("a").expect("register");
        let b = table.register("b").expect("register");
        assert_eq!(table.reject_all(ProtocolError::ConnectionReset), 2);
        assert!(table.is_empty());
        assert_eq!(a.wait().await.expect_err("reset"), ProtocolError::ConnectionReset);
        assert_eq!(b.wait().await.expect_err("reset"), ProtocolError::ConnectionReset);
    }

    #[tokio::test]
    async fn test_dropped_table_reads_as_reset() {
        let mut table = PendingTable::new();
        let wait = table.register("m-1").expect("register");
        drop(table);
        let err = wait.wait().await.expect_err("table gone");
        assert_eq!(err, ProtocolError::ConnectionReset);
    }
}
