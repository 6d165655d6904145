//! Pending-request table: integer id → single-resolution completion slot.
//!
//! The caller registers an id before writing its request and awaits the
//! receiver; the reader loop resolves it. Every exit path (resolution,
//! timeout, cancellation) removes the entry.

use std::collections::HashMap;

use tokio::sync::{oneshot, Mutex};

use crate::errors::McpdError;
use crate::protocol::IncomingMessage;

/// What a pending request eventually receives.
pub type Completion = Result<IncomingMessage, McpdError>;

#[derive(Debug, Default)]
pub struct PendingTable {
    slots: Mutex<HashMap<u64, oneshot::Sender<Completion>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the receiving half of its slot.
    pub async fn register(&self, id: u64) -> oneshot::Receiver<Completion> {
        let (tx, rx) = oneshot::channel();
        self.slots.lock().await.insert(id, tx);
        rx
    }

    /// Deliver a response. Returns `false` when nothing was waiting on `id`.
    pub async fn resolve(&self, id: u64, message: IncomingMessage) -> bool {
        let slot = self.slots.lock().await.remove(&id);
        match slot {
            // A send error only means the caller gave up; the entry is gone either way.
            Some(tx) => {
                let _ = tx.send(Ok(message));
                true
            }
            None => false,
        }
    }

    /// Drop an entry without resolving it (timeout, failed write).
    pub async fn forget(&self, id: u64) -> bool {
        self.slots.lock().await.remove(&id).is_some()
    }

    /// Fail every outstanding request with `Cancelled` and empty the table.
    pub async fn cancel_all(&self, server: &str, reason: &str) -> usize {
        let drained: Vec<_> = self.slots.lock().await.drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(McpdError::Cancelled {
                server: server.to_string(),
                reason: reason.to_string(),
            }));
        }
        count
    }

    pub async fn contains(&self, id: u64) -> bool {
        self.slots.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }
}
