//! In-memory resend queue for testing or single-process deployments.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::warn;

use crate::message::Message;
use crate::resend::{ResendError, ResendItem, ResendQueue};

/// Process-lifetime resend queue.
///
/// Items live in a lock-protected vector; claiming drains due items under
/// the exclusive lock, so a claimed item can never be picked up twice.
/// Clones share the same queue.
#[derive(Clone)]
pub struct InMemoryResendQueue {
    delay: Duration,
    items: Arc<RwLock<Vec<ResendItem>>>,
}

impl InMemoryResendQueue {
    /// Create an empty queue with the given resend delay.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            items: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Number of queued (unclaimed) items.
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl ResendQueue for InMemoryResendQueue {
    async fn submit(
        &self,
        action: &str,
        message: Message,
        retries: u32,
    ) -> Result<(), ResendError> {
        let item = ResendItem {
            action: action.to_owned(),
            retries,
            not_before: Utc::now() + self.delay,
            message,
        };
        self.items.write().await.push(item);
        Ok(())
    }

    async fn scan_due(&self, now: DateTime<Utc>) -> Result<Vec<ResendItem>, ResendError> {
        let mut items = self.items.write().await;
        let mut due = Vec::new();
        items.retain(|item| {
            if item.not_before <= now {
                due.push(item.clone());
                false
            } else {
                true
            }
        });
        due.sort_by_key(|item| item.not_before);
        Ok(due)
    }

    async fn quarantine(&self, item: &ResendItem, reason: &str) -> Result<(), ResendError> {
        // No durable store to move the item to; the log line is all that
        // remains of it.
        warn!(
            action = %item.action,
            message_id = %item.message.message_id(),
            retries = item.retries,
            reason,
            "dropping failed resend item"
        );
        Ok(())
    }
}
