//! Resend queue abstractions and backend drivers.
//!
//! A send module that fails hands its message to this subsystem instead of
//! dropping it: the message is queued as a [`ResendItem`] that becomes
//! eligible again after a configured delay, and the [`scanner`] periodically
//! claims due items and re-submits them through the processor.
//!
//! ## Responsibilities
//!
//! - Queue "redo this send action later" items with a not-before time
//! - Hand out due items exactly once, even under concurrent scans
//! - Quarantine items whose attempt failed, whose budget is exhausted, or
//!   whose content cannot be decoded, preserving them in the error sink
//!
//! ## Components
//!
//! - [`ResendQueue`]: trait shared by the interchangeable backends
//! - [`inmemory::InMemoryResendQueue`]: process-lifetime queue
//! - [`directory::DirectoryResendQueue`]: durable, survives restarts
//! - [`scanner::ResendScanner`]: the active module driving resubmission

pub mod directory;
pub mod inmemory;
pub mod scanner;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing_error::SpanTrace;

use crate::message::Message;

/// Option key: remaining retries for the queued send.
pub const OPTION_RETRIES: &str = "retries";
/// Option key: the action to dispatch when the item is resubmitted.
pub const OPTION_RESEND_ACTION: &str = "resend_action";

/// Retry budget used when the caller supplies none.
pub const DEFAULT_RETRIES: u32 = 3;

/// One queued resend: the action to redo, the remaining retry budget, the
/// time before which the item must not be resubmitted, and the original
/// message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResendItem {
    pub action: String,
    pub retries: u32,
    pub not_before: DateTime<Utc>,
    pub message: Message,
}

/// Contract shared by the in-memory and durable backends.
#[async_trait]
pub trait ResendQueue: Send + Sync {
    /// Enqueue a message; it becomes eligible at `now + configured delay`.
    async fn submit(
        &self,
        action: &str,
        message: Message,
        retries: u32,
    ) -> Result<(), ResendError>;

    /// Claim every item whose not-before time has passed.
    ///
    /// Claiming is atomic: an item is returned by exactly one scan even when
    /// scans run concurrently. Claimed items are no longer in the queue; a
    /// successfully redispatched one continues its cycle through resubmission,
    /// a failed one is passed to [`quarantine`](ResendQueue::quarantine).
    async fn scan_due(&self, now: DateTime<Utc>) -> Result<Vec<ResendItem>, ResendError>;

    /// Move a failed item to the error sink.
    ///
    /// The durable backend writes it to the configured error location with a
    /// best-effort descriptive filename; the in-memory backend logs and
    /// drops it, since no durable store exists.
    async fn quarantine(&self, item: &ResendItem, reason: &str) -> Result<(), ResendError>;
}

/// Error returned by resend queue operations.
#[derive(Debug)]
pub struct ResendError {
    context: SpanTrace,
    kind: ResendErrorKind,
}

#[derive(Debug)]
enum ResendErrorKind {
    Io(std::io::Error),
    Serde(serde_json::Error),
}

impl std::fmt::Display for ResendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ResendErrorKind::Io(err) => writeln!(f, "Resend queue I/O error: {err}"),
            ResendErrorKind::Serde(err) => writeln!(f, "Resend item encoding error: {err}"),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for ResendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ResendErrorKind::Io(err) => Some(err),
            ResendErrorKind::Serde(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ResendError {
    fn from(err: std::io::Error) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: ResendErrorKind::Io(err),
        }
    }
}

impl From<serde_json::Error> for ResendError {
    fn from(err: serde_json::Error) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: ResendErrorKind::Serde(err),
        }
    }
}
