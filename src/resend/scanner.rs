//! The resend scanner: the active module driving resubmission.
//!
//! Two roles in one module:
//!
//! - As a passive handler it accepts the `resend` action: the message is
//!   enqueued into the backing [`ResendQueue`] with the retry budget and
//!   resubmit-action taken from the dispatch options.
//! - As an active module it owns a [`Poller`] that claims due items each
//!   tick, decrements their retry counter, and re-invokes the processor with
//!   the stored action.
//!
//! A failed attempt is quarantined: the claimed item is preserved in the
//! backend's error sink with the failure text, so a message never vanishes
//! just because its handler errored. For transient wire failures the sender
//! has already resubmitted the message with the remaining budget and the
//! cycle continues; the quarantined copy then records the failed attempt.
//! For every other failure the quarantined copy is what the operator works
//! from.
//!
//! ## Retry cutoff
//!
//! Whether a zero-retries item is still redispatched is an explicit
//! configuration choice. With [`quarantine_on_exhausted`] enabled, an
//! exhausted item is quarantined instead of dispatched; disabled (the
//! historical behavior), the counter is informational for operators and the
//! item is redispatched once more each time it comes due.
//!
//! [`quarantine_on_exhausted`]: ResendScanner::with_quarantine_on_exhausted

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::message::Message;
use crate::processor::poller::Poller;
use crate::processor::{action, ActiveModule, Module, ModuleError, Options, Processor};
use crate::resend::{ResendQueue, DEFAULT_RETRIES, OPTION_RESEND_ACTION, OPTION_RETRIES};

/// Active module scheduling and executing resends.
pub struct ResendScanner<Q> {
    queue: Q,
    processor: Weak<Processor>,
    poller: Poller,
    quarantine_on_exhausted: bool,
}

impl<Q> ResendScanner<Q>
where
    Q: ResendQueue + Clone + 'static,
{
    /// Create a scanner polling the queue at `interval`.
    ///
    /// Holds the processor weakly: the session owns the processor, and the
    /// scanner's background tick simply stops dispatching once it is gone.
    pub fn new(queue: Q, processor: &Arc<Processor>, interval: Duration) -> Self {
        Self {
            queue,
            processor: Arc::downgrade(processor),
            poller: Poller::new(interval),
            quarantine_on_exhausted: false,
        }
    }

    /// Quarantine items whose retry budget is exhausted instead of
    /// redispatching them.
    pub fn with_quarantine_on_exhausted(mut self, enabled: bool) -> Self {
        self.quarantine_on_exhausted = enabled;
        self
    }

    async fn tick(queue: Q, processor: Weak<Processor>, quarantine_on_exhausted: bool) {
        let due = match queue.scan_due(Utc::now()).await {
            Ok(due) => due,
            Err(err) => {
                error!(error = %err, "resend scan failed");
                return;
            }
        };

        for mut item in due {
            if quarantine_on_exhausted && item.retries == 0 {
                if let Err(err) = queue.quarantine(&item, "retries exhausted").await {
                    error!(error = %err, "failed to quarantine exhausted item");
                }
                continue;
            }

            let Some(processor) = processor.upgrade() else {
                warn!("processor gone, leaving remaining due items unsent");
                return;
            };

            item.retries = item.retries.saturating_sub(1);
            let mut options = Options::new();
            options.insert(OPTION_RETRIES.to_owned(), item.retries.to_string());

            let mut message = item.message.clone();
            match processor.handle(&item.action, &mut message, &options).await {
                Ok(()) => {
                    info!(
                        action = %item.action,
                        message_id = %message.message_id(),
                        retries_left = item.retries,
                        "resend dispatched"
                    );
                }
                Err(err) => {
                    warn!(
                        action = %item.action,
                        message_id = %message.message_id(),
                        retries_left = item.retries,
                        error = %err,
                        "resend attempt failed, quarantining"
                    );
                    if let Err(err) = queue.quarantine(&item, &err.to_string()).await {
                        error!(error = %err, "failed to quarantine item");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<Q> Module for ResendScanner<Q>
where
    Q: ResendQueue + Clone + 'static,
{
    fn name(&self) -> &'static str {
        "resend-scanner"
    }

    fn can_handle(&self, action_name: &str, _message: &Message, _options: &Options) -> bool {
        action_name == action::RESEND
    }

    async fn handle(
        &self,
        _action: &str,
        message: &mut Message,
        options: &Options,
    ) -> Result<(), ModuleError> {
        let retries = options
            .get(OPTION_RETRIES)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_RETRIES);
        let resend_action = options
            .get(OPTION_RESEND_ACTION)
            .map(String::as_str)
            .unwrap_or(action::SEND);

        self.queue
            .submit(resend_action, message.clone(), retries)
            .await
            .map_err(ModuleError::new)
    }
}

#[async_trait]
impl<Q> ActiveModule for ResendScanner<Q>
where
    Q: ResendQueue + Clone + 'static,
{
    async fn start(&self) -> Result<(), ModuleError> {
        let queue = self.queue.clone();
        let processor = self.processor.clone();
        let quarantine_on_exhausted = self.quarantine_on_exhausted;
        self.poller
            .start(move || {
                Self::tick(queue.clone(), processor.clone(), quarantine_on_exhausted)
            })
            .await;
        Ok(())
    }

    async fn stop(&self) {
        self.poller.stop().await;
    }
}
