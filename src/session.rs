//! The explicitly constructed engine context.
//!
//! A [`Session`] bundles the partnership store and the processor. There is
//! deliberately no global instance: embedders create as many independent
//! sessions as they need (one per tenant, one per test), wire modules into
//! the processor, and drive the lifecycle with [`start`](Session::start) and
//! [`shutdown`](Session::shutdown).

use std::sync::Arc;

use tracing::info;

use crate::partnership::PartnershipStore;
use crate::processor::{ModuleError, Processor};

/// An independent engine instance.
pub struct Session {
    partnerships: PartnershipStore,
    processor: Arc<Processor>,
}

impl Session {
    /// Create a session with an empty partnership store and no modules.
    pub fn new() -> Self {
        Self {
            partnerships: PartnershipStore::new(),
            processor: Arc::new(Processor::new()),
        }
    }

    /// The session's partnership store. Clones share the same storage.
    pub fn partnerships(&self) -> &PartnershipStore {
        &self.partnerships
    }

    /// The session's processor, shared with modules that re-dispatch.
    pub fn processor(&self) -> &Arc<Processor> {
        &self.processor
    }

    /// Start every registered active module.
    pub async fn start(&self) -> Result<(), ModuleError> {
        info!("starting session");
        self.processor.start_active().await
    }

    /// Stop every registered active module. Blocks until their background
    /// work has drained. Safe to call repeatedly, or without a prior
    /// [`start`](Session::start).
    pub async fn shutdown(&self) {
        info!("shutting down session");
        self.processor.stop_active().await;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::partnership::{id, Partnership};
    use crate::processor::{ActiveModule, Module, Options};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Lifecycle {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl Module for Lifecycle {
        fn name(&self) -> &'static str {
            "lifecycle"
        }

        fn can_handle(&self, _action: &str, _message: &Message, _options: &Options) -> bool {
            false
        }

        async fn handle(
            &self,
            _action: &str,
            _message: &mut Message,
            _options: &Options,
        ) -> Result<(), crate::processor::ModuleError> {
            unreachable!("never matches")
        }
    }

    #[async_trait]
    impl ActiveModule for Lifecycle {
        async fn start(&self) -> Result<(), ModuleError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn start_and_shutdown_drive_active_modules() {
        let session = Session::new();
        let module = Arc::new(Lifecycle {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        session.processor().register_active(module.clone()).await;

        session.start().await.unwrap();
        session.shutdown().await;
        // Shutdown twice must not fault.
        session.shutdown().await;

        assert_eq!(module.starts.load(Ordering::SeqCst), 1);
        assert_eq!(module.stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let a = Session::new();
        let b = Session::new();

        a.partnerships()
            .add(Partnership::new("only-in-a").with_sender_id(id::AS2_ID, "ACME"))
            .await;

        assert!(a.partnerships().by_name("only-in-a").await.is_some());
        assert!(b.partnerships().by_name("only-in-a").await.is_none());
    }
}
