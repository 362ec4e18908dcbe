//! Named-action dispatch across registered processor modules.
//!
//! The [`Processor`] is the sole entry point transport adapters use: an
//! action name (an open string namespace, see [`action`]) plus a mutable
//! [`Message`] fan out to **every** registered module whose
//! [`Module::can_handle`] accepts the pair.
//!
//! ## Dispatch rules
//!
//! - Modules run in deterministic registration order
//! - A failing module never suppresses the remaining matching modules; all
//!   failures are collected into one [`ProcessorError`] carrying the ordered
//!   list
//! - Zero matching modules is **not** an error; callers that must treat "no
//!   handler" as failure check [`Processor::has_handler`] separately
//!
//! Modules may mutate the message (attach an MDN, update attributes) and may
//! have their own side effects; the processor does not police them.

pub mod poller;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, instrument};
use tracing_error::SpanTrace;

use crate::message::Message;

/// Conventional action names. The namespace is open; modules may define more.
pub mod action {
    pub const SEND: &str = "send";
    pub const RECEIVE: &str = "receive";
    pub const RESEND: &str = "resend";
    pub const STORE: &str = "store";
    pub const STORE_MDN: &str = "store-mdn";
}

/// Open string-keyed option map passed through dispatch.
pub type Options = HashMap<String, String>;

/// A named, polymorphic processing unit.
///
/// Passive modules implement only this trait; modules owning background work
/// additionally implement [`ActiveModule`].
#[async_trait]
pub trait Module: Send + Sync {
    /// Stable name used in logs and aggregate errors.
    fn name(&self) -> &'static str;

    /// Capability test: is this module willing to handle `action` for this
    /// message?
    fn can_handle(&self, action: &str, message: &Message, options: &Options) -> bool;

    /// Perform the action. Low-level failures are wrapped into
    /// [`ModuleError`] and surface only through the processor's aggregate.
    async fn handle(
        &self,
        action: &str,
        message: &mut Message,
        options: &Options,
    ) -> Result<(), ModuleError>;
}

/// A module owning a background task (e.g. a resend scanner).
///
/// `start` and `stop` are idempotent: `stop` before `start`, or repeated
/// `stop`, must not fault. `stop` blocks until in-flight background work has
/// returned.
#[async_trait]
pub trait ActiveModule: Module {
    async fn start(&self) -> Result<(), ModuleError>;
    async fn stop(&self);
}

/// Registration-ordered module dispatcher.
///
/// Modules are registered at session setup and never removed at runtime;
/// the list lives behind a read/write lock so dispatch takes only a shared
/// lock.
#[derive(Default)]
pub struct Processor {
    modules: RwLock<Vec<Arc<dyn Module>>>,
    active: RwLock<Vec<Arc<dyn ActiveModule>>>,
}

impl Processor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a passive module at the end of the dispatch order.
    pub async fn register(&self, module: Arc<dyn Module>) {
        self.modules.write().await.push(module);
    }

    /// Register an active module: it joins the dispatch order *and* the set
    /// started/stopped with the session lifecycle.
    pub async fn register_active<T>(&self, module: Arc<T>)
    where
        T: ActiveModule + 'static,
    {
        self.modules.write().await.push(module.clone());
        self.active.write().await.push(module);
    }

    /// Dispatch `action` to every matching module in registration order.
    ///
    /// Collects all per-module failures; returns the aggregate error if one
    /// or more modules failed, success otherwise (including when nothing
    /// matched).
    #[instrument(skip(self, message, options), fields(message_id = %message.message_id()))]
    pub async fn handle(
        &self,
        action: &str,
        message: &mut Message,
        options: &Options,
    ) -> Result<(), ProcessorError> {
        let modules: Vec<Arc<dyn Module>> = self.modules.read().await.clone();

        let mut matched = 0usize;
        let mut failures = Vec::new();
        for module in modules {
            if !module.can_handle(action, message, options) {
                continue;
            }
            matched += 1;
            if let Err(err) = module.handle(action, message, options).await {
                error!(module = module.name(), error = %err, "module failed");
                failures.push(ModuleFailure {
                    module: module.name(),
                    error: err,
                });
            }
        }

        debug!(matched, failed = failures.len(), "dispatch complete");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProcessorError::new(action, failures))
        }
    }

    /// Whether any registered module would handle this action.
    pub async fn has_handler(&self, action: &str, message: &Message, options: &Options) -> bool {
        self.modules
            .read()
            .await
            .iter()
            .any(|m| m.can_handle(action, message, options))
    }

    /// Start every registered active module, in registration order.
    pub async fn start_active(&self) -> Result<(), ModuleError> {
        let active: Vec<Arc<dyn ActiveModule>> = self.active.read().await.clone();
        for module in active {
            module.start().await?;
        }
        Ok(())
    }

    /// Stop every registered active module. Blocks until their background
    /// work has drained. Safe to call repeatedly.
    pub async fn stop_active(&self) {
        let active: Vec<Arc<dyn ActiveModule>> = self.active.read().await.clone();
        for module in active {
            module.stop().await;
        }
    }
}

/// Error produced by a single module.
///
/// Wraps the underlying failure and captures a tracing span backtrace for
/// improved diagnostics.
#[derive(Debug)]
pub struct ModuleError {
    context: SpanTrace,
    source: tower::BoxError,
}

impl ModuleError {
    /// Wrap any error (or message string) as a module failure.
    pub fn new(source: impl Into<tower::BoxError>) -> Self {
        Self {
            context: SpanTrace::capture(),
            source: source.into(),
        }
    }
}

impl std::fmt::Display for ModuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.source)?;
        self.context.fmt(f)
    }
}

impl std::error::Error for ModuleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// One entry in a [`ProcessorError`]: which module failed, and how.
#[derive(Debug)]
pub struct ModuleFailure {
    pub module: &'static str,
    pub error: ModuleError,
}

/// Aggregate of 1..N module failures from a single dispatch.
///
/// The processor does not distinguish total from partial failure at the type
/// level; callers that care inspect [`failures`](ProcessorError::failures).
#[derive(Debug)]
pub struct ProcessorError {
    context: SpanTrace,
    action: String,
    failures: Vec<ModuleFailure>,
}

impl ProcessorError {
    fn new(action: &str, failures: Vec<ModuleFailure>) -> Self {
        Self {
            context: SpanTrace::capture(),
            action: action.to_owned(),
            failures,
        }
    }

    /// The dispatched action.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// The ordered list of module failures.
    pub fn failures(&self) -> &[ModuleFailure] {
        &self.failures
    }
}

impl std::fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} module(s) failed handling action '{}':",
            self.failures.len(),
            self.action
        )?;
        for failure in &self.failures {
            write!(f, " [{}: {}]", failure.module, failure.error)?;
        }
        writeln!(f)?;
        self.context.fmt(f)
    }
}

impl std::error::Error for ProcessorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|f| &f.error as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        name: &'static str,
        handles: &'static str,
        fail: bool,
        calls: AtomicUsize,
    }

    impl Recorder {
        fn new(name: &'static str, handles: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                handles,
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Module for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn can_handle(&self, action: &str, _message: &Message, _options: &Options) -> bool {
            action == self.handles
        }

        async fn handle(
            &self,
            _action: &str,
            message: &mut Message,
            _options: &Options,
        ) -> Result<(), ModuleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            message.set_attribute(self.name, "handled");
            if self.fail {
                Err(ModuleError::new(format!("{} broke", self.name)))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn aggregate_error_contains_only_matching_failures() {
        let processor = Processor::new();
        let first = Recorder::new("first", action::SEND, true);
        let second = Recorder::new("second", action::STORE, true);
        let third = Recorder::new("third", action::SEND, false);
        processor.register(first.clone()).await;
        processor.register(second.clone()).await;
        processor.register(third.clone()).await;

        let mut message = Message::new();
        let err = processor
            .handle(action::SEND, &mut message, &Options::new())
            .await
            .unwrap_err();

        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.failures()[0].module, "first");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        // The failure in module one did not suppress module three.
        assert_eq!(third.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_matching_modules_is_success() {
        let processor = Processor::new();
        processor
            .register(Recorder::new("store", action::STORE, false))
            .await;

        let mut message = Message::new();
        let options = Options::new();
        assert!(processor
            .handle(action::SEND, &mut message, &options)
            .await
            .is_ok());
        assert!(!processor.has_handler(action::SEND, &message, &options).await);
        assert!(processor.has_handler(action::STORE, &message, &options).await);
    }

    #[tokio::test]
    async fn modules_run_in_registration_order_and_may_mutate() {
        let processor = Processor::new();
        processor
            .register(Recorder::new("a", action::STORE, false))
            .await;
        processor
            .register(Recorder::new("b", action::STORE, false))
            .await;

        let mut message = Message::new();
        processor
            .handle(action::STORE, &mut message, &Options::new())
            .await
            .unwrap();
        assert_eq!(message.attribute("a"), Some("handled"));
        assert_eq!(message.attribute("b"), Some("handled"));
    }

    #[tokio::test]
    async fn aggregate_message_concatenates_all_failures() {
        let processor = Processor::new();
        processor
            .register(Recorder::new("one", action::SEND, true))
            .await;
        processor
            .register(Recorder::new("two", action::SEND, true))
            .await;

        let mut message = Message::new();
        let err = processor
            .handle(action::SEND, &mut message, &Options::new())
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("one broke"));
        assert!(text.contains("two broke"));
        assert_eq!(err.failures().len(), 2);
        assert_eq!(err.action(), action::SEND);
    }
}
