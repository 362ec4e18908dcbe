//! Outbound HTTP transport seam.
//!
//! The engine never opens sockets itself: delivery goes through the
//! [`Transport`] trait, implemented by an HTTP client adapter in the host
//! application. Chunked encoding and socket lifecycle belong to that
//! adapter, not to this crate.
//!
//! [`InMemory`] is provided for tests and local pipelines: it records every
//! request and replays scripted responses.

mod inmemory;

use std::collections::HashMap;

use async_trait::async_trait;
use tracing_error::SpanTrace;

pub use inmemory::InMemory;

/// An outbound HTTP request as the engine sees it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// The response surfaced back to the engine.
///
/// For synchronous MDNs the adapter is responsible for lifting the receipt's
/// MIME-part fields (disposition, `Received-Content-MIC`) into the header
/// map; the engine does not parse multipart bodies.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Builder-style header setter.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Trait implemented by concrete HTTP client adapters.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a request and return the peer's response.
    async fn send_request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Error returned by transport operations.
///
/// Wraps the underlying adapter error and captures a tracing span backtrace
/// for improved diagnostics.
#[derive(Debug)]
pub struct TransportError {
    context: SpanTrace,
    source: tower::BoxError,
}

impl TransportError {
    /// Wrap any adapter error (or message string).
    pub fn new(source: impl Into<tower::BoxError>) -> Self {
        Self {
            context: SpanTrace::capture(),
            source: source.into(),
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Transport error: {}", self.source)?;
        self.context.fmt(f)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
