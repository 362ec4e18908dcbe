//! Payload security seam.
//!
//! Signing, encryption, and compression are performed by a
//! [`CryptoProvider`] supplied by the host application, typically backed by
//! an S/MIME or CMS library with access to the local key store. The engine
//! itself only decides *which* operations a partnership requires and in what
//! order; certificate handling never enters this crate.
//!
//! Each operation consumes a [`Payload`] and returns the transformed one, so
//! the pipeline reads as a chain of `?`-propagated steps. Content-type
//! predicates classify an inbound payload so the receive path can unwrap
//! layers in the right order.

use async_trait::async_trait;
use tracing_error::SpanTrace;

use crate::message::Payload;

/// Provider of the cryptographic payload transformations.
///
/// Algorithm names are passed through verbatim from the partnership
/// attributes; their vocabulary is the provider's to define.
#[async_trait]
pub trait CryptoProvider: Send + Sync {
    /// Wrap the payload in a signature using the given signing algorithm.
    async fn sign(&self, payload: Payload, algorithm: &str) -> Result<Payload, CryptoError>;

    /// Check the signature and unwrap the signed content.
    async fn verify(&self, payload: Payload) -> Result<Payload, CryptoError>;

    /// Encrypt the payload for the receiving partner.
    async fn encrypt(&self, payload: Payload, algorithm: &str) -> Result<Payload, CryptoError>;

    /// Decrypt an enveloped payload.
    async fn decrypt(&self, payload: Payload) -> Result<Payload, CryptoError>;

    /// Compress the payload with the given compression type.
    async fn compress(&self, payload: Payload, compression: &str)
        -> Result<Payload, CryptoError>;

    /// Decompress a compressed payload.
    async fn decompress(&self, payload: Payload) -> Result<Payload, CryptoError>;
}

/// True when the content type marks a signed entity.
pub fn is_signed(payload: &Payload) -> bool {
    let ct = payload.content_type.to_ascii_lowercase();
    ct.starts_with("multipart/signed")
        || (ct.starts_with("application/pkcs7-mime") && ct.contains("signed-data"))
}

/// True when the content type marks an encrypted (enveloped) entity.
pub fn is_encrypted(payload: &Payload) -> bool {
    let ct = payload.content_type.to_ascii_lowercase();
    ct.starts_with("application/pkcs7-mime") && ct.contains("enveloped-data")
}

/// True when the content type marks a compressed entity.
pub fn is_compressed(payload: &Payload) -> bool {
    let ct = payload.content_type.to_ascii_lowercase();
    ct.starts_with("application/pkcs7-mime") && ct.contains("compressed-data")
}

/// Provider that performs no transformation at all.
///
/// For tests and deployments where a security gateway in front of the engine
/// already handles S/MIME. Every operation returns the payload unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

#[async_trait]
impl CryptoProvider for Passthrough {
    async fn sign(&self, payload: Payload, algorithm: &str) -> Result<Payload, CryptoError> {
        tracing::debug!(algorithm, "passthrough sign");
        Ok(payload)
    }

    async fn verify(&self, payload: Payload) -> Result<Payload, CryptoError> {
        Ok(payload)
    }

    async fn encrypt(&self, payload: Payload, algorithm: &str) -> Result<Payload, CryptoError> {
        tracing::debug!(algorithm, "passthrough encrypt");
        Ok(payload)
    }

    async fn decrypt(&self, payload: Payload) -> Result<Payload, CryptoError> {
        Ok(payload)
    }

    async fn compress(
        &self,
        payload: Payload,
        compression: &str,
    ) -> Result<Payload, CryptoError> {
        tracing::debug!(compression, "passthrough compress");
        Ok(payload)
    }

    async fn decompress(&self, payload: Payload) -> Result<Payload, CryptoError> {
        Ok(payload)
    }
}

/// Error returned by crypto operations.
///
/// Wraps the provider's error and captures a tracing span backtrace for
/// improved diagnostics.
#[derive(Debug)]
pub struct CryptoError {
    context: SpanTrace,
    source: tower::BoxError,
}

impl CryptoError {
    /// Wrap any provider error (or message string).
    pub fn new(source: impl Into<tower::BoxError>) -> Self {
        Self {
            context: SpanTrace::capture(),
            source: source.into(),
        }
    }
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Crypto error: {}", self.source)?;
        self.context.fmt(f)
    }
}

impl std::error::Error for CryptoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
