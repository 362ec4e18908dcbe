//! Message Integrity Check (MIC) computation and parsing.
//!
//! An AS2 receipt (MDN) echoes back a digest of the original payload so the
//! sender can confirm *what* was acknowledged. This module implements:
//!
//! - [`Mic`]: the digest/algorithm pair with its canonical wire form
//!   `base64(digest), algorithm-name`
//! - [`DigestAlgorithm`]: the digest algorithm with cross-version name
//!   reconciliation
//!
//! ## Algorithm name reconciliation
//!
//! Deployed AS2 peers emit two generations of algorithm spellings: the legacy
//! RFC 3851 names (`md5`, `sha1`, also seen as `rsa-md5`/`rsa-sha1`) and the
//! RFC 5751 names (`sha-1`, `sha-256`, ...). Interoperability requires
//! treating them as the same algorithm, so [`Mic`] equality is defined over
//! the canonicalized algorithm, never over the raw spelling.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Digest algorithm used for MIC computation.
///
/// Parsing accepts every historical spelling; formatting always emits the
/// RFC 5751 name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Look up an algorithm by any of its legacy or modern spellings.
    ///
    /// Matching is case-insensitive. Returns `None` for unrecognized names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "md5" | "rsa-md5" => Some(Self::Md5),
            "sha1" | "sha-1" | "rsa-sha1" => Some(Self::Sha1),
            "sha256" | "sha-256" => Some(Self::Sha256),
            "sha384" | "sha-384" => Some(Self::Sha384),
            "sha512" | "sha-512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Canonical (RFC 5751) name of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha-1",
            Self::Sha256 => "sha-256",
            Self::Sha384 => "sha-384",
            Self::Sha512 => "sha-512",
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A message integrity check: digest bytes plus the algorithm that produced
/// them.
///
/// Immutable value type. Two MICs are equal when their digest bytes match and
/// their algorithms are the same under name canonicalization, so a MIC parsed
/// from a legacy `sha1` spelling compares equal to one parsed from `sha-1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mic {
    digest: Vec<u8>,
    algorithm: DigestAlgorithm,
}

impl Mic {
    /// Compute the MIC of a payload with the given algorithm.
    pub fn compute(payload: &[u8], algorithm: DigestAlgorithm) -> Self {
        let digest = match algorithm {
            DigestAlgorithm::Md5 => Md5::digest(payload).to_vec(),
            DigestAlgorithm::Sha1 => Sha1::digest(payload).to_vec(),
            DigestAlgorithm::Sha256 => Sha256::digest(payload).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(payload).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(payload).to_vec(),
        };
        Self { digest, algorithm }
    }

    /// Parse the wire form `base64(digest), algorithm-name`.
    ///
    /// Exactly one comma is accepted. Inputs lacking the separator, lacking an
    /// algorithm token, containing extra separators, naming an unrecognized
    /// algorithm, or carrying invalid base64 are rejected with a
    /// [`MicFormatError`].
    pub fn parse(text: &str) -> Result<Self, MicFormatError> {
        let text = text.trim();
        let (digest_part, algorithm_part) = text
            .split_once(',')
            .ok_or_else(MicFormatError::missing_separator)?;

        if algorithm_part.contains(',') {
            return Err(MicFormatError::extra_separator());
        }

        let digest_part = digest_part.trim();
        if digest_part.is_empty() {
            return Err(MicFormatError::missing_digest());
        }

        let algorithm_name = algorithm_part.trim();
        if algorithm_name.is_empty() {
            return Err(MicFormatError::missing_algorithm());
        }

        let algorithm = DigestAlgorithm::from_name(algorithm_name)
            .ok_or_else(|| MicFormatError::unknown_algorithm(algorithm_name))?;

        let digest = STANDARD
            .decode(digest_part)
            .map_err(MicFormatError::invalid_base64)?;

        Ok(Self { digest, algorithm })
    }

    /// The raw digest bytes.
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// The digest algorithm.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }
}

impl std::fmt::Display for Mic {
    /// Canonical wire form, comma plus single space before the algorithm.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", STANDARD.encode(&self.digest), self.algorithm)
    }
}

impl std::str::FromStr for Mic {
    type Err = MicFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Error returned when a MIC string is malformed.
#[derive(Debug)]
pub struct MicFormatError {
    kind: MicFormatErrorKind,
}

#[derive(Debug)]
enum MicFormatErrorKind {
    MissingSeparator,
    ExtraSeparator,
    MissingDigest,
    MissingAlgorithm,
    UnknownAlgorithm(String),
    InvalidBase64(base64::DecodeError),
}

impl MicFormatError {
    fn missing_separator() -> Self {
        Self {
            kind: MicFormatErrorKind::MissingSeparator,
        }
    }

    fn extra_separator() -> Self {
        Self {
            kind: MicFormatErrorKind::ExtraSeparator,
        }
    }

    fn missing_digest() -> Self {
        Self {
            kind: MicFormatErrorKind::MissingDigest,
        }
    }

    fn missing_algorithm() -> Self {
        Self {
            kind: MicFormatErrorKind::MissingAlgorithm,
        }
    }

    fn unknown_algorithm(name: &str) -> Self {
        Self {
            kind: MicFormatErrorKind::UnknownAlgorithm(name.to_owned()),
        }
    }

    fn invalid_base64(err: base64::DecodeError) -> Self {
        Self {
            kind: MicFormatErrorKind::InvalidBase64(err),
        }
    }
}

impl std::fmt::Display for MicFormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            MicFormatErrorKind::MissingSeparator => {
                write!(f, "MIC lacks the ', algorithm' separator")
            }
            MicFormatErrorKind::ExtraSeparator => {
                write!(f, "MIC contains more than one comma")
            }
            MicFormatErrorKind::MissingDigest => write!(f, "MIC lacks a digest token"),
            MicFormatErrorKind::MissingAlgorithm => write!(f, "MIC lacks an algorithm token"),
            MicFormatErrorKind::UnknownAlgorithm(name) => {
                write!(f, "unrecognized MIC algorithm '{name}'")
            }
            MicFormatErrorKind::InvalidBase64(err) => {
                write!(f, "MIC digest is not valid base64: {err}")
            }
        }
    }
}

impl std::error::Error for MicFormatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            MicFormatErrorKind::InvalidBase64(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_and_modern_names_resolve_to_same_algorithm() {
        for (legacy, modern) in [
            ("rsa-md5", "md5"),
            ("rsa-sha1", "sha1"),
            ("sha1", "sha-1"),
            ("sha256", "sha-256"),
            ("sha384", "sha-384"),
            ("sha512", "sha-512"),
        ] {
            assert_eq!(
                DigestAlgorithm::from_name(legacy),
                DigestAlgorithm::from_name(modern),
                "{legacy} and {modern} must canonicalize identically",
            );
            assert!(DigestAlgorithm::from_name(legacy).is_some());
        }
    }

    #[test]
    fn mics_with_different_spellings_compare_equal() {
        let legacy = Mic::parse("VGVzdA==, sha1").unwrap();
        let modern = Mic::parse("VGVzdA==, sha-1").unwrap();
        let rsa = Mic::parse("VGVzdA==, rsa-sha1").unwrap();
        assert_eq!(legacy, modern);
        assert_eq!(legacy, rsa);

        let md5_legacy = Mic::parse("VGVzdA==, rsa-md5").unwrap();
        let md5_modern = Mic::parse("VGVzdA==, md5").unwrap();
        assert_eq!(md5_legacy, md5_modern);
    }

    #[test]
    fn different_digests_or_algorithms_are_not_equal() {
        let a = Mic::parse("VGVzdA==, sha1").unwrap();
        let b = Mic::parse("VGVzdQ==, sha1").unwrap();
        let c = Mic::parse("VGVzdA==, sha-256").unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn malformed_inputs_fail_with_format_error() {
        assert!(Mic::parse("").is_err());
        assert!(Mic::parse(",").is_err());
        assert!(Mic::parse("VGVzdA==").is_err());
        assert!(Mic::parse("VGVzdA==, blub").is_err());
        assert!(Mic::parse("VGVzdA==, sha1, sha1").is_err());
        assert!(Mic::parse(", sha1").is_err());
        assert!(Mic::parse("not base64!!, sha1").is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let mic = Mic::compute(b"payload bytes", DigestAlgorithm::Sha256);
        let parsed = Mic::parse(&mic.to_string()).unwrap();
        assert_eq!(mic, parsed);
    }

    #[test]
    fn parse_tolerates_missing_space_after_comma() {
        let tight = Mic::parse("VGVzdA==,sha1").unwrap();
        let spaced = Mic::parse("VGVzdA==, sha1").unwrap();
        assert_eq!(tight, spaced);
    }

    #[test]
    fn compute_produces_expected_digest_widths() {
        let payload = b"EDIFACT interchange";
        assert_eq!(Mic::compute(payload, DigestAlgorithm::Md5).digest().len(), 16);
        assert_eq!(Mic::compute(payload, DigestAlgorithm::Sha1).digest().len(), 20);
        assert_eq!(
            Mic::compute(payload, DigestAlgorithm::Sha256).digest().len(),
            32
        );
        assert_eq!(
            Mic::compute(payload, DigestAlgorithm::Sha512).digest().len(),
            64
        );
    }

    #[test]
    fn display_uses_canonical_algorithm_name() {
        let mic = Mic::parse("VGVzdA==, rsa-sha1").unwrap();
        assert_eq!(mic.to_string(), "VGVzdA==, sha-1");
    }
}
