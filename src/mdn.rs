//! Receipt (MDN) construction and validation.
//!
//! Two halves, one per direction:
//!
//! - [`create_receipt`] builds the [`Mdn`] for an inbound message, honoring
//!   the sender's `Disposition-Notification-Options` when choosing the MIC
//!   algorithm.
//! - [`validate_receipt`] checks a receipt that came back for an outbound
//!   message: the disposition must acknowledge success and the echoed
//!   `Received-Content-MIC` must match the digest recorded at send time.
//!
//! The MIC recorded for an outbound message travels as the message attribute
//! [`PENDING_MIC`] so it survives serialization into the resend queue.

use chrono::Utc;
use rand::Rng;
use tracing::warn;
use tracing_error::SpanTrace;

use crate::disposition::options::DispositionOptions;
use crate::disposition::{DispositionError, DispositionFormatError, DispositionType};
use crate::message::{header, Mdn, Message};
use crate::mic::{DigestAlgorithm, Mic, MicFormatError};
use crate::partnership::id;

/// Message attribute holding the MIC an outbound message expects to see
/// echoed in its receipt.
pub const PENDING_MIC: &str = "pending_mic";

/// Build a receipt for an inbound message.
///
/// The MIC algorithm is the first one named in the message's
/// `Disposition-Notification-Options` micalg list; without that header (or
/// without a micalg attribute) the historical default `sha1` applies. A
/// requested algorithm this engine does not implement is an error, since
/// silently substituting another would make the receipt unverifiable for the
/// peer. Messages without a payload produce a receipt without a MIC.
pub fn create_receipt(
    message: &Message,
    disposition: DispositionType,
) -> Result<Mdn, MdnError> {
    let algorithm = match requested_micalg(message)? {
        Some(algorithm) => algorithm,
        None => DigestAlgorithm::Sha1,
    };

    let mic = message
        .payload()
        .map(|payload| Mic::compute(&payload.body, algorithm).to_string());

    let mut headers = std::collections::HashMap::new();
    // The receipt travels in the opposite direction of its subject.
    if let Some(to) = message.header(header::AS2_TO) {
        headers.insert(header::AS2_FROM.to_owned(), to.to_owned());
    }
    if let Some(from) = message.header(header::AS2_FROM) {
        headers.insert(header::AS2_TO.to_owned(), from.to_owned());
    }
    headers.insert(
        header::ORIGINAL_MESSAGE_ID.to_owned(),
        message.message_id().to_owned(),
    );

    Ok(Mdn {
        message_id: receipt_message_id(message),
        headers,
        disposition: disposition.to_string(),
        mic,
        text: receipt_text(message, &disposition),
    })
}

/// Validate a receipt returned for an outbound message.
///
/// Fails when the disposition is malformed or signals a failure, or when the
/// echoed MIC disagrees with the [`PENDING_MIC`] recorded at send time. A
/// receipt missing its MIC while one was expected is logged and accepted:
/// unsigned receipts legitimately omit it.
pub fn validate_receipt(original: &Message, mdn: &Mdn) -> Result<(), MdnError> {
    let disposition = DispositionType::parse(&mdn.disposition)
        .map_err(|err| MdnError::format(err, &mdn.message_id))?;
    disposition
        .validate(original.message_id())
        .map_err(|err| MdnError::disposition(err, &mdn.message_id))?;

    let Some(expected_raw) = original.attribute(PENDING_MIC) else {
        return Ok(());
    };
    let expected =
        Mic::parse(expected_raw).map_err(|err| MdnError::mic(err, &mdn.message_id))?;

    let Some(received_raw) = &mdn.mic else {
        warn!(
            message_id = %original.message_id(),
            "receipt carries no MIC although one was expected"
        );
        return Ok(());
    };
    let received =
        Mic::parse(received_raw).map_err(|err| MdnError::mic(err, &mdn.message_id))?;

    if received != expected {
        return Err(MdnError::mismatch(expected, received, &mdn.message_id));
    }
    Ok(())
}

fn requested_micalg(message: &Message) -> Result<Option<DigestAlgorithm>, MdnError> {
    let Some(raw) = message.header(header::DISPOSITION_NOTIFICATION_OPTIONS) else {
        return Ok(None);
    };
    let options = DispositionOptions::parse(raw)
        .map_err(|err| MdnError::new(MdnErrorKind::Options(err), message.message_id()))?;
    match options.first_micalg() {
        None => Ok(None),
        Some(name) => DigestAlgorithm::from_name(name).map(Some).ok_or_else(|| {
            MdnError::new(
                MdnErrorKind::UnsupportedMicalg(name.to_owned()),
                message.message_id(),
            )
        }),
    }
}

fn receipt_message_id(message: &Message) -> String {
    let partnership = message.partnership();
    let sender = partnership.receiver_id(id::AS2_ID).unwrap_or("unknown");
    let receiver = partnership.sender_id(id::AS2_ID).unwrap_or("unknown");
    let random: u32 = rand::thread_rng().gen_range(0..=9999);
    format!(
        "<{}-{:04}@{}_{}>",
        Utc::now().format("%d%m%Y%H%M%S%z"),
        random,
        sender,
        receiver,
    )
}

fn receipt_text(message: &Message, disposition: &DispositionType) -> String {
    match disposition.status_description() {
        Some(description) => format!(
            "The message with id {} could not be processed: {}",
            message.message_id(),
            description,
        ),
        None => format!(
            "The message with id {} was received and processed.",
            message.message_id(),
        ),
    }
}

/// Error raised while building or validating a receipt.
#[derive(Debug)]
pub struct MdnError {
    context: SpanTrace,
    kind: MdnErrorKind,
    receipt_id: String,
}

#[derive(Debug)]
enum MdnErrorKind {
    Format(DispositionFormatError),
    Options(crate::disposition::options::OptionsFormatError),
    Disposition(DispositionError),
    Mic(MicFormatError),
    UnsupportedMicalg(String),
    Mismatch { expected: Mic, received: Mic },
}

impl MdnError {
    fn new(kind: MdnErrorKind, receipt_id: &str) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind,
            receipt_id: receipt_id.to_owned(),
        }
    }

    fn format(err: DispositionFormatError, receipt_id: &str) -> Self {
        Self::new(MdnErrorKind::Format(err), receipt_id)
    }

    fn disposition(err: DispositionError, receipt_id: &str) -> Self {
        Self::new(MdnErrorKind::Disposition(err), receipt_id)
    }

    fn mic(err: MicFormatError, receipt_id: &str) -> Self {
        Self::new(MdnErrorKind::Mic(err), receipt_id)
    }

    fn mismatch(expected: Mic, received: Mic, receipt_id: &str) -> Self {
        Self::new(MdnErrorKind::Mismatch { expected, received }, receipt_id)
    }

    /// True when the receipt's disposition reported a failure (as opposed to
    /// the receipt itself being unusable).
    pub fn is_rejection(&self) -> bool {
        matches!(self.kind, MdnErrorKind::Disposition(_))
    }
}

impl std::fmt::Display for MdnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            MdnErrorKind::Format(err) => {
                writeln!(f, "receipt {}: {err}", self.receipt_id)?
            }
            MdnErrorKind::Options(err) => {
                writeln!(f, "receipt {}: {err}", self.receipt_id)?
            }
            MdnErrorKind::Disposition(err) => {
                writeln!(f, "receipt {}: {err}", self.receipt_id)?
            }
            MdnErrorKind::Mic(err) => writeln!(f, "receipt {}: {err}", self.receipt_id)?,
            MdnErrorKind::UnsupportedMicalg(name) => writeln!(
                f,
                "receipt {}: requested micalg '{name}' is not supported",
                self.receipt_id
            )?,
            MdnErrorKind::Mismatch { expected, received } => writeln!(
                f,
                "receipt {}: MIC mismatch, expected '{expected}' but receipt echoed '{received}'",
                self.receipt_id
            )?,
        }
        self.context.fmt(f)
    }
}

impl std::error::Error for MdnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            MdnErrorKind::Format(err) => Some(err),
            MdnErrorKind::Options(err) => Some(err),
            MdnErrorKind::Disposition(err) => Some(err),
            MdnErrorKind::Mic(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use crate::partnership::Partnership;

    fn inbound_message() -> Message {
        let partnership = Partnership::new("acme-to-globex")
            .with_sender_id(id::AS2_ID, "ACME")
            .with_receiver_id(id::AS2_ID, "GLOBEX");
        let mut message = Message::new()
            .with_partnership(partnership)
            .with_payload(Payload::new("application/edi-x12", b"ISA*00*document".to_vec()));
        message.set_message_id("<msg-1@ACME_GLOBEX>");
        message.set_header(header::AS2_FROM, "ACME");
        message.set_header(header::AS2_TO, "GLOBEX");
        message
    }

    #[test]
    fn receipt_defaults_to_sha1_mic() {
        let mdn = create_receipt(&inbound_message(), DispositionType::success()).unwrap();
        let mic = Mic::parse(mdn.mic.as_deref().unwrap()).unwrap();
        assert_eq!(mic.algorithm(), DigestAlgorithm::Sha1);
        assert_eq!(
            mic,
            Mic::compute(b"ISA*00*document", DigestAlgorithm::Sha1)
        );
    }

    #[test]
    fn receipt_honors_requested_micalg() {
        let mut message = inbound_message();
        message.set_header(
            header::DISPOSITION_NOTIFICATION_OPTIONS,
            "signed-receipt-protocol=required,pkcs7-signature; signed-receipt-micalg=required,sha-256",
        );
        let mdn = create_receipt(&message, DispositionType::success()).unwrap();
        let mic = Mic::parse(mdn.mic.as_deref().unwrap()).unwrap();
        assert_eq!(mic.algorithm(), DigestAlgorithm::Sha256);
    }

    #[test]
    fn receipt_rejects_unsupported_micalg() {
        let mut message = inbound_message();
        message.set_header(
            header::DISPOSITION_NOTIFICATION_OPTIONS,
            "signed-receipt-micalg=required,whirlpool",
        );
        assert!(create_receipt(&message, DispositionType::success()).is_err());
    }

    #[test]
    fn receipt_swaps_direction_and_references_original() {
        let mdn = create_receipt(&inbound_message(), DispositionType::success()).unwrap();
        assert_eq!(mdn.headers.get(header::AS2_FROM).unwrap(), "GLOBEX");
        assert_eq!(mdn.headers.get(header::AS2_TO).unwrap(), "ACME");
        assert_eq!(
            mdn.headers.get(header::ORIGINAL_MESSAGE_ID).unwrap(),
            "<msg-1@ACME_GLOBEX>"
        );
        assert!(mdn.message_id.ends_with("@GLOBEX_ACME>"));
    }

    #[test]
    fn error_receipt_carries_description_in_text() {
        let mdn = create_receipt(
            &inbound_message(),
            DispositionType::error("unknown trading partner"),
        )
        .unwrap();
        assert!(mdn.text.contains("unknown trading partner"));
        assert!(mdn.disposition.contains("Error"));
    }

    fn outbound_with_pending_mic() -> (Message, Mic) {
        let mic = Mic::compute(b"ISA*00*document", DigestAlgorithm::Sha1);
        let mut message = inbound_message();
        message.set_attribute(PENDING_MIC, mic.to_string());
        (message, mic)
    }

    fn receipt(disposition: &str, mic: Option<String>) -> Mdn {
        Mdn {
            message_id: "<mdn-1@GLOBEX_ACME>".to_owned(),
            headers: Default::default(),
            disposition: disposition.to_owned(),
            mic,
            text: String::new(),
        }
    }

    #[test]
    fn matching_mic_validates() {
        let (message, mic) = outbound_with_pending_mic();
        let mdn = receipt(
            "automatic-action/MDN-sent-automatically; processed",
            Some(mic.to_string()),
        );
        assert!(validate_receipt(&message, &mdn).is_ok());
    }

    #[test]
    fn legacy_algorithm_spelling_still_matches() {
        let (message, mic) = outbound_with_pending_mic();
        use base64::Engine;
        let legacy = format!(
            "{}, rsa-sha1",
            base64::engine::general_purpose::STANDARD.encode(mic.digest())
        );
        let mdn = receipt(
            "automatic-action/MDN-sent-automatically; processed",
            Some(legacy),
        );
        assert!(validate_receipt(&message, &mdn).is_ok());
    }

    #[test]
    fn mismatched_mic_is_rejected() {
        let (message, _) = outbound_with_pending_mic();
        let other = Mic::compute(b"different payload", DigestAlgorithm::Sha1);
        let mdn = receipt(
            "automatic-action/MDN-sent-automatically; processed",
            Some(other.to_string()),
        );
        let err = validate_receipt(&message, &mdn).unwrap_err();
        assert!(!err.is_rejection());
        assert!(err.to_string().contains("MIC mismatch"));
    }

    #[test]
    fn failure_disposition_is_rejected() {
        let (message, mic) = outbound_with_pending_mic();
        let mdn = receipt(
            "automatic-action/MDN-sent-automatically; processed/Error: decryption failed",
            Some(mic.to_string()),
        );
        let err = validate_receipt(&message, &mdn).unwrap_err();
        assert!(err.is_rejection());
    }

    #[test]
    fn missing_mic_is_tolerated() {
        let (message, _) = outbound_with_pending_mic();
        let mdn = receipt("automatic-action/MDN-sent-automatically; processed", None);
        assert!(validate_receipt(&message, &mdn).is_ok());
    }

    #[test]
    fn garbled_disposition_is_rejected() {
        let (message, _) = outbound_with_pending_mic();
        let mdn = receipt("not a disposition", None);
        assert!(validate_receipt(&message, &mdn).is_err());
    }
}
