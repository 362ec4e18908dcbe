//! Outbound delivery: the `send` module.
//!
//! [`As2Sender`] turns a message with a payload into an HTTP request for the
//! partner's AS2 endpoint:
//!
//! 1. resolve the partnership and adopt its configuration
//! 2. assign a message id when the caller did not
//! 3. record the payload MIC the eventual receipt must echo
//! 4. compress, sign, and encrypt as the partnership demands
//! 5. deliver through the [`Transport`] and, for synchronous receipts,
//!    validate the MDN lifted into the response headers
//!
//! A transport failure or non-2xx status schedules a resend through the
//! processor before the error is propagated. A receipt that *arrives* but
//! fails validation does not: the partner received the message, so
//! retransmitting it would duplicate the document, and the failure needs an
//! operator instead.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::crypto::CryptoProvider;
use crate::disposition::options::DispositionOptions;
use crate::mdn::{self, PENDING_MIC};
use crate::message::{header, Mdn, Message};
use crate::mic::{DigestAlgorithm, Mic};
use crate::partnership::{attribute, id, PartnershipStore};
use crate::processor::{action, Module, ModuleError, Options, Processor};
use crate::resend::{DEFAULT_RETRIES, OPTION_RESEND_ACTION, OPTION_RETRIES};
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Module delivering outbound AS2 messages.
pub struct As2Sender<C, T> {
    partnerships: PartnershipStore,
    crypto: C,
    transport: T,
    processor: Weak<Processor>,
}

impl<C, T> As2Sender<C, T>
where
    C: CryptoProvider,
    T: Transport,
{
    /// Create a sender.
    ///
    /// Holds the processor weakly so that sender and processor can reference
    /// each other without keeping each other alive.
    pub fn new(
        partnerships: PartnershipStore,
        crypto: C,
        transport: T,
        processor: &Arc<Processor>,
    ) -> Self {
        Self {
            partnerships,
            crypto,
            transport,
            processor: Arc::downgrade(processor),
        }
    }

    /// The digest algorithm a receipt for this partnership will use, taken
    /// from the micalg we request in `Disposition-Notification-Options`.
    fn receipt_algorithm(message: &Message) -> DigestAlgorithm {
        message
            .partnership()
            .attribute(attribute::AS2_MDN_OPTIONS)
            .and_then(|raw| DispositionOptions::parse(raw).ok())
            .and_then(|options| {
                options
                    .first_micalg()
                    .and_then(DigestAlgorithm::from_name)
            })
            .unwrap_or(DigestAlgorithm::Sha1)
    }

    fn build_request(
        message: &mut Message,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<HttpRequest, ModuleError> {
        let partnership = message.partnership();
        let url = partnership
            .attribute(attribute::AS2_URL)
            .ok_or_else(|| {
                ModuleError::new(format!(
                    "partnership '{}' has no {} attribute",
                    partnership.name(),
                    attribute::AS2_URL
                ))
            })?
            .to_owned();

        let sender = partnership
            .sender_id(id::AS2_ID)
            .unwrap_or("unknown")
            .to_owned();
        let receiver = partnership
            .receiver_id(id::AS2_ID)
            .unwrap_or("unknown")
            .to_owned();
        let subject = partnership
            .attribute(attribute::SUBJECT)
            .unwrap_or("AS2 message")
            .to_owned();

        message.set_header(header::AS2_FROM, sender);
        message.set_header(header::AS2_TO, receiver);
        message.set_header(header::MESSAGE_ID, message.message_id().to_owned());
        message.set_header(header::SUBJECT, subject);
        message.set_header(header::CONTENT_TYPE, content_type.to_owned());
        let mdn_to = message
            .partnership()
            .attribute(attribute::AS2_MDN_TO)
            .map(str::to_owned);
        if let Some(mdn_to) = mdn_to {
            message.set_header(header::DISPOSITION_NOTIFICATION_TO, mdn_to);
        }
        let mdn_options = message
            .partnership()
            .attribute(attribute::AS2_MDN_OPTIONS)
            .map(str::to_owned);
        if let Some(mdn_options) = mdn_options {
            message.set_header(header::DISPOSITION_NOTIFICATION_OPTIONS, mdn_options);
        }
        let receipt_url = message
            .partnership()
            .attribute(attribute::AS2_RECEIPT_OPTION)
            .map(str::to_owned);
        if let Some(receipt_url) = receipt_url {
            message.set_header(header::RECEIPT_DELIVERY_OPTION, receipt_url);
        }

        Ok(HttpRequest {
            url,
            headers: message.headers().clone(),
            body,
        })
    }

    /// Hand the (still untransformed) message back to the processor for a
    /// later retry.
    async fn schedule_resend(&self, message: &Message, options: &Options) {
        let Some(processor) = self.processor.upgrade() else {
            warn!(message_id = %message.message_id(), "processor gone, resend not scheduled");
            return;
        };

        let retries = options
            .get(OPTION_RETRIES)
            .map(String::to_owned)
            .or_else(|| {
                message
                    .partnership()
                    .attribute(attribute::RETRIES)
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| DEFAULT_RETRIES.to_string());

        let mut resend_options = Options::new();
        resend_options.insert(OPTION_RETRIES.to_owned(), retries);
        resend_options.insert(OPTION_RESEND_ACTION.to_owned(), action::SEND.to_owned());

        let mut copy = message.clone();
        if let Err(err) = processor
            .handle(action::RESEND, &mut copy, &resend_options)
            .await
        {
            warn!(
                message_id = %message.message_id(),
                error = %err,
                "failed to schedule resend"
            );
        }
    }

    /// Extract the synchronous MDN an adapter lifted into response headers.
    fn sync_mdn(response: &HttpResponse) -> Option<Mdn> {
        let disposition = response.header(header::DISPOSITION)?;
        Some(Mdn {
            message_id: response
                .header(header::MESSAGE_ID)
                .unwrap_or_default()
                .to_owned(),
            headers: response.headers.clone(),
            disposition: disposition.to_owned(),
            mic: response
                .header(header::RECEIVED_CONTENT_MIC)
                .map(str::to_owned),
            text: String::new(),
        })
    }
}

#[async_trait]
impl<C, T> Module for As2Sender<C, T>
where
    C: CryptoProvider,
    T: Transport,
{
    fn name(&self) -> &'static str {
        "as2-sender"
    }

    fn can_handle(&self, action_name: &str, _message: &Message, _options: &Options) -> bool {
        action_name == action::SEND
    }

    #[tracing::instrument(skip_all, fields(message_id = tracing::field::Empty))]
    async fn handle(
        &self,
        _action: &str,
        message: &mut Message,
        options: &Options,
    ) -> Result<(), ModuleError> {
        let resolved = self
            .partnerships
            .resolve(message.partnership())
            .await
            .map_err(ModuleError::new)?;
        message.partnership_mut().copy_from(&resolved);

        if message.message_id().is_empty() {
            message.generate_message_id();
        }
        tracing::Span::current().record("message_id", message.message_id());

        let payload = message
            .payload()
            .cloned()
            .ok_or_else(|| ModuleError::new("outbound message has no payload"))?;

        let mic = Mic::compute(&payload.body, Self::receipt_algorithm(message));
        message.set_attribute(PENDING_MIC, mic.to_string());

        // The crypto chain transforms a working copy. The message keeps its
        // original payload so a resend re-runs the whole pipeline.
        let mut wire = payload;
        let partnership = message.partnership().clone();
        if let Some(compression) = partnership.attribute(attribute::COMPRESSION_TYPE) {
            wire = self
                .crypto
                .compress(wire, compression)
                .await
                .map_err(ModuleError::new)?;
        }
        if let Some(algorithm) = partnership.attribute(attribute::SIGNING_ALGORITHM) {
            wire = self
                .crypto
                .sign(wire, algorithm)
                .await
                .map_err(ModuleError::new)?;
        }
        if let Some(algorithm) = partnership.attribute(attribute::ENCRYPTION_ALGORITHM) {
            wire = self
                .crypto
                .encrypt(wire, algorithm)
                .await
                .map_err(ModuleError::new)?;
        }

        let content_type = wire.content_type.clone();
        let request = Self::build_request(message, &content_type, wire.body)?;

        let response = match self.transport.send_request(request).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                self.schedule_resend(message, options).await;
                return Err(ModuleError::new(format!(
                    "partner endpoint answered HTTP {}",
                    response.status
                )));
            }
            Err(err) => {
                self.schedule_resend(message, options).await;
                return Err(ModuleError::new(err));
            }
        };

        match Self::sync_mdn(&response) {
            Some(receipt) => {
                mdn::validate_receipt(message, &receipt).map_err(ModuleError::new)?;
                debug!(receipt_id = %receipt.message_id, "synchronous receipt validated");
                message.attach_mdn(receipt);
            }
            None => {
                debug!("no synchronous receipt in response");
            }
        }
        Ok(())
    }
}
