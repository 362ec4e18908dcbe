//! The in-flight unit of work.
//!
//! A [`Message`] bundles everything one AS2 transaction carries through the
//! pipeline: the HTTP-level headers, a free-form attribute bag, the embedded
//! (mutable) [`Partnership`], the payload, and, once a receipt exists, the
//! attached [`Mdn`].
//!
//! Messages are created per inbound/outbound transaction, mutated by
//! partnership resolution and the crypto/MDN steps, and either discarded when
//! the action pipeline completes or serialized wholesale into the durable
//! resend queue.

use std::collections::HashMap;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::partnership::{id, Partnership};

/// Protocol tag for every message this engine handles.
pub const PROTOCOL: &str = "as2";

/// Conventional header names on AS2 messages and receipts.
pub mod header {
    pub const AS2_FROM: &str = "AS2-From";
    pub const AS2_TO: &str = "AS2-To";
    pub const MESSAGE_ID: &str = "Message-ID";
    pub const SUBJECT: &str = "Subject";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const DISPOSITION_NOTIFICATION_TO: &str = "Disposition-Notification-To";
    pub const DISPOSITION_NOTIFICATION_OPTIONS: &str = "Disposition-Notification-Options";
    pub const RECEIPT_DELIVERY_OPTION: &str = "Receipt-Delivery-Option";
    pub const RECEIVED_CONTENT_MIC: &str = "Received-Content-MIC";
    pub const ORIGINAL_MESSAGE_ID: &str = "Original-Message-ID";
    pub const DISPOSITION: &str = "Disposition";
}

/// Payload content: opaque bytes plus their MIME content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Payload {
    pub fn new(content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            body,
        }
    }
}

/// A receipt attached to its subject message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mdn {
    pub message_id: String,
    pub headers: HashMap<String, String>,
    /// Serialized [`DispositionType`](crate::disposition::DispositionType).
    pub disposition: String,
    /// Serialized `Received-Content-MIC`, when the receipt carries one.
    pub mic: Option<String>,
    /// Human-readable text part.
    pub text: String,
}

/// An in-flight AS2 message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    message_id: String,
    attributes: HashMap<String, String>,
    headers: HashMap<String, String>,
    partnership: Partnership,
    payload: Option<Payload>,
    mdn: Option<Mdn>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// The protocol tag, `"as2"`.
    pub fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn set_message_id(&mut self, id: impl Into<String>) {
        self.message_id = id.into();
    }

    /// Generate and set a fresh message id from the current partnership.
    ///
    /// Shape: `<timestamp-random@senderAs2_receiverAs2>`, timestamp first so
    /// ids sort roughly by creation time in logs.
    pub fn generate_message_id(&mut self) -> &str {
        let sender = self.partnership.sender_id(id::AS2_ID).unwrap_or("unknown");
        let receiver = self.partnership.receiver_id(id::AS2_ID).unwrap_or("unknown");
        let random: u32 = rand::thread_rng().gen_range(0..=9999);
        self.message_id = format!(
            "<{}-{:04}@{}_{}>",
            Utc::now().format("%d%m%Y%H%M%S%z"),
            random,
            sender,
            receiver,
        );
        &self.message_id
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn partnership(&self) -> &Partnership {
        &self.partnership
    }

    pub fn partnership_mut(&mut self) -> &mut Partnership {
        &mut self.partnership
    }

    pub fn set_partnership(&mut self, partnership: Partnership) {
        self.partnership = partnership;
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn set_payload(&mut self, payload: Payload) {
        self.payload = Some(payload);
    }

    pub fn mdn(&self) -> Option<&Mdn> {
        self.mdn.as_ref()
    }

    pub fn attach_mdn(&mut self, mdn: Mdn) {
        self.mdn = Some(mdn);
    }

    /// Builder-style payload setter.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.set_payload(payload);
        self
    }

    /// Builder-style partnership setter.
    pub fn with_partnership(mut self, partnership: Partnership) -> Self {
        self.set_partnership(partnership);
        self
    }
}
