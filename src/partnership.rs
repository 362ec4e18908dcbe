//! Trading-partner relationship model.
//!
//! A [`Partnership`] identifies one direction of a configured trading
//! relationship: who sends, who receives, and the per-pair protocol
//! preferences (endpoints, crypto algorithm choices, MDN options).
//!
//! A partnership is uniquely identified either by its `name` or by the full
//! combination of its sender and receiver identity maps. Resolution against
//! the configured set lives in [`store::PartnershipStore`].

pub mod store;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use store::{PartnershipNotFound, PartnershipStore};

/// Well-known identity keys for the sender/receiver ID maps.
pub mod id {
    /// The AS2 identifier exchanged in `AS2-From`/`AS2-To` headers.
    pub const AS2_ID: &str = "as2_id";
    /// Keystore alias of the partner certificate.
    pub const X509_ALIAS: &str = "x509_alias";
    /// Operator contact address.
    pub const EMAIL: &str = "email";
}

/// Well-known attribute keys.
pub mod attribute {
    /// Endpoint URL for outbound delivery.
    pub const AS2_URL: &str = "as2_url";
    /// Return address for asynchronous MDNs.
    pub const AS2_MDN_TO: &str = "as2_mdn_to";
    /// Receipt delivery option: set for asynchronous receipts.
    pub const AS2_RECEIPT_OPTION: &str = "as2_receipt_option";
    /// Requested `Disposition-Notification-Options` for outbound messages.
    pub const AS2_MDN_OPTIONS: &str = "as2_mdn_options";
    /// Digest algorithm used for signing, empty/absent for unsigned.
    pub const SIGNING_ALGORITHM: &str = "sign";
    /// Cipher used for encryption, empty/absent for plaintext.
    pub const ENCRYPTION_ALGORITHM: &str = "encrypt";
    /// Compression mode, empty/absent for uncompressed.
    pub const COMPRESSION_TYPE: &str = "compression_type";
    /// Subject line for outbound messages.
    pub const SUBJECT: &str = "subject";
    /// Default resend budget for this pair.
    pub const RETRIES: &str = "retries";
}

/// A sender/receiver identity pair plus per-pair attributes.
///
/// Identity maps and the attribute bag follow last-write-wins per key; there
/// is no silent overwrite of a whole map except through [`copy_from`].
///
/// [`copy_from`]: Partnership::copy_from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partnership {
    name: String,
    sender_ids: HashMap<String, String>,
    receiver_ids: HashMap<String, String>,
    attributes: HashMap<String, String>,
}

impl Partnership {
    /// Create an empty partnership with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn sender_id(&self, key: &str) -> Option<&str> {
        self.sender_ids.get(key).map(String::as_str)
    }

    pub fn receiver_id(&self, key: &str) -> Option<&str> {
        self.receiver_ids.get(key).map(String::as_str)
    }

    pub fn set_sender_id(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.sender_ids.insert(key.into(), value.into());
    }

    pub fn set_receiver_id(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.receiver_ids.insert(key.into(), value.into());
    }

    pub fn sender_ids(&self) -> &HashMap<String, String> {
        &self.sender_ids
    }

    pub fn receiver_ids(&self) -> &HashMap<String, String> {
        &self.receiver_ids
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Fully replace this partnership with `other`.
    ///
    /// Resolution never merges partial data into a message's partnership; the
    /// resolved record replaces it wholesale.
    pub fn copy_from(&mut self, other: &Partnership) {
        self.name = other.name.clone();
        self.sender_ids = other.sender_ids.clone();
        self.receiver_ids = other.receiver_ids.clone();
        self.attributes = other.attributes.clone();
    }

    /// Builder-style sender-id setter.
    pub fn with_sender_id(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_sender_id(key, value);
        self
    }

    /// Builder-style receiver-id setter.
    pub fn with_receiver_id(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_receiver_id(key, value);
        self
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins_per_key() {
        let mut p = Partnership::new("acme-to-globex");
        p.set_sender_id(id::AS2_ID, "ACME");
        p.set_sender_id(id::AS2_ID, "ACME2");
        assert_eq!(p.sender_id(id::AS2_ID), Some("ACME2"));
    }

    #[test]
    fn copy_from_replaces_everything() {
        let mut target = Partnership::new("old")
            .with_sender_id(id::AS2_ID, "OLD-SENDER")
            .with_attribute(attribute::AS2_URL, "http://old.example/as2");
        let source = Partnership::new("new")
            .with_sender_id(id::AS2_ID, "NEW-SENDER")
            .with_receiver_id(id::AS2_ID, "NEW-RECEIVER");

        target.copy_from(&source);

        assert_eq!(target.name(), "new");
        assert_eq!(target.sender_id(id::AS2_ID), Some("NEW-SENDER"));
        assert_eq!(target.receiver_id(id::AS2_ID), Some("NEW-RECEIVER"));
        assert_eq!(target.attribute(attribute::AS2_URL), None);
    }
}
