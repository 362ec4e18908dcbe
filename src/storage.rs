//! Archiving of payloads and receipts: the `store` modules.
//!
//! [`StoreModule`] is a passive module handling the `store` and `store-mdn`
//! actions. Payloads are written verbatim so downstream systems can pick
//! them up; receipts are written as JSON together with their headers, since
//! an MDN without its disposition and MIC is worthless for an audit.
//!
//! Filenames derive from the message id with a numeric suffix on collision;
//! a second store of the same message never overwrites the first.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, instrument};

use crate::message::Message;
use crate::processor::{action, Module, ModuleError, Options};

const MDN_SUFFIX: &str = ".mdn.json";

/// Module writing payloads and receipts into an archive directory.
#[derive(Clone)]
pub struct StoreModule {
    dir: PathBuf,
}

impl StoreModule {
    /// Open (and create if needed) the archive rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// The archive directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn store_payload(&self, message: &Message) -> Result<(), ModuleError> {
        let payload = message
            .payload()
            .ok_or_else(|| ModuleError::new("message has no payload to store"))?;

        let name = file_name(message.message_id());
        let path = unique_path(&self.dir, &name).await.map_err(ModuleError::new)?;
        fs::write(&path, &payload.body)
            .await
            .map_err(ModuleError::new)?;
        debug!(file = %path.display(), bytes = payload.body.len(), "stored payload");
        Ok(())
    }

    async fn store_mdn(&self, message: &Message) -> Result<(), ModuleError> {
        let mdn = message
            .mdn()
            .ok_or_else(|| ModuleError::new("message has no receipt to store"))?;

        let name = format!("{}{MDN_SUFFIX}", file_name(message.message_id()));
        let path = unique_path(&self.dir, &name).await.map_err(ModuleError::new)?;
        let bytes = serde_json::to_vec_pretty(mdn).map_err(ModuleError::new)?;
        fs::write(&path, &bytes).await.map_err(ModuleError::new)?;
        debug!(file = %path.display(), "stored receipt");
        Ok(())
    }
}

#[async_trait]
impl Module for StoreModule {
    fn name(&self) -> &'static str {
        "store"
    }

    fn can_handle(&self, action_name: &str, _message: &Message, _options: &Options) -> bool {
        action_name == action::STORE || action_name == action::STORE_MDN
    }

    #[instrument(skip_all, fields(message_id = %message.message_id()))]
    async fn handle(
        &self,
        action_name: &str,
        message: &mut Message,
        _options: &Options,
    ) -> Result<(), ModuleError> {
        if action_name == action::STORE_MDN {
            self.store_mdn(message).await
        } else {
            self.store_payload(message).await
        }
    }
}

/// Filesystem-safe name derived from a message id.
fn file_name(message_id: &str) -> String {
    if message_id.is_empty() {
        return "unidentified".to_owned();
    }
    let mut cleaned: String = message_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    cleaned.truncate(128);
    cleaned
}

/// Resolve `dir/name`, appending `.1`, `.2`, ... on collision.
async fn unique_path(dir: &Path, name: &str) -> Result<PathBuf, std::io::Error> {
    let candidate = dir.join(name);
    if !fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }
    for suffix in 1u32.. {
        let candidate = dir.join(format!("{name}.{suffix}"));
        if !fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    unreachable!("suffix space exhausted");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Mdn, Payload};
    use tempfile::TempDir;

    fn message_with_payload() -> Message {
        let mut message =
            Message::new().with_payload(Payload::new("application/edi-x12", b"ISA*00".to_vec()));
        message.set_message_id("<msg-1@ACME_GLOBEX>");
        message
    }

    #[tokio::test]
    async fn stores_payload_under_sanitized_message_id() {
        let dir = TempDir::new().unwrap();
        let store = StoreModule::open(dir.path()).await.unwrap();

        store
            .handle(action::STORE, &mut message_with_payload(), &Options::new())
            .await
            .unwrap();

        let expected = dir.path().join("_msg-1_ACME_GLOBEX_");
        assert_eq!(fs::read(&expected).await.unwrap(), b"ISA*00");
    }

    #[tokio::test]
    async fn repeated_store_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = StoreModule::open(dir.path()).await.unwrap();

        let mut message = message_with_payload();
        store
            .handle(action::STORE, &mut message, &Options::new())
            .await
            .unwrap();
        store
            .handle(action::STORE, &mut message, &Options::new())
            .await
            .unwrap();

        assert!(fs::try_exists(dir.path().join("_msg-1_ACME_GLOBEX_"))
            .await
            .unwrap());
        assert!(fs::try_exists(dir.path().join("_msg-1_ACME_GLOBEX_.1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn stores_receipt_as_json() {
        let dir = TempDir::new().unwrap();
        let store = StoreModule::open(dir.path()).await.unwrap();

        let mut message = message_with_payload();
        message.attach_mdn(Mdn {
            message_id: "<mdn-1@GLOBEX_ACME>".to_owned(),
            headers: Default::default(),
            disposition: "automatic-action/MDN-sent-automatically; processed".to_owned(),
            mic: Some("VGVzdA==, sha-1".to_owned()),
            text: "received".to_owned(),
        });
        store
            .handle(action::STORE_MDN, &mut message, &Options::new())
            .await
            .unwrap();

        let path = dir.path().join(format!("_msg-1_ACME_GLOBEX_{MDN_SUFFIX}"));
        let decoded: Mdn = serde_json::from_slice(&fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(decoded.disposition.as_str(), message.mdn().unwrap().disposition);
    }

    #[tokio::test]
    async fn storing_a_missing_part_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = StoreModule::open(dir.path()).await.unwrap();

        let mut bare = Message::new();
        assert!(store
            .handle(action::STORE, &mut bare, &Options::new())
            .await
            .is_err());
        assert!(store
            .handle(action::STORE_MDN, &mut bare, &Options::new())
            .await
            .is_err());
    }
}
