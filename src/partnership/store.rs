//! Partnership storage and resolution.
//!
//! The store holds the configured set of partnerships and answers the one
//! question every inbound and outbound message asks before any crypto or
//! delivery step: *which configured relationship does this message belong
//! to?*
//!
//! Resolution order:
//!
//! 1. exact `name` lookup, when the partial carries a name
//! 2. full match of the sender and receiver identity maps
//! 3. the same match with sender and receiver **swapped**, which correlates
//!    an inbound response to a partnership the peer initiated; the result is
//!    a synthesized `<name>-inverse` partnership with swapped identities
//!
//! The inverse fallback is a compatibility heuristic carried over from
//! deployed AS2 stacks, not a guaranteed-correct protocol rule; a response
//! that matches this way is worth a second look in the logs.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, instrument};
use tracing_error::SpanTrace;

use crate::partnership::Partnership;

/// Concurrent, read-mostly set of configured partnerships.
///
/// Lookups take a shared lock; mutation takes an exclusive lock. Clones share
/// the same underlying set.
#[derive(Clone, Default)]
pub struct PartnershipStore {
    partnerships: Arc<RwLock<Vec<Partnership>>>,
}

impl PartnershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a partnership, replacing any existing one with the same name.
    pub async fn add(&self, partnership: Partnership) {
        let mut partnerships = self.partnerships.write().await;
        match partnerships
            .iter_mut()
            .find(|existing| existing.name() == partnership.name())
        {
            Some(existing) => *existing = partnership,
            None => partnerships.push(partnership),
        }
    }

    /// Remove a partnership by name. Returns whether one was removed.
    pub async fn remove(&self, name: &str) -> bool {
        let mut partnerships = self.partnerships.write().await;
        let before = partnerships.len();
        partnerships.retain(|p| p.name() != name);
        partnerships.len() != before
    }

    /// Snapshot of all configured partnerships.
    pub async fn all(&self) -> Vec<Partnership> {
        self.partnerships.read().await.clone()
    }

    /// Look up a partnership by exact name.
    pub async fn by_name(&self, name: &str) -> Option<Partnership> {
        self.partnerships
            .read()
            .await
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    /// Look up a partnership whose identity maps contain every pair of the
    /// given partial maps.
    pub async fn by_ids(
        &self,
        sender_ids: &HashMap<String, String>,
        receiver_ids: &HashMap<String, String>,
    ) -> Option<Partnership> {
        self.partnerships
            .read()
            .await
            .iter()
            .find(|p| map_matches(sender_ids, p.sender_ids()) && map_matches(receiver_ids, p.receiver_ids()))
            .cloned()
    }

    /// Resolve a partial partnership to the full configured record.
    ///
    /// See the module docs for the lookup order. The returned partnership is
    /// fully populated and intended to replace the message's partnership via
    /// [`Partnership::copy_from`], never to be merged.
    #[instrument(skip(self, partial), fields(name = %partial.name()))]
    pub async fn resolve(&self, partial: &Partnership) -> Result<Partnership, PartnershipNotFound> {
        if !partial.name().is_empty() {
            if let Some(found) = self.by_name(partial.name()).await {
                return Ok(found);
            }
        }

        if let Some(found) = self.by_ids(partial.sender_ids(), partial.receiver_ids()).await {
            return Ok(found);
        }

        // Inverse direction: the stored record was configured with our peer
        // as the sender. Compatibility heuristic, see module docs.
        if let Some(found) = self.by_ids(partial.receiver_ids(), partial.sender_ids()).await {
            debug!(
                stored = %found.name(),
                "partnership matched with sender and receiver swapped"
            );
            let mut inverse = Partnership::new(format!("{}-inverse", found.name()));
            for (key, value) in found.receiver_ids() {
                inverse.set_sender_id(key.clone(), value.clone());
            }
            for (key, value) in found.sender_ids() {
                inverse.set_receiver_id(key.clone(), value.clone());
            }
            for (key, value) in found.attributes() {
                inverse.set_attribute(key.clone(), value.clone());
            }
            return Ok(inverse);
        }

        Err(PartnershipNotFound::new(partial))
    }
}

/// True when `partial` is non-empty and every pair of it is present in
/// `stored`.
fn map_matches(partial: &HashMap<String, String>, stored: &HashMap<String, String>) -> bool {
    !partial.is_empty()
        && partial
            .iter()
            .all(|(key, value)| stored.get(key) == Some(value))
}

/// No configured partnership matched, in either direction.
///
/// Carries the searched identity maps for diagnosis.
#[derive(Debug)]
pub struct PartnershipNotFound {
    context: SpanTrace,
    name: String,
    sender_ids: HashMap<String, String>,
    receiver_ids: HashMap<String, String>,
}

impl PartnershipNotFound {
    fn new(partial: &Partnership) -> Self {
        Self {
            context: SpanTrace::capture(),
            name: partial.name().to_owned(),
            sender_ids: partial.sender_ids().clone(),
            receiver_ids: partial.receiver_ids().clone(),
        }
    }

    pub fn sender_ids(&self) -> &HashMap<String, String> {
        &self.sender_ids
    }

    pub fn receiver_ids(&self) -> &HashMap<String, String> {
        &self.receiver_ids
    }
}

impl std::fmt::Display for PartnershipNotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "partnership not found (name: '{}', sender ids: {:?}, receiver ids: {:?})",
            self.name, self.sender_ids, self.receiver_ids
        )?;
        self.context.fmt(f)
    }
}

impl std::error::Error for PartnershipNotFound {}
