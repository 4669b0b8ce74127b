use std::collections::HashMap;

use nostr_sdk::{EventId, PublicKey};

use crate::relay_url::{is_secure, normalize_relay_url};

/// Which relays delivered which records.
///
/// Relays are kept in first-seen order per id. A per-author count of
/// delivered records lets relay selection prefer relays that are known to
/// carry an author's writes.
#[derive(Debug, Default)]
pub struct ProvenanceTracker {
    seen_on: HashMap<EventId, Vec<String>>,
    served: HashMap<PublicKey, HashMap<String, usize>>,
}

impl ProvenanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `relay` delivered `id`. Returns `true` if this relay is new for the id.
    pub fn record(&mut self, id: EventId, author: PublicKey, relay: &str) -> bool {
        let Some(relay) = normalize_relay_url(relay) else {
            tracing::debug!(relay, "not recording provenance for non-websocket relay");
            return false;
        };
        let relays = self.seen_on.entry(id).or_default();
        if relays.contains(&relay) {
            return false;
        }
        relays.push(relay.clone());
        *self
            .served
            .entry(author)
            .or_default()
            .entry(relay)
            .or_insert(0) += 1;
        true
    }

    /// Every relay that delivered `id`.
    pub fn seen_on(&self, id: &EventId) -> &[String] {
        self.seen_on.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Only the `wss://` relays that delivered `id`.
    pub fn secure_seen_on(&self, id: &EventId) -> Vec<String> {
        self.seen_on(id)
            .iter()
            .filter(|r| is_secure(r))
            .cloned()
            .collect()
    }

    /// Number of `author`'s records that `relay` has delivered.
    pub fn served_count(&self, author: &PublicKey, relay: &str) -> usize {
        self.served
            .get(author)
            .and_then(|relays| relays.get(relay))
            .copied()
            .unwrap_or(0)
    }

    /// Drop the entry of a record that left the store.
    pub fn forget(&mut self, id: &EventId) {
        self.seen_on.remove(id);
    }

    pub fn clear(&mut self) {
        self.seen_on.clear();
        self.served.clear();
    }
}
