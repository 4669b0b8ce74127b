use nostr_sdk::Event;

use crate::models::tag_utils::tags_named;
use crate::relay_url::normalize_relay_url;

/// How a relay from a kind:10002 record may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayUsage {
    pub read: bool,
    pub write: bool,
}

/// Decoded NIP-65 relay list, in the order the author listed the relays.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelayList {
    entries: Vec<(String, RelayUsage)>,
}

impl RelayList {
    /// Decode the `r` tags of a relay list record.
    ///
    /// A tag without a marker is both read and write. Repeated URLs merge
    /// their markers. Unparseable URLs are skipped.
    pub fn from_event(event: &Event) -> Self {
        let mut list = Self::default();
        for tag in tags_named(event, "r", 2) {
            let Some(url) = normalize_relay_url(&tag[1]) else {
                tracing::debug!(relay = %tag[1], author = %event.pubkey, "skipping unparseable relay in relay list");
                continue;
            };
            let marker = tag.get(2).map(String::as_str);
            let usage = RelayUsage {
                read: tag.len() == 2 || marker == Some("read"),
                write: tag.len() == 2 || marker == Some("write"),
            };
            list.insert(url, usage);
        }
        list
    }

    fn insert(&mut self, url: String, usage: RelayUsage) {
        if let Some((_, existing)) = self.entries.iter_mut().find(|(u, _)| *u == url) {
            existing.read |= usage.read;
            existing.write |= usage.write;
        } else {
            self.entries.push((url, usage));
        }
    }

    /// Relays the author reads from (their inbox).
    pub fn read_relays(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, usage)| usage.read)
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Relays the author writes to (their outbox).
    pub fn write_relays(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, usage)| usage.write)
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn entries(&self) -> &[(String, RelayUsage)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
