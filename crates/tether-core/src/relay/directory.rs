use std::collections::{HashMap, HashSet};

use nostr_sdk::PublicKey;

use crate::models::RelayList;
use crate::relay_url::{is_secure, normalize_relay_url};

/// Per-author relay lists plus the dead and blocked relay sets.
///
/// Written only through its update methods; read by every relay selection.
#[derive(Debug, Default)]
pub struct RelayDirectory {
    lists: HashMap<PublicKey, RelayList>,
    own: Option<RelayList>,
    dead: HashSet<String>,
    blocked: HashSet<String>,
}

fn normalized_set<I, S>(relays: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    relays
        .into_iter()
        .filter_map(|r| normalize_relay_url(r.as_ref()))
        .collect()
}

impl RelayDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_dead<I, S>(&mut self, relays: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.dead = normalized_set(relays);
    }

    pub fn set_blocked<I, S>(&mut self, relays: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.blocked = normalized_set(relays);
    }

    /// `wss://` and neither dead nor blocked.
    pub fn allows(&self, relay: &str) -> bool {
        is_secure(relay) && !self.dead.contains(relay) && !self.blocked.contains(relay)
    }

    /// Normalize and keep only allowed relays, preserving order and dropping repeats.
    pub fn filter_relays<I, S>(&self, relays: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for relay in relays {
            let Some(relay) = normalize_relay_url(relay.as_ref()) else {
                continue;
            };
            if self.allows(&relay) && !out.contains(&relay) {
                out.push(relay);
            }
        }
        out
    }

    pub fn update(&mut self, author: PublicKey, list: RelayList) {
        self.lists.insert(author, list);
    }

    pub fn remove(&mut self, author: &PublicKey) {
        self.lists.remove(author);
    }

    pub fn get(&self, author: &PublicKey) -> Option<&RelayList> {
        self.lists.get(author)
    }

    pub fn has_list(&self, author: &PublicKey) -> bool {
        self.lists.contains_key(author)
    }

    /// Outbox relays of an author, unfiltered. `None` until a list is known.
    pub fn write_relays(&self, author: &PublicKey) -> Option<Vec<String>> {
        self.lists.get(author).map(RelayList::write_relays)
    }

    /// Inbox relays of an author, unfiltered. `None` until a list is known.
    pub fn read_relays(&self, author: &PublicKey) -> Option<Vec<String>> {
        self.lists.get(author).map(RelayList::read_relays)
    }

    pub fn set_own(&mut self, list: Option<RelayList>) {
        self.own = list;
    }

    pub fn own(&self) -> Option<&RelayList> {
        self.own.as_ref()
    }

    pub fn own_write_relays(&self) -> Vec<String> {
        self.own
            .as_ref()
            .map(RelayList::write_relays)
            .unwrap_or_default()
    }

    pub fn own_read_relays(&self) -> Vec<String> {
        self.own
            .as_ref()
            .map(RelayList::read_relays)
            .unwrap_or_default()
    }

    /// Forget relay lists; dead/blocked sets are external state and survive.
    pub fn clear(&mut self) {
        self.lists.clear();
        self.own = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_relays_excludes_dead_blocked_and_insecure() {
        let mut directory = RelayDirectory::new();
        directory.set_dead(["wss://dead.example/"]);
        directory.set_blocked(["wss://blocked.example"]);

        let filtered = directory.filter_relays([
            "wss://ok.example/",
            "wss://dead.example",
            "wss://blocked.example/",
            "ws://plain.example",
            "wss://ok.example",
        ]);
        assert_eq!(filtered, vec!["wss://ok.example"]);
    }

    #[test]
    fn test_dead_set_is_replaced_not_extended() {
        let mut directory = RelayDirectory::new();
        directory.set_dead(["wss://a.example"]);
        directory.set_dead(["wss://b.example"]);
        assert!(directory.allows("wss://a.example"));
        assert!(!directory.allows("wss://b.example"));
    }
}
