//! In-memory record store.
//!
//! Every accepted record is kept by id. Mutable kinds are additionally
//! indexed by coordinate so the current version can be found without a scan.
//! Superseded versions stay stored until something removes them.

use std::collections::{HashMap, HashSet};

use nostr_sdk::{Event, EventId, PublicKey};

use crate::constants::kinds;
use crate::models::Address;
use crate::query::QueryFilter;

#[derive(Debug, Default)]
pub struct RecordStore {
    events: HashMap<EventId, Event>,
    /// Versions per coordinate, in arrival order
    versions: HashMap<Address, Vec<EventId>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, id: &EventId) -> bool {
        self.events.contains_key(id)
    }

    /// Insert a record. Returns `false` if the id was already stored.
    pub fn add(&mut self, event: Event) -> bool {
        if self.events.contains_key(&event.id) {
            return false;
        }
        if let Some(address) = Address::of(&event) {
            self.versions.entry(address).or_default().push(event.id);
        }
        self.events.insert(event.id, event);
        true
    }

    pub fn get(&self, id: &EventId) -> Option<&Event> {
        self.events.get(id)
    }

    /// The current version of a mutable record.
    ///
    /// Greatest `created_at` wins; on a tie the version stored first wins.
    /// `identifier` is ignored for replaceable kinds.
    pub fn get_current(
        &self,
        kind: u16,
        author: &PublicKey,
        identifier: Option<&str>,
    ) -> Option<&Event> {
        if !kinds::is_mutable(kind) {
            return None;
        }
        let address = Address::new(kind, *author, identifier.unwrap_or(""));
        self.current_at(&address)
    }

    pub fn current_at(&self, address: &Address) -> Option<&Event> {
        let mut current: Option<&Event> = None;
        for id in self.versions.get(address)? {
            let Some(event) = self.events.get(id) else {
                continue;
            };
            if current.map_or(true, |c| event.created_at > c.created_at) {
                current = Some(event);
            }
        }
        current
    }

    pub fn has_current(&self, kind: u16, author: &PublicKey, identifier: Option<&str>) -> bool {
        self.get_current(kind, author, identifier).is_some()
    }

    /// Records matching any fragment, newest first.
    ///
    /// A fragment's `limit` keeps only the newest records it matches.
    pub fn query(&self, filters: &[QueryFilter]) -> Vec<Event> {
        let mut sorted: Vec<&Event> = self.events.values().collect();
        sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut seen: HashSet<EventId> = HashSet::new();
        let mut selected: Vec<&Event> = Vec::new();
        for filter in filters {
            let matching = sorted.iter().filter(|e| filter.matches(e));
            let take = filter.limit.unwrap_or(usize::MAX);
            for event in matching.take(take) {
                if seen.insert(event.id) {
                    selected.push(event);
                }
            }
        }

        selected.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        selected.into_iter().cloned().collect()
    }

    pub fn remove(&mut self, id: &EventId) -> Option<Event> {
        let event = self.events.remove(id)?;
        if let Some(address) = Address::of(&event) {
            if let Some(ids) = self.versions.get_mut(&address) {
                ids.retain(|v| v != id);
                if ids.is_empty() {
                    self.versions.remove(&address);
                }
            }
        }
        Some(event)
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.versions.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::prelude::*;

    fn profile(keys: &Keys, name: &str, at: u64) -> Event {
        EventBuilder::new(Kind::Metadata, format!(r#"{{"name":"{name}"}}"#))
            .custom_created_at(Timestamp::from(at))
            .sign_with_keys(keys)
            .unwrap()
    }

    fn bookmark(keys: &Keys, d: &str, at: u64) -> Event {
        EventBuilder::new(Kind::from(39701), "")
            .tag(Tag::identifier(d))
            .custom_created_at(Timestamp::from(at))
            .sign_with_keys(keys)
            .unwrap()
    }

    #[test]
    fn test_add_is_noop_for_known_id() {
        let keys = Keys::generate();
        let event = profile(&keys, "a", 10);
        let mut store = RecordStore::new();
        assert!(store.add(event.clone()));
        assert!(!store.add(event.clone()));
        assert_eq!(store.len(), 1);
        assert!(store.has(&event.id));
    }

    #[test]
    fn test_get_current_is_independent_of_arrival_order() {
        let keys = Keys::generate();
        let versions = [
            profile(&keys, "one", 100),
            profile(&keys, "three", 300),
            profile(&keys, "two", 200),
        ];

        let orders: [[usize; 3]; 3] = [[0, 1, 2], [2, 1, 0], [1, 0, 2]];
        for order in orders {
            let mut store = RecordStore::new();
            for i in order {
                store.add(versions[i].clone());
            }
            let current = store.get_current(0, &keys.public_key(), None).unwrap();
            assert_eq!(current.id, versions[1].id);
            // superseded versions are retained
            assert_eq!(store.len(), 3);
        }
    }

    #[test]
    fn test_get_current_tie_prefers_first_observed() {
        let keys = Keys::generate();
        let first = profile(&keys, "first", 100);
        let second = profile(&keys, "second", 100);

        let mut store = RecordStore::new();
        store.add(first.clone());
        store.add(second);
        assert_eq!(
            store.get_current(0, &keys.public_key(), None).unwrap().id,
            first.id
        );
    }

    #[test]
    fn test_addressable_current_is_per_identifier() {
        let keys = Keys::generate();
        let mut store = RecordStore::new();
        store.add(bookmark(&keys, "a.example/", 100));
        let newer_b = bookmark(&keys, "b.example/", 200);
        store.add(newer_b.clone());

        let pk = keys.public_key();
        assert_eq!(
            store.get_current(39701, &pk, Some("b.example/")).unwrap().id,
            newer_b.id
        );
        assert!(store.get_current(39701, &pk, Some("c.example/")).is_none());
        assert!(store.get_current(1, &pk, None).is_none());
    }

    #[test]
    fn test_remove_falls_back_to_previous_version() {
        let keys = Keys::generate();
        let old = profile(&keys, "old", 100);
        let new = profile(&keys, "new", 200);
        let mut store = RecordStore::new();
        store.add(old.clone());
        store.add(new.clone());

        assert!(store.remove(&new.id).is_some());
        assert_eq!(
            store.get_current(0, &keys.public_key(), None).unwrap().id,
            old.id
        );
        assert!(store.remove(&new.id).is_none());
    }

    #[test]
    fn test_query_ors_fragments_and_applies_limit() {
        let keys = Keys::generate();
        let mut store = RecordStore::new();
        for at in [100, 200, 300] {
            store.add(bookmark(&keys, &format!("{at}.example/"), at));
        }
        let note = EventBuilder::text_note("hi")
            .custom_created_at(Timestamp::from(50))
            .sign_with_keys(&keys)
            .unwrap();
        store.add(note.clone());

        let found = store.query(&[
            QueryFilter::new().kind(39701).limit(2),
            QueryFilter::new().kind(1),
        ]);
        let times: Vec<u64> = found.iter().map(|e| e.created_at.as_u64()).collect();
        assert_eq!(times, vec![300, 200, 50]);
    }

    #[test]
    fn test_query_returns_overlapping_matches_once() {
        let keys = Keys::generate();
        let mut store = RecordStore::new();
        for at in [100, 200] {
            store.add(bookmark(&keys, &format!("{at}.example/"), at));
        }

        let found = store.query(&[
            QueryFilter::new().kind(39701),
            QueryFilter::new().author(keys.public_key()),
            QueryFilter::new().kind(39701).limit(1),
        ]);
        let times: Vec<u64> = found.iter().map(|e| e.created_at.as_u64()).collect();
        assert_eq!(times, vec![200, 100]);
    }
}
