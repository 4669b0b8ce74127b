//! Applying deletion requests and carrying them to every relay that served
//! a deleted record.

use nostr_sdk::{Event, EventId};

use super::{Engine, StoreNotification};
use crate::constants::kinds;
use crate::models::tag_utils::extract_all_tag_values;
use crate::models::Address;
use crate::query::QueryFilter;
use crate::transport::RelayTransport;

impl<T: RelayTransport> Engine<T> {
    /// Stored records that `deletion` removes: its `e` ids and the versions
    /// of its `a` coordinates created no later than the deletion, all
    /// authored by the deletion's author.
    fn deletion_targets(&self, deletion: &Event) -> Vec<EventId> {
        let mut targets: Vec<EventId> = Vec::new();

        for raw in extract_all_tag_values(deletion, "e") {
            let Ok(id) = EventId::from_hex(&raw) else {
                tracing::warn!(deletion = %deletion.id, value = %raw, "bad e tag in deletion");
                continue;
            };
            if self
                .store
                .get(&id)
                .is_some_and(|target| target.pubkey == deletion.pubkey)
                && !targets.contains(&id)
            {
                targets.push(id);
            }
        }

        for raw in extract_all_tag_values(deletion, "a") {
            let Some(address) = Address::parse(&raw) else {
                tracing::warn!(deletion = %deletion.id, value = %raw, "bad a tag in deletion");
                continue;
            };
            if address.author != deletion.pubkey {
                continue;
            }
            let versions = self.store.query(&[QueryFilter::new()
                .kind(address.kind)
                .author(address.author)]);
            for version in versions {
                if address.matches(&version)
                    && version.created_at <= deletion.created_at
                    && !targets.contains(&version.id)
                {
                    targets.push(version.id);
                }
            }
        }

        targets
    }

    /// Remove what `deletion` targets and republish it to the relays that
    /// served a target but have not delivered the deletion itself.
    pub(super) fn process_deletion(&mut self, deletion: &Event) {
        let targets = self.deletion_targets(deletion);
        if targets.is_empty() {
            return;
        }

        let mut served: Vec<String> = Vec::new();
        for id in &targets {
            for relay in self.provenance.secure_seen_on(id) {
                if !served.contains(&relay) {
                    served.push(relay);
                }
            }
            self.provenance.forget(id);

            if let Some(removed) = self.store.remove(id) {
                tracing::info!(deletion = %deletion.id, target = %id, "removed deleted record");
                if removed.kind.as_u16() == kinds::RELAY_LIST {
                    self.refresh_relay_list(&removed.pubkey);
                }
                self.notify(StoreNotification::Removed(*id));
            }
        }

        let delivered = self.provenance.seen_on(&deletion.id);
        let missing: Vec<String> = served
            .into_iter()
            .filter(|relay| !delivered.contains(relay) && self.directory.allows(relay))
            .collect();
        if missing.is_empty() {
            return;
        }

        tracing::info!(deletion = %deletion.id, relays = ?missing, "republishing deletion");
        self.stats.republished_deletions += 1;
        // acknowledgements of a republish are not tracked
        let _acks = self.transport.publish(deletion, Some(missing));
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use nostr_sdk::prelude::*;
    use tokio::time::Instant;

    #[test]
    fn test_republishes_to_served_minus_delivering_relays() {
        let mut engine = engine();
        let keys = Keys::generate();
        let note = old_event(&keys, 1, "oops", &[]);
        let now = Instant::now();
        for relay in ["wss://r1.example", "wss://r2.example", "wss://r3.example"] {
            engine.ingest(note.clone(), relay, now);
        }
        let mut updates = engine.subscribe_to_store();

        let deletion = old_event(&keys, 5, "", &[&["e", &note.id.to_hex()], &["k", "1"]]);
        engine.ingest(deletion.clone(), "wss://r2.example", now);

        assert!(!engine.store().has(&note.id));
        assert!(engine.get_seen_on(&note.id).is_empty());
        let published = &engine.transport().published;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0.id, deletion.id);
        assert_eq!(
            published[0].1,
            Some(vec![
                "wss://r1.example".to_string(),
                "wss://r3.example".to_string()
            ])
        );
        assert_eq!(engine.stats().republished_deletions, 1);
        assert_eq!(updates.try_recv().unwrap(), StoreNotification::Removed(note.id));
        assert_eq!(
            updates.try_recv().unwrap(),
            StoreNotification::Added(deletion)
        );

        // a late copy of the deleted record is dropped
        engine.ingest(note.clone(), "wss://r4.example", now);
        assert!(!engine.store().has(&note.id));
        assert_eq!(engine.stats().deleted_drops, 1);
    }

    #[test]
    fn test_no_republish_when_every_serving_relay_has_it() {
        let mut engine = engine();
        let keys = Keys::generate();
        let note = old_event(&keys, 1, "oops", &[]);
        let now = Instant::now();
        engine.ingest(note.clone(), "wss://r1.example", now);

        let deletion = old_event(&keys, 5, "", &[&["e", &note.id.to_hex()]]);
        engine.ingest(deletion, "wss://r1.example", now);
        assert!(!engine.store().has(&note.id));
        assert!(engine.transport().published.is_empty());
    }

    #[test]
    fn test_deletion_by_another_author_is_ignored() {
        let mut engine = engine();
        let author = Keys::generate();
        let stranger = Keys::generate();
        let note = old_event(&author, 1, "mine", &[]);
        let now = Instant::now();
        engine.ingest(note.clone(), "wss://r1.example", now);

        let deletion = old_event(&stranger, 5, "", &[&["e", &note.id.to_hex()]]);
        engine.ingest(deletion, "wss://r2.example", now);
        assert!(engine.store().has(&note.id));
        assert!(engine.transport().published.is_empty());
    }

    #[test]
    fn test_coordinate_deletion_spares_newer_versions() {
        let mut engine = engine();
        let keys = Keys::generate();
        let old = event_at(&keys, 30023, 1_000, &[&["d", "post"]]);
        let new = event_at(&keys, 30023, 3_000, &[&["d", "post"]]);
        let other = event_at(&keys, 30023, 1_000, &[&["d", "other"]]);
        let now = Instant::now();
        for event in [&old, &new, &other] {
            engine.ingest(event.clone(), "wss://r1.example", now);
        }

        let coordinate = format!("30023:{}:post", keys.public_key().to_hex());
        let deletion = event_at(&keys, 5, 2_000, &[&["a", &coordinate]]);
        engine.ingest(deletion, "wss://r2.example", now);

        assert!(!engine.store().has(&old.id));
        assert!(engine.store().has(&new.id));
        assert!(engine.store().has(&other.id));
        assert_eq!(
            engine.transport().published[0].1,
            Some(vec!["wss://r1.example".to_string()])
        );
    }

    #[test]
    fn test_deleted_relay_list_leaves_the_directory() {
        let mut engine = engine();
        let keys = Keys::generate();
        let list = relay_list_event(&keys, &[("wss://out.example", None)]);
        let now = Instant::now();
        engine.ingest(list.clone(), "wss://r1.example", now);
        assert!(engine.directory().has_list(&keys.public_key()));

        let deletion = old_event(&keys, 5, "", &[&["e", &list.id.to_hex()]]);
        engine.ingest(deletion, "wss://r1.example", now);
        assert!(!engine.directory().has_list(&keys.public_key()));
    }
}
