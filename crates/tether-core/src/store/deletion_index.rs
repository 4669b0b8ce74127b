use std::collections::{HashMap, HashSet};

use nostr_sdk::{Event, EventId, PublicKey, Timestamp};

use crate::models::tag_utils::extract_all_tag_values;
use crate::models::Address;

/// What the known deletion requests have deleted.
///
/// Rebuilt from every stored kind:5 record whenever a new one is accepted.
/// A deletion only counts against records of its own author.
#[derive(Debug, Default)]
pub struct DeletionIndex {
    /// Deleted id -> authors of deletions naming it
    ids: HashMap<EventId, HashSet<PublicKey>>,
    /// Coordinate -> newest deletion time from the coordinate's author
    addresses: HashMap<Address, Timestamp>,
}

impl DeletionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from deletion records, oldest first.
    pub fn rebuild<'a, I>(&mut self, deletions: I)
    where
        I: IntoIterator<Item = &'a Event>,
    {
        self.ids.clear();
        self.addresses.clear();

        let mut sorted: Vec<&Event> = deletions.into_iter().collect();
        sorted.sort_by_key(|e| e.created_at);

        for deletion in sorted {
            for raw in extract_all_tag_values(deletion, "e") {
                match EventId::from_hex(&raw) {
                    Ok(id) => {
                        self.ids.entry(id).or_default().insert(deletion.pubkey);
                    }
                    Err(_) => tracing::debug!(deletion = %deletion.id, value = %raw, "bad e tag in deletion"),
                }
            }
            for raw in extract_all_tag_values(deletion, "a") {
                let Some(address) = Address::parse(&raw) else {
                    tracing::debug!(deletion = %deletion.id, value = %raw, "bad a tag in deletion");
                    continue;
                };
                if address.author != deletion.pubkey {
                    continue;
                }
                let until = self.addresses.entry(address).or_insert(deletion.created_at);
                if deletion.created_at > *until {
                    *until = deletion.created_at;
                }
            }
        }
    }

    /// Whether a delivered record has already been deleted by its author.
    pub fn is_deleted(&self, event: &Event) -> bool {
        if self
            .ids
            .get(&event.id)
            .is_some_and(|deleters| deleters.contains(&event.pubkey))
        {
            return true;
        }
        Address::of(event)
            .and_then(|address| self.addresses.get(&address))
            .is_some_and(|until| event.created_at <= *until)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.addresses.clear();
    }
}
