//! Dependent fetches triggered by newly stored records.

use nostr_sdk::{Event, EventId, Timestamp};
use tokio::time::Instant;

use super::gate::{DeferredAction, GateStep};
use super::Engine;
use crate::config::CascadeStep;
use crate::constants::kinds;
use crate::models::bookmark::is_valid_web_bookmark;
use crate::models::reference::{collect_references, hinted_references};
use crate::models::tag_utils::{d_tag, tags_named};
use crate::models::{Address, RecordRef};
use crate::query::{PendingQuery, QueryClass, QueryFilter};
use crate::relay_url::{is_secure, normalize_relay_url};
use crate::transport::RelayTransport;

/// Filter for the versions of one coordinate.
pub(crate) fn coordinate_filter(address: &Address) -> QueryFilter {
    let filter = QueryFilter::new().kind(address.kind).author(address.author);
    if address.is_addressable() {
        filter.tag('d', [address.identifier.clone()])
    } else {
        filter
    }
}

/// How other records point at `event`: `(a, coordinate)` for mutable
/// records, `(e, id)` otherwise. Upper-case names for comment scopes.
fn reference_tag(event: &Event, root_scope: bool) -> (char, String) {
    let (address_name, id_name) = if root_scope { ('A', 'E') } else { ('a', 'e') };
    match Address::of(event) {
        Some(address) => (address_name, address.to_string()),
        None => (id_name, event.id.to_hex()),
    }
}

impl<T: RelayTransport> Engine<T> {
    /// Schedule the cascade of a newly stored record, at most once per id.
    pub(super) fn cascade(&mut self, event: &Event, now: Instant) {
        let Some(rule) = self.config.cascade.rule(event.kind.as_u16()).cloned() else {
            return;
        };
        if !self.cascaded.insert(event.id) {
            return;
        }

        if let Some(tag) = rule.address_tag.as_deref() {
            self.resolve_address_tags(event, tag, now);
        }
        if rule.steps.is_empty() {
            return;
        }

        if rule.gate_author {
            let step = self
                .gates
                .request(event.pubkey, DeferredAction::Cascade(event.id));
            self.apply_gate_step(event.pubkey, step, now);
        } else {
            self.run_cascade_steps(&event.id, now);
        }
    }

    pub(super) fn run_cascade_steps(&mut self, id: &EventId, now: Instant) {
        let Some(event) = self.store.get(id).cloned() else {
            tracing::debug!(%id, "record left the store before its cascade ran");
            return;
        };
        let Some(rule) = self.config.cascade.rule(event.kind.as_u16()).cloned() else {
            return;
        };
        let is_live = event.created_at > self.session_start;

        for step in rule.steps.iter().copied() {
            if !rule.runs(step, is_live) {
                continue;
            }
            match step {
                CascadeStep::Deletions => self.fetch_deletions_of(&event, now),
                CascadeStep::Reactions => self.fetch_reactions_to(&event, now),
                CascadeStep::Comments => self.fetch_comments_on(&event, now),
                CascadeStep::Quotes => self.resolve_references(&event, now),
                CascadeStep::BookmarkUrl => self.fetch_bookmark_siblings(&event, now),
            }
        }
    }

    fn fetch_deletions_of(&mut self, event: &Event, now: Instant) {
        let until = Timestamp::now();
        let mut filters = vec![QueryFilter::new()
            .kind(kinds::DELETION)
            .tag('e', [event.id.to_hex()])
            .until(until)];
        if let Some(address) = Address::of(event) {
            filters.push(
                QueryFilter::new()
                    .kind(kinds::DELETION)
                    .tag('a', [address.to_string()])
                    .until(until),
            );
        }
        let relays = self.outbox_of(&event.pubkey);
        self.enqueue(
            PendingQuery::new(QueryClass::Deletion, filters).relays(relays),
            now,
        );
    }

    fn fetch_reactions_to(&mut self, event: &Event, now: Instant) {
        let (name, value) = reference_tag(event, false);
        let filter = QueryFilter::new()
            .kind(kinds::REACTION)
            .tag(name, [value])
            .limit(self.config.reaction_limit);
        let relays = self.inbox_of(&event.pubkey);
        self.enqueue(
            PendingQuery::single(QueryClass::Reaction, filter).relays(relays),
            now,
        );
    }

    fn fetch_comments_on(&mut self, event: &Event, now: Instant) {
        let (name, value) = reference_tag(event, true);
        let filter = QueryFilter::new()
            .kind(kinds::COMMENT)
            .tag(name, [value])
            .limit(self.config.comment_limit);
        let relays = self.inbox_of(&event.pubkey);
        self.enqueue(
            PendingQuery::single(QueryClass::Comment, filter).relays(relays),
            now,
        );
    }

    fn is_resolved(&self, reference: &RecordRef) -> bool {
        match reference {
            RecordRef::Id(id) => self.store.has(id),
            RecordRef::Address(address) => self.store.current_at(address).is_some(),
        }
    }

    fn enqueue_reference(&mut self, reference: RecordRef, relays: Vec<String>, now: Instant) {
        let query = match reference {
            RecordRef::Id(id) => PendingQuery::single(QueryClass::Id, QueryFilter::new().id(id)),
            RecordRef::Address(address) => {
                PendingQuery::single(QueryClass::AddressCoordinates, coordinate_filter(&address))
            }
        };
        self.enqueue(query.relays(relays), now);
    }

    /// Fetch quoted records and the profiles of mentioned authors.
    fn resolve_references(&mut self, event: &Event, now: Instant) {
        let refs = collect_references(event);
        if refs.is_empty() {
            return;
        }

        let mut relays = refs.record_relays.clone();
        for pubkey in &refs.pubkeys {
            relays.extend(self.inbox_of(pubkey));
        }
        let relays = self.directory.filter_relays(relays);

        let ids: Vec<EventId> = refs
            .ids
            .iter()
            .filter(|id| !self.store.has(id))
            .copied()
            .collect();
        if !ids.is_empty() {
            self.enqueue(
                PendingQuery::single(QueryClass::Id, QueryFilter::new().ids(ids))
                    .relays(relays.clone()),
                now,
            );
        }

        for address in &refs.addresses {
            if self.store.current_at(address).is_none() {
                self.enqueue_reference(RecordRef::Address(address.clone()), relays.clone(), now);
            }
        }

        for (reference, hint) in hinted_references(event, "q") {
            if relays.contains(&hint) || !self.directory.allows(&hint) || self.is_resolved(&reference) {
                continue;
            }
            tracing::debug!(%hint, "fetching quote from its hint relay");
            self.enqueue_reference(reference, vec![hint], now);
        }

        for pubkey in refs.pubkeys {
            if self.store.has_current(kinds::METADATA, &pubkey, None) {
                continue;
            }
            let action = DeferredAction::ResolveProfile {
                author: pubkey,
                hints: refs.profile_relays.clone(),
            };
            match self.gates.request(pubkey, action) {
                // already looked up once; try the hints directly
                GateStep::Run(_) => self.fetch_profile(pubkey, &refs.profile_relays, None, now),
                step => self.apply_gate_step(pubkey, step, now),
            }
        }
    }

    /// Other bookmarks of the same page, and reactions to the page itself.
    fn fetch_bookmark_siblings(&mut self, event: &Event, now: Instant) {
        let d = d_tag(event);
        if !is_valid_web_bookmark(d) {
            tracing::debug!(id = %event.id, d, "not fetching siblings of a non-canonical bookmark");
            return;
        }

        let relays = self.selector().own_outbox();
        let siblings = QueryFilter::new()
            .kind(kinds::WEB_BOOKMARK)
            .tag('d', [d])
            .until(Timestamp::now());
        self.enqueue(
            PendingQuery::single(QueryClass::BookmarkUrl, siblings).relays(relays.clone()),
            now,
        );

        let url_reactions = QueryFilter::new()
            .kind(kinds::WEB_REACTION)
            .tag('r', [format!("https://{d}")])
            .limit(self.config.reaction_limit);
        self.enqueue(
            PendingQuery::single(QueryClass::WebReaction, url_reactions).relays(relays),
            now,
        );
    }

    /// Fetch the coordinates named by `tag_name` tags that are not stored yet.
    pub(super) fn resolve_address_tags(&mut self, event: &Event, tag_name: &str, now: Instant) {
        let mut wanted: Vec<(Address, Option<String>)> = Vec::new();
        for tag in tags_named(event, tag_name, 2) {
            let Some(address) = Address::parse(&tag[1]) else {
                tracing::warn!(id = %event.id, value = %tag[1], "bad coordinate tag");
                continue;
            };
            let hint = tag
                .get(2)
                .and_then(|h| normalize_relay_url(h))
                .filter(|h| is_secure(h));
            wanted.push((address, hint));
        }

        for (address, hint) in wanted {
            if self.store.current_at(&address).is_some() {
                continue;
            }
            let mut relays: Vec<String> = hint.into_iter().collect();
            relays.extend(self.outbox_of(&address.author));
            let relays = self.directory.filter_relays(relays);
            self.enqueue_reference(RecordRef::Address(address), relays, now);
        }
    }
}
