//! Outbox-model relay selection.
//!
//! Every result is normalized, `wss://` only, and free of dead and blocked
//! relays. An empty selection is reported as `None`, meaning the transport
//! should use its own default relays.

use std::collections::{BTreeMap, HashSet};

use nostr_sdk::{Event, EventId, PublicKey};

use crate::models::tag_utils::tag_slices;
use crate::relay::RelayDirectory;
use crate::store::ProvenanceTracker;

/// Borrowed view over the state relay decisions depend on.
pub struct RelaySelector<'a> {
    pub directory: &'a RelayDirectory,
    pub provenance: &'a ProvenanceTracker,
    pub default_relays: &'a [String],
    pub profile_relays: &'a [String],
    pub max_per_author: usize,
}

fn non_empty(relays: Vec<String>) -> Option<Vec<String>> {
    if relays.is_empty() {
        None
    } else {
        Some(relays)
    }
}

impl<'a> RelaySelector<'a> {
    /// Rank an author's relays: relays that already served the author first,
    /// then list order. Capped at `max_per_author`.
    fn rank_for_author(&self, author: &PublicKey, relays: Vec<String>) -> Vec<String> {
        let mut relays = self.directory.filter_relays(relays);
        // stable: equal counts keep list order
        relays.sort_by_key(|relay| std::cmp::Reverse(self.provenance.served_count(author, relay)));
        relays.truncate(self.max_per_author);
        relays
    }

    /// Where an author publishes, best relays first.
    pub fn outbox(&self, author: &PublicKey) -> Vec<String> {
        let relays = self.directory.write_relays(author).unwrap_or_default();
        self.rank_for_author(author, relays)
    }

    /// Where an author reads, best relays first.
    pub fn inbox(&self, author: &PublicKey) -> Vec<String> {
        let relays = self.directory.read_relays(author).unwrap_or_default();
        self.rank_for_author(author, relays)
    }

    fn has_usable_outbox(&self, author: &PublicKey) -> bool {
        let outbox = self.directory.write_relays(author).unwrap_or_default();
        !self.directory.filter_relays(outbox).is_empty()
    }

    /// The account's own write relays, filtered and capped.
    pub fn own_outbox(&self) -> Vec<String> {
        let mut relays = self.directory.filter_relays(self.directory.own_write_relays());
        relays.truncate(self.max_per_author);
        relays
    }

    /// Greedy set cover of the authors' outbox relays.
    ///
    /// Authors already served by a `baseline` relay are skipped and baseline
    /// relays are never picked again. Ties go to the relay with more proven
    /// deliveries for the authors it would cover, then to the smaller URL.
    pub fn cover_authors(&self, authors: &[PublicKey], baseline: &[String]) -> Vec<String> {
        let baseline: HashSet<String> = self.directory.filter_relays(baseline).into_iter().collect();

        let mut uncovered: Vec<PublicKey> = Vec::new();
        let mut candidates: BTreeMap<String, Vec<PublicKey>> = BTreeMap::new();
        for author in authors {
            if uncovered.contains(author) {
                continue;
            }
            let outbox = self
                .directory
                .filter_relays(self.directory.write_relays(author).unwrap_or_default());
            if outbox.is_empty() || outbox.iter().any(|r| baseline.contains(r)) {
                continue;
            }
            uncovered.push(*author);
            for relay in outbox {
                candidates.entry(relay).or_default().push(*author);
            }
        }

        let mut selected = Vec::new();
        while !uncovered.is_empty() {
            let best = candidates
                .iter()
                .map(|(relay, served)| {
                    let covers: Vec<&PublicKey> =
                        served.iter().filter(|a| uncovered.contains(a)).collect();
                    let proven: usize = covers
                        .iter()
                        .map(|a| self.provenance.served_count(a, relay))
                        .sum();
                    (relay, covers.len(), proven)
                })
                .filter(|(_, covered, _)| *covered > 0)
                .max_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)).then(b.0.cmp(a.0)));

            let Some((relay, _, _)) = best else {
                break;
            };
            let relay = relay.clone();
            if let Some(served) = candidates.remove(&relay) {
                uncovered.retain(|a| !served.contains(a));
            }
            selected.push(relay);
        }
        selected
    }

    /// Relays to read the given authors' records from.
    ///
    /// One author: their outbox, capped. Several: a set cover of their
    /// outboxes. `baseline` relays (for example pointer hints) are always
    /// included. The default relays are used when nothing else was selected,
    /// and added to a set cover when any author has no usable outbox.
    pub fn read_relays_for(&self, authors: &[PublicKey], baseline: &[String]) -> Option<Vec<String>> {
        let mut relays: Vec<String> = baseline.to_vec();
        let mut needs_defaults = false;
        match authors {
            [] => {}
            [author] => relays.extend(self.outbox(author)),
            _ => {
                relays.extend(self.cover_authors(authors, baseline));
                needs_defaults = authors.iter().any(|a| !self.has_usable_outbox(a));
            }
        }
        if relays.is_empty() || needs_defaults {
            relays.extend(self.default_relays.iter().cloned());
        }
        non_empty(self.directory.filter_relays(relays))
    }

    /// Inbox relays of every author tagged with `p` or `P`.
    pub fn inboxes_of_tagged(&self, event: &Event) -> Vec<String> {
        let mut relays = Vec::new();
        for tag in tag_slices(event) {
            if tag.len() < 2 || (tag[0] != "p" && tag[0] != "P") {
                continue;
            }
            let Ok(pubkey) = PublicKey::from_hex(&tag[1]) else {
                continue;
            };
            relays.extend(self.directory.read_relays(&pubkey).unwrap_or_default());
        }
        self.directory.filter_relays(relays)
    }

    /// Relays to publish a signed record to: the account's write relays plus
    /// the inboxes of the authors tagged in `target` (or the record itself).
    pub fn publish_relays(&self, event: &Event, target: Option<&Event>) -> Option<Vec<String>> {
        let mut relays = self.directory.own_write_relays();
        relays.extend(self.inboxes_of_tagged(target.unwrap_or(event)));
        non_empty(self.directory.filter_relays(relays))
    }

    /// Best relay to cite when referencing `event`.
    ///
    /// Prefers relays that delivered it and are in the author's outbox, then
    /// any relay that delivered it, then the given candidates the same way.
    pub fn hint_for_event(&self, event: &Event, candidates: &[String]) -> Option<String> {
        let outbox = self.directory.write_relays(&event.pubkey).unwrap_or_default();
        let seen = self
            .directory
            .filter_relays(self.provenance.secure_seen_on(&event.id));

        if let Some(relay) = seen.iter().find(|r| outbox.contains(r)) {
            return Some(relay.clone());
        }
        if let Some(relay) = seen.first() {
            return Some(relay.clone());
        }
        let candidates = self.directory.filter_relays(candidates);
        candidates
            .iter()
            .find(|r| outbox.contains(r))
            .or(candidates.first())
            .cloned()
    }

    /// Best relay to cite when referencing an author.
    ///
    /// Only outbox relays qualify: first one that delivered the author's
    /// profile (aggregator relays excluded), then a matching candidate.
    pub fn hint_for_author(
        &self,
        author: &PublicKey,
        profile_id: Option<&EventId>,
        candidates: &[String],
    ) -> Option<String> {
        let outbox = self.directory.write_relays(author).unwrap_or_default();
        if let Some(id) = profile_id {
            let seen = self.directory.filter_relays(self.provenance.secure_seen_on(id));
            if let Some(relay) = seen
                .into_iter()
                .find(|r| !self.profile_relays.contains(r) && outbox.contains(r))
            {
                return Some(relay);
            }
        }
        self.directory
            .filter_relays(candidates)
            .into_iter()
            .find(|r| outbox.contains(r))
    }
}
