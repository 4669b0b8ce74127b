//! The aggregation engine.
//!
//! [`Engine`] owns the store, provenance, deletion index, relay directory,
//! query batcher and author gates, and drives a [`RelayTransport`]. It is a
//! plain `&mut self` state machine: callers feed it transport messages and
//! timer ticks (see [`crate::runtime`]) and it never awaits anything itself.
//!
//! Record delivery pipeline:
//!
//! 1. drop records an accepted deletion already covers
//! 2. record which relay delivered it
//! 3. drop duplicates and records that already cascaded
//! 4. apply deletion requests, republishing them where needed
//! 5. store, refresh relay lists, cascade, notify observers

mod cascade;
mod compose;
mod deletion;
mod fetch;
pub mod gate;

use std::collections::{HashMap, HashSet};

use nostr_sdk::{Event, EventId, PublicKey, Timestamp};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::constants::kinds;
use crate::models::tag_utils::extract_all_tag_values;
use crate::models::RelayList;
use crate::query::{Completion, MergedQuery, PendingQuery, QueryBatcher, QueryClass, QueryFilter};
use crate::relay::{RelayDirectory, RelaySelector};
use crate::stats::EngineStats;
use crate::store::{DeletionIndex, ProvenanceTracker, RecordStore};
use crate::transport::{AckStream, RelayTransport, ReqMode, SubId, TransportMessage, WireQuery};

pub use compose::{deletion_template, EventTemplate};
pub use fetch::PageParams;
use gate::{AuthorGates, DeferredAction, GateStep};

/// Store change pushed to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreNotification {
    Added(Event),
    Removed(EventId),
}

#[derive(Debug)]
struct ActiveSub {
    class: QueryClass,
    mode: ReqMode,
    group: Option<u64>,
    /// Idle deadline of a backward subscription
    deadline: Option<Instant>,
}

/// Completions shared by the chunks of one merged query.
#[derive(Debug)]
struct CompletionGroup {
    remaining: usize,
    completions: Vec<Completion>,
}

pub struct Engine<T: RelayTransport> {
    config: EngineConfig,
    transport: T,
    store: RecordStore,
    provenance: ProvenanceTracker,
    deletions: DeletionIndex,
    directory: RelayDirectory,
    batcher: QueryBatcher,
    gates: AuthorGates,
    subs: HashMap<SubId, ActiveSub>,
    groups: HashMap<u64, CompletionGroup>,
    next_sub: u64,
    next_group: u64,
    live_subs: Vec<SubId>,
    cascaded: HashSet<EventId>,
    observers: Vec<mpsc::UnboundedSender<StoreNotification>>,
    default_relays: Vec<String>,
    session_start: Timestamp,
    account: Option<PublicKey>,
    stats: EngineStats,
}

impl<T: RelayTransport> Engine<T> {
    pub fn new(config: EngineConfig, transport: T) -> Self {
        let batcher = QueryBatcher::new(config.batch_window(), config.max_filters_per_query);
        let mut engine = Self {
            config,
            transport,
            store: RecordStore::new(),
            provenance: ProvenanceTracker::new(),
            deletions: DeletionIndex::new(),
            directory: RelayDirectory::new(),
            batcher,
            gates: AuthorGates::new(),
            subs: HashMap::new(),
            groups: HashMap::new(),
            next_sub: 0,
            next_group: 0,
            live_subs: Vec::new(),
            cascaded: HashSet::new(),
            observers: Vec::new(),
            default_relays: Vec::new(),
            session_start: Timestamp::now(),
            account: None,
            stats: EngineStats::default(),
        };
        engine.refresh_default_relays();
        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Stored records matching any of `filters`, newest first.
    pub fn query(&self, filters: &[QueryFilter]) -> Vec<Event> {
        self.store.query(filters)
    }

    pub fn directory(&self) -> &RelayDirectory {
        &self.directory
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn account(&self) -> Option<PublicKey> {
        self.account
    }

    /// Records created after this instant are live and skip historical-only steps.
    pub fn session_start(&self) -> Timestamp {
        self.session_start
    }

    pub fn set_session_start(&mut self, start: Timestamp) {
        self.session_start = start;
    }

    /// Relays used when a query names none.
    pub fn default_relays(&self) -> &[String] {
        &self.default_relays
    }

    pub(crate) fn selector(&self) -> RelaySelector<'_> {
        RelaySelector {
            directory: &self.directory,
            provenance: &self.provenance,
            default_relays: &self.default_relays,
            profile_relays: &self.config.profile_relays,
            max_per_author: self.config.max_relays_per_author,
        }
    }

    fn outbox_of(&self, author: &PublicKey) -> Vec<String> {
        if self.config.outbox_enabled {
            self.selector().outbox(author)
        } else {
            Vec::new()
        }
    }

    fn inbox_of(&self, author: &PublicKey) -> Vec<String> {
        if self.config.outbox_enabled {
            self.selector().inbox(author)
        } else {
            Vec::new()
        }
    }

    /// Receive every store addition and removal from now on.
    pub fn subscribe_to_store(&mut self) -> mpsc::UnboundedReceiver<StoreNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    fn notify(&mut self, notification: StoreNotification) {
        self.observers
            .retain(|observer| observer.send(notification.clone()).is_ok());
    }

    pub fn set_dead_relays<I, S>(&mut self, relays: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.directory.set_dead(relays);
        self.refresh_default_relays();
    }

    pub fn set_blocked_relays<I, S>(&mut self, relays: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.directory.set_blocked(relays);
        self.refresh_default_relays();
    }

    /// Use `list` as the account's own relays. Its read relays become the
    /// transport defaults; without a list the configured defaults are used.
    pub fn set_own_relay_list(&mut self, list: Option<RelayList>) {
        self.directory.set_own(list);
        self.refresh_default_relays();
    }

    fn refresh_default_relays(&mut self) {
        let own = self.directory.filter_relays(self.directory.own_read_relays());
        self.default_relays = if own.is_empty() {
            self.directory.filter_relays(&self.config.default_relays)
        } else {
            own
        };
        self.transport.set_default_relays(&self.default_relays);
    }

    /// Relays that delivered `id`.
    pub fn get_seen_on(&self, id: &EventId) -> Vec<String> {
        self.provenance.seen_on(id).to_vec()
    }

    /// Best relay to cite next to a reference to `event`.
    pub fn relay_hint_for_event(&self, event: &Event, candidates: &[String]) -> Option<String> {
        self.selector().hint_for_event(event, candidates)
    }

    /// Best relay to cite next to a reference to `author`.
    pub fn relay_hint_for_author(&self, author: &PublicKey, candidates: &[String]) -> Option<String> {
        let profile_id = self
            .store
            .get_current(kinds::METADATA, author, None)
            .map(|profile| profile.id);
        self.selector()
            .hint_for_author(author, profile_id.as_ref(), candidates)
    }

    /// The earliest instant at which [`Engine::on_timer`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let idle = self.subs.values().filter_map(|sub| sub.deadline).min();
        match (self.batcher.next_deadline(), idle) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Flush expired batch windows and complete idle one-shot subscriptions.
    pub fn on_timer(&mut self, now: Instant) {
        let defaults = self.default_relays.clone();
        for merged in self.batcher.flush_due(now, &defaults) {
            self.issue(merged, now);
        }

        let mut idle: Vec<SubId> = self
            .subs
            .iter()
            .filter(|(_, sub)| sub.deadline.is_some_and(|deadline| deadline <= now))
            .map(|(id, _)| *id)
            .collect();
        idle.sort();
        for id in idle {
            tracing::debug!(sub = %id, "subscription idle, completing");
            self.finish_sub(id, now);
        }
    }

    pub fn handle_message(&mut self, message: TransportMessage, now: Instant) {
        match message {
            TransportMessage::Event { id, relay, event } => {
                let timeout = self.config.completion_timeout();
                let Some(sub) = self.subs.get_mut(&id) else {
                    tracing::debug!(sub = %id, event = %event.id, "record for a closed subscription");
                    return;
                };
                if let Some(deadline) = sub.deadline.as_mut() {
                    *deadline = now + timeout;
                }
                self.ingest(*event, &relay, now);
            }
            TransportMessage::EndOfStream { id } => {
                if self
                    .subs
                    .get(&id)
                    .is_some_and(|sub| sub.mode == ReqMode::Backward)
                {
                    self.finish_sub(id, now);
                }
            }
        }
    }

    /// Submit a logical fetch. Batched classes wait for their window.
    pub fn enqueue(&mut self, query: PendingQuery, now: Instant) {
        self.stats.record_logical(query.class);
        if query.class.is_batched() {
            self.batcher.push(query, now);
        } else {
            let merged = MergedQuery::immediate(query, self.config.max_filters_per_query);
            self.issue(merged, now);
        }
    }

    fn issue(&mut self, merged: MergedQuery, now: Instant) {
        let MergedQuery {
            class,
            chunks,
            relays,
            completions,
        } = merged;

        if chunks.is_empty() {
            for completion in completions {
                self.fire(completion, now);
            }
            return;
        }

        let group = if completions.is_empty() {
            None
        } else {
            let id = self.next_group;
            self.next_group += 1;
            self.groups.insert(
                id,
                CompletionGroup {
                    remaining: chunks.len(),
                    completions,
                },
            );
            Some(id)
        };

        let mode = if class == QueryClass::Live {
            ReqMode::Forward
        } else {
            ReqMode::Backward
        };
        let relays = relays
            .map(|relays| self.directory.filter_relays(relays))
            .filter(|relays| !relays.is_empty());
        let timeout = self.config.completion_timeout();

        for filters in chunks {
            let id = SubId(self.next_sub);
            self.next_sub += 1;
            let query = WireQuery {
                id,
                class,
                filters,
                relays: relays.clone(),
                mode,
            };
            tracing::debug!(
                sub = %id,
                ?class,
                filters = query.filters.len(),
                relays = ?query.relays,
                "opening subscription"
            );
            self.transport.subscribe(&query);
            self.stats.record_wire(class);
            self.subs.insert(
                id,
                ActiveSub {
                    class,
                    mode,
                    group,
                    deadline: (mode == ReqMode::Backward).then(|| now + timeout),
                },
            );
            if mode == ReqMode::Forward {
                self.live_subs.push(id);
            }
        }
    }

    fn finish_sub(&mut self, id: SubId, now: Instant) {
        let Some(sub) = self.subs.remove(&id) else {
            return;
        };
        tracing::trace!(sub = %id, class = ?sub.class, "closing subscription");
        self.transport.close(id);

        let Some(group_id) = sub.group else {
            return;
        };
        let Some(group) = self.groups.get_mut(&group_id) else {
            return;
        };
        group.remaining = group.remaining.saturating_sub(1);
        if group.remaining > 0 {
            return;
        }
        if let Some(group) = self.groups.remove(&group_id) {
            for completion in group.completions {
                self.fire(completion, now);
            }
        }
    }

    fn close_live_subs(&mut self) {
        for id in std::mem::take(&mut self.live_subs) {
            if self.subs.remove(&id).is_some() {
                self.transport.close(id);
            }
        }
    }

    fn fire(&mut self, completion: Completion, now: Instant) {
        match completion {
            Completion::Notify(tx) => {
                let _ = tx.send(());
            }
            Completion::RelayListGate(authors) => {
                for author in authors {
                    let step = self.gates.relay_list_done(&author);
                    self.apply_gate_step(author, step, now);
                }
            }
            Completion::ProfileGate(author) => {
                let step = self.gates.profile_done(&author);
                self.apply_gate_step(author, step, now);
            }
        }
    }

    fn apply_gate_step(&mut self, author: PublicKey, step: GateStep, now: Instant) {
        match step {
            GateStep::Run(actions) => {
                for action in actions {
                    self.run_deferred(action, now);
                }
            }
            GateStep::FetchRelayList
                if self.store.has_current(kinds::RELAY_LIST, &author, None) =>
            {
                let step = self.gates.relay_list_done(&author);
                self.apply_gate_step(author, step, now);
            }
            GateStep::FetchProfile { .. }
                if self.store.has_current(kinds::METADATA, &author, None) =>
            {
                let step = self.gates.profile_done(&author);
                self.apply_gate_step(author, step, now);
            }
            GateStep::FetchRelayList => {
                let relays = self.directory.filter_relays(&self.config.indexer_relays);
                let query = PendingQuery::single(
                    QueryClass::RelayList,
                    QueryFilter::new().kind(kinds::RELAY_LIST).author(author),
                )
                .relays(relays)
                .completion(Completion::RelayListGate(vec![author]));
                self.enqueue(query, now);
            }
            GateStep::FetchProfile { hints } => {
                self.fetch_profile(author, &hints, Some(Completion::ProfileGate(author)), now);
            }
            GateStep::Wait => {}
        }
    }

    fn run_deferred(&mut self, action: DeferredAction, now: Instant) {
        match action {
            DeferredAction::Cascade(id) => self.run_cascade_steps(&id, now),
            // Its hints already went into the gate's own profile fetch.
            DeferredAction::ResolveProfile { .. } => {}
        }
    }

    /// Run one delivered record through the pipeline.
    pub fn ingest(&mut self, event: Event, relay: &str, now: Instant) {
        if self.deletions.is_deleted(&event) {
            tracing::debug!(id = %event.id, relay, "dropping deleted record");
            self.stats.deleted_drops += 1;
            return;
        }

        self.provenance.record(event.id, event.pubkey, relay);

        if self.store.has(&event.id) {
            self.stats.duplicates += 1;
            return;
        }
        if self.cascaded.contains(&event.id) {
            tracing::debug!(id = %event.id, "record already cascaded, not storing again");
            return;
        }

        let kind = event.kind.as_u16();
        if kind == kinds::DELETION {
            self.process_deletion(&event);
        }

        self.store.add(event.clone());
        self.stats.record_accepted(kind);

        match kind {
            kinds::DELETION => {
                let deletions = self.store.query(&[QueryFilter::new().kind(kinds::DELETION)]);
                self.deletions.rebuild(&deletions);
            }
            kinds::RELAY_LIST => self.refresh_relay_list(&event.pubkey),
            kinds::BLOCKED_RELAYS if self.account == Some(event.pubkey) => {
                self.refresh_blocked_relays()
            }
            _ => {}
        }

        self.cascade(&event, now);
        self.notify(StoreNotification::Added(event));
    }

    fn refresh_relay_list(&mut self, author: &PublicKey) {
        let list = self
            .store
            .get_current(kinds::RELAY_LIST, author, None)
            .map(RelayList::from_event);
        let is_own = self.account.as_ref() == Some(author);
        match list {
            Some(list) => {
                if is_own {
                    self.directory.set_own(Some(list.clone()));
                }
                self.directory.update(*author, list);
            }
            None => {
                if is_own {
                    self.directory.set_own(None);
                }
                self.directory.remove(author);
            }
        }
        if is_own {
            self.refresh_default_relays();
        }
    }

    fn refresh_blocked_relays(&mut self) {
        let Some(account) = self.account else {
            return;
        };
        let Some(list) = self
            .store
            .get_current(kinds::BLOCKED_RELAYS, &account, None)
        else {
            return;
        };
        let blocked = extract_all_tag_values(list, "relay");
        tracing::info!(count = blocked.len(), "applying blocked relay list");
        self.directory.set_blocked(blocked);
        self.refresh_default_relays();
    }

    /// Publish a signed record to the account's write relays and the inboxes
    /// of the authors tagged in `target` (or in the record itself).
    pub fn send_signed(&mut self, event: &Event, target: Option<&Event>) -> AckStream {
        let relays = self.selector().publish_relays(event, target);
        tracing::info!(id = %event.id, kind = event.kind.as_u16(), relays = ?relays, "publishing record");
        self.transport.publish(event, relays)
    }

    /// Close every subscription and forget all state. Pending batches and
    /// completions are dropped without firing.
    pub fn dispose(&mut self) {
        tracing::info!(records = self.store.len(), "disposing engine");
        self.transport.close_all();
        self.subs.clear();
        self.groups.clear();
        self.live_subs.clear();
        self.batcher.clear();
        self.gates.clear();
        self.store.clear();
        self.provenance.clear();
        self.deletions.clear();
        self.directory.clear();
        self.cascaded.clear();
        self.observers.clear();
        self.account = None;
        self.refresh_default_relays();
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::config::CascadePolicy;
    use nostr_sdk::prelude::*;
    use tokio::sync::oneshot;

    #[test]
    fn test_duplicate_delivery_stores_and_cascades_once() {
        let mut engine = engine();
        let keys = Keys::generate();
        let bookmark = old_event(&keys, 39701, "", &[&["d", "example.com/page"]]);
        let mut updates = engine.subscribe_to_store();
        let now = Instant::now();

        engine.ingest(bookmark.clone(), "wss://r1.example", now);
        engine.ingest(bookmark.clone(), "wss://r2.example", now);

        assert_eq!(engine.store().len(), 1);
        assert_eq!(
            engine.get_seen_on(&bookmark.id),
            vec!["wss://r1.example".to_string(), "wss://r2.example".to_string()]
        );
        assert_eq!(engine.stats().duplicates, 1);
        assert_eq!(engine.stats().logical_fetches[&QueryClass::RelayList], 1);
        assert_eq!(updates.try_recv().unwrap(), StoreNotification::Added(bookmark));
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn test_batched_fetches_merge_into_one_subscription() {
        let mut engine = engine();
        let now = Instant::now();
        for _ in 0..3 {
            engine.fetch_profile(Keys::generate().public_key(), &[], None, now);
        }
        assert!(engine.transport().subscribed.is_empty());
        assert_eq!(engine.next_deadline(), Some(now + engine.config().batch_window()));

        engine.on_timer(now + engine.config().batch_window());
        let subscribed = &engine.transport().subscribed;
        assert_eq!(subscribed.len(), 1);
        assert_eq!(subscribed[0].class, QueryClass::Profile);
        assert_eq!(subscribed[0].filters[0].authors.len(), 3);
        assert_eq!(engine.stats().merge_ratio(QueryClass::Profile), Some(3.0));
    }

    #[test]
    fn test_completion_fires_after_end_of_stream() {
        let mut engine = engine();
        let now = Instant::now();
        let (tx, mut rx) = oneshot::channel();
        engine.fetch_relay_lists(
            &[Keys::generate().public_key()],
            Some(Completion::Notify(tx)),
            now,
        );
        engine.on_timer(later(now));
        let id = engine.transport().last_subscription().unwrap().id;
        assert!(rx.try_recv().is_err());

        engine.handle_message(TransportMessage::EndOfStream { id }, later(now));
        assert!(rx.try_recv().is_ok());
        assert_eq!(engine.transport().closed, vec![id]);
    }

    #[test]
    fn test_idle_subscription_completes_after_timeout() {
        let mut engine = engine();
        let now = Instant::now();
        let (tx, mut rx) = oneshot::channel();
        engine.fetch_relay_lists(
            &[Keys::generate().public_key()],
            Some(Completion::Notify(tx)),
            now,
        );
        let flushed_at = now + engine.config().batch_window();
        engine.on_timer(flushed_at);
        let id = engine.transport().last_subscription().unwrap().id;

        // a delivery pushes the idle deadline out
        let keys = Keys::generate();
        let record = old_event(&keys, 0, "{}", &[]);
        let delivered_at = flushed_at + engine.config().completion_timeout() / 2;
        engine.handle_message(
            TransportMessage::Event {
                id,
                relay: "wss://r1.example".into(),
                event: Box::new(record),
            },
            delivered_at,
        );
        engine.on_timer(flushed_at + engine.config().completion_timeout());
        assert!(rx.try_recv().is_err());

        engine.on_timer(delivered_at + engine.config().completion_timeout());
        assert!(rx.try_recv().is_ok());
        assert_eq!(engine.next_deadline(), None);
    }

    #[test]
    fn test_chunked_query_completes_once_after_every_chunk() {
        let mut config = EngineConfig::default();
        config.max_filters_per_query = 1;
        let mut engine = engine_with(config);
        let now = Instant::now();
        let (tx, mut rx) = oneshot::channel();
        let address = |n: &str| {
            QueryFilter::new()
                .kind(30023)
                .author(Keys::generate().public_key())
                .tag('d', [n])
        };
        engine.enqueue(
            PendingQuery::new(QueryClass::Addressable, vec![address("a"), address("b")])
                .completion(Completion::Notify(tx)),
            now,
        );
        let ids: Vec<SubId> = engine.transport().subscribed.iter().map(|q| q.id).collect();
        assert_eq!(ids.len(), 2);

        engine.handle_message(TransportMessage::EndOfStream { id: ids[0] }, now);
        assert!(rx.try_recv().is_err());
        engine.handle_message(TransportMessage::EndOfStream { id: ids[1] }, now);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_gate_orders_relay_list_then_profile_then_cascade() {
        let mut engine = engine();
        let keys = Keys::generate();
        let note = old_event(&keys, 1, "hello", &[]);
        let now = Instant::now();

        engine.ingest(note.clone(), "wss://r1.example", now);
        engine.on_timer(later(now));
        let relay_list_sub = engine.transport().last_subscription().unwrap().clone();
        assert_eq!(relay_list_sub.class, QueryClass::RelayList);

        // the author's relay list arrives, then the stream ends
        let list = relay_list_event(&keys, &[("wss://out.example", Some("write"))]);
        let t1 = later(now);
        engine.handle_message(
            TransportMessage::Event {
                id: relay_list_sub.id,
                relay: "wss://purplepag.es".into(),
                event: Box::new(list),
            },
            t1,
        );
        engine.handle_message(TransportMessage::EndOfStream { id: relay_list_sub.id }, t1);
        engine.on_timer(later(t1));
        let profile_sub = engine.transport().last_subscription().unwrap().clone();
        assert_eq!(profile_sub.class, QueryClass::Profile);
        assert_eq!(profile_sub.relays, Some(vec!["wss://out.example".to_string()]));

        let t2 = later(t1);
        engine.handle_message(TransportMessage::EndOfStream { id: profile_sub.id }, t2);
        engine.on_timer(later(t2));
        let classes: Vec<QueryClass> = engine
            .transport()
            .subscribed
            .iter()
            .map(|q| q.class)
            .collect();
        assert!(classes.contains(&QueryClass::Deletion));
        assert!(classes.contains(&QueryClass::Reaction));
    }

    #[test]
    fn test_gate_skips_fetches_for_stored_relay_list_and_profile() {
        let mut engine = engine();
        let keys = Keys::generate();
        let now = Instant::now();

        let list = relay_list_event(&keys, &[("wss://out.example", Some("write"))]);
        engine.ingest(list, "wss://r1.example", now);
        engine.ingest(old_event(&keys, 0, "{}", &[]), "wss://r1.example", now);
        engine.ingest(old_event(&keys, 1, "hello", &[]), "wss://r1.example", now);
        engine.on_timer(later(now));

        let classes: Vec<QueryClass> = engine
            .transport()
            .subscribed
            .iter()
            .map(|q| q.class)
            .collect();
        assert!(!classes.contains(&QueryClass::RelayList));
        assert!(!classes.contains(&QueryClass::Profile));
        assert!(classes.contains(&QueryClass::Reaction));
    }

    #[test]
    fn test_kinds_without_rule_do_not_cascade() {
        let mut config = EngineConfig::default();
        config.cascade = CascadePolicy::empty();
        let mut engine = engine_with(config);
        let keys = Keys::generate();
        let now = Instant::now();
        engine.ingest(old_event(&keys, 1, "quiet", &[]), "wss://r1.example", now);
        engine.on_timer(later(now));
        assert!(engine.transport().subscribed.is_empty());
        assert_eq!(engine.store().len(), 1);
    }

    #[test]
    fn test_own_relay_list_becomes_transport_default() {
        let mut engine = engine();
        let keys = Keys::generate();
        let now = Instant::now();
        engine.fetch_user_settings(keys.public_key(), None, now);
        assert_eq!(
            engine.transport().last_subscription().unwrap().class,
            QueryClass::Replaceable
        );

        let list = relay_list_event(
            &keys,
            &[
                ("wss://read.example", Some("read")),
                ("wss://write.example", Some("write")),
            ],
        );
        engine.ingest(list, "wss://read.example", now);
        assert_eq!(engine.default_relays(), ["wss://read.example".to_string()]);
        assert_eq!(
            engine.transport().default_relays,
            vec!["wss://read.example".to_string()]
        );
    }

    #[test]
    fn test_blocked_relays_from_own_list() {
        let mut engine = engine();
        let keys = Keys::generate();
        let now = Instant::now();
        engine.fetch_user_settings(keys.public_key(), None, now);
        let blocked = old_event(&keys, 10006, "", &[&["relay", "wss://spam.example"]]);
        engine.ingest(blocked, "wss://r1.example", now);
        assert!(!engine.directory().allows("wss://spam.example"));
        assert!(engine.directory().allows("wss://fine.example"));
    }

    #[test]
    fn test_dispose_drops_state_without_firing() {
        let mut engine = engine();
        let keys = Keys::generate();
        let now = Instant::now();
        let (tx, mut rx) = oneshot::channel();
        engine.fetch_relay_lists(&[keys.public_key()], Some(Completion::Notify(tx)), now);
        engine.ingest(old_event(&keys, 1, "hi", &[]), "wss://r1.example", now);
        let mut updates = engine.subscribe_to_store();

        engine.dispose();

        assert!(engine.store().is_empty());
        assert_eq!(engine.transport().closed_all, 1);
        assert_eq!(engine.next_deadline(), None);
        assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
        assert!(matches!(
            updates.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_records_for_closed_subscriptions_are_ignored() {
        let mut engine = engine();
        let keys = Keys::generate();
        engine.handle_message(
            TransportMessage::Event {
                id: SubId(99),
                relay: "wss://r1.example".into(),
                event: Box::new(old_event(&keys, 1, "late", &[])),
            },
            Instant::now(),
        );
        assert!(engine.store().is_empty());
    }
}
