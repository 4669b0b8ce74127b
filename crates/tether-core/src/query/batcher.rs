//! Windowed batching of logical fetches.
//!
//! The first fragment of a batched class opens that class's window. When the
//! window expires every fragment collected for the class is merged and split
//! into wire-sized chunks. Relay overrides are unioned; a fragment without an
//! override contributes the default relays once another fragment names
//! explicit ones.

use std::collections::HashMap;
use std::time::Duration;

use nostr_sdk::PublicKey;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::query::merge::{merge_fragments, QueryClass};
use crate::query::QueryFilter;

/// What to do once a one-shot query has completed.
#[derive(Debug)]
pub enum Completion {
    /// Wake a caller waiting on the fetch.
    Notify(oneshot::Sender<()>),
    /// The relay-list step of these authors' gates is done.
    RelayListGate(Vec<PublicKey>),
    /// The profile step of this author's gate is done.
    ProfileGate(PublicKey),
}

/// A logical fetch before merging.
#[derive(Debug)]
pub struct PendingQuery {
    pub class: QueryClass,
    pub filters: Vec<QueryFilter>,
    pub relays: Option<Vec<String>>,
    pub completion: Option<Completion>,
}

impl PendingQuery {
    pub fn new(class: QueryClass, filters: Vec<QueryFilter>) -> Self {
        Self {
            class,
            filters,
            relays: None,
            completion: None,
        }
    }

    pub fn single(class: QueryClass, filter: QueryFilter) -> Self {
        Self::new(class, vec![filter])
    }

    /// Explicit relays. An empty set means "no override".
    pub fn relays(mut self, relays: Vec<String>) -> Self {
        self.relays = if relays.is_empty() { None } else { Some(relays) };
        self
    }

    pub fn relays_opt(mut self, relays: Option<Vec<String>>) -> Self {
        self.relays = relays.filter(|r| !r.is_empty());
        self
    }

    pub fn completion(mut self, completion: Completion) -> Self {
        self.completion = Some(completion);
        self
    }
}

/// A merged query ready for the wire.
#[derive(Debug)]
pub struct MergedQuery {
    pub class: QueryClass,
    /// Filter chunks, each sent as its own subscription
    pub chunks: Vec<Vec<QueryFilter>>,
    pub relays: Option<Vec<String>>,
    /// Fired once every chunk has completed
    pub completions: Vec<Completion>,
}

impl MergedQuery {
    /// Wrap fragments that bypass batching.
    pub fn immediate(query: PendingQuery, max_filters: usize) -> Self {
        Self {
            class: query.class,
            chunks: chunk(merge_fragments(query.class.merge_rule(), &query.filters), max_filters),
            relays: query.relays,
            completions: query.completion.into_iter().collect(),
        }
    }
}

struct PendingBatch {
    deadline: Instant,
    queries: Vec<PendingQuery>,
}

/// Per-class accumulation windows.
pub struct QueryBatcher {
    window: Duration,
    max_filters: usize,
    pending: HashMap<QueryClass, PendingBatch>,
}

impl QueryBatcher {
    pub fn new(window: Duration, max_filters: usize) -> Self {
        Self {
            window,
            max_filters: max_filters.max(1),
            pending: HashMap::new(),
        }
    }

    /// Queue a fragment, opening the class window if none is open.
    pub fn push(&mut self, query: PendingQuery, now: Instant) {
        let deadline = now + self.window;
        self.pending
            .entry(query.class)
            .or_insert_with(|| PendingBatch {
                deadline,
                queries: Vec::new(),
            })
            .queries
            .push(query);
    }

    /// The earliest window expiry.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|batch| batch.deadline).min()
    }

    /// Merge and return every class whose window has expired.
    pub fn flush_due(&mut self, now: Instant, default_relays: &[String]) -> Vec<MergedQuery> {
        let mut due: Vec<QueryClass> = self
            .pending
            .iter()
            .filter(|(_, batch)| batch.deadline <= now)
            .map(|(class, _)| *class)
            .collect();
        due.sort();

        let batches: Vec<PendingBatch> = due
            .into_iter()
            .filter_map(|class| self.pending.remove(&class))
            .collect();
        batches
            .into_iter()
            .filter_map(|batch| self.merge(batch.queries, default_relays))
            .collect()
    }

    fn merge(&self, queries: Vec<PendingQuery>, default_relays: &[String]) -> Option<MergedQuery> {
        let class = queries.first()?.class;
        let relays = union_relays(&queries, default_relays);
        let mut fragments = Vec::new();
        let mut completions = Vec::new();
        for query in queries {
            fragments.extend(query.filters);
            completions.extend(query.completion);
        }

        Some(MergedQuery {
            class,
            chunks: chunk(merge_fragments(class.merge_rule(), &fragments), self.max_filters),
            relays,
            completions,
        })
    }

    /// Drop every open window. Completions are dropped without firing.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

fn union_relays(queries: &[PendingQuery], default_relays: &[String]) -> Option<Vec<String>> {
    if queries.iter().all(|q| q.relays.is_none()) {
        return None;
    }
    let mut relays: Vec<String> = Vec::new();
    for query in queries {
        let contributed = query.relays.as_deref().unwrap_or(default_relays);
        for relay in contributed {
            if !relays.contains(relay) {
                relays.push(relay.clone());
            }
        }
    }
    Some(relays)
}

fn chunk(filters: Vec<QueryFilter>, max_filters: usize) -> Vec<Vec<QueryFilter>> {
    filters
        .chunks(max_filters.max(1))
        .map(|c| c.to_vec())
        .collect()
}
