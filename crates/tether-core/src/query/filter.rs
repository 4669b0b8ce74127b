use std::collections::{BTreeMap, BTreeSet};

use nostr_sdk::{Event, EventId, Filter, Kind, PublicKey, SingleLetterTag, Timestamp};

/// One filter fragment: AND within, OR across fragments.
///
/// Tag filters are keyed by their single-letter name and are case sensitive,
/// so `e` and `E` are distinct.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub ids: BTreeSet<EventId>,
    pub authors: BTreeSet<PublicKey>,
    pub kinds: BTreeSet<u16>,
    pub tags: BTreeMap<char, BTreeSet<String>>,
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub limit: Option<usize>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: EventId) -> Self {
        self.ids.insert(id);
        self
    }

    pub fn ids<I: IntoIterator<Item = EventId>>(mut self, ids: I) -> Self {
        self.ids.extend(ids);
        self
    }

    pub fn author(mut self, author: PublicKey) -> Self {
        self.authors.insert(author);
        self
    }

    pub fn authors<I: IntoIterator<Item = PublicKey>>(mut self, authors: I) -> Self {
        self.authors.extend(authors);
        self
    }

    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn kinds<I: IntoIterator<Item = u16>>(mut self, kinds: I) -> Self {
        self.kinds.extend(kinds);
        self
    }

    pub fn tag<I, S>(mut self, name: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(name)
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: Timestamp) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn tag_values(&self, name: char) -> Option<&BTreeSet<String>> {
        self.tags.get(&name).filter(|values| !values.is_empty())
    }

    /// Evaluate the fragment against a record. The `limit` is not applied here.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.ids.is_empty() && !self.ids.contains(&event.id) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.contains(&event.pubkey) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind.as_u16()) {
            return false;
        }
        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }
        self.tags.iter().all(|(name, values)| {
            let name = name.to_string();
            event.tags.iter().any(|tag| {
                let tag = tag.as_slice();
                tag.len() >= 2 && tag[0] == name && values.contains(&tag[1])
            })
        })
    }

    /// The wire form of this fragment.
    pub fn to_nostr_filter(&self) -> Filter {
        let mut filter = Filter::new();
        if !self.ids.is_empty() {
            filter = filter.ids(self.ids.iter().copied());
        }
        if !self.authors.is_empty() {
            filter = filter.authors(self.authors.iter().copied());
        }
        if !self.kinds.is_empty() {
            filter = filter.kinds(self.kinds.iter().map(|k| Kind::from(*k)));
        }
        for (name, values) in &self.tags {
            match SingleLetterTag::from_char(*name) {
                Ok(tag) => filter = filter.custom_tags(tag, values.iter().cloned()),
                Err(_) => tracing::warn!(tag = %name, "dropping non-alphabetic tag filter"),
            }
        }
        if let Some(since) = self.since {
            filter = filter.since(since);
        }
        if let Some(until) = self.until {
            filter = filter.until(until);
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        filter
    }
}
