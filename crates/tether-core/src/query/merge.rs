//! Query classes and their filter-merging rules.
//!
//! Fragments of one class are merged so that the result matches exactly
//! what the individual fragments would have matched together. Unrelated tag
//! families never share a fragment.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::constants::kinds;
use crate::query::QueryFilter;

/// The fixed set of query classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    Profile,
    RelayList,
    Deletion,
    Reaction,
    WebReaction,
    Comment,
    BookmarkUrl,
    Id,
    AddressCoordinates,
    Replaceable,
    Addressable,
    Live,
}

/// How fragments of a class combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// Union of authors; everything else from the first fragment.
    AuthorKeyed,
    /// Union per tag name, one fragment per non-empty name.
    ReferenceTag(&'static [char]),
    /// Union of ids into one fragment.
    IdKeyed,
    /// One fragment per author with the union of `d` values.
    Coordinate,
    /// Fragments are sent as they are.
    Verbatim,
}

impl QueryClass {
    pub fn merge_rule(self) -> MergeRule {
        match self {
            QueryClass::Profile | QueryClass::RelayList => MergeRule::AuthorKeyed,
            QueryClass::Deletion | QueryClass::Reaction => MergeRule::ReferenceTag(&['e', 'a']),
            QueryClass::WebReaction => MergeRule::ReferenceTag(&['r']),
            QueryClass::Comment => MergeRule::ReferenceTag(&['E', 'A']),
            QueryClass::BookmarkUrl => MergeRule::ReferenceTag(&['d']),
            QueryClass::Id => MergeRule::IdKeyed,
            QueryClass::AddressCoordinates => MergeRule::Coordinate,
            QueryClass::Replaceable | QueryClass::Addressable | QueryClass::Live => {
                MergeRule::Verbatim
            }
        }
    }

    /// Batched classes wait for their window; the others go out at once.
    pub fn is_batched(self) -> bool {
        !matches!(
            self,
            QueryClass::Replaceable | QueryClass::Addressable | QueryClass::Live
        )
    }

    /// The record kind this class is dedicated to, if any.
    pub fn kind(self) -> Option<u16> {
        match self {
            QueryClass::Profile => Some(kinds::METADATA),
            QueryClass::RelayList => Some(kinds::RELAY_LIST),
            QueryClass::Deletion => Some(kinds::DELETION),
            QueryClass::Reaction => Some(kinds::REACTION),
            QueryClass::WebReaction => Some(kinds::WEB_REACTION),
            QueryClass::Comment => Some(kinds::COMMENT),
            QueryClass::BookmarkUrl => Some(kinds::WEB_BOOKMARK),
            _ => None,
        }
    }
}

/// Merge the fragments of one class, preserving first-in order.
pub fn merge_fragments(rule: MergeRule, fragments: &[QueryFilter]) -> Vec<QueryFilter> {
    let Some(first) = fragments.first() else {
        return Vec::new();
    };

    match rule {
        MergeRule::AuthorKeyed => {
            let mut merged = QueryFilter::new().authors(
                fragments
                    .iter()
                    .flat_map(|f| f.authors.iter().copied()),
            );
            merged.kinds = first.kinds.clone();
            merged.limit = first.limit;
            merged.until = first.until;
            merged.since = first.since;
            vec![merged]
        }
        MergeRule::ReferenceTag(names) => names
            .iter()
            .filter_map(|name| {
                let values: BTreeSet<String> = fragments
                    .iter()
                    .filter_map(|f| f.tags.get(name))
                    .flatten()
                    .cloned()
                    .collect();
                if values.is_empty() {
                    return None;
                }
                let mut merged = QueryFilter::new().tag(*name, values);
                merged.kinds = first.kinds.clone();
                merged.limit = first.limit;
                merged.until = first.until;
                Some(merged)
            })
            .collect(),
        MergeRule::IdKeyed => {
            let mut merged =
                QueryFilter::new().ids(fragments.iter().flat_map(|f| f.ids.iter().copied()));
            merged.limit = first.limit;
            merged.until = first.until;
            merged.since = first.since;
            vec![merged]
        }
        MergeRule::Coordinate => merge_coordinates(fragments),
        MergeRule::Verbatim => fragments.to_vec(),
    }
}

/// Group coordinate fragments by author.
///
/// Fragments with and without a `d` constraint are kept apart so a
/// replaceable lookup never gains an identifier filter.
fn merge_coordinates(fragments: &[QueryFilter]) -> Vec<QueryFilter> {
    let mut groups: Vec<QueryFilter> = Vec::new();
    for fragment in fragments {
        let has_d = fragment.tag_values('d').is_some();
        let existing = groups.iter_mut().find(|group| {
            group.authors == fragment.authors && group.tag_values('d').is_some() == has_d
        });
        match existing {
            Some(group) => {
                group.kinds.extend(fragment.kinds.iter().copied());
                if let Some(values) = fragment.tag_values('d') {
                    group.tags.entry('d').or_default().extend(values.iter().cloned());
                }
            }
            None => groups.push(fragment.clone()),
        }
    }
    groups
}
