//! JSON views of the engine's store.

use nostr_sdk::{Event, PublicKey, Timestamp};
use serde::Serialize;
use tether_core::constants::kinds;
use tether_core::models::bookmark::{group_by_url, hashtag_histogram, preferred_title};
use tether_core::models::mute_list::public_entries;
use tether_core::models::{reactions_to, Address, MuteList, ReactionTarget};
use tether_core::query::QueryFilter;
use tether_core::{Engine, RelayTransport, StoreNotification};

#[derive(Debug, Serialize)]
pub struct BookmarkGroup {
    pub url: String,
    pub title: Option<String>,
    pub bookmarked_by: usize,
    pub latest: Option<String>,
    pub hashtags: Vec<String>,
    pub reactions: usize,
    pub comments: usize,
    pub seen_on: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Update {
    Added {
        id: String,
        kind: u16,
        author: String,
        created_at: Option<String>,
    },
    Removed {
        id: String,
    },
}

pub fn format_timestamp(ts: Timestamp) -> Option<String> {
    let secs = i64::try_from(ts.as_u64()).ok()?;
    chrono::DateTime::from_timestamp(secs, 0).map(|dt| dt.to_rfc3339())
}

/// Public part of `login`'s mute list; private entries need the signer.
pub fn public_mutes<T: RelayTransport>(engine: &Engine<T>, login: Option<&PublicKey>) -> MuteList {
    login
        .and_then(|login| engine.store().get_current(kinds::MUTE_LIST, login, None))
        .map(|list| MuteList::from_entries(&public_entries(list), &[]))
        .unwrap_or_default()
}

pub fn bookmark_groups<T: RelayTransport>(
    engine: &Engine<T>,
    hashtag: Option<&str>,
    path: Option<&str>,
    mutes: &MuteList,
) -> Vec<BookmarkGroup> {
    let mut filter = QueryFilter::new().kind(kinds::WEB_BOOKMARK);
    if let Some(hashtag) = hashtag {
        filter = filter.tag('t', [hashtag.to_lowercase()]);
    }
    if let Some(path) = path {
        filter = filter.tag('d', [path]);
    }
    let bookmarks = mutes.filter(engine.query(&[filter]));

    let muted = mutes.muted_pubkeys();
    let reactions = engine.query(&[QueryFilter::new().kinds([kinds::REACTION, kinds::WEB_REACTION])]);
    let comments = mutes.filter(engine.query(&[QueryFilter::new().kind(kinds::COMMENT)]));

    group_by_url(&bookmarks)
        .into_iter()
        .map(|(url, events)| {
            let coordinates: Vec<String> = events
                .iter()
                .filter_map(Address::of)
                .map(|address| address.to_string())
                .collect();
            let reaction_count = reactions_to(ReactionTarget::Url(&url), &reactions, &muted).len()
                + events
                    .iter()
                    .map(|event| reactions_to(ReactionTarget::Record(event), &reactions, &muted).len())
                    .sum::<usize>();
            let comment_count = comments
                .iter()
                .filter(|comment| {
                    comment.tags.iter().any(|tag| {
                        let tag = tag.as_slice();
                        tag.len() >= 2 && tag[0] == "A" && coordinates.contains(&tag[1])
                    })
                })
                .count();

            let mut seen_on: Vec<String> = Vec::new();
            for event in &events {
                for relay in engine.get_seen_on(&event.id) {
                    if !seen_on.contains(&relay) {
                        seen_on.push(relay);
                    }
                }
            }
            seen_on.sort();

            BookmarkGroup {
                title: preferred_title(&events),
                bookmarked_by: events.len(),
                latest: events
                    .iter()
                    .map(|event| event.created_at)
                    .max()
                    .and_then(format_timestamp),
                hashtags: hashtag_histogram(&events)
                    .into_iter()
                    .map(|(tag, _)| tag)
                    .collect(),
                reactions: reaction_count,
                comments: comment_count,
                seen_on,
                url,
            }
        })
        .collect()
}

pub fn update(notification: &StoreNotification) -> Update {
    match notification {
        StoreNotification::Added(event) => added(event),
        StoreNotification::Removed(id) => Update::Removed { id: id.to_hex() },
    }
}

fn added(event: &Event) -> Update {
    Update::Added {
        id: event.id.to_hex(),
        kind: event.kind.as_u16(),
        author: event.pubkey.to_hex(),
        created_at: format_timestamp(event.created_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp_is_rfc3339_utc() {
        assert_eq!(
            format_timestamp(Timestamp::from(0)).as_deref(),
            Some("1970-01-01T00:00:00+00:00")
        );
    }

    #[test]
    fn test_update_serializes_with_type_tag() {
        let id = nostr_sdk::EventId::all_zeros();
        let json = serde_json::to_value(update(&StoreNotification::Removed(id))).unwrap();
        assert_eq!(json["type"], "removed");
        assert_eq!(json["id"], id.to_hex());
    }
}
