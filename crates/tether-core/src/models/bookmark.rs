//! Web bookmark (kind:39701) helpers.
//!
//! A web bookmark identifies its URL by the `d` tag, written without the
//! `https://` scheme. Only canonical forms are considered valid so that two
//! bookmarks of the same page always share one `d` value.

use std::collections::HashMap;

use nostr_sdk::{Event, Url};

use crate::models::tag_utils::{d_tag, extract_all_tag_values, extract_tag_str};

/// Whether `d` is a canonical, query-free bookmark identifier.
pub fn is_valid_web_bookmark(d: &str) -> bool {
    let Ok(url) = Url::parse(&format!("https://{d}")) else {
        return false;
    };
    if url.query().is_some() || url.fragment().is_some() || d.ends_with('?') || d.ends_with('#') {
        return false;
    }
    url.as_str().strip_prefix("https://") == Some(d)
}

/// The bookmarked URL when the record's `d` tag is valid.
pub fn bookmark_url(event: &Event) -> Option<String> {
    let d = d_tag(event);
    if is_valid_web_bookmark(d) {
        Some(format!("https://{d}"))
    } else {
        None
    }
}

/// Group valid bookmarks by URL, most recently bookmarked URL first.
///
/// Invalid bookmarks are left out.
pub fn group_by_url(bookmarks: &[Event]) -> Vec<(String, Vec<Event>)> {
    let mut groups: Vec<(String, Vec<Event>)> = Vec::new();
    for event in bookmarks {
        let Some(url) = bookmark_url(event) else {
            tracing::debug!(id = %event.id, d = d_tag(event), "skipping invalid web bookmark");
            continue;
        };
        match groups.iter_mut().find(|(u, _)| *u == url) {
            Some((_, events)) => events.push(event.clone()),
            None => groups.push((url, vec![event.clone()])),
        }
    }

    let newest = |events: &[Event]| events.iter().map(|e| e.created_at).max();
    groups.sort_by(|a, b| newest(&b.1).cmp(&newest(&a.1)));
    groups
}

/// The title most bookmarks agree on; ties go to the most recent use.
pub fn preferred_title(bookmarks: &[Event]) -> Option<String> {
    let mut titles: HashMap<&str, (usize, u64)> = HashMap::new();
    for event in bookmarks {
        let Some(title) = extract_tag_str(event, "title").filter(|t| !t.is_empty()) else {
            continue;
        };
        let entry = titles.entry(title).or_insert((0, 0));
        entry.0 += 1;
        entry.1 = entry.1.max(event.created_at.as_u64());
    }

    titles
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(title, _)| title.to_string())
}

/// Lowercased hashtag counts across bookmarks, most used first.
pub fn hashtag_histogram(bookmarks: &[Event]) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for event in bookmarks {
        for tag in extract_all_tag_values(event, "t") {
            let tag = tag.to_lowercase();
            match counts.iter_mut().find(|(t, _)| *t == tag) {
                Some((_, n)) => *n += 1,
                None => counts.push((tag, 1)),
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}
