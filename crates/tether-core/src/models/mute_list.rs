//! Mute list (kind:10000) decoding and editing.
//!
//! Entries live either in public tags or in the NIP-04 encrypted content as
//! a JSON array of tags. Decryption itself is done by the signer; this module
//! only works with the decrypted JSON.

use std::collections::BTreeSet;

use nostr_sdk::{Event, PublicKey};

use crate::models::tag_utils::{extract_all_tag_values, tag_slices};

/// Parse decrypted private list content. Malformed content yields no entries.
pub fn parse_private_entries(decrypted: &str) -> Vec<Vec<String>> {
    if decrypted.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<Vec<String>>>(decrypted) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed private list content");
            Vec::new()
        }
    }
}

/// The public tags of a list record as owned strings.
pub fn public_entries(event: &Event) -> Vec<Vec<String>> {
    tag_slices(event).map(|tag| tag.to_vec()).collect()
}

fn values<'a>(entries: &'a [Vec<String>], name: &str) -> impl Iterator<Item = &'a String> + 'a {
    let name = name.to_string();
    entries
        .iter()
        .filter(move |tag| tag.len() >= 2 && tag[0] == name)
        .map(|tag| &tag[1])
}

/// Muted pubkeys, ids, words and hashtags merged from public and private entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuteList {
    pub pubkeys: BTreeSet<String>,
    pub ids: BTreeSet<String>,
    /// Lowercased
    pub words: BTreeSet<String>,
    /// Lowercased
    pub hashtags: BTreeSet<String>,
}

impl MuteList {
    pub fn from_entries(public: &[Vec<String>], private: &[Vec<String>]) -> Self {
        let mut list = Self::default();
        for entries in [public, private] {
            list.pubkeys.extend(values(entries, "p").cloned());
            list.ids.extend(values(entries, "e").cloned());
            list.words
                .extend(values(entries, "word").map(|w| w.to_lowercase()));
            list.hashtags
                .extend(values(entries, "t").map(|t| t.to_lowercase()));
        }
        list
    }

    pub fn is_empty(&self) -> bool {
        self.pubkeys.is_empty()
            && self.ids.is_empty()
            && self.words.is_empty()
            && self.hashtags.is_empty()
    }

    pub fn is_muted(&self, event: &Event) -> bool {
        if self.pubkeys.contains(&event.pubkey.to_hex()) || self.ids.contains(&event.id.to_hex()) {
            return true;
        }
        if self.words.iter().any(|word| event.content.contains(word.as_str())) {
            return true;
        }
        extract_all_tag_values(event, "t")
            .iter()
            .any(|t| self.hashtags.contains(&t.to_lowercase()))
    }

    /// Drop muted records, keeping order.
    pub fn filter(&self, events: Vec<Event>) -> Vec<Event> {
        events.into_iter().filter(|e| !self.is_muted(e)).collect()
    }

    pub fn muted_pubkeys(&self) -> Vec<PublicKey> {
        self.pubkeys
            .iter()
            .filter_map(|pk| PublicKey::from_hex(pk).ok())
            .collect()
    }
}

/// Which entry a mute edit targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuteEntry {
    Pubkey(PublicKey),
    Hashtag(String),
}

impl MuteEntry {
    fn tag_name(&self) -> &'static str {
        match self {
            MuteEntry::Pubkey(_) => "p",
            MuteEntry::Hashtag(_) => "t",
        }
    }

    fn value(&self) -> String {
        match self {
            MuteEntry::Pubkey(pk) => pk.to_hex(),
            MuteEntry::Hashtag(t) => t.to_lowercase(),
        }
    }

    fn matches(&self, tag: &[String]) -> bool {
        if tag.len() < 2 || tag[0] != self.tag_name() {
            return false;
        }
        match self {
            MuteEntry::Pubkey(_) => tag[1] == self.value(),
            MuteEntry::Hashtag(_) => tag[1].to_lowercase() == self.value(),
        }
    }

    pub fn as_tag(&self) -> Vec<String> {
        vec![self.tag_name().to_string(), self.value()]
    }
}

/// Private entries after adding `entry`. New mutes are always private.
pub fn with_private_entry(private: &[Vec<String>], entry: &MuteEntry) -> Vec<Vec<String>> {
    let mut entries = private.to_vec();
    entries.push(entry.as_tag());
    entries
}

/// Public tags and, if `entry` was private, new private entries without it.
///
/// `None` for the private side means the encrypted content can be kept as is.
pub fn without_entry(
    public: &[Vec<String>],
    private: &[Vec<String>],
    entry: &MuteEntry,
) -> (Vec<Vec<String>>, Option<Vec<Vec<String>>>) {
    let public = public
        .iter()
        .filter(|tag| !entry.matches(tag))
        .cloned()
        .collect();
    let private = if private.iter().any(|tag| entry.matches(tag)) {
        Some(
            private
                .iter()
                .filter(|tag| !entry.matches(tag))
                .cloned()
                .collect(),
        )
    } else {
        None
    };
    (public, private)
}
