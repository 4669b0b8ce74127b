//! Building outgoing records.
//!
//! Templates are plain data; the runtime signs them and hands the signed
//! record back to [`Engine::send_signed`]. Building a template only reads
//! engine state, mostly to pick relay hints.

use nostr_sdk::{Event, EventBuilder, Kind, PublicKey, Tag, Url};

use super::Engine;
use crate::constants::kinds;
use crate::error::{Error, Result};
use crate::models::emoji::{emoji_map, is_valid_emoji};
use crate::models::reference::content_pointers;
use crate::models::tag_utils::tag_slices;
use crate::models::{Address, Pointer, ReactionTarget};
use crate::transport::RelayTransport;

/// An unsigned record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub kind: u16,
    pub content: String,
    pub tags: Vec<Vec<String>>,
}

impl EventTemplate {
    pub fn new(kind: u16, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            tags: Vec::new(),
        }
    }

    fn push<I, S>(&mut self, tag: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(tag.into_iter().map(Into::into).collect());
    }

    fn push_client_tag(&mut self, client_tag: Option<&Vec<String>>) {
        if let Some(tag) = client_tag {
            self.tags.push(tag.clone());
        }
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.first().map(String::as_str) == Some(name))
    }

    pub fn into_builder(self) -> Result<EventBuilder> {
        let tags = self
            .tags
            .iter()
            .map(|tag| Tag::parse(tag).map_err(|e| Error::InvalidTag(e.to_string())))
            .collect::<Result<Vec<Tag>>>()?;
        Ok(EventBuilder::new(Kind::from(self.kind), self.content).tags(tags))
    }
}

/// Deletion request for `target`. Deletions and vanish requests cannot be deleted.
pub fn deletion_template(target: &Event) -> Result<EventTemplate> {
    let kind = target.kind.as_u16();
    if kind == kinds::DELETION || kind == kinds::REQUEST_TO_VANISH {
        return Err(Error::NotDeletable { kind });
    }
    let mut template = EventTemplate::new(kinds::DELETION, "");
    template.push(["e".to_string(), target.id.to_hex()]);
    template.push(["k".to_string(), kind.to_string()]);
    Ok(template)
}

fn hashtags(content: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for word in content.split_whitespace() {
        let Some(rest) = word.strip_prefix('#') else {
            continue;
        };
        let tag: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect::<String>()
            .to_lowercase();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

fn shortcodes(content: &str) -> Vec<&str> {
    let mut codes: Vec<&str> = Vec::new();
    let mut parts = content.split(':').peekable();
    // odd segments sit between two colons
    parts.next();
    while let Some(candidate) = parts.next() {
        if parts.peek().is_none() {
            break;
        }
        let is_code = !candidate.is_empty()
            && candidate
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if is_code {
            if !codes.contains(&candidate) {
                codes.push(candidate);
            }
            parts.next();
        }
    }
    codes
}

impl<T: RelayTransport> Engine<T> {
    /// Tags derived from free text: hashtags, custom emoji, quotes and mentions.
    pub fn content_tags(&self, content: &str, emoji_sets: &[Event]) -> Vec<Vec<String>> {
        let mut tags: Vec<Vec<String>> = Vec::new();
        let mut add = |tag: Vec<String>| {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        };

        for hashtag in hashtags(content) {
            add(vec!["t".into(), hashtag]);
        }

        let emoji = emoji_map(emoji_sets);
        for code in shortcodes(content) {
            if let Some(url) = emoji.get(code) {
                add(vec!["emoji".into(), code.to_string(), url.clone()]);
            }
        }

        for pointer in content_pointers(content) {
            match pointer {
                Pointer::Event { id, author, relays, .. } => {
                    let stored = self.store.get(&id);
                    let hint = match stored {
                        Some(event) => self.relay_hint_for_event(event, &relays),
                        None => self.directory.filter_relays(&relays).into_iter().next(),
                    };
                    let mut tag = vec!["q".into(), id.to_hex(), hint.unwrap_or_default()];
                    if let Some(author) = author.or(stored.map(|e| e.pubkey)) {
                        tag.push(author.to_hex());
                    }
                    add(tag);
                }
                Pointer::Address { address, relays } => {
                    let hint = match self.store.current_at(&address) {
                        Some(event) => self.relay_hint_for_event(event, &relays),
                        None => self.directory.filter_relays(&relays).into_iter().next(),
                    };
                    let mut tag = vec!["q".into(), address.to_string()];
                    if let Some(hint) = hint {
                        tag.push(hint);
                    }
                    add(tag);
                }
                Pointer::Profile { pubkey, relays } => {
                    let mut tag = vec!["p".into(), pubkey.to_hex()];
                    if let Some(hint) = self.relay_hint_for_author(&pubkey, &relays) {
                        tag.push(hint);
                    }
                    add(tag);
                }
            }
        }

        tags
    }

    /// NIP-22 comment on `target`.
    ///
    /// Replies to a comment inherit its root scope; otherwise the target is
    /// both root and parent. `content_warning` of `Some("")` adds a bare
    /// warning tag.
    pub fn comment_template(
        &self,
        content: &str,
        target: &Event,
        emoji_sets: &[Event],
        content_warning: Option<&str>,
    ) -> EventTemplate {
        let mut template = EventTemplate::new(kinds::COMMENT, content);
        let event_hint = self.relay_hint_for_event(target, &[]);
        let author_hint = self.relay_hint_for_author(&target.pubkey, &[]);
        let target_kind = target.kind.as_u16().to_string();
        let author = target.pubkey.to_hex();

        let with_hint = |name: &str, value: String, hint: &Option<String>| {
            let mut tag = vec![name.to_string(), value];
            if let Some(hint) = hint {
                tag.push(hint.clone());
            }
            tag
        };
        let id_tag = |name: &str| {
            vec![
                name.to_string(),
                target.id.to_hex(),
                event_hint.clone().unwrap_or_default(),
                author.clone(),
            ]
        };
        let p_tag = with_hint("p", author.clone(), &author_hint);

        if target.kind.as_u16() == kinds::COMMENT {
            for tag in tag_slices(target) {
                if tag.len() >= 2 && ["A", "E", "I", "K", "P"].contains(&tag[0].as_str()) {
                    template.tags.push(tag.to_vec());
                }
            }
            template.tags.push(id_tag("e"));
            template.push(["k".to_string(), target_kind]);
        } else if let Some(address) = Address::of(target) {
            let coordinate = address.to_string();
            template
                .tags
                .push(with_hint("A", coordinate.clone(), &event_hint));
            template.push(["K".to_string(), target_kind.clone()]);
            template.tags.push(with_hint("P", author.clone(), &author_hint));
            template.tags.push(with_hint("a", coordinate, &event_hint));
            template.tags.push(id_tag("e"));
            template.push(["k".to_string(), target_kind]);
        } else {
            template.tags.push(id_tag("E"));
            template.push(["K".to_string(), target_kind.clone()]);
            template.tags.push(with_hint("P", author.clone(), &author_hint));
            template.tags.push(id_tag("e"));
            template.push(["k".to_string(), target_kind]);
        }

        for tag in self.content_tags(content, emoji_sets) {
            if !(tag[0] == "p" && tag[1] == author) {
                template.tags.push(tag);
            }
        }
        template.tags.push(p_tag);

        match content_warning {
            Some("") => template.push(["content-warning"]),
            Some(reason) => template.push(["content-warning", reason]),
            None => {}
        }
        template.push_client_tag(self.config.client_tag.as_ref());
        template
    }

    /// Reaction to a record (kind 7) or to a web page (kind 17).
    ///
    /// Fails with [`Error::InvalidEmoji`] unless the content is a single
    /// glyph or a custom emoji with a matching tag.
    pub fn reaction_template(
        &self,
        target: ReactionTarget<'_>,
        content: &str,
        emoji_url: Option<&str>,
    ) -> Result<EventTemplate> {
        let mut template = match target {
            ReactionTarget::Record(event) => {
                let mut template = EventTemplate::new(kinds::REACTION, content);
                let event_hint = self.relay_hint_for_event(event, &[]);
                if let Some(address) = Address::of(event) {
                    let mut tag = vec!["a".to_string(), address.to_string()];
                    tag.extend(event_hint.clone());
                    template.tags.push(tag);
                }
                template.push([
                    "e".to_string(),
                    event.id.to_hex(),
                    event_hint.unwrap_or_default(),
                    event.pubkey.to_hex(),
                ]);
                let mut p_tag = vec!["p".to_string(), event.pubkey.to_hex()];
                p_tag.extend(self.relay_hint_for_author(&event.pubkey, &[]));
                template.tags.push(p_tag);
                template.push(["k".to_string(), event.kind.as_u16().to_string()]);
                template
            }
            ReactionTarget::Url(url) => {
                let mut template = EventTemplate::new(kinds::WEB_REACTION, content);
                template.push(["r", url]);
                template
            }
        };

        if let Some(url) = emoji_url.filter(|url| Url::parse(url).is_ok()) {
            template.push(["emoji".to_string(), content.replace(':', ""), url.to_string()]);
        }
        template.push_client_tag(self.config.client_tag.as_ref());

        if !is_valid_emoji(&template.content, &template.tags) {
            return Err(Error::InvalidEmoji);
        }
        Ok(template)
    }

    fn with_author_hints(&self, tags: &mut [Vec<String>]) {
        for tag in tags.iter_mut() {
            if tag.len() < 2 || tag[0] != "p" {
                continue;
            }
            let hint = PublicKey::from_hex(&tag[1])
                .ok()
                .and_then(|pubkey| self.relay_hint_for_author(&pubkey, &[]));
            if let Some(hint) = hint {
                if tag.len() < 3 {
                    tag.resize(3, String::new());
                }
                tag[2] = hint;
            }
            if tag.len() == 3 && tag[2].is_empty() {
                tag.truncate(2);
            }
        }
    }

    /// New follow list with `pubkey` added, keeping the previous content.
    pub fn follow_template(
        &self,
        pubkey: &PublicKey,
        follow_list: Option<&Event>,
    ) -> Result<EventTemplate> {
        let hex = pubkey.to_hex();
        let mut template = match follow_list {
            Some(list) => {
                if tag_slices(list).any(|t| t.len() >= 2 && t[0] == "p" && t[1] == hex) {
                    return Err(Error::AlreadyFollowing(hex));
                }
                let mut template = EventTemplate::new(kinds::CONTACTS, list.content.clone());
                template.tags = tag_slices(list).map(<[String]>::to_vec).collect();
                template
            }
            None => EventTemplate::new(kinds::CONTACTS, ""),
        };
        template.push(["p".to_string(), hex]);
        self.with_author_hints(&mut template.tags);
        Ok(template)
    }

    /// New follow list with `pubkey` removed.
    pub fn unfollow_template(
        &self,
        pubkey: &PublicKey,
        follow_list: Option<&Event>,
    ) -> Result<EventTemplate> {
        let hex = pubkey.to_hex();
        let is_target = |t: &[String]| t.len() >= 2 && t[0] == "p" && t[1] == hex;
        let Some(list) = follow_list.filter(|list| tag_slices(list).any(is_target)) else {
            return Err(Error::NotFollowing(hex));
        };
        let mut template = EventTemplate::new(list.kind.as_u16(), list.content.clone());
        template.tags = tag_slices(list)
            .filter(|t| !is_target(t))
            .map(<[String]>::to_vec)
            .collect();
        self.with_author_hints(&mut template.tags);
        Ok(template)
    }
}
