use std::fmt;

use nostr_sdk::{Event, PublicKey};

use crate::constants::kinds;
use crate::models::tag_utils::d_tag;

/// Logical identity of a mutable record: `(kind, author, identifier)`.
///
/// Replaceable kinds always carry an empty identifier; addressable kinds carry
/// their `d` tag value. Textual form is `kind:hex-pubkey:identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub kind: u16,
    pub author: PublicKey,
    pub identifier: String,
}

impl Address {
    pub fn new(kind: u16, author: PublicKey, identifier: impl Into<String>) -> Self {
        let identifier = if kinds::is_addressable(kind) {
            identifier.into()
        } else {
            String::new()
        };
        Self {
            kind,
            author,
            identifier,
        }
    }

    /// The coordinate of a mutable record, `None` for append-only kinds.
    pub fn of(event: &Event) -> Option<Self> {
        let kind = event.kind.as_u16();
        if !kinds::is_mutable(kind) {
            return None;
        }
        Some(Self::new(kind, event.pubkey, d_tag(event)))
    }

    /// Parse `kind:pubkey:identifier`. The identifier may itself contain `:`.
    pub fn parse(coordinate: &str) -> Option<Self> {
        let mut parts = coordinate.splitn(3, ':');
        let kind = parts.next()?.parse::<u16>().ok()?;
        let author = PublicKey::from_hex(parts.next()?).ok()?;
        let identifier = parts.next().unwrap_or("");
        if !kinds::is_mutable(kind) {
            return None;
        }
        if kinds::is_replaceable(kind) && !identifier.is_empty() {
            return None;
        }
        Some(Self::new(kind, author, identifier))
    }

    pub fn is_addressable(&self) -> bool {
        kinds::is_addressable(self.kind)
    }

    /// Whether `event` is a version of the record this address names.
    pub fn matches(&self, event: &Event) -> bool {
        event.kind.as_u16() == self.kind
            && event.pubkey == self.author
            && (!self.is_addressable() || d_tag(event) == self.identifier)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.author.to_hex(), self.identifier)
    }
}
