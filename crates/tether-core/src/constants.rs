//! Engine-wide constants
//!
//! Centralized location for relay URLs, limits and timing defaults
//! that are used across multiple modules.

/// Relays queried when nothing better is known about an author.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay-jp.nostr.wirednet.jp",
    "wss://yabu.me",
    "wss://nrelay.c-stellar.net",
];

/// Relay-list indexers used to discover an author's kind:10002 record.
pub const INDEXER_RELAYS: &[&str] = &[
    "wss://directory.yabu.me",
    "wss://purplepag.es",
    "wss://indexer.coracle.social",
];

/// Profile aggregators used when an author's own relays are unknown.
pub const PROFILE_RELAYS: &[&str] = &[
    "wss://directory.yabu.me",
    "wss://purplepag.es",
    "wss://user.kindpag.es",
];

/// Accumulation window of a batched query class.
pub const BATCH_WINDOW_MS: u64 = 1_000;

/// Idle time after which a one-shot subscription is considered complete.
pub const COMPLETION_TIMEOUT_MS: u64 = 1_000;

/// Upper bound of relays chosen for a single author.
pub const MAX_RELAYS_PER_AUTHOR: usize = 5;

/// Fragments carried by one wire query before it is split.
pub const MAX_FILTERS_PER_QUERY: usize = 10;

pub const REACTION_LIMIT: usize = 100;
pub const COMMENT_LIMIT: usize = 100;

// Record kinds the engine knows about
pub mod kinds {
    /// Profile metadata (replaceable)
    pub const METADATA: u16 = 0;
    /// Short text note
    pub const TEXT_NOTE: u16 = 1;
    /// Follow list (replaceable)
    pub const CONTACTS: u16 = 3;
    /// Deletion request (NIP-09)
    pub const DELETION: u16 = 5;
    /// Reaction to a record (NIP-25)
    pub const REACTION: u16 = 7;
    /// Reaction to a website (NIP-25)
    pub const WEB_REACTION: u16 = 17;
    /// Public chat message
    pub const CHANNEL_MESSAGE: u16 = 42;
    /// Request to vanish; never deletable
    pub const REQUEST_TO_VANISH: u16 = 62;
    /// Comment (NIP-22)
    pub const COMMENT: u16 = 1111;
    /// Mute list (NIP-51)
    pub const MUTE_LIST: u16 = 10000;
    /// Pinned records list (NIP-51)
    pub const PIN_LIST: u16 = 10001;
    /// Relay list metadata (NIP-65)
    pub const RELAY_LIST: u16 = 10002;
    /// Bookmarks list (NIP-51)
    pub const BOOKMARK_LIST: u16 = 10003;
    /// Blocked relays list (NIP-51)
    pub const BLOCKED_RELAYS: u16 = 10006;
    /// User emoji list (NIP-51)
    pub const EMOJI_LIST: u16 = 10030;
    /// Long-form article
    pub const LONG_FORM: u16 = 30023;
    /// Emoji set (NIP-51)
    pub const EMOJI_SET: u16 = 30030;
    /// Web bookmark (NIP-B0)
    pub const WEB_BOOKMARK: u16 = 39701;

    /// Latest `created_at` per (kind, author) wins.
    pub fn is_replaceable(kind: u16) -> bool {
        kind == METADATA || kind == CONTACTS || (10_000..20_000).contains(&kind)
    }

    /// Latest `created_at` per (kind, author, d-tag) wins.
    pub fn is_addressable(kind: u16) -> bool {
        (30_000..40_000).contains(&kind)
    }

    pub fn is_mutable(kind: u16) -> bool {
        is_replaceable(kind) || is_addressable(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::kinds::*;

    #[test]
    fn test_kind_classes() {
        assert!(is_replaceable(METADATA));
        assert!(is_replaceable(CONTACTS));
        assert!(is_replaceable(RELAY_LIST));
        assert!(!is_replaceable(TEXT_NOTE));
        assert!(is_addressable(WEB_BOOKMARK));
        assert!(!is_addressable(COMMENT));
        assert!(is_mutable(EMOJI_SET));
        assert!(!is_mutable(DELETION));
    }
}
