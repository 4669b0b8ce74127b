//! Relay URL normalization.
//!
//! Relay URLs arrive from relay lists, tag hints, bech32 pointers and
//! configuration. They are normalized once so provenance, dead/blocked
//! checks and set arithmetic compare like with like:
//!
//! - surrounding whitespace is trimmed
//! - only `ws://` and `wss://` are accepted
//! - scheme and host are lowercased, default ports dropped
//! - trailing slashes are removed

use nostr_sdk::RelayUrl;

/// Normalize a relay URL, or `None` when it is not a websocket URL.
pub fn normalize_relay_url(url: &str) -> Option<String> {
    let url = url.trim();
    if !url.starts_with("wss://") && !url.starts_with("ws://") {
        return None;
    }

    let parsed = RelayUrl::parse(url).ok()?;
    let mut normalized = parsed.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }

    Some(normalized)
}

/// Only TLS relays are queried or published to.
pub fn is_secure(url: &str) -> bool {
    url.starts_with("wss://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trailing_slash() {
        assert_eq!(
            normalize_relay_url("wss://yabu.me/").as_deref(),
            Some("wss://yabu.me")
        );
        assert_eq!(
            normalize_relay_url("wss://yabu.me///").as_deref(),
            Some("wss://yabu.me")
        );
    }

    #[test]
    fn test_normalize_lowercases_host_and_keeps_path() {
        assert_eq!(
            normalize_relay_url(" wss://Relay.Example.COM/nostr ").as_deref(),
            Some("wss://relay.example.com/nostr")
        );
    }

    #[test]
    fn test_normalize_rejects_other_schemes() {
        assert!(normalize_relay_url("https://relay.example.com").is_none());
        assert!(normalize_relay_url("relay.example.com").is_none());
        assert!(normalize_relay_url("").is_none());
    }

    #[test]
    fn test_is_secure() {
        assert!(is_secure("wss://relay.example.com"));
        assert!(!is_secure("ws://relay.example.com"));
    }
}
