//! Tag extraction utilities for records
//!
//! Provides helper functions to reduce boilerplate when reading the loosely
//! typed tag lists of nostr events.

use nostr_sdk::Event;

/// Iterate every tag of a record as a slice of strings.
pub fn tag_slices(event: &Event) -> impl Iterator<Item = &[String]> {
    event.tags.iter().map(|tag| tag.as_slice())
}

/// Extract a single string value from a tag by name.
/// Returns the first occurrence if multiple tags exist.
pub fn extract_tag_str<'a>(event: &'a Event, tag_name: &str) -> Option<&'a str> {
    tag_slices(event)
        .find(|tag| tag.len() >= 2 && tag[0] == tag_name)
        .map(|tag| tag[1].as_str())
}

/// Extract the last value of a tag by name.
/// Reactions reference their target with the last `e`/`a`/`r` tag.
pub fn extract_last_tag_str<'a>(event: &'a Event, tag_name: &str) -> Option<&'a str> {
    tag_slices(event)
        .filter(|tag| tag.len() >= 2 && tag[0] == tag_name)
        .last()
        .map(|tag| tag[1].as_str())
}

/// Extract all string values for a given tag name.
/// Useful for tags that appear multiple times (e.g., "p", "t", "e").
pub fn extract_all_tag_values(event: &Event, tag_name: &str) -> Vec<String> {
    tag_slices(event)
        .filter(|tag| tag.len() >= 2 && tag[0] == tag_name)
        .map(|tag| tag[1].clone())
        .collect()
}

/// All tags with the given name and at least `min_len` elements.
pub fn tags_named<'a>(
    event: &'a Event,
    tag_name: &'a str,
    min_len: usize,
) -> impl Iterator<Item = &'a [String]> {
    tag_slices(event).filter(move |tag| tag.len() >= min_len && tag[0] == tag_name)
}

/// The `d` tag value, `""` when absent.
pub fn d_tag(event: &Event) -> &str {
    extract_tag_str(event, "d").unwrap_or("")
}

/// Check if a record has a specific tag (regardless of value).
pub fn has_tag(event: &Event, tag_name: &str) -> bool {
    tag_slices(event).any(|tag| tag.first().map(String::as_str) == Some(tag_name))
}
