use std::collections::BTreeMap;

use nostr_sdk::{Event, Url};
use unicode_segmentation::UnicodeSegmentation;

use crate::models::tag_utils::tags_named;

/// Custom emoji shortcodes are ASCII word characters only.
pub fn is_valid_shortcode(shortcode: &str) -> bool {
    !shortcode.is_empty()
        && shortcode
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A reaction whose content is `:shortcode:` backed by exactly one `emoji` tag.
pub fn is_custom_emoji(content: &str, tags: &[Vec<String>]) -> bool {
    let emoji_tags: Vec<&Vec<String>> = tags
        .iter()
        .filter(|tag| tag.first().map(String::as_str) == Some("emoji"))
        .collect();
    let [tag] = emoji_tags.as_slice() else {
        return false;
    };
    tag.len() >= 3
        && is_valid_shortcode(&tag[1])
        && Url::parse(&tag[2]).is_ok()
        && content == format!(":{}:", tag[1])
}

/// Reaction content must be one glyph or a well-formed custom emoji.
pub fn is_valid_emoji(content: &str, tags: &[Vec<String>]) -> bool {
    is_custom_emoji(content, tags) || content.split_word_bounds().count() <= 1
}

/// Shortcode to image URL across emoji sets.
///
/// A shortcode that appears again with a different URL is kept under
/// `shortcode_2`, `shortcode_3` and so on.
pub fn emoji_map(emoji_sets: &[Event]) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for event in emoji_sets {
        for tag in tags_named(event, "emoji", 3) {
            let (shortcode, url) = (&tag[1], &tag[2]);
            if !is_valid_shortcode(shortcode) || Url::parse(url).is_err() {
                continue;
            }
            match map.get(shortcode) {
                None => {
                    map.insert(shortcode.clone(), url.clone());
                }
                Some(stored) if stored == url => {}
                Some(_) => {
                    let mut i = 2;
                    loop {
                        let alias = format!("{shortcode}_{i}");
                        match map.get(&alias) {
                            None => {
                                map.insert(alias, url.clone());
                                break;
                            }
                            Some(stored) if stored == url => break,
                            Some(_) => i += 1,
                        }
                    }
                }
            }
        }
    }
    map
}
