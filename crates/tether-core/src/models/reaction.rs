use nostr_sdk::{Event, PublicKey};

use crate::models::address::Address;
use crate::models::tag_utils::extract_last_tag_str;

/// What a reaction points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionTarget<'a> {
    Record(&'a Event),
    Url(&'a str),
}

/// Reactions addressed to `target`, excluding muted reactors.
///
/// A reaction names its target with its last `a` tag for mutable records,
/// its last `e` tag otherwise, and its last `r` tag for URLs.
pub fn reactions_to<'a>(
    target: ReactionTarget<'_>,
    reactions: &'a [Event],
    muted: &[PublicKey],
) -> Vec<&'a Event> {
    reactions
        .iter()
        .filter(|reaction| !muted.contains(&reaction.pubkey))
        .filter(|reaction| match target {
            ReactionTarget::Record(event) => reacts_to_record(reaction, event),
            ReactionTarget::Url(url) => extract_last_tag_str(reaction, "r") == Some(url),
        })
        .collect()
}

fn reacts_to_record(reaction: &Event, event: &Event) -> bool {
    if let Some(a) = extract_last_tag_str(reaction, "a") {
        return Address::of(event).is_some_and(|address| address.to_string() == a);
    }
    extract_last_tag_str(reaction, "e") == Some(event.id.to_hex().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::ReactionTarget;
    use nostr_sdk::prelude::*;

    fn reaction(keys: &Keys, tags: Vec<Vec<String>>) -> Event {
        EventBuilder::new(Kind::from(7), "+")
            .tags(tags.into_iter().map(|t| Tag::parse(t).unwrap()))
            .sign_with_keys(keys)
            .unwrap()
    }

    #[test]
    fn test_reactions_to_record_by_id_and_coordinate() {
        let author = Keys::generate();
        let reactor = Keys::generate();
        let muted = Keys::generate();

        let note = EventBuilder::text_note("hi").sign_with_keys(&author).unwrap();
        let bookmark = EventBuilder::new(Kind::from(39701), "")
            .tag(Tag::identifier("example.com/"))
            .sign_with_keys(&author)
            .unwrap();
        let coordinate = Address::of(&bookmark).unwrap().to_string();

        let reactions = vec![
            reaction(&reactor, vec![vec!["e".into(), note.id.to_hex()]]),
            reaction(&muted, vec![vec!["e".into(), note.id.to_hex()]]),
            reaction(
                &reactor,
                vec![
                    vec!["a".into(), coordinate.clone()],
                    vec!["e".into(), bookmark.id.to_hex()],
                ],
            ),
        ];

        let to_note = reactions_to(
            ReactionTarget::Record(&note),
            &reactions,
            &[muted.public_key()],
        );
        assert_eq!(to_note.len(), 1);
        assert_eq!(to_note[0].pubkey, reactor.public_key());

        let to_bookmark = reactions_to(ReactionTarget::Record(&bookmark), &reactions, &[]);
        assert_eq!(to_bookmark.len(), 1);
    }

    #[test]
    fn test_reactions_to_url() {
        let reactor = Keys::generate();
        let reactions = vec![
            reaction(&reactor, vec![vec!["r".into(), "https://example.com/".into()]]),
            reaction(&reactor, vec![vec!["r".into(), "https://other.example/".into()]]),
        ];
        let found = reactions_to(ReactionTarget::Url("https://example.com/"), &reactions, &[]);
        assert_eq!(found.len(), 1);
    }
}
