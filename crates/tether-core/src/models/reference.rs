//! References embedded in records: `q` tags and `nostr:` URIs in content.

use nostr_sdk::nips::nip19::{FromBech32, Nip19};
use nostr_sdk::{Event, EventId, PublicKey, RelayUrl};

use crate::models::address::Address;
use crate::models::tag_utils::tags_named;
use crate::relay_url::{is_secure, normalize_relay_url};

/// A reference to one record, by id or by coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordRef {
    Id(EventId),
    Address(Address),
}

impl RecordRef {
    /// Parse a tag value that is either a hex id or a coordinate.
    pub fn parse(value: &str) -> Option<Self> {
        if let Ok(id) = EventId::from_hex(value) {
            return Some(Self::Id(id));
        }
        Address::parse(value).map(Self::Address)
    }
}

/// A decoded NIP-19 pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pointer {
    Event {
        id: EventId,
        author: Option<PublicKey>,
        kind: Option<u16>,
        relays: Vec<String>,
    },
    Address {
        address: Address,
        relays: Vec<String>,
    },
    Profile {
        pubkey: PublicKey,
        relays: Vec<String>,
    },
}

fn relay_strings(relays: &[RelayUrl]) -> Vec<String> {
    relays
        .iter()
        .filter_map(|r| normalize_relay_url(r.as_str()))
        .collect()
}

impl Pointer {
    /// Decode `note`, `nevent`, `naddr`, `npub` or `nprofile`, with or without
    /// the `nostr:` prefix.
    pub fn from_bech32(raw: &str) -> Option<Self> {
        let raw = raw.strip_prefix("nostr:").unwrap_or(raw);
        let decoded = match Nip19::from_bech32(raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!(pointer = raw, error = %e, "failed to decode pointer");
                return None;
            }
        };
        match decoded {
            Nip19::EventId(id) => Some(Self::Event {
                id,
                author: None,
                kind: None,
                relays: Vec::new(),
            }),
            Nip19::Event(event) => Some(Self::Event {
                id: event.event_id,
                author: event.author,
                kind: event.kind.map(|k| k.as_u16()),
                relays: relay_strings(&event.relays),
            }),
            Nip19::Coordinate(coordinate) => {
                let address = Address::new(
                    coordinate.coordinate.kind.as_u16(),
                    coordinate.coordinate.public_key,
                    coordinate.coordinate.identifier.clone(),
                );
                Some(Self::Address {
                    address,
                    relays: relay_strings(&coordinate.relays),
                })
            }
            Nip19::Pubkey(pubkey) => Some(Self::Profile {
                pubkey,
                relays: Vec::new(),
            }),
            Nip19::Profile(profile) => Some(Self::Profile {
                pubkey: profile.public_key,
                relays: relay_strings(&profile.relays),
            }),
            _ => None,
        }
    }

    pub fn relays(&self) -> &[String] {
        match self {
            Pointer::Event { relays, .. }
            | Pointer::Address { relays, .. }
            | Pointer::Profile { relays, .. } => relays,
        }
    }
}

/// `nostr:` URIs appearing in free text, decoded.
pub fn content_pointers(content: &str) -> Vec<Pointer> {
    let mut pointers = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find("nostr:") {
        let tail = &rest[start + "nostr:".len()..];
        let len = tail
            .find(|c: char| !c.is_ascii_lowercase() && !c.is_ascii_digit())
            .unwrap_or(tail.len());
        if let Some(pointer) = Pointer::from_bech32(&tail[..len]) {
            pointers.push(pointer);
        }
        rest = &tail[len..];
    }
    pointers
}

/// Everything a record refers to that may need resolving.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    pub ids: Vec<EventId>,
    pub addresses: Vec<Address>,
    pub pubkeys: Vec<PublicKey>,
    /// Relay hints attached to record references
    pub record_relays: Vec<String>,
    /// Relay hints attached to profile references
    pub profile_relays: Vec<String>,
}

impl References {
    fn add_record(&mut self, reference: RecordRef) {
        match reference {
            RecordRef::Id(id) if !self.ids.contains(&id) => self.ids.push(id),
            RecordRef::Address(address) if !self.addresses.contains(&address) => {
                self.addresses.push(address)
            }
            _ => {}
        }
    }

    fn add_pubkey(&mut self, pubkey: PublicKey) {
        if !self.pubkeys.contains(&pubkey) {
            self.pubkeys.push(pubkey);
        }
    }

    fn add_relays(target: &mut Vec<String>, relays: impl IntoIterator<Item = String>) {
        for relay in relays {
            if !target.contains(&relay) {
                target.push(relay);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.addresses.is_empty() && self.pubkeys.is_empty()
    }
}

/// Collect quoted records and mentioned authors from tags and content.
pub fn collect_references(event: &Event) -> References {
    let mut refs = References::default();

    for tag in tags_named(event, "q", 2) {
        match RecordRef::parse(&tag[1]) {
            Some(reference) => refs.add_record(reference),
            None => {
                tracing::debug!(id = %event.id, value = %tag[1], "unparseable q tag");
                continue;
            }
        }
        if let Some(relay) = tag.get(2).and_then(|r| normalize_relay_url(r)) {
            References::add_relays(&mut refs.record_relays, [relay]);
        }
    }

    for tag in tags_named(event, "p", 2) {
        if let Ok(pubkey) = PublicKey::from_hex(&tag[1]) {
            refs.add_pubkey(pubkey);
        }
    }

    for pointer in content_pointers(&event.content) {
        match pointer {
            Pointer::Event { id, relays, .. } => {
                refs.add_record(RecordRef::Id(id));
                References::add_relays(&mut refs.record_relays, relays);
            }
            Pointer::Address { address, relays } => {
                refs.add_record(RecordRef::Address(address));
                References::add_relays(&mut refs.record_relays, relays);
            }
            Pointer::Profile { pubkey, relays } => {
                refs.add_pubkey(pubkey);
                References::add_relays(&mut refs.profile_relays, relays);
            }
        }
    }

    refs
}

/// Tags of `tag_name` that carry a `wss://` relay hint, with the hint normalized.
pub fn hinted_references(event: &Event, tag_name: &str) -> Vec<(RecordRef, String)> {
    tags_named(event, tag_name, 3)
        .filter_map(|tag| {
            let reference = RecordRef::parse(&tag[1])?;
            let relay = normalize_relay_url(&tag[2]).filter(|r| is_secure(r))?;
            Some((reference, relay))
        })
        .collect()
}
