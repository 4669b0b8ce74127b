//! Fetches requested by callers.

use nostr_sdk::{PublicKey, Timestamp};
use tokio::time::Instant;

use super::Engine;
use crate::constants::kinds;
use crate::models::tag_utils::extract_all_tag_values;
use crate::models::Pointer;
use crate::query::{Completion, PendingQuery, QueryClass, QueryFilter};
use crate::transport::RelayTransport;

/// Kinds that make up an account's settings.
const SETTINGS_KINDS: [u16; 6] = [
    kinds::METADATA,
    kinds::CONTACTS,
    kinds::MUTE_LIST,
    kinds::RELAY_LIST,
    kinds::BLOCKED_RELAYS,
    kinds::EMOJI_LIST,
];

/// Kinds followed live for the logged-in account.
const ACCOUNT_LIVE_KINDS: [u16; 10] = [
    kinds::METADATA,
    kinds::CONTACTS,
    kinds::DELETION,
    kinds::REACTION,
    kinds::COMMENT,
    kinds::MUTE_LIST,
    kinds::RELAY_LIST,
    kinds::BLOCKED_RELAYS,
    kinds::EMOJI_LIST,
    kinds::WEB_BOOKMARK,
];

/// One page of web bookmarks.
#[derive(Debug, Default)]
pub struct PageParams {
    /// Narrow the page to one bookmark, one author or one event.
    pub pointer: Option<Pointer>,
    pub hashtag: Option<String>,
    /// Only bookmarks of this `d` value.
    pub path: Option<String>,
    pub limit: usize,
    /// Fetch older records than this. Such pages are not followed live.
    pub until: Option<Timestamp>,
    /// Without a pointer, the page shows this account's follows.
    pub login: Option<PublicKey>,
    /// One-shot page: fire this when done and open no live subscription.
    pub completion: Option<Completion>,
}

impl<T: RelayTransport> Engine<T> {
    fn profile_relays_for(&self, author: &PublicKey, hints: &[String]) -> Vec<String> {
        let mut relays = self.directory.filter_relays(hints);
        for relay in self.outbox_of(author) {
            if !relays.contains(&relay) {
                relays.push(relay);
            }
        }
        relays.truncate(self.config.max_relays_per_author);
        if relays.is_empty() {
            relays = self.directory.filter_relays(&self.config.profile_relays);
        }
        relays
    }

    /// Fetch an author's profile from the hinted relays and their outbox,
    /// falling back to the profile aggregators.
    pub fn fetch_profile(
        &mut self,
        author: PublicKey,
        hints: &[String],
        completion: Option<Completion>,
        now: Instant,
    ) {
        let relays = self.profile_relays_for(&author, hints);
        let mut query = PendingQuery::single(
            QueryClass::Profile,
            QueryFilter::new().kind(kinds::METADATA).author(author),
        )
        .relays(relays);
        query.completion = completion;
        self.enqueue(query, now);
    }

    /// Fetch relay lists from the indexer relays.
    pub fn fetch_relay_lists(
        &mut self,
        authors: &[PublicKey],
        completion: Option<Completion>,
        now: Instant,
    ) {
        if authors.is_empty() {
            if let Some(completion) = completion {
                self.fire(completion, now);
            }
            return;
        }
        let relays = self.directory.filter_relays(&self.config.indexer_relays);
        let mut query = PendingQuery::single(
            QueryClass::RelayList,
            QueryFilter::new()
                .kind(kinds::RELAY_LIST)
                .authors(authors.iter().copied()),
        )
        .relays(relays);
        query.completion = completion;
        self.enqueue(query, now);
    }

    /// Log in as `account` and fetch its settings records.
    pub fn fetch_user_settings(
        &mut self,
        account: PublicKey,
        completion: Option<Completion>,
        now: Instant,
    ) {
        tracing::info!(%account, "fetching account settings");
        self.account = Some(account);
        self.refresh_relay_list(&account);
        self.refresh_blocked_relays();

        let relays = self.selector().own_outbox();
        let mut query = PendingQuery::single(
            QueryClass::Replaceable,
            QueryFilter::new().kinds(SETTINGS_KINDS).author(account),
        )
        .relays(relays);
        query.completion = completion;
        self.enqueue(query, now);
    }

    /// Fetch a page of web bookmarks and, for the newest page, follow it live.
    pub fn fetch_bookmark_page(&mut self, params: PageParams, now: Instant) {
        let PageParams {
            pointer,
            hashtag,
            path,
            limit,
            until,
            login,
            completion,
        } = params;

        let mut filter = QueryFilter::new()
            .kind(kinds::WEB_BOOKMARK)
            .until(until.unwrap_or_else(Timestamp::now))
            // one extra record tells the caller whether an older page exists
            .limit(if until.is_some() { limit + 1 } else { limit });

        let mut authors: Vec<PublicKey> = Vec::new();
        let mut class = QueryClass::Addressable;
        match &pointer {
            Some(Pointer::Address { address, .. }) => {
                filter.kinds = [address.kind].into_iter().collect();
                authors.push(address.author);
                if address.is_addressable() {
                    filter = filter.tag('d', [address.identifier.clone()]);
                } else {
                    class = QueryClass::Replaceable;
                }
            }
            Some(Pointer::Profile { pubkey, .. }) => authors.push(*pubkey),
            Some(Pointer::Event {
                id, author, kind, ..
            }) => {
                filter = filter.id(*id);
                filter.kinds = kind.into_iter().copied().collect();
                authors.extend(author.iter().copied());
                class = QueryClass::Id;
            }
            None => {
                if let Some(follows) = login
                    .and_then(|login| self.store.get_current(kinds::CONTACTS, &login, None))
                {
                    authors.extend(
                        extract_all_tag_values(follows, "p")
                            .iter()
                            .filter_map(|hex| PublicKey::from_hex(hex).ok()),
                    );
                }
            }
        }
        if !authors.is_empty() {
            filter = filter.authors(authors.iter().copied());
        }
        if let Some(hashtag) = hashtag {
            filter = filter.tag('t', [hashtag.to_lowercase()]);
        }
        if let Some(path) = path {
            filter = filter.tag('d', [path]);
        }

        let baseline = pointer
            .as_ref()
            .map(|p| self.directory.filter_relays(p.relays()))
            .unwrap_or_default();
        let relays = if self.config.outbox_enabled {
            self.selector().read_relays_for(&authors, &baseline)
        } else {
            Some(baseline.clone())
        };

        if let Some(completion) = completion {
            self.enqueue(
                PendingQuery::single(QueryClass::Addressable, filter)
                    .relays_opt(relays)
                    .completion(completion),
                now,
            );
            return;
        }

        self.enqueue(
            PendingQuery::single(class, filter.clone()).relays_opt(relays.clone()),
            now,
        );
        if let Some(author) = pointer_author(pointer.as_ref()) {
            if !self.store.has_current(kinds::METADATA, &author, None) {
                self.fetch_profile(author, &baseline, None, now);
            }
        }
        if until.is_some() {
            return;
        }

        self.close_live_subs();
        let since = Timestamp::from(Timestamp::now().as_u64() + 1);
        let mut forward = filter;
        forward.until = None;
        forward.limit = None;
        forward.since = Some(since);

        let mut filters = vec![
            forward,
            QueryFilter::new().kind(kinds::WEB_REACTION).since(since),
            QueryFilter::new()
                .kind(kinds::REACTION)
                .tag('k', [kinds::COMMENT.to_string(), kinds::WEB_BOOKMARK.to_string()])
                .since(since),
            QueryFilter::new()
                .kind(kinds::COMMENT)
                .tag('K', [kinds::WEB_BOOKMARK.to_string()])
                .since(since),
            QueryFilter::new()
                .kind(kinds::DELETION)
                .tag(
                    'k',
                    [
                        kinds::REACTION,
                        kinds::WEB_REACTION,
                        kinds::COMMENT,
                        kinds::WEB_BOOKMARK,
                    ]
                    .map(|k| k.to_string()),
                )
                .since(since),
        ];
        if let Some(login) = login {
            filters.push(
                QueryFilter::new()
                    .kinds(ACCOUNT_LIVE_KINDS)
                    .author(login)
                    .since(since),
            );
        }
        self.enqueue(
            PendingQuery::new(QueryClass::Live, filters).relays_opt(relays),
            now,
        );
    }
}

fn pointer_author(pointer: Option<&Pointer>) -> Option<PublicKey> {
    match pointer? {
        Pointer::Address { address, .. } => Some(address.author),
        Pointer::Profile { pubkey, .. } => Some(*pubkey),
        Pointer::Event { author, .. } => *author,
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::models::Address;
    use crate::transport::ReqMode;
    use nostr_sdk::prelude::*;
    use tokio::sync::oneshot;
    use tokio::time::Instant;

    #[test]
    fn test_front_page_opens_backward_and_live_queries() {
        let mut engine = engine();
        let now = Instant::now();
        engine.fetch_bookmark_page(
            PageParams {
                limit: 20,
                ..PageParams::default()
            },
            now,
        );

        let subscribed = &engine.transport().subscribed;
        assert_eq!(subscribed.len(), 2);
        assert_eq!(subscribed[0].class, QueryClass::Addressable);
        assert_eq!(subscribed[0].mode, ReqMode::Backward);
        assert_eq!(subscribed[0].filters[0].limit, Some(20));
        assert_eq!(subscribed[1].class, QueryClass::Live);
        assert_eq!(subscribed[1].mode, ReqMode::Forward);
        assert_eq!(subscribed[1].filters.len(), 5);
        assert!(subscribed[1].filters.iter().all(|f| f.since.is_some()));
        // default relays
        assert_eq!(subscribed[0].relays, Some(engine.default_relays().to_vec()));
    }

    #[test]
    fn test_next_page_asks_for_one_extra_and_stays_one_shot() {
        let mut engine = engine();
        let until = Timestamp::from(1_650_000_000);
        engine.fetch_bookmark_page(
            PageParams {
                limit: 20,
                until: Some(until),
                hashtag: Some("Rust".into()),
                ..PageParams::default()
            },
            Instant::now(),
        );
        let subscribed = &engine.transport().subscribed;
        assert_eq!(subscribed.len(), 1);
        let filter = &subscribed[0].filters[0];
        assert_eq!(filter.limit, Some(21));
        assert_eq!(filter.until, Some(until));
        assert!(filter.tag_values('t').unwrap().contains("rust"));
    }

    #[test]
    fn test_new_live_page_closes_the_previous_one() {
        let mut engine = engine();
        let now = Instant::now();
        engine.fetch_bookmark_page(PageParams::default(), now);
        let first_live = engine.transport().last_subscription().unwrap().id;
        engine.fetch_bookmark_page(PageParams::default(), now);
        assert!(engine.transport().closed.contains(&first_live));
    }

    #[test]
    fn test_address_pointer_page_fetches_profile() {
        let mut engine = engine();
        let keys = Keys::generate();
        let now = Instant::now();
        let pointer = Pointer::Address {
            address: Address::new(39701, keys.public_key(), "example.com/page"),
            relays: vec!["wss://hint.example".into()],
        };
        engine.fetch_bookmark_page(
            PageParams {
                pointer: Some(pointer),
                limit: 1,
                ..PageParams::default()
            },
            now,
        );

        let page = &engine.transport().subscribed[0];
        assert!(page.filters[0].authors.contains(&keys.public_key()));
        assert!(page.filters[0]
            .tag_values('d')
            .unwrap()
            .contains("example.com/page"));
        assert_eq!(page.relays, Some(vec!["wss://hint.example".to_string()]));

        engine.on_timer(later(now));
        let profile = engine.transport().last_subscription().unwrap();
        assert_eq!(profile.class, QueryClass::Profile);
        assert_eq!(profile.relays, Some(vec!["wss://hint.example".to_string()]));
    }

    #[test]
    fn test_pointer_page_skips_stored_profile() {
        let mut engine = engine();
        let keys = Keys::generate();
        let now = Instant::now();
        engine.ingest(old_event(&keys, 0, "{}", &[]), "wss://r1.example", now);
        let pointer = Pointer::Address {
            address: Address::new(39701, keys.public_key(), "example.com/page"),
            relays: vec!["wss://hint.example".into()],
        };
        engine.fetch_bookmark_page(
            PageParams {
                pointer: Some(pointer),
                limit: 1,
                ..PageParams::default()
            },
            now,
        );
        engine.on_timer(later(now));

        assert!(engine
            .transport()
            .subscribed
            .iter()
            .all(|q| q.class != QueryClass::Profile));
    }

    #[test]
    fn test_follow_page_uses_follow_list_and_covering_relays() {
        let mut engine = engine();
        let me = Keys::generate();
        let alice = Keys::generate();
        let bob = Keys::generate();
        let now = Instant::now();
        for (keys, relay) in [(&alice, "wss://shared.example"), (&bob, "wss://shared.example")] {
            engine.ingest(
                relay_list_event(keys, &[(relay, Some("write"))]),
                "wss://r1.example",
                now,
            );
        }
        let follows = old_event(
            &me,
            3,
            "",
            &[
                &["p", &alice.public_key().to_hex()],
                &["p", &bob.public_key().to_hex()],
            ],
        );
        engine.ingest(follows, "wss://r1.example", now);

        engine.fetch_bookmark_page(
            PageParams {
                login: Some(me.public_key()),
                limit: 10,
                ..PageParams::default()
            },
            now,
        );
        let page = &engine.transport().subscribed[0];
        assert_eq!(page.filters[0].authors.len(), 2);
        assert_eq!(page.relays, Some(vec!["wss://shared.example".to_string()]));
        let live = engine.transport().last_subscription().unwrap();
        assert_eq!(live.filters.len(), 6);
    }

    #[test]
    fn test_page_with_completion_opens_no_live_query() {
        let mut engine = engine();
        let (tx, mut rx) = oneshot::channel();
        let now = Instant::now();
        engine.fetch_bookmark_page(
            PageParams {
                limit: 5,
                completion: Some(Completion::Notify(tx)),
                ..PageParams::default()
            },
            now,
        );
        assert_eq!(engine.transport().subscribed.len(), 1);
        let id = engine.transport().subscribed[0].id;
        engine.handle_message(crate::transport::TransportMessage::EndOfStream { id }, now);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_empty_relay_list_fetch_completes_immediately() {
        let mut engine = engine();
        let (tx, mut rx) = oneshot::channel();
        engine.fetch_relay_lists(&[], Some(Completion::Notify(tx)), Instant::now());
        assert!(rx.try_recv().is_ok());
        assert!(engine.transport().subscribed.is_empty());
    }
}
