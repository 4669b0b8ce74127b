//! Async driver for [`Engine`].
//!
//! The engine lives in an `Rc<RefCell<_>>` on a single task. [`EngineRuntime::run`]
//! feeds it transport messages and timer ticks; the write path signs records
//! with an optional [`NostrSigner`] and publishes them through the engine.
//! No engine borrow is held across an await point.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use nostr_sdk::{Event, NostrSigner, PublicKey};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;

use crate::constants::kinds;
use crate::engine::{deletion_template, Engine, EventTemplate};
use crate::error::{Error, Result};
use crate::models::mute_list::{
    parse_private_entries, public_entries, with_private_entry, without_entry,
};
use crate::models::{MuteEntry, ReactionTarget};
use crate::transport::{AckStream, RelayTransport, TransportMessage};

pub struct EngineRuntime<T: RelayTransport> {
    engine: Rc<RefCell<Engine<T>>>,
    signer: Option<Arc<dyn NostrSigner>>,
    wake: Rc<Notify>,
}

impl<T: RelayTransport> Clone for EngineRuntime<T> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            signer: self.signer.clone(),
            wake: self.wake.clone(),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn signer_error(e: impl std::fmt::Display) -> Error {
    Error::Signer(e.to_string())
}

impl<T: RelayTransport> EngineRuntime<T> {
    pub fn new(engine: Engine<T>) -> Self {
        Self {
            engine: Rc::new(RefCell::new(engine)),
            signer: None,
            wake: Rc::new(Notify::new()),
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn NostrSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Run `f` against the engine, then wake the loop so it picks up new deadlines.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut Engine<T>) -> R) -> R {
        let result = f(&mut *self.engine.borrow_mut());
        self.wake.notify_one();
        result
    }

    /// Drive the engine until the transport closes or `shutdown` fires.
    pub async fn run(
        &self,
        mut inbox: mpsc::UnboundedReceiver<TransportMessage>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        tracing::info!("engine loop started");
        loop {
            let deadline = self.engine.borrow().next_deadline();
            tokio::select! {
                message = inbox.recv() => match message {
                    Some(message) => self.engine.borrow_mut().handle_message(message, Instant::now()),
                    None => {
                        tracing::warn!("transport channel closed");
                        break;
                    }
                },
                _ = sleep_until(deadline) => self.engine.borrow_mut().on_timer(Instant::now()),
                _ = self.wake.notified() => {}
                _ = &mut shutdown => {
                    tracing::info!("engine loop shutting down");
                    break;
                }
            }
        }
    }

    fn signer(&self) -> Result<Arc<dyn NostrSigner>> {
        self.signer.clone().ok_or(Error::SignerUnavailable)
    }

    async fn own_pubkey(&self) -> Result<PublicKey> {
        self.signer()?.get_public_key().await.map_err(signer_error)
    }

    /// Sign `template` and publish it. `target` selects whose inboxes are added.
    pub async fn sign_and_send(
        &self,
        template: EventTemplate,
        target: Option<Event>,
    ) -> Result<(Event, AckStream)> {
        let signer = self.signer()?;
        let builder = template.into_builder()?;
        let pubkey = signer.get_public_key().await.map_err(signer_error)?;
        let event = signer
            .sign_event(builder.build(pubkey))
            .await
            .map_err(signer_error)?;
        let acks = self.with_engine(|engine| engine.send_signed(&event, target.as_ref()));
        Ok((event, acks))
    }

    pub async fn send_comment(
        &self,
        content: &str,
        target: &Event,
        emoji_sets: &[Event],
        content_warning: Option<&str>,
    ) -> Result<(Event, AckStream)> {
        let template = self
            .engine
            .borrow()
            .comment_template(content, target, emoji_sets, content_warning);
        self.sign_and_send(template, None).await
    }

    pub async fn send_reaction(
        &self,
        target: ReactionTarget<'_>,
        content: &str,
        emoji_url: Option<&str>,
    ) -> Result<(Event, AckStream)> {
        let template = self
            .engine
            .borrow()
            .reaction_template(target, content, emoji_url)?;
        self.sign_and_send(template, None).await
    }

    pub async fn send_deletion(&self, target: &Event) -> Result<(Event, AckStream)> {
        let template = deletion_template(target)?;
        self.sign_and_send(template, Some(target.clone())).await
    }

    fn current(&self, kind: u16, author: &PublicKey) -> Option<Event> {
        self.engine
            .borrow()
            .store()
            .get_current(kind, author, None)
            .cloned()
    }

    pub async fn follow_pubkey(&self, pubkey: &PublicKey) -> Result<(Event, AckStream)> {
        let me = self.own_pubkey().await?;
        let follows = self.current(kinds::CONTACTS, &me);
        let template = self
            .engine
            .borrow()
            .follow_template(pubkey, follows.as_ref())?;
        self.sign_and_send(template, None).await
    }

    pub async fn unfollow_pubkey(&self, pubkey: &PublicKey) -> Result<(Event, AckStream)> {
        let me = self.own_pubkey().await?;
        let follows = self.current(kinds::CONTACTS, &me);
        let template = self
            .engine
            .borrow()
            .unfollow_template(pubkey, follows.as_ref())?;
        self.sign_and_send(template, None).await
    }

    pub async fn mute_pubkey(&self, pubkey: PublicKey) -> Result<(Event, AckStream)> {
        self.edit_mute_list(MuteEntry::Pubkey(pubkey), true).await
    }

    pub async fn unmute_pubkey(&self, pubkey: PublicKey) -> Result<(Event, AckStream)> {
        self.edit_mute_list(MuteEntry::Pubkey(pubkey), false).await
    }

    pub async fn mute_hashtag(&self, hashtag: &str) -> Result<(Event, AckStream)> {
        self.edit_mute_list(MuteEntry::Hashtag(hashtag.to_string()), true)
            .await
    }

    pub async fn unmute_hashtag(&self, hashtag: &str) -> Result<(Event, AckStream)> {
        self.edit_mute_list(MuteEntry::Hashtag(hashtag.to_string()), false)
            .await
    }

    async fn private_entries(&self, me: &PublicKey, list: &Event) -> Result<Vec<Vec<String>>> {
        if list.content.is_empty() {
            return Ok(Vec::new());
        }
        let decrypted = self
            .signer()?
            .nip04_decrypt(me, &list.content)
            .await
            .map_err(signer_error)?;
        Ok(parse_private_entries(&decrypted))
    }

    async fn encrypt_entries(&self, me: &PublicKey, entries: &[Vec<String>]) -> Result<String> {
        let json = serde_json::to_string(entries)?;
        self.signer()?
            .nip04_encrypt(me, &json)
            .await
            .map_err(signer_error)
    }

    /// New mutes go to the encrypted part; unmutes remove the entry from
    /// wherever it is.
    async fn edit_mute_list(&self, entry: MuteEntry, add: bool) -> Result<(Event, AckStream)> {
        let me = self.own_pubkey().await?;
        let current = self.current(kinds::MUTE_LIST, &me);

        let template = match (current, add) {
            (None, true) => EventTemplate {
                kind: kinds::MUTE_LIST,
                content: self.encrypt_entries(&me, &[entry.as_tag()]).await?,
                tags: Vec::new(),
            },
            (None, false) => return Err(Error::MuteListMissing),
            (Some(list), true) => {
                let private = self.private_entries(&me, &list).await?;
                EventTemplate {
                    kind: kinds::MUTE_LIST,
                    content: self
                        .encrypt_entries(&me, &with_private_entry(&private, &entry))
                        .await?,
                    tags: public_entries(&list),
                }
            }
            (Some(list), false) => {
                let private = self.private_entries(&me, &list).await?;
                let (public, private) = without_entry(&public_entries(&list), &private, &entry);
                let content = match private {
                    Some(private) => self.encrypt_entries(&me, &private).await?,
                    None => list.content.clone(),
                };
                EventTemplate {
                    kind: kinds::MUTE_LIST,
                    content,
                    tags: public,
                }
            }
        };
        self.sign_and_send(template, None).await
    }

    pub fn dispose(&self) {
        self.with_engine(|engine| engine.dispose());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::StoreNotification;
    use crate::error::Error;
    use crate::transport::recording::RecordingTransport;
    use nostr_sdk::prelude::*;
    use std::sync::Arc;
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::Instant;

    fn runtime(keys: &Keys) -> EngineRuntime<RecordingTransport> {
        let engine = Engine::new(EngineConfig::default(), RecordingTransport::new());
        EngineRuntime::new(engine).with_signer(Arc::new(keys.clone()))
    }

    fn published(runtime: &EngineRuntime<RecordingTransport>) -> Vec<Event> {
        runtime.with_engine(|engine| {
            engine
                .transport()
                .published
                .iter()
                .map(|(event, _)| event.clone())
                .collect()
        })
    }

    #[tokio::test]
    async fn test_signing_without_signer_fails() {
        let engine = Engine::new(EngineConfig::default(), RecordingTransport::new());
        let runtime = EngineRuntime::new(engine);
        let result = runtime
            .sign_and_send(EventTemplate::new(1, "hello"), None)
            .await;
        assert!(matches!(result, Err(Error::SignerUnavailable)));
    }

    #[tokio::test]
    async fn test_sent_records_are_published_not_stored() {
        let keys = Keys::generate();
        let runtime = runtime(&keys);
        let (event, _acks) = runtime
            .sign_and_send(EventTemplate::new(1, "hello"), None)
            .await
            .unwrap();
        assert_eq!(event.pubkey, keys.public_key());
        assert!(event.verify().is_ok());
        assert_eq!(published(&runtime), vec![event]);
        assert!(runtime.with_engine(|engine| engine.store().is_empty()));
    }

    #[tokio::test]
    async fn test_mute_then_unmute_round_trips_private_entries() {
        let keys = Keys::generate();
        let runtime = runtime(&keys);
        let spammer = Keys::generate().public_key();

        let (muted, _) = runtime.mute_pubkey(spammer).await.unwrap();
        assert_eq!(muted.kind, Kind::from(10000));
        assert!(muted.tags.is_empty());
        let decrypted = keys.nip04_decrypt(&keys.public_key(), &muted.content).await.unwrap();
        assert!(decrypted.contains(&spammer.to_hex()));

        runtime.with_engine(|engine| {
            engine.ingest(muted.clone(), "wss://r1.example", Instant::now())
        });
        let (unmuted, _) = runtime.unmute_pubkey(spammer).await.unwrap();
        let decrypted = keys
            .nip04_decrypt(&keys.public_key(), &unmuted.content)
            .await
            .unwrap();
        assert_eq!(decrypted, "[]");
    }

    #[tokio::test]
    async fn test_unmute_without_list_fails() {
        let keys = Keys::generate();
        let runtime = runtime(&keys);
        let result = runtime.unmute_hashtag("spam").await;
        assert!(matches!(result, Err(Error::MuteListMissing)));
    }

    #[tokio::test]
    async fn test_follow_builds_on_the_stored_list() {
        let keys = Keys::generate();
        let runtime = runtime(&keys);
        let friend = Keys::generate().public_key();
        let (follows, _) = runtime.follow_pubkey(&friend).await.unwrap();
        assert_eq!(follows.kind, Kind::from(3));

        runtime.with_engine(|engine| {
            engine.ingest(follows.clone(), "wss://r1.example", Instant::now())
        });
        assert!(matches!(
            runtime.follow_pubkey(&friend).await,
            Err(Error::AlreadyFollowing(_))
        ));
    }

    #[tokio::test]
    async fn test_deletion_requests_cannot_be_deleted() {
        let keys = Keys::generate();
        let runtime = runtime(&keys);
        let note = EventBuilder::text_note("regret").sign_with_keys(&keys).unwrap();
        let (deletion, _) = runtime.send_deletion(&note).await.unwrap();
        assert_eq!(deletion.kind, Kind::from(5));
        assert!(matches!(
            runtime.send_deletion(&deletion).await,
            Err(Error::NotDeletable { kind: 5 })
        ));
    }

    #[tokio::test]
    async fn test_loop_delivers_and_stops_on_shutdown() {
        let keys = Keys::generate();
        let runtime = runtime(&keys);
        let mut updates = runtime.with_engine(|engine| engine.subscribe_to_store());
        let (tx, inbox) = mpsc::unbounded_channel();
        let (stop, shutdown) = oneshot::channel();

        runtime.with_engine(|engine| {
            engine.fetch_user_settings(keys.public_key(), None, Instant::now())
        });
        let id = runtime.with_engine(|engine| engine.transport().last_subscription().unwrap().id);
        let profile = EventBuilder::metadata(&Metadata::new().name("me"))
            .sign_with_keys(&keys)
            .unwrap();
        tx.send(TransportMessage::Event {
            id,
            relay: "wss://r1.example".into(),
            event: Box::new(profile.clone()),
        })
        .unwrap();

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let driver = runtime.clone();
                let handle = tokio::task::spawn_local(async move { driver.run(inbox, shutdown).await });
                assert_eq!(
                    updates.recv().await,
                    Some(StoreNotification::Added(profile))
                );
                stop.send(()).unwrap();
                handle.await.unwrap();
            })
            .await;
    }
}
