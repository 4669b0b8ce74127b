//! [`RelayTransport`] on top of a `nostr_sdk::Client` relay pool.
//!
//! Each filter of a wire query becomes its own nostr subscription named
//! `tether-<n>-<i>`. Deliveries are taken from the raw relay messages so that
//! every relay that sends a record is reported, not only the first one.
//! End of stream is reported once every relay has sent EOSE for every
//! filter of the query.

use std::collections::HashMap;
use std::sync::Arc;

use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use super::{AckStream, RelayAck, RelayTransport, ReqMode, SubId, TransportMessage, WireQuery};

#[derive(Debug, Default)]
struct Routes {
    /// nostr subscription id -> engine subscription
    by_nostr_id: HashMap<String, SubId>,
    /// engine subscription -> its nostr subscriptions
    by_sub: HashMap<SubId, Vec<SubscriptionId>>,
    /// EOSE messages still expected per engine subscription
    eose_pending: HashMap<SubId, usize>,
}

pub struct NostrSdkTransport {
    client: Client,
    default_relays: Vec<String>,
    routes: Arc<Mutex<Routes>>,
}

impl NostrSdkTransport {
    /// Wrap a client and start forwarding its notifications.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(client: Client) -> (Self, mpsc::UnboundedReceiver<TransportMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let routes = Arc::new(Mutex::new(Routes::default()));
        spawn_notification_handler(client.clone(), routes.clone(), tx);
        (
            Self {
                client,
                default_relays: Vec::new(),
                routes,
            },
            rx,
        )
    }

    fn resolve_relays(&self, relays: Option<&Vec<String>>) -> Vec<String> {
        relays.cloned().unwrap_or_else(|| self.default_relays.clone())
    }
}

async fn ensure_connected(client: &Client, relays: &[String]) {
    for url in relays {
        if let Err(e) = client.add_relay(url.as_str()).await {
            tracing::warn!(relay = %url, error = %e, "failed to add relay");
            continue;
        }
        if let Err(e) = client.connect_relay(url.as_str()).await {
            tracing::warn!(relay = %url, error = %e, "failed to connect relay");
        }
    }
}

fn spawn_notification_handler(
    client: Client,
    routes: Arc<Mutex<Routes>>,
    tx: mpsc::UnboundedSender<TransportMessage>,
) {
    tokio::spawn(async move {
        let mut notifications = client.notifications();
        loop {
            let notification = match notifications.recv().await {
                Ok(notification) => notification,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "relay notifications lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            match notification {
                RelayPoolNotification::Message {
                    relay_url,
                    message: RelayMessage::Event {
                        subscription_id,
                        event,
                    },
                } => {
                    let Some(id) = routes
                        .lock()
                        .by_nostr_id
                        .get(&subscription_id.to_string())
                        .copied()
                    else {
                        continue;
                    };
                    let event = event.into_owned();
                    if let Err(e) = event.verify() {
                        tracing::warn!(relay = %relay_url, id = %event.id, error = %e, "dropping record with bad signature");
                        continue;
                    }
                    let message = TransportMessage::Event {
                        id,
                        relay: relay_url.to_string(),
                        event: Box::new(event),
                    };
                    if tx.send(message).is_err() {
                        break;
                    }
                }
                RelayPoolNotification::Message {
                    relay_url,
                    message: RelayMessage::EndOfStoredEvents(subscription_id),
                } => {
                    let finished = {
                        let mut routes = routes.lock();
                        let Some(id) = routes.by_nostr_id.get(&subscription_id.to_string()).copied()
                        else {
                            continue;
                        };
                        let remaining = routes.eose_pending.entry(id).or_insert(0);
                        *remaining = remaining.saturating_sub(1);
                        tracing::trace!(relay = %relay_url, sub = %id, remaining = *remaining, "eose");
                        (*remaining == 0).then_some(id)
                    };
                    if let Some(id) = finished {
                        if tx.send(TransportMessage::EndOfStream { id }).is_err() {
                            break;
                        }
                    }
                }
                RelayPoolNotification::Shutdown => {
                    tracing::info!("relay pool shut down, notification handler exiting");
                    break;
                }
                _ => {}
            }
        }
    });
}

impl RelayTransport for NostrSdkTransport {
    fn subscribe(&mut self, query: &WireQuery) {
        let relays = self.resolve_relays(query.relays.as_ref());
        if relays.is_empty() {
            tracing::warn!(sub = %query.id, "no relays to subscribe to");
            return;
        }

        let nostr_ids: Vec<SubscriptionId> = (0..query.filters.len())
            .map(|i| SubscriptionId::new(format!("{}-{}", query.id, i)))
            .collect();
        {
            let mut routes = self.routes.lock();
            for nostr_id in &nostr_ids {
                routes.by_nostr_id.insert(nostr_id.to_string(), query.id);
            }
            routes.by_sub.insert(query.id, nostr_ids.clone());
            if query.mode == ReqMode::Backward {
                routes
                    .eose_pending
                    .insert(query.id, query.filters.len() * relays.len());
            }
        }

        let client = self.client.clone();
        let filters: Vec<Filter> = query.filters.iter().map(|f| f.to_nostr_filter()).collect();
        let sub = query.id;
        tokio::spawn(async move {
            ensure_connected(&client, &relays).await;
            for (nostr_id, filter) in nostr_ids.into_iter().zip(filters) {
                if let Err(e) = client
                    .subscribe_with_id_to(relays.clone(), nostr_id, filter, None)
                    .await
                {
                    tracing::warn!(sub = %sub, error = %e, "subscribe failed");
                }
            }
        });
    }

    fn close(&mut self, id: SubId) {
        let nostr_ids = {
            let mut routes = self.routes.lock();
            routes.eose_pending.remove(&id);
            let nostr_ids = routes.by_sub.remove(&id).unwrap_or_default();
            for nostr_id in &nostr_ids {
                routes.by_nostr_id.remove(&nostr_id.to_string());
            }
            nostr_ids
        };

        let client = self.client.clone();
        tokio::spawn(async move {
            for nostr_id in nostr_ids {
                let _ = client.unsubscribe(&nostr_id).await;
            }
        });
    }

    fn publish(&mut self, event: &Event, relays: Option<Vec<String>>) -> AckStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let relays = self.resolve_relays(relays.as_ref());
        let client = self.client.clone();
        let event = event.clone();

        tokio::spawn(async move {
            ensure_connected(&client, &relays).await;
            match client.send_event_to(relays, &event).await {
                Ok(output) => {
                    for relay in output.success {
                        let _ = tx.send(RelayAck {
                            relay: relay.to_string(),
                            event_id: event.id,
                            accepted: true,
                            message: String::new(),
                        });
                    }
                    for (relay, message) in output.failed {
                        let _ = tx.send(RelayAck {
                            relay: relay.to_string(),
                            event_id: event.id,
                            accepted: false,
                            message,
                        });
                    }
                }
                Err(e) => tracing::warn!(id = %event.id, error = %e, "publish failed"),
            }
        });
        rx
    }

    fn set_default_relays(&mut self, relays: &[String]) {
        self.default_relays = relays.to_vec();
    }

    fn close_all(&mut self) {
        *self.routes.lock() = Routes::default();
        let client = self.client.clone();
        tokio::spawn(async move {
            let _ = client.unsubscribe_all().await;
        });
    }
}
