//! The relay transport capability the engine drives.
//!
//! The engine never touches sockets. It asks a [`RelayTransport`] to open and
//! close subscriptions and to publish records; deliveries come back as
//! [`TransportMessage`]s on a channel owned by whoever drives the engine.

use std::fmt;

use nostr_sdk::{Event, EventId};
use tokio::sync::mpsc;

use crate::query::{QueryClass, QueryFilter};

pub mod nostr_sdk_transport;

#[cfg(test)]
pub mod recording;

pub use nostr_sdk_transport::NostrSdkTransport;

/// Engine-assigned subscription id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubId(pub u64);

impl fmt::Display for SubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tether-{}", self.0)
    }
}

/// Backward subscriptions end after stored records; forward ones stay open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqMode {
    Backward,
    Forward,
}

/// One subscription as it goes on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct WireQuery {
    pub id: SubId,
    pub class: QueryClass,
    pub filters: Vec<QueryFilter>,
    /// `None` means the transport's default relays.
    pub relays: Option<Vec<String>>,
    pub mode: ReqMode,
}

/// Deliveries from the transport.
#[derive(Debug, Clone)]
pub enum TransportMessage {
    Event {
        id: SubId,
        relay: String,
        event: Box<Event>,
    },
    /// Every relay of the subscription has sent its stored records.
    EndOfStream { id: SubId },
}

/// One relay's answer to a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAck {
    pub relay: String,
    pub event_id: EventId,
    pub accepted: bool,
    pub message: String,
}

pub type AckStream = mpsc::UnboundedReceiver<RelayAck>;

/// Subscription and publish primitives.
pub trait RelayTransport {
    fn subscribe(&mut self, query: &WireQuery);

    fn close(&mut self, id: SubId);

    /// Publish to `relays`, or to the default relays when `None`.
    fn publish(&mut self, event: &Event, relays: Option<Vec<String>>) -> AckStream;

    fn set_default_relays(&mut self, relays: &[String]);

    /// Close every open subscription.
    fn close_all(&mut self);
}
