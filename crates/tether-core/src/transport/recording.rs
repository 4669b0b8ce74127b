use nostr_sdk::Event;
use tokio::sync::mpsc;

use super::{AckStream, RelayTransport, SubId, WireQuery};

/// Transport double that remembers every call.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub subscribed: Vec<WireQuery>,
    pub closed: Vec<SubId>,
    pub published: Vec<(Event, Option<Vec<String>>)>,
    pub default_relays: Vec<String>,
    pub closed_all: usize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_subscription(&self) -> Option<&WireQuery> {
        self.subscribed.last()
    }
}

impl RelayTransport for RecordingTransport {
    fn subscribe(&mut self, query: &WireQuery) {
        self.subscribed.push(query.clone());
    }

    fn close(&mut self, id: SubId) {
        self.closed.push(id);
    }

    fn publish(&mut self, event: &Event, relays: Option<Vec<String>>) -> AckStream {
        self.published.push((event.clone(), relays));
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }

    fn set_default_relays(&mut self, relays: &[String]) {
        self.default_relays = relays.to_vec();
    }

    fn close_all(&mut self) {
        self.closed_all += 1;
    }
}
