//! Per-author gate for dependent fetches.
//!
//! Work that needs to know where an author publishes waits here until the
//! author's relay list and then their profile have been fetched. Requests for
//! the same author while a fetch is in flight are queued behind it, so each
//! author is looked up once per engine lifetime.

use std::collections::HashMap;

use nostr_sdk::{EventId, PublicKey};

/// Work queued until an author is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredAction {
    /// Run the cascade steps of a stored record.
    Cascade(EventId),
    /// Make sure a mentioned author's profile is known, trying `hints` first.
    ResolveProfile {
        author: PublicKey,
        hints: Vec<String>,
    },
}

#[derive(Debug)]
enum GateState {
    RelayListPending(Vec<DeferredAction>),
    ProfilePending(Vec<DeferredAction>),
    Ready,
}

/// What the engine must do after a gate transition.
#[derive(Debug, PartialEq, Eq)]
pub enum GateStep {
    Run(Vec<DeferredAction>),
    FetchRelayList,
    /// Fetch the profile, preferring relays hinted by the queued actions.
    FetchProfile { hints: Vec<String> },
    Wait,
}

#[derive(Debug, Default)]
pub struct AuthorGates {
    states: HashMap<PublicKey, GateState>,
}

impl AuthorGates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `action` behind `author`'s gate.
    pub fn request(&mut self, author: PublicKey, action: DeferredAction) -> GateStep {
        match self.states.get_mut(&author) {
            None => {
                self.states
                    .insert(author, GateState::RelayListPending(vec![action]));
                GateStep::FetchRelayList
            }
            Some(GateState::RelayListPending(queue)) | Some(GateState::ProfilePending(queue)) => {
                queue.push(action);
                GateStep::Wait
            }
            Some(GateState::Ready) => GateStep::Run(vec![action]),
        }
    }

    /// The relay-list fetch for `author` has completed.
    pub fn relay_list_done(&mut self, author: &PublicKey) -> GateStep {
        let Some(state) = self.states.get_mut(author) else {
            return GateStep::Wait;
        };
        let GateState::RelayListPending(queue) = state else {
            return GateStep::Wait;
        };
        let queue = std::mem::take(queue);
        let hints = profile_hints(&queue);
        *state = GateState::ProfilePending(queue);
        GateStep::FetchProfile { hints }
    }

    /// The profile fetch for `author` has completed.
    pub fn profile_done(&mut self, author: &PublicKey) -> GateStep {
        let Some(state) = self.states.get_mut(author) else {
            return GateStep::Wait;
        };
        let GateState::ProfilePending(queue) = state else {
            return GateStep::Wait;
        };
        let queue = std::mem::take(queue);
        *state = GateState::Ready;
        GateStep::Run(queue)
    }

    pub fn is_ready(&self, author: &PublicKey) -> bool {
        matches!(self.states.get(author), Some(GateState::Ready))
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

fn profile_hints(queue: &[DeferredAction]) -> Vec<String> {
    let mut hints: Vec<String> = Vec::new();
    for action in queue {
        if let DeferredAction::ResolveProfile { hints: h, .. } = action {
            for hint in h {
                if !hints.contains(hint) {
                    hints.push(hint.clone());
                }
            }
        }
    }
    hints
}
