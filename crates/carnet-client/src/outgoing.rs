//! Per-message send state.
//!
//! Every optimistic send gets a [`TempId`] and moves through
//! `Pending -> Confirmed | Failed`. Settled states are terminal.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use uuid::Uuid;

/// Local id of a message that has not been acknowledged by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TempId(Uuid);

impl TempId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Value sent as `client_ref` and echoed back on the stored message.
    pub fn client_ref(&self) -> String {
        self.to_string()
    }

    pub fn matches(&self, client_ref: Option<&str>) -> bool {
        client_ref.is_some_and(|r| r == self.client_ref())
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tmp-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingState {
    Pending,
    Confirmed { message_id: Uuid },
    Failed { reason: String },
}

impl OutgoingState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone)]
struct Outgoing {
    conversation_id: Uuid,
    state: OutgoingState,
}

/// Settled sends kept around so the UI can still read their outcome.
const SETTLED_KEPT: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct OutgoingTracker {
    entries: HashMap<TempId, Outgoing>,
    /// Settlement order, oldest first.
    settled: VecDeque<TempId>,
}

impl OutgoingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, temp_id: TempId, conversation_id: Uuid) {
        self.entries.insert(
            temp_id,
            Outgoing {
                conversation_id,
                state: OutgoingState::Pending,
            },
        );
    }

    /// `Pending -> Confirmed`. Returns false if the send was already settled
    /// or is unknown.
    pub fn confirm(&mut self, temp_id: TempId, message_id: Uuid) -> bool {
        self.settle(temp_id, OutgoingState::Confirmed { message_id })
    }

    /// `Pending -> Failed`.
    pub fn fail(&mut self, temp_id: TempId, reason: impl Into<String>) -> bool {
        self.settle(temp_id, OutgoingState::Failed {
            reason: reason.into(),
        })
    }

    /// Fail every send still pending. Returns the ids that changed.
    pub fn fail_all_pending(&mut self, reason: &str) -> Vec<TempId> {
        let pending: Vec<TempId> = self
            .entries
            .iter()
            .filter(|(_, o)| o.state.is_pending())
            .map(|(id, _)| *id)
            .collect();
        for id in &pending {
            self.fail(*id, reason);
        }
        pending
    }

    pub fn state(&self, temp_id: TempId) -> Option<&OutgoingState> {
        self.entries.get(&temp_id).map(|o| &o.state)
    }

    pub fn pending_in(&self, conversation_id: Uuid) -> usize {
        self.entries
            .values()
            .filter(|o| o.conversation_id == conversation_id && o.state.is_pending())
            .count()
    }

    /// Drop settled entries; pending ones are kept.
    pub fn prune_settled(&mut self) {
        self.entries.retain(|_, o| o.state.is_pending());
        self.settled.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn settle(&mut self, temp_id: TempId, next: OutgoingState) -> bool {
        match self.entries.get_mut(&temp_id) {
            Some(entry) if entry.state.is_pending() => {
                entry.state = next;
                self.settled.push_back(temp_id);
                while self.settled.len() > SETTLED_KEPT {
                    if let Some(oldest) = self.settled.pop_front() {
                        self.entries.remove(&oldest);
                    }
                }
                true
            }
            _ => false,
        }
    }
}
