//! Presence tracker — who is in a room right now.
//!
//! DESIGN
//! ======
//! Membership is keyed by connection, not user: the same user in two browser
//! tabs is two members, and each disconnect removes exactly one entry. Roster
//! changes are announced as a full `user:list` replacement, so a redelivered
//! roster is harmless and late observers converge immediately.

use std::collections::HashMap;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::event::{ServerEvent, UserIdentity};

/// One live connection in a room.
#[derive(Debug, Clone)]
pub struct Member {
    pub connection_id: Uuid,
    pub user_id: String,
    pub name: String,
    /// Outbound channel for this connection's relay loop.
    pub tx: mpsc::Sender<ServerEvent>,
}

#[derive(Default)]
pub struct PresenceTracker {
    members: HashMap<Uuid, Member>,
}

impl PresenceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a member. Re-joining with the same connection updates
    /// identity in place.
    pub fn join(&mut self, member: Member) {
        self.members.insert(member.connection_id, member);
    }

    /// Remove a member. Returns false if the connection was not present, so
    /// callers can skip the roster broadcast on redundant leaves.
    pub fn leave(&mut self, connection_id: Uuid) -> bool {
        self.members.remove(&connection_id).is_some()
    }

    #[must_use]
    pub fn contains(&self, connection_id: Uuid) -> bool {
        self.members.contains_key(&connection_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Full roster, ordered by connection ID for stable wire output.
    #[must_use]
    pub fn roster(&self) -> Vec<UserIdentity> {
        let mut entries: Vec<(&Uuid, &Member)> = self.members.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        entries
            .into_iter()
            .map(|(_, m)| UserIdentity { user_id: m.user_id.clone(), name: m.name.clone() })
            .collect()
    }

    /// Outbound channels for fan-out, keyed by connection.
    pub fn senders(&self) -> impl Iterator<Item = (&Uuid, &mpsc::Sender<ServerEvent>)> {
        self.members.iter().map(|(id, m)| (id, &m.tx))
    }
}
