//! Mutation broadcaster — fan-out policy and best-effort delivery.
//!
//! DESIGN
//! ======
//! The policy table lives here and nowhere else. Full-canvas relays and
//! transient color previews exclude the sender: the sender's canvas already
//! shows the change, and echoing it back causes visible flicker. Structural
//! results (layers, comments) include the sender, because what comes back
//! carries server-assigned IDs and timestamps the sender needs too.
//!
//! Delivery is at-most-once `try_send` per member. A member whose channel is
//! full is skipped (slow consumers shed load; there is no queued retry), and
//! a closed channel just means the member is mid-disconnect.

use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;
use uuid::Uuid;

use crate::event::ServerEvent;
use crate::services::room::RoomState;

/// Who receives a broadcast event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    IncludeAll,
    ExcludeSender,
}

/// Fan-out policy per event kind.
#[must_use]
pub fn policy(event: &ServerEvent) -> FanOut {
    match event {
        ServerEvent::CanvasUpdate { .. } | ServerEvent::ColorChange { .. } => FanOut::ExcludeSender,
        ServerEvent::LayerAdded { .. }
        | ServerEvent::LayerUpdate { .. }
        | ServerEvent::LayerDeleted { .. }
        | ServerEvent::LayersReplace { .. }
        | ServerEvent::CommentAdded { .. }
        | ServerEvent::UserList(_)
        // Load and error replies are sender-addressed and never reach the
        // broadcaster; listed for exhaustiveness.
        | ServerEvent::DesignLoad(_)
        | ServerEvent::Error(_) => FanOut::IncludeAll,
    }
}

/// Broadcast an event to the room per its fan-out policy.
pub fn broadcast(state: &RoomState, event: &ServerEvent, sender: Uuid) {
    let skip = match policy(event) {
        FanOut::ExcludeSender => Some(sender),
        FanOut::IncludeAll => None,
    };
    deliver(state, event, skip);
}

/// Broadcast the current roster to every member.
pub fn broadcast_roster(state: &RoomState) {
    let event = ServerEvent::UserList(state.presence.roster());
    deliver(state, &event, None);
}

fn deliver(state: &RoomState, event: &ServerEvent, skip: Option<Uuid>) {
    for (connection_id, tx) in state.presence.senders() {
        if skip == Some(*connection_id) {
            continue;
        }
        match tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(%connection_id, "member channel full; dropping broadcast");
            }
            // Disconnect race, cleanup will remove the member.
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
