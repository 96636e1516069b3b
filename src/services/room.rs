//! Room registry — one live room per design.
//!
//! DESIGN
//! ======
//! The registry maps design IDs to rooms; each room guards its state with a
//! fair async mutex that handlers hold for the whole event, including
//! gateway awaits. That single lock IS the concurrency model: events for the
//! same room run to completion in lock-acquisition order (FIFO over waking
//! order), and rooms never contend with each other.
//!
//! Eviction is race-free via a tombstone: `release_if_empty` marks the state
//! `closed` and removes the map entry under both locks, so a concurrent
//! `acquire` that grabbed the old `Arc` observes `closed`, retries, and
//! lands in a fresh room. A closed room is never reachable from the map.
//!
//! LOCK ORDER
//! ==========
//! Registry lock before room lock, never the reverse. No caller takes the
//! registry lock while holding a room lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::info;

use crate::services::coalesce::ChangeCoalescer;
use crate::services::presence::PresenceTracker;

// =============================================================================
// ROOM
// =============================================================================

/// Mutable per-room state, guarded by the room mutex.
pub struct RoomState {
    pub presence: PresenceTracker,
    pub coalescer: ChangeCoalescer,
    /// Set on eviction, under both locks. Tells late acquirers to retry.
    closed: bool,
}

impl RoomState {
    fn new() -> Self {
        Self { presence: PresenceTracker::new(), coalescer: ChangeCoalescer::new(), closed: false }
    }
}

/// One live room. The state `Arc` is shared with pending flush timers so a
/// scheduled save outlives eviction.
pub struct Room {
    pub design_id: String,
    state: Arc<Mutex<RoomState>>,
}

impl Room {
    fn new(design_id: &str) -> Self {
        Self { design_id: design_id.to_string(), state: Arc::new(Mutex::new(RoomState::new())) }
    }

    /// Lock this room's state, independent of the registry.
    pub async fn lock(self: &Arc<Self>) -> OwnedMutexGuard<RoomState> {
        Arc::clone(&self.state).lock_owned().await
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, Arc<Room>>>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the room for a design. O(1); creation takes the write
    /// lock once per room lifetime.
    pub async fn room_for(&self, design_id: &str) -> Arc<Room> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(design_id) {
                return Arc::clone(room);
            }
        }

        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(design_id.to_string())
            .or_insert_with(|| Arc::new(Room::new(design_id)));
        Arc::clone(room)
    }

    /// Get or create the room and lock its state, retrying past rooms that
    /// were evicted between lookup and lock.
    pub async fn acquire(&self, design_id: &str) -> (Arc<Room>, OwnedMutexGuard<RoomState>) {
        loop {
            let room = self.room_for(design_id).await;
            let guard = room.lock().await;
            if !guard.closed {
                return (room, guard);
            }
            // Lost the eviction race; the map entry is already gone.
        }
    }

    /// Look up a room without creating one. Disconnect cleanup uses this so
    /// it never resurrects an evicted room.
    pub async fn get(&self, design_id: &str) -> Option<Arc<Room>> {
        let rooms = self.rooms.read().await;
        rooms.get(design_id).cloned()
    }

    /// Evict the room if its roster is empty. Holding the registry write
    /// lock while locking the room makes tombstone-and-remove atomic with
    /// respect to `acquire`.
    pub async fn release_if_empty(&self, design_id: &str) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(design_id) else {
            return;
        };

        let mut state = room.state.lock().await;
        if !state.presence.is_empty() {
            return;
        }

        state.closed = true;
        drop(state);
        rooms.remove(design_id);
        info!(design_id, "evicted idle room");
    }

    /// Number of live rooms.
    #[must_use]
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
