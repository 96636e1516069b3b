//! Change coalescer — canvas dedup and debounced autosave.
//!
//! DESIGN
//! ======
//! Full-canvas updates are deduplicated by content hash: a payload whose
//! hash equals the last broadcast state is dropped entirely (no fan-out, no
//! write). Fresh payloads re-arm a trailing-edge debounce timer; only after
//! the room has been quiet for the window does one write go to the gateway,
//! carrying the latest canvas with any incrementally queued objects
//! appended. Rapid editing therefore costs one save, and the saved state is
//! last-write-wins.
//!
//! The timer task holds its own `Arc` to the room, so a flush scheduled just
//! before the last member leaves still fires after eviction; persistence is
//! keyed by design ID, not by room liveness.
//!
//! ERROR HANDLING
//! ==============
//! A failed flush keeps the pending composition in memory and notifies the
//! arming connection with `AUTOSAVE_FAILED`. The state hash is NOT cleared:
//! it tracks what peers last saw on the wire, and a client resending that
//! same state should still be suppressed.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::document::Design;
use crate::event::{CODE_AUTOSAVE_FAILED, ServerEvent};
use crate::gateway::{DesignPatch, PersistenceGateway, append_canvas_objects};
use crate::services::room::{Room, RoomState};

// =============================================================================
// HASHING
// =============================================================================

/// Content hash of a canvas payload. `serde_json` maps serialize with sorted
/// keys, so equal structures hash equally regardless of field order.
fn content_hash(canvas: &serde_json::Value) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(canvas).unwrap_or_default());
    hasher.finalize().into()
}

// =============================================================================
// COALESCER
// =============================================================================

/// Admission result for a full-canvas update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanvasVerdict {
    /// New content: broadcast it and re-arm the flush timer.
    Fresh,
    /// Hash matches the last broadcast state: drop entirely.
    Duplicate,
}

/// Pending changes snapshotted for one flush attempt.
pub struct FlushPayload {
    canvas: Option<serde_json::Value>,
    objects: Vec<serde_json::Value>,
}

impl FlushPayload {
    /// The gateway patch for this payload: the latest full canvas with
    /// queued objects appended, or an object append when no full snapshot
    /// arrived in the window.
    fn to_patch(&self) -> DesignPatch {
        match &self.canvas {
            Some(base) => {
                let mut canvas = base.clone();
                append_canvas_objects(&mut canvas, self.objects.clone());
                DesignPatch::ReplaceCanvas(canvas)
            }
            None => DesignPatch::AppendCanvasObjects(self.objects.clone()),
        }
    }
}

/// Per-room write suppression state. Lives inside the room lock; every
/// method here assumes the caller holds it.
#[derive(Default)]
pub struct ChangeCoalescer {
    /// Hash of the last canvas state broadcast to peers.
    last_state_hash: Option<[u8; 32]>,
    /// Latest full canvas awaiting flush. Replaces any earlier pending state.
    pending_canvas: Option<serde_json::Value>,
    /// Incremental objects queued after the pending canvas.
    pending_objects: Vec<serde_json::Value>,
    /// The armed debounce timer. Re-arming aborts it, so at most one
    /// debounced write per room is ever in flight.
    flush_task: Option<JoinHandle<()>>,
}

impl ChangeCoalescer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a full-canvas update. Duplicates of the last broadcast state
    /// are rejected; fresh payloads become the pending flush base and
    /// subsume any queued objects (the client's full snapshot already
    /// contains them).
    pub fn accept_canvas(&mut self, canvas: serde_json::Value) -> CanvasVerdict {
        let hash = content_hash(&canvas);
        if self.last_state_hash == Some(hash) {
            return CanvasVerdict::Duplicate;
        }

        self.last_state_hash = Some(hash);
        self.pending_canvas = Some(canvas);
        self.pending_objects.clear();
        CanvasVerdict::Fresh
    }

    /// Queue one incrementally added object for the next flush.
    pub fn accept_object(&mut self, object: serde_json::Value) {
        self.pending_objects.push(object);
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending_canvas.is_some() || !self.pending_objects.is_empty()
    }

    /// Apply pending changes to a freshly loaded document, so a joiner sees
    /// the state peers already received on the wire even though it is not
    /// durable yet.
    pub fn overlay(&self, design: &mut Design) {
        if let Some(canvas) = &self.pending_canvas {
            design.canvas = canvas.clone();
        }
        if !self.pending_objects.is_empty() {
            append_canvas_objects(&mut design.canvas, self.pending_objects.clone());
        }
    }

    /// Take the pending composition for a flush attempt. Returns `None` when
    /// nothing is pending.
    fn take_flush(&mut self) -> Option<FlushPayload> {
        if !self.has_pending() {
            return None;
        }
        Some(FlushPayload {
            canvas: self.pending_canvas.take(),
            objects: std::mem::take(&mut self.pending_objects),
        })
    }

    /// Put a failed flush back so the changes are retried by the next timer
    /// instead of being lost.
    fn restore(&mut self, payload: FlushPayload) {
        self.pending_canvas = payload.canvas;
        self.pending_objects = payload.objects;
    }
}

// =============================================================================
// DEBOUNCE
// =============================================================================

/// Arm (or re-arm) the room's trailing-edge flush timer.
///
/// The caller holds the room lock. The previous timer is aborted, which is
/// safe in every window: while it sleeps or waits for the lock it has taken
/// nothing yet, and once it holds the lock nobody else can be here to abort
/// it.
pub fn schedule_flush(
    state: &mut RoomState,
    room: &Arc<Room>,
    gateway: &Arc<dyn PersistenceGateway>,
    debounce: Duration,
    originator: mpsc::Sender<ServerEvent>,
) {
    if let Some(previous) = state.coalescer.flush_task.take() {
        previous.abort();
    }

    let room = Arc::clone(room);
    let gateway = Arc::clone(gateway);
    let handle = tokio::spawn(async move {
        tokio::time::sleep(debounce).await;

        // The save happens under the room lock, serialized with handlers
        // like any other room event.
        let mut state = room.lock().await;
        let Some(payload) = state.coalescer.take_flush() else {
            return;
        };

        match gateway.find_and_update(&room.design_id, payload.to_patch()).await {
            Ok(_) => {
                debug!(design_id = %room.design_id, "autosave flushed");
            }
            Err(e) => {
                warn!(error = %e, design_id = %room.design_id, "autosave failed; pending changes kept");
                state.coalescer.restore(payload);
                let _ = originator.try_send(ServerEvent::error(
                    CODE_AUTOSAVE_FAILED,
                    format!("autosave failed: {e}"),
                ));
            }
        }
    });

    state.coalescer.flush_task = Some(handle);
}

#[cfg(test)]
#[path = "coalesce_test.rs"]
mod tests;
