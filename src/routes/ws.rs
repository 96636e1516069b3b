//! WebSocket handler — the collaboration session hub.
//!
//! DESIGN
//! ======
//! On upgrade, assigns a connection ID and enters a `select!` loop:
//! - Inbound client events → parse + dispatch by event kind
//! - Events fanned out by room peers → forward to the client
//!
//! A handler acquires the target room and holds its lock for the whole
//! event, gateway awaits included, so events for one room apply and fan out
//! in arrival order. Handlers broadcast to peers through
//! `services::broadcast` while holding the lock and return only the events
//! addressed to the sender; the transport loop owns the socket.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade with `user_id` / `name` query parameters
//! 2. `design:join` → load document, reply `design:load`, roster fan-out
//! 3. Edit events → coalesce/persist + fan out per event kind
//! 4. Close → leave every joined room, roster fan-out each, evict empties

use std::collections::{HashMap, HashSet};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::{OwnedMutexGuard, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::document::{CommentDraft, LayerDraft, LayerUpdates};
use crate::event::{
    CODE_AUTOSAVE_FAILED, CODE_COMMENT_SAVE_FAILED, CODE_INVALID_EVENT, CODE_LOAD_FAILED,
    ClientEvent, ServerEvent, UserIdentity,
};
use crate::services::broadcast;
use crate::services::coalesce::{self, CanvasVerdict};
use crate::services::design;
use crate::services::presence::Member;
use crate::services::room::RoomState;
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    // Identity is resolved upstream; the hub only requires that it arrived.
    let Some(user_id) = params.get("user_id").filter(|v| !v.is_empty()).cloned() else {
        return (StatusCode::UNAUTHORIZED, "user_id required").into_response();
    };
    let name = params
        .get("name")
        .cloned()
        .unwrap_or_else(|| "Anonymous".to_string());

    ws.on_upgrade(move |socket| run_ws(socket, state, UserIdentity { user_id, name }))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, mut identity: UserIdentity) {
    let connection_id = Uuid::new_v4();

    // Per-connection channel for events fanned out by room peers.
    let (client_tx, mut client_rx) = mpsc::channel::<ServerEvent>(state.config.channel_capacity);

    info!(%connection_id, user_id = %identity.user_id, "ws: client connected");

    // Designs this connection has joined, for disconnect cleanup.
    let mut joined: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(
                            &state,
                            &mut joined,
                            connection_id,
                            &mut identity,
                            &client_tx,
                            &text,
                        )
                        .await;
                        for event in replies {
                            let _ = send_event(&mut socket, &event).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(event) = client_rx.recv() => {
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    disconnect_cleanup(&state, &joined, connection_id).await;
    info!(%connection_id, "ws: client disconnected");
}

// =============================================================================
// EVENT DISPATCH
// =============================================================================

/// Parse and process one inbound message, returning events for the sender.
///
/// This keeps socket transport separate from event handling, so tests can
/// drive the full dispatch path with plain channels on both ends.
async fn process_inbound_text(
    state: &AppState,
    joined: &mut HashSet<String>,
    connection_id: Uuid,
    identity: &mut UserIdentity,
    client_tx: &mpsc::Sender<ServerEvent>,
    text: &str,
) -> Vec<ServerEvent> {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: invalid inbound event");
            return vec![ServerEvent::error(CODE_INVALID_EVENT, format!("invalid event: {e}"))];
        }
    };

    info!(%connection_id, event = event.kind(), design_id = event.design_id(), "ws: recv event");

    match event {
        ClientEvent::DesignJoin { design_id } => {
            handle_join(state, joined, connection_id, identity, client_tx, &design_id).await
        }
        ClientEvent::UserJoin { design_id, user } => {
            handle_user_join(state, joined, connection_id, identity, client_tx, &design_id, user).await
        }
        ClientEvent::CanvasUpdate { design_id, canvas } => {
            handle_canvas_update(state, connection_id, identity, client_tx, &design_id, canvas).await
        }
        ClientEvent::CanvasObjectAdd { design_id, object } => {
            handle_object_add(state, client_tx, &design_id, object).await
        }
        ClientEvent::LayerAdd { design_id, layer } => {
            handle_layer_add(state, connection_id, &design_id, layer).await
        }
        ClientEvent::LayerUpdate { design_id, layer_id, updates } => {
            handle_layer_update(state, connection_id, &design_id, layer_id, updates).await
        }
        ClientEvent::LayerDelete { design_id, layer_id } => {
            handle_layer_delete(state, connection_id, &design_id, layer_id).await
        }
        ClientEvent::LayersReorder { design_id, layers } => {
            handle_layers_reorder(state, connection_id, &design_id, layers).await
        }
        ClientEvent::CommentAdd { design_id, comment } => {
            handle_comment_add(state, connection_id, &design_id, comment).await
        }
        ClientEvent::ColorChange { design_id, object_id, color } => {
            handle_color_change(state, connection_id, identity, &design_id, object_id, color).await
        }
    }
}

// =============================================================================
// JOIN HANDLERS
// =============================================================================

async fn handle_join(
    state: &AppState,
    joined: &mut HashSet<String>,
    connection_id: Uuid,
    identity: &UserIdentity,
    client_tx: &mpsc::Sender<ServerEvent>,
    design_id: &str,
) -> Vec<ServerEvent> {
    let (_room, mut room_state) = state.rooms.acquire(design_id).await;

    room_state.presence.join(Member {
        connection_id,
        user_id: identity.user_id.clone(),
        name: identity.name.clone(),
        tx: client_tx.clone(),
    });
    joined.insert(design_id.to_string());
    broadcast::broadcast_roster(&room_state);

    match state.gateway.find(design_id).await {
        Ok(mut design) => {
            // A joiner must see what peers already saw on the wire, even if
            // the debounced save has not landed yet.
            room_state.coalescer.overlay(&mut design);
            vec![ServerEvent::DesignLoad(design)]
        }
        Err(e) => {
            warn!(error = %e, design_id, "design load failed");
            vec![ServerEvent::error(CODE_LOAD_FAILED, format!("could not load design: {e}"))]
        }
    }
}

async fn handle_user_join(
    state: &AppState,
    joined: &mut HashSet<String>,
    connection_id: Uuid,
    identity: &mut UserIdentity,
    client_tx: &mpsc::Sender<ServerEvent>,
    design_id: &str,
    user: UserIdentity,
) -> Vec<ServerEvent> {
    // The upgrade query carried a provisional identity; an explicit
    // user:join refines it for this and later events.
    *identity = user;

    let (_room, mut room_state) = state.rooms.acquire(design_id).await;
    room_state.presence.join(Member {
        connection_id,
        user_id: identity.user_id.clone(),
        name: identity.name.clone(),
        tx: client_tx.clone(),
    });
    joined.insert(design_id.to_string());
    broadcast::broadcast_roster(&room_state);
    vec![]
}

// =============================================================================
// CANVAS HANDLERS
// =============================================================================

async fn handle_canvas_update(
    state: &AppState,
    connection_id: Uuid,
    identity: &UserIdentity,
    client_tx: &mpsc::Sender<ServerEvent>,
    design_id: &str,
    canvas: serde_json::Value,
) -> Vec<ServerEvent> {
    let (room, mut room_state) = state.rooms.acquire(design_id).await;

    match room_state.coalescer.accept_canvas(canvas.clone()) {
        CanvasVerdict::Duplicate => {
            debug!(%connection_id, design_id, "ws: duplicate canvas update suppressed");
        }
        CanvasVerdict::Fresh => {
            let event = ServerEvent::CanvasUpdate { canvas, from: identity.user_id.clone() };
            broadcast::broadcast(&room_state, &event, connection_id);
            coalesce::schedule_flush(
                &mut room_state,
                &room,
                &state.gateway,
                state.config.debounce(),
                client_tx.clone(),
            );
        }
    }

    release_if_observed_empty(state, design_id, room_state).await;
    vec![]
}

async fn handle_object_add(
    state: &AppState,
    client_tx: &mpsc::Sender<ServerEvent>,
    design_id: &str,
    object: serde_json::Value,
) -> Vec<ServerEvent> {
    let (room, mut room_state) = state.rooms.acquire(design_id).await;

    // Incremental adds ride the same debounce window. Peers learn of the
    // object from the full canvas snapshot that follows, so nothing is
    // broadcast here.
    room_state.coalescer.accept_object(object);
    coalesce::schedule_flush(
        &mut room_state,
        &room,
        &state.gateway,
        state.config.debounce(),
        client_tx.clone(),
    );

    release_if_observed_empty(state, design_id, room_state).await;
    vec![]
}

async fn handle_color_change(
    state: &AppState,
    connection_id: Uuid,
    identity: &UserIdentity,
    design_id: &str,
    object_id: String,
    color: String,
) -> Vec<ServerEvent> {
    let (_room, room_state) = state.rooms.acquire(design_id).await;

    // Transient: relayed to peers, never persisted on its own. The color
    // lands in storage with the next full canvas snapshot.
    let event = ServerEvent::ColorChange {
        design_id: design_id.to_string(),
        object_id,
        color,
        from: identity.user_id.clone(),
    };
    broadcast::broadcast(&room_state, &event, connection_id);

    release_if_observed_empty(state, design_id, room_state).await;
    vec![]
}

// =============================================================================
// LAYER HANDLERS
// =============================================================================

async fn handle_layer_add(
    state: &AppState,
    connection_id: Uuid,
    design_id: &str,
    draft: LayerDraft,
) -> Vec<ServerEvent> {
    let (_room, room_state) = state.rooms.acquire(design_id).await;

    let replies = match design::add_layer(state.gateway.as_ref(), design_id, draft).await {
        Ok(layer) => {
            broadcast::broadcast(&room_state, &ServerEvent::LayerAdded { layer }, connection_id);
            vec![]
        }
        Err(e) => {
            warn!(error = %e, design_id, "layer add failed");
            vec![ServerEvent::error(CODE_AUTOSAVE_FAILED, format!("layer save failed: {e}"))]
        }
    };

    release_if_observed_empty(state, design_id, room_state).await;
    replies
}

async fn handle_layer_update(
    state: &AppState,
    connection_id: Uuid,
    design_id: &str,
    layer_id: String,
    updates: LayerUpdates,
) -> Vec<ServerEvent> {
    let (_room, room_state) = state.rooms.acquire(design_id).await;

    let replies = match design::update_layer(state.gateway.as_ref(), design_id, layer_id, updates).await {
        Ok(layers) => {
            // Full replacement list, so a stale client resynchronizes even
            // when it addressed a layer that no longer exists.
            broadcast::broadcast(&room_state, &ServerEvent::LayerUpdate { layers }, connection_id);
            vec![]
        }
        Err(e) => {
            warn!(error = %e, design_id, "layer update failed");
            vec![ServerEvent::error(CODE_AUTOSAVE_FAILED, format!("layer save failed: {e}"))]
        }
    };

    release_if_observed_empty(state, design_id, room_state).await;
    replies
}

async fn handle_layer_delete(
    state: &AppState,
    connection_id: Uuid,
    design_id: &str,
    layer_id: String,
) -> Vec<ServerEvent> {
    let (_room, room_state) = state.rooms.acquire(design_id).await;

    let replies = match design::delete_layer(state.gateway.as_ref(), design_id, &layer_id).await {
        Ok(()) => {
            let event = ServerEvent::LayerDeleted { design_id: design_id.to_string(), layer_id };
            broadcast::broadcast(&room_state, &event, connection_id);
            vec![]
        }
        Err(e) => {
            warn!(error = %e, design_id, "layer delete failed");
            vec![ServerEvent::error(CODE_AUTOSAVE_FAILED, format!("layer save failed: {e}"))]
        }
    };

    release_if_observed_empty(state, design_id, room_state).await;
    replies
}

async fn handle_layers_reorder(
    state: &AppState,
    connection_id: Uuid,
    design_id: &str,
    layers: Vec<LayerDraft>,
) -> Vec<ServerEvent> {
    let (_room, room_state) = state.rooms.acquire(design_id).await;

    let replies = match design::reorder_layers(state.gateway.as_ref(), design_id, layers).await {
        Ok(layers) => {
            let event = ServerEvent::LayersReplace { design_id: design_id.to_string(), layers };
            broadcast::broadcast(&room_state, &event, connection_id);
            vec![]
        }
        Err(e) => {
            warn!(error = %e, design_id, "layer reorder failed");
            vec![ServerEvent::error(CODE_AUTOSAVE_FAILED, format!("layer save failed: {e}"))]
        }
    };

    release_if_observed_empty(state, design_id, room_state).await;
    replies
}

// =============================================================================
// COMMENT HANDLER
// =============================================================================

async fn handle_comment_add(
    state: &AppState,
    connection_id: Uuid,
    design_id: &str,
    draft: CommentDraft,
) -> Vec<ServerEvent> {
    let (_room, room_state) = state.rooms.acquire(design_id).await;

    let replies = match design::add_comment(state.gateway.as_ref(), design_id, draft).await {
        Ok(comment) => {
            broadcast::broadcast(&room_state, &ServerEvent::CommentAdded { comment }, connection_id);
            vec![]
        }
        Err(e) => {
            warn!(error = %e, design_id, "comment add failed");
            vec![ServerEvent::error(CODE_COMMENT_SAVE_FAILED, format!("comment save failed: {e}"))]
        }
    };

    release_if_observed_empty(state, design_id, room_state).await;
    replies
}

// =============================================================================
// CLEANUP
// =============================================================================

/// Evict the room if this event left it with no members, which happens when
/// a connection targets a design it never joined. Checks the held guard
/// first so the common occupied path never touches the registry write lock.
async fn release_if_observed_empty(
    state: &AppState,
    design_id: &str,
    room_state: OwnedMutexGuard<RoomState>,
) {
    let empty = room_state.presence.is_empty();
    drop(room_state);
    if empty {
        state.rooms.release_if_empty(design_id).await;
    }
}

/// Remove this connection from every room it joined, fan the shrunk roster
/// out to each, and evict rooms left empty.
async fn disconnect_cleanup(state: &AppState, joined: &HashSet<String>, connection_id: Uuid) {
    for design_id in joined {
        // `get`, not `acquire`: never resurrect a room that is already gone.
        let Some(room) = state.rooms.get(design_id).await else {
            continue;
        };

        let mut room_state = room.lock().await;
        if !room_state.presence.leave(connection_id) {
            continue;
        }
        broadcast::broadcast_roster(&room_state);
        release_if_observed_empty(state, design_id, room_state).await;
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize event");
            return Err(());
        }
    };
    if let ServerEvent::Error(payload) = event {
        warn!(code = %payload.code, message = %payload.message, "ws: send error event");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
