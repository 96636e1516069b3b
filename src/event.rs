//! Wire protocol — JSON events exchanged over the websocket.
//!
//! ARCHITECTURE
//! ============
//! Every message is an `{"event": name, "data": payload}` envelope, realized
//! here as adjacently tagged enums: `ClientEvent` for inbound traffic and
//! `ServerEvent` for outbound. Payload field names are camelCase on the wire
//! (`designId`, `layerId`) to match the browser clients.
//!
//! DESIGN
//! ======
//! - Parsing IS validation: an unknown event name or a missing required
//!   field fails deserialization, and the dispatcher answers with a single
//!   `error{INVALID_EVENT}` to the originator.
//! - Broadcasts that echo their inbound shape (`layer:deleted`,
//!   `layers:replace`, `canvas:colorChange`) keep `designId`; a connection
//!   joined to several designs correlates by it.
//! - Outbound events cross task boundaries by value (one clone per room
//!   member), so everything here is `Clone`.

use serde::{Deserialize, Serialize};

use crate::document::{Comment, CommentDraft, Design, Layer, LayerDraft, LayerUpdates};

// =============================================================================
// ERROR CODES
// =============================================================================

/// The initial document load for a join failed; sent to the joiner only.
pub const CODE_LOAD_FAILED: &str = "LOAD_FAILED";

/// A debounced canvas save or a layer persistence call failed; sent to the
/// acting connection only.
pub const CODE_AUTOSAVE_FAILED: &str = "AUTOSAVE_FAILED";

/// A comment could not be persisted; sent to the acting connection only.
pub const CODE_COMMENT_SAVE_FAILED: &str = "COMMENT_SAVE_FAILED";

/// The inbound message was not a well-formed event; sent to the originator
/// only, never broadcast.
pub const CODE_INVALID_EVENT: &str = "INVALID_EVENT";

// =============================================================================
// IDENTITY
// =============================================================================

/// Opaque user identity as resolved upstream of the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub user_id: String,
    pub name: String,
}

// =============================================================================
// INBOUND
// =============================================================================

/// Events a client may send. Every variant names the target design, so the
/// dispatcher can resolve the room before touching any payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "design:join", rename_all = "camelCase")]
    DesignJoin { design_id: String },
    #[serde(rename = "canvas:update", rename_all = "camelCase")]
    CanvasUpdate { design_id: String, canvas: serde_json::Value },
    #[serde(rename = "canvas:object:add", rename_all = "camelCase")]
    CanvasObjectAdd { design_id: String, object: serde_json::Value },
    #[serde(rename = "layer:add", rename_all = "camelCase")]
    LayerAdd { design_id: String, layer: LayerDraft },
    #[serde(rename = "layer:update", rename_all = "camelCase")]
    LayerUpdate { design_id: String, layer_id: String, updates: LayerUpdates },
    #[serde(rename = "layer:delete", rename_all = "camelCase")]
    LayerDelete { design_id: String, layer_id: String },
    #[serde(rename = "layers:reorder", rename_all = "camelCase")]
    LayersReorder { design_id: String, layers: Vec<LayerDraft> },
    #[serde(rename = "comment:add", rename_all = "camelCase")]
    CommentAdd { design_id: String, comment: CommentDraft },
    #[serde(rename = "canvas:colorChange", rename_all = "camelCase")]
    ColorChange { design_id: String, object_id: String, color: String },
    #[serde(rename = "user:join", rename_all = "camelCase")]
    UserJoin { design_id: String, user: UserIdentity },
}

impl ClientEvent {
    /// The design this event targets.
    #[must_use]
    pub fn design_id(&self) -> &str {
        match self {
            Self::DesignJoin { design_id }
            | Self::CanvasUpdate { design_id, .. }
            | Self::CanvasObjectAdd { design_id, .. }
            | Self::LayerAdd { design_id, .. }
            | Self::LayerUpdate { design_id, .. }
            | Self::LayerDelete { design_id, .. }
            | Self::LayersReorder { design_id, .. }
            | Self::CommentAdd { design_id, .. }
            | Self::ColorChange { design_id, .. }
            | Self::UserJoin { design_id, .. } => design_id,
        }
    }

    /// Wire name of this event, for log lines.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DesignJoin { .. } => "design:join",
            Self::CanvasUpdate { .. } => "canvas:update",
            Self::CanvasObjectAdd { .. } => "canvas:object:add",
            Self::LayerAdd { .. } => "layer:add",
            Self::LayerUpdate { .. } => "layer:update",
            Self::LayerDelete { .. } => "layer:delete",
            Self::LayersReorder { .. } => "layers:reorder",
            Self::CommentAdd { .. } => "comment:add",
            Self::ColorChange { .. } => "canvas:colorChange",
            Self::UserJoin { .. } => "user:join",
        }
    }
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Events the hub emits. `DesignLoad` and `Error` are always addressed to a
/// single connection; the rest fan out through the broadcaster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "design:load")]
    DesignLoad(Design),
    #[serde(rename = "error")]
    Error(ErrorPayload),
    #[serde(rename = "canvas:update")]
    CanvasUpdate { canvas: serde_json::Value, from: String },
    #[serde(rename = "layer:added")]
    LayerAdded { layer: Layer },
    #[serde(rename = "layer:update")]
    LayerUpdate { layers: Vec<Layer> },
    #[serde(rename = "layer:deleted", rename_all = "camelCase")]
    LayerDeleted { design_id: String, layer_id: String },
    #[serde(rename = "layers:replace", rename_all = "camelCase")]
    LayersReplace { design_id: String, layers: Vec<Layer> },
    #[serde(rename = "comment:added")]
    CommentAdded { comment: Comment },
    #[serde(rename = "canvas:colorChange", rename_all = "camelCase")]
    ColorChange { design_id: String, object_id: String, color: String, from: String },
    /// Full roster replacement, not a delta.
    #[serde(rename = "user:list")]
    UserList(Vec<UserIdentity>),
}

/// Structured error payload: a grepable code plus a human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ServerEvent {
    /// Build an error event from a code constant and message.
    #[must_use]
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload { code: code.to_string(), message: message.into() })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_join_parses_envelope() {
        let text = r#"{"event":"design:join","data":{"designId":"d1"}}"#;
        let event: ClientEvent = serde_json::from_str(text).unwrap();
        assert_eq!(event, ClientEvent::DesignJoin { design_id: "d1".into() });
        assert_eq!(event.design_id(), "d1");
    }

    #[test]
    fn inbound_unknown_event_is_rejected() {
        let text = r#"{"event":"design:destroy","data":{"designId":"d1"}}"#;
        assert!(serde_json::from_str::<ClientEvent>(text).is_err());
    }

    #[test]
    fn inbound_missing_design_id_is_rejected() {
        let text = r#"{"event":"canvas:update","data":{"canvas":{}}}"#;
        assert!(serde_json::from_str::<ClientEvent>(text).is_err());
    }

    #[test]
    fn inbound_layer_update_uses_camel_case_fields() {
        let text = r#"{"event":"layer:update","data":{"designId":"d1","layerId":"l1","updates":{"visible":false}}}"#;
        let event: ClientEvent = serde_json::from_str(text).unwrap();
        let ClientEvent::LayerUpdate { design_id, layer_id, updates } = event else {
            panic!("expected layer:update");
        };
        assert_eq!(design_id, "d1");
        assert_eq!(layer_id, "l1");
        assert_eq!(updates.visible, Some(false));
        assert_eq!(updates.name, None);
    }

    #[test]
    fn inbound_color_change_parses() {
        let text = r##"{"event":"canvas:colorChange","data":{"designId":"d1","objectId":"o1","color":"#ff0000"}}"##;
        let event: ClientEvent = serde_json::from_str(text).unwrap();
        assert!(matches!(event, ClientEvent::ColorChange { .. }));
    }

    #[test]
    fn outbound_error_carries_code_and_message() {
        let event = ServerEvent::error(CODE_INVALID_EVENT, "bad payload");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["data"]["code"], "INVALID_EVENT");
        assert_eq!(json["data"]["message"], "bad payload");
    }

    #[test]
    fn outbound_canvas_update_envelope_shape() {
        let event = ServerEvent::CanvasUpdate { canvas: json!({"objects": []}), from: "user-1".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "canvas:update");
        assert_eq!(json["data"]["from"], "user-1");
        assert_eq!(json["data"]["canvas"]["objects"], json!([]));
    }

    #[test]
    fn outbound_user_list_is_bare_array() {
        let event = ServerEvent::UserList(vec![
            UserIdentity { user_id: "u1".into(), name: "Ada".into() },
            UserIdentity { user_id: "u2".into(), name: "Grace".into() },
        ]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "user:list");
        assert!(json["data"].is_array());
        assert_eq!(json["data"][0]["userId"], "u1");
    }

    #[test]
    fn outbound_layer_deleted_uses_camel_case() {
        let event = ServerEvent::LayerDeleted { design_id: "d1".into(), layer_id: "l1".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["layerId"], "l1");
    }

    #[test]
    fn outbound_echoed_mutations_name_their_design() {
        // A connection joined to several designs correlates these by designId.
        let deleted = ServerEvent::LayerDeleted { design_id: "d1".into(), layer_id: "l1".into() };
        let json = serde_json::to_value(&deleted).unwrap();
        assert_eq!(json["data"]["designId"], "d1");

        let replaced = ServerEvent::LayersReplace { design_id: "d2".into(), layers: vec![] };
        let json = serde_json::to_value(&replaced).unwrap();
        assert_eq!(json["data"]["designId"], "d2");

        let recolored = ServerEvent::ColorChange {
            design_id: "d3".into(),
            object_id: "o1".into(),
            color: "#ff0000".into(),
            from: "user-1".into(),
        };
        let json = serde_json::to_value(&recolored).unwrap();
        assert_eq!(json["data"]["designId"], "d3");
    }

    #[test]
    fn outbound_round_trip() {
        let event = ServerEvent::ColorChange {
            design_id: "d1".into(),
            object_id: "o1".into(),
            color: "#00ff00".into(),
            from: "user-2".into(),
        };
        let text = serde_json::to_string(&event).unwrap();
        let restored: ServerEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(restored, event);
    }
}
