//! Design document model.
//!
//! DESIGN
//! ======
//! A design is one co-edited document: an opaque canvas blob plus ordered
//! layers and comments. The hub never interprets canvas contents beyond the
//! `objects` array used for incremental appends; everything else is stored
//! and relayed verbatim. Layer and comment IDs are server-assigned and
//! stable once issued, so deletes and updates address by ID, never by
//! position.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// TIME
// =============================================================================

/// Current time as milliseconds since Unix epoch.
pub(crate) fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// CANVAS
// =============================================================================

/// Canvas shape for a freshly created design. The `version` field mirrors
/// what browser canvas libraries emit in `toJSON()` output.
#[must_use]
pub fn default_canvas() -> serde_json::Value {
    serde_json::json!({ "version": "5.3.0", "objects": [] })
}

// =============================================================================
// DOCUMENT
// =============================================================================

/// The full stored document, as loaded from and written to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Design {
    pub id: String,
    pub title: String,
    pub owner: String,
    pub canvas: serde_json::Value,
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    /// Milliseconds since Unix epoch.
    pub created_at: i64,
    pub updated_at: i64,
}

impl Design {
    /// Create an empty design with the default canvas.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, owner: impl Into<String>) -> Self {
        let ts = now_ms();
        Self {
            id: id.into(),
            title: title.into(),
            owner: owner.into(),
            canvas: default_canvas(),
            layers: Vec::new(),
            comments: Vec::new(),
            created_at: ts,
            updated_at: ts,
        }
    }
}

// =============================================================================
// LAYERS
// =============================================================================

/// One entry in a design's ordered layer list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: String,
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    /// Free-form drawing payload, stored verbatim.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Layer {
    /// Create a layer with a fresh server-assigned ID.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            visible: true,
            locked: false,
            data: serde_json::Value::Null,
        }
    }

    /// Apply a partial update in place. Absent fields are untouched.
    pub fn apply(&mut self, updates: &LayerUpdates) {
        if let Some(name) = &updates.name {
            self.name.clone_from(name);
        }
        if let Some(visible) = updates.visible {
            self.visible = visible;
        }
        if let Some(locked) = updates.locked {
            self.locked = locked;
        }
        if let Some(data) = &updates.data {
            self.data = data.clone();
        }
    }
}

/// Layer as proposed by a client. Client-proposed IDs are advisory: a new
/// layer always gets a server-assigned ID, while reordered layers keep the
/// IDs they already carry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LayerDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub data: serde_json::Value,
}

fn default_visible() -> bool {
    true
}

impl LayerDraft {
    /// Materialize as a brand-new layer. Any client-proposed ID is replaced
    /// with a server-assigned one.
    #[must_use]
    pub fn into_new_layer(self) -> Layer {
        Layer {
            id: Uuid::new_v4().to_string(),
            name: self.name,
            visible: self.visible,
            locked: self.locked,
            data: self.data,
        }
    }

    /// Materialize keeping an existing ID. Drafts without an ID (possible in
    /// a reorder list) are stamped.
    #[must_use]
    pub fn into_existing_layer(self) -> Layer {
        Layer {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: self.name,
            visible: self.visible,
            locked: self.locked,
            data: self.data,
        }
    }
}

/// Partial layer update. `None` means "leave unchanged".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LayerUpdates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// =============================================================================
// COMMENTS
// =============================================================================

/// A comment on a design, optionally anchored to one canvas object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub user_id: String,
    pub text: String,
    /// Milliseconds since Unix epoch, stamped server-side.
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
}

/// Comment as submitted by a client, before the server stamps ID and
/// timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommentDraft {
    pub user_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
}

impl CommentDraft {
    /// Materialize with a server-assigned ID and creation timestamp.
    #[must_use]
    pub fn into_comment(self) -> Comment {
        Comment {
            id: Uuid::new_v4().to_string(),
            user_id: self.user_id,
            text: self.text,
            created_at: now_ms(),
            object_id: self.object_id,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
