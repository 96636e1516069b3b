//! Persistence gateway — the hub's only view of document storage.
//!
//! ARCHITECTURE
//! ============
//! The CRUD layer that owns designs is out of scope here; the hub reaches it
//! exclusively through `PersistenceGateway`, a two-operation trait object:
//! `find` for join-time loads and `find_and_update` for every write. Writes
//! are expressed as a `DesignPatch` so both backends apply identical
//! semantics, and the updated document is always returned so broadcasts can
//! carry server truth (assigned IDs, timestamps) rather than client input.
//!
//! ERROR HANDLING
//! ==============
//! Gateway failures never take the hub down. The dispatcher maps them to a
//! wire error for the acting connection and moves on; there are no automatic
//! retries.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::document::{Comment, Design, Layer, LayerUpdates, now_ms};

pub use memory::MemoryGateway;
pub use postgres::PgGateway;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("design not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

// =============================================================================
// PATCHES
// =============================================================================

/// One atomic mutation of a stored design.
#[derive(Debug, Clone, PartialEq)]
pub enum DesignPatch {
    /// Replace the whole canvas blob (debounced autosave).
    ReplaceCanvas(serde_json::Value),
    /// Append objects to the stored canvas without replacing it.
    AppendCanvasObjects(Vec<serde_json::Value>),
    /// Append one layer to the layer list.
    PushLayer(Layer),
    /// Partially update one layer. Unknown IDs are a no-op.
    UpdateLayer { layer_id: String, updates: LayerUpdates },
    /// Remove one layer by ID. Idempotent: absent IDs are a no-op.
    RemoveLayer(String),
    /// Replace the whole layer list (reorder).
    ReplaceLayers(Vec<Layer>),
    /// Append one comment.
    PushComment(Comment),
}

impl DesignPatch {
    /// Apply this patch to a loaded document and bump `updated_at`.
    ///
    /// Both gateway backends funnel writes through here so patch semantics
    /// cannot drift between Postgres and memory.
    pub fn apply(self, design: &mut Design) {
        match self {
            Self::ReplaceCanvas(canvas) => design.canvas = canvas,
            Self::AppendCanvasObjects(objects) => append_canvas_objects(&mut design.canvas, objects),
            Self::PushLayer(layer) => design.layers.push(layer),
            Self::UpdateLayer { layer_id, updates } => {
                if let Some(layer) = design.layers.iter_mut().find(|l| l.id == layer_id) {
                    layer.apply(&updates);
                }
            }
            Self::RemoveLayer(layer_id) => design.layers.retain(|l| l.id != layer_id),
            Self::ReplaceLayers(layers) => design.layers = layers,
            Self::PushComment(comment) => design.comments.push(comment),
        }
        design.updated_at = now_ms();
    }
}

/// Append objects to a canvas blob's `objects` array, creating the array if
/// missing. Non-object canvases are left untouched; the hub treats the blob
/// as opaque and cannot compose into it.
pub(crate) fn append_canvas_objects(canvas: &mut serde_json::Value, objects: Vec<serde_json::Value>) {
    let serde_json::Value::Object(map) = canvas else {
        return;
    };
    let entry = map
        .entry("objects")
        .or_insert_with(|| serde_json::Value::Array(Vec::new()));
    if let serde_json::Value::Array(arr) = entry {
        arr.extend(objects);
    }
}

// =============================================================================
// TRAIT
// =============================================================================

/// Storage operations the hub depends on. Implemented by `PgGateway` for
/// production and `MemoryGateway` for development and tests.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Load a design by ID.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such design exists, or a storage error.
    async fn find(&self, design_id: &str) -> Result<Design, GatewayError>;

    /// Atomically apply one patch and return the updated document.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such design exists, or a storage error.
    async fn find_and_update(&self, design_id: &str, patch: DesignPatch) -> Result<Design, GatewayError>;
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replace_canvas_bumps_updated_at() {
        let mut design = Design::new("d1", "Untitled", "u1");
        let before = design.updated_at;
        DesignPatch::ReplaceCanvas(json!({"objects": [{"type": "rect"}]})).apply(&mut design);
        assert_eq!(design.canvas["objects"][0]["type"], "rect");
        assert!(design.updated_at >= before);
    }

    #[test]
    fn append_objects_creates_missing_array() {
        let mut canvas = json!({"version": "5.3.0"});
        append_canvas_objects(&mut canvas, vec![json!({"type": "circle"})]);
        assert_eq!(canvas["objects"].as_array().unwrap().len(), 1);

        append_canvas_objects(&mut canvas, vec![json!({"type": "rect"})]);
        assert_eq!(canvas["objects"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn append_objects_ignores_non_object_canvas() {
        let mut canvas = json!("opaque");
        append_canvas_objects(&mut canvas, vec![json!({"type": "rect"})]);
        assert_eq!(canvas, json!("opaque"));
    }

    #[test]
    fn update_layer_unknown_id_is_noop() {
        let mut design = Design::new("d1", "Untitled", "u1");
        design.layers.push(Layer::new("Base"));
        let patch = DesignPatch::UpdateLayer {
            layer_id: "missing".into(),
            updates: LayerUpdates { locked: Some(true), ..LayerUpdates::default() },
        };
        patch.apply(&mut design);
        assert!(!design.layers[0].locked);
    }

    #[test]
    fn remove_layer_is_idempotent() {
        let mut design = Design::new("d1", "Untitled", "u1");
        let layer = Layer::new("Base");
        let id = layer.id.clone();
        design.layers.push(layer);

        DesignPatch::RemoveLayer(id.clone()).apply(&mut design);
        assert!(design.layers.is_empty());

        DesignPatch::RemoveLayer(id).apply(&mut design);
        assert!(design.layers.is_empty());
    }
}
