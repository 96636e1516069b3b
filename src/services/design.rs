//! Structural design operations — layers and comments.
//!
//! DESIGN
//! ======
//! Structural edits are rarer and heavier than canvas strokes, so they skip
//! the coalescer entirely: each one is a synchronous gateway round-trip that
//! persists before anything is broadcast. The functions here return what the
//! broadcast needs, taken from the stored document (or the stamped entity),
//! never echoed client input. A failed write therefore means nobody saw the
//! change, which keeps every connected canvas consistent with storage.

use crate::document::{Comment, CommentDraft, Layer, LayerDraft, LayerUpdates};
use crate::gateway::{DesignPatch, GatewayError, PersistenceGateway};

/// Persist a new layer with a server-assigned ID and return it.
///
/// # Errors
///
/// Returns the gateway error if the design is missing or the write fails.
pub async fn add_layer(
    gateway: &dyn PersistenceGateway,
    design_id: &str,
    draft: LayerDraft,
) -> Result<Layer, GatewayError> {
    let layer = draft.into_new_layer();
    gateway
        .find_and_update(design_id, DesignPatch::PushLayer(layer.clone()))
        .await?;
    Ok(layer)
}

/// Persist a partial layer update and return the full stored layer list.
///
/// Unknown layer IDs are not an error: the patch is a no-op and the current
/// list comes back, so stale clients resynchronize instead of desyncing.
///
/// # Errors
///
/// Returns the gateway error if the design is missing or the write fails.
pub async fn update_layer(
    gateway: &dyn PersistenceGateway,
    design_id: &str,
    layer_id: String,
    updates: LayerUpdates,
) -> Result<Vec<Layer>, GatewayError> {
    let design = gateway
        .find_and_update(design_id, DesignPatch::UpdateLayer { layer_id, updates })
        .await?;
    Ok(design.layers)
}

/// Remove a layer by ID. Idempotent: deleting an already-deleted layer
/// succeeds, so crossing deletes from two clients both confirm.
///
/// # Errors
///
/// Returns the gateway error if the design is missing or the write fails.
pub async fn delete_layer(
    gateway: &dyn PersistenceGateway,
    design_id: &str,
    layer_id: &str,
) -> Result<(), GatewayError> {
    gateway
        .find_and_update(design_id, DesignPatch::RemoveLayer(layer_id.to_string()))
        .await?;
    Ok(())
}

/// Replace the whole layer list (drag-reorder) and return the stored order.
///
/// Reorders are persisted immediately: ordering conflicts resolve by
/// last-write-wins and every client converges on the final broadcast list.
///
/// # Errors
///
/// Returns the gateway error if the design is missing or the write fails.
pub async fn reorder_layers(
    gateway: &dyn PersistenceGateway,
    design_id: &str,
    drafts: Vec<LayerDraft>,
) -> Result<Vec<Layer>, GatewayError> {
    let layers = drafts.into_iter().map(LayerDraft::into_existing_layer).collect();
    let design = gateway
        .find_and_update(design_id, DesignPatch::ReplaceLayers(layers))
        .await?;
    Ok(design.layers)
}

/// Persist a comment with a server-assigned ID and timestamp, returning the
/// stamped comment for broadcast.
///
/// # Errors
///
/// Returns the gateway error if the design is missing or the write fails.
pub async fn add_comment(
    gateway: &dyn PersistenceGateway,
    design_id: &str,
    draft: CommentDraft,
) -> Result<Comment, GatewayError> {
    let comment = draft.into_comment();
    gateway
        .find_and_update(design_id, DesignPatch::PushComment(comment.clone()))
        .await?;
    Ok(comment)
}

// =============================================================================
// TESTS
// =============================================================================
