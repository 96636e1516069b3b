use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use super::*;
use crate::event::ClientEvent;
use crate::gateway::MemoryGateway;
use crate::services::room::RoomRegistry;

fn rect_canvas(fill: &str) -> serde_json::Value {
    json!({ "version": "5.3.0", "objects": [{ "type": "rect", "fill": fill }] })
}

#[test]
fn duplicate_canvas_is_suppressed() {
    let mut coalescer = ChangeCoalescer::new();
    let canvas = rect_canvas("#ff0000");

    assert_eq!(coalescer.accept_canvas(canvas.clone()), CanvasVerdict::Fresh);
    for _ in 0..5 {
        assert_eq!(coalescer.accept_canvas(canvas.clone()), CanvasVerdict::Duplicate);
    }
}

#[test]
fn field_order_does_not_defeat_dedup() {
    let mut coalescer = ChangeCoalescer::new();
    let a: serde_json::Value = serde_json::from_str(r#"{"objects":[],"version":"5.3.0"}"#).unwrap();
    let b: serde_json::Value = serde_json::from_str(r#"{"version":"5.3.0","objects":[]}"#).unwrap();

    assert_eq!(coalescer.accept_canvas(a), CanvasVerdict::Fresh);
    assert_eq!(coalescer.accept_canvas(b), CanvasVerdict::Duplicate);
}

#[test]
fn changed_canvas_is_fresh_again() {
    let mut coalescer = ChangeCoalescer::new();
    let red = rect_canvas("#ff0000");
    let blue = rect_canvas("#0000ff");

    assert_eq!(coalescer.accept_canvas(red.clone()), CanvasVerdict::Fresh);
    assert_eq!(coalescer.accept_canvas(blue), CanvasVerdict::Fresh);
    // Only the LAST broadcast state is remembered; reverting is fresh too.
    assert_eq!(coalescer.accept_canvas(red), CanvasVerdict::Fresh);
}

#[test]
fn full_canvas_subsumes_queued_objects() {
    let mut coalescer = ChangeCoalescer::new();
    coalescer.accept_object(json!({ "type": "circle" }));
    assert!(coalescer.has_pending());

    coalescer.accept_canvas(rect_canvas("#00ff00"));
    let payload = coalescer.take_flush().unwrap();
    assert!(payload.objects.is_empty());
    assert_eq!(payload.to_patch(), DesignPatch::ReplaceCanvas(rect_canvas("#00ff00")));
}

#[test]
fn objects_only_flush_is_an_append() {
    let mut coalescer = ChangeCoalescer::new();
    coalescer.accept_object(json!({ "type": "circle" }));
    coalescer.accept_object(json!({ "type": "line" }));

    let payload = coalescer.take_flush().unwrap();
    assert_eq!(
        payload.to_patch(),
        DesignPatch::AppendCanvasObjects(vec![json!({ "type": "circle" }), json!({ "type": "line" })])
    );
}

#[test]
fn objects_after_canvas_are_appended_to_it() {
    let mut coalescer = ChangeCoalescer::new();
    coalescer.accept_canvas(rect_canvas("#00ff00"));
    coalescer.accept_object(json!({ "type": "circle" }));

    let DesignPatch::ReplaceCanvas(canvas) = coalescer.take_flush().unwrap().to_patch() else {
        panic!("expected a canvas replace");
    };
    let objects = canvas["objects"].as_array().unwrap();
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[1]["type"], "circle");
}

#[test]
fn overlay_shows_broadcast_state_to_joiners() {
    let mut coalescer = ChangeCoalescer::new();
    coalescer.accept_canvas(rect_canvas("#123456"));
    coalescer.accept_object(json!({ "type": "circle" }));

    let mut design = crate::document::Design::new("d1", "Untitled", "u1");
    coalescer.overlay(&mut design);
    let objects = design.canvas["objects"].as_array().unwrap();
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0]["fill"], "#123456");
}

#[test]
fn take_and_restore_round_trip() {
    let mut coalescer = ChangeCoalescer::new();
    coalescer.accept_canvas(rect_canvas("#ff0000"));

    let payload = coalescer.take_flush().unwrap();
    assert!(!coalescer.has_pending());
    assert!(coalescer.take_flush().is_none());

    coalescer.restore(payload);
    assert!(coalescer.has_pending());
    // The hash is untouched by flush bookkeeping.
    assert_eq!(coalescer.accept_canvas(rect_canvas("#ff0000")), CanvasVerdict::Duplicate);
}

#[test]
fn wire_canvas_update_feeds_the_coalescer() {
    // The dispatcher hands the canvas payload straight in; parsing the wire
    // shape here pins the field names the two sides agree on.
    let text = r#"{"event":"canvas:update","data":{"designId":"d1","canvas":{"objects":[]}}}"#;
    let ClientEvent::CanvasUpdate { canvas, .. } = serde_json::from_str(text).unwrap() else {
        panic!("expected canvas:update");
    };
    let mut coalescer = ChangeCoalescer::new();
    assert_eq!(coalescer.accept_canvas(canvas), CanvasVerdict::Fresh);
}

#[tokio::test(start_paused = true)]
async fn debounce_saves_last_payload_once() {
    let registry = RoomRegistry::new();
    let gateway = Arc::new(MemoryGateway::new());
    gateway.insert(crate::document::Design::new("d1", "Untitled", "u1"));
    let dyn_gateway: Arc<dyn PersistenceGateway> = gateway.clone();
    let (tx, _rx) = mpsc::channel(8);

    let (room, mut state) = registry.acquire("d1").await;
    state.coalescer.accept_canvas(rect_canvas("#ff0000"));
    schedule_flush(&mut state, &room, &dyn_gateway, Duration::from_millis(800), tx.clone());
    state.coalescer.accept_canvas(rect_canvas("#0000ff"));
    schedule_flush(&mut state, &room, &dyn_gateway, Duration::from_millis(800), tx);
    drop(state);

    tokio::time::sleep(Duration::from_millis(900)).await;

    assert_eq!(gateway.update_calls(), 1);
    let saved = gateway.find("d1").await.unwrap();
    assert_eq!(saved.canvas, rect_canvas("#0000ff"));
    assert!(!room.lock().await.coalescer.has_pending());
}

#[tokio::test(start_paused = true)]
async fn failed_flush_keeps_pending_and_hash_and_notifies() {
    let registry = RoomRegistry::new();
    let gateway = Arc::new(MemoryGateway::new());
    gateway.insert(crate::document::Design::new("d1", "Untitled", "u1"));
    gateway.fail_next_update();
    let dyn_gateway: Arc<dyn PersistenceGateway> = gateway.clone();
    let (tx, mut rx) = mpsc::channel(8);

    let (room, mut state) = registry.acquire("d1").await;
    state.coalescer.accept_canvas(rect_canvas("#ff0000"));
    schedule_flush(&mut state, &room, &dyn_gateway, Duration::from_millis(800), tx);
    drop(state);

    tokio::time::sleep(Duration::from_millis(900)).await;

    let ServerEvent::Error(err) = rx.try_recv().unwrap() else {
        panic!("expected an error event");
    };
    assert_eq!(err.code, CODE_AUTOSAVE_FAILED);
    assert_eq!(gateway.update_calls(), 0);

    let mut state = room.lock().await;
    assert!(state.coalescer.has_pending());
    // The hash still reflects what peers saw; resending it stays suppressed.
    assert_eq!(state.coalescer.accept_canvas(rect_canvas("#ff0000")), CanvasVerdict::Duplicate);
}

#[tokio::test(start_paused = true)]
async fn scheduled_flush_survives_room_eviction() {
    let registry = RoomRegistry::new();
    let gateway = Arc::new(MemoryGateway::new());
    gateway.insert(crate::document::Design::new("d1", "Untitled", "u1"));
    let dyn_gateway: Arc<dyn PersistenceGateway> = gateway.clone();
    let (tx, _rx) = mpsc::channel(8);

    let (room, mut state) = registry.acquire("d1").await;
    state.coalescer.accept_canvas(rect_canvas("#abcdef"));
    schedule_flush(&mut state, &room, &dyn_gateway, Duration::from_millis(800), tx);
    drop(state);
    drop(room);

    registry.release_if_empty("d1").await;
    assert_eq!(registry.len().await, 0);

    tokio::time::sleep(Duration::from_millis(900)).await;
    let saved = gateway.find("d1").await.unwrap();
    assert_eq!(saved.canvas, rect_canvas("#abcdef"));
}
