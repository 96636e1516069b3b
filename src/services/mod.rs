//! Collaboration services.
//!
//! Each module owns one concern of a live room: `room` maps designs to live
//! rooms and evicts empty ones, `presence` tracks who is connected,
//! `coalesce` dedupes and debounces canvas autosaves, `broadcast` fans
//! events out to members, and `design` persists structural edits (layers,
//! comments) through the gateway.

pub mod broadcast;
pub mod coalesce;
pub mod design;
pub mod presence;
pub mod room;
