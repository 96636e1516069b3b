//! Real-time collaboration hub for co-edited designs.
//!
//! ARCHITECTURE
//! ============
//! Browser clients connect over a websocket and join per-design rooms. The
//! hub fans edits out to room members, suppresses redundant canvas traffic
//! by content hash, debounces autosaves, and persists structural changes
//! (layers, comments) through a storage gateway before confirming them.
//! Everything outside the live edit stream, like document CRUD and auth, is
//! someone else's service.

pub mod db;
pub mod document;
pub mod event;
pub mod gateway;
pub mod routes;
pub mod services;
pub mod state;
