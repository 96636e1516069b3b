//! In-memory gateway — development fallback and test double.
//!
//! DESIGN
//! ======
//! A mutex-guarded map of designs with the same patch semantics as the
//! Postgres backend. `main` falls back to it when `DATABASE_URL` is unset so
//! the hub runs without infrastructure; tests use it to observe writes and
//! to inject storage failures.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::document::Design;
use crate::gateway::{DesignPatch, GatewayError, PersistenceGateway};

#[derive(Default)]
pub struct MemoryGateway {
    designs: Mutex<HashMap<String, Design>>,
    update_calls: AtomicUsize,
    fail_next: AtomicBool,
}

impl MemoryGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a design. Document creation belongs to the CRUD
    /// layer, so the memory backend exposes it out-of-band.
    pub fn insert(&self, design: Design) {
        let mut designs = self.designs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        designs.insert(design.id.clone(), design);
    }

    /// Number of `find_and_update` calls that reached storage.
    #[must_use]
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Make the next `find_and_update` fail with a storage error.
    pub fn fail_next_update(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn find(&self, design_id: &str) -> Result<Design, GatewayError> {
        let designs = self.designs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        designs
            .get(design_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(design_id.to_string()))
    }

    async fn find_and_update(&self, design_id: &str, patch: DesignPatch) -> Result<Design, GatewayError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Storage("injected failure".into()));
        }

        let mut designs = self.designs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let design = designs
            .get_mut(design_id)
            .ok_or_else(|| GatewayError::NotFound(design_id.to_string()))?;
        patch.apply(design);
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        Ok(design.clone())
    }
}
