//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the persistence gateway behind a trait object, the registry of live
//! rooms, and the tuning knobs loaded once at startup. Clone is required by
//! Axum; the gateway and registry are Arc-backed and the config is Copy.

use std::sync::Arc;
use std::time::Duration;

use crate::gateway::PersistenceGateway;
use crate::services::room::RoomRegistry;

// =============================================================================
// CONFIG
// =============================================================================

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_AUTOSAVE_DEBOUNCE_MS: u64 = 800;
const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;

/// Tuning knobs for the hub, loaded from environment variables.
#[derive(Clone, Copy)]
pub struct HubConfig {
    /// TCP port the HTTP server binds.
    pub port: u16,
    /// Maximum connections in the Postgres pool.
    pub db_max_connections: u32,
    /// Trailing-edge debounce window for canvas autosaves, in milliseconds.
    pub autosave_debounce_ms: u64,
    /// Bounded outbound channel capacity per client connection.
    pub channel_capacity: usize,
}

impl HubConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            autosave_debounce_ms: env_parse("AUTOSAVE_DEBOUNCE_MS", DEFAULT_AUTOSAVE_DEBOUNCE_MS),
            channel_capacity: env_parse("CLIENT_CHANNEL_CAPACITY", DEFAULT_CLIENT_CHANNEL_CAPACITY),
        }
    }

    /// The autosave debounce window as a `Duration`.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            autosave_debounce_ms: DEFAULT_AUTOSAVE_DEBOUNCE_MS,
            channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Document storage. Postgres in production, in-memory without a
    /// `DATABASE_URL`.
    pub gateway: Arc<dyn PersistenceGateway>,
    /// Live rooms keyed by design ID.
    pub rooms: RoomRegistry,
    pub config: HubConfig,
}

impl AppState {
    #[must_use]
    pub fn new(gateway: Arc<dyn PersistenceGateway>, config: HubConfig) -> Self {
        Self { gateway, rooms: RoomRegistry::new(), config }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use crate::document::Design;
    use crate::event::ServerEvent;
    use crate::gateway::MemoryGateway;
    use crate::services::presence::Member;

    /// Create an `AppState` backed by a memory gateway, returning the
    /// concrete gateway too so tests can seed designs and observe writes.
    #[must_use]
    pub fn test_state() -> (AppState, Arc<MemoryGateway>) {
        let gateway = Arc::new(MemoryGateway::new());
        let state = AppState::new(Arc::clone(&gateway) as Arc<dyn PersistenceGateway>, HubConfig::default());
        (state, gateway)
    }

    /// Seed an empty design and return it.
    pub fn seed_design(gateway: &MemoryGateway, design_id: &str) -> Design {
        let design = Design::new(design_id, "Untitled Design", "owner-1");
        gateway.insert(design.clone());
        design
    }

    /// A room member with a fresh connection ID, plus the receiving end of
    /// its outbound channel.
    #[must_use]
    pub fn member(user_id: &str, name: &str) -> (Member, mpsc::Receiver<ServerEvent>) {
        member_with_capacity(user_id, name, 8)
    }

    #[must_use]
    pub fn member_with_capacity(
        user_id: &str,
        name: &str,
        capacity: usize,
    ) -> (Member, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let member = Member {
            connection_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            tx,
        };
        (member, rx)
    }
}

// =============================================================================
// TESTS
// =============================================================================
