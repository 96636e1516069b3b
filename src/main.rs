use std::sync::Arc;

use designhub::gateway::{MemoryGateway, PersistenceGateway, PgGateway};
use designhub::state::{AppState, HubConfig};
use designhub::{db, routes};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = HubConfig::from_env();

    // Postgres when configured; in-memory otherwise, so the hub runs
    // without infrastructure at the cost of durability.
    let gateway: Arc<dyn PersistenceGateway> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool = db::init_pool(&url, config.db_max_connections)
                .await
                .expect("database init failed");
            tracing::info!("persistence gateway: postgres");
            Arc::new(PgGateway::new(pool))
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; designs will not survive a restart");
            Arc::new(MemoryGateway::new())
        }
    };

    let state = AppState::new(gateway, config);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, "designhub listening");
    axum::serve(listener, app).await.expect("server failed");
}
