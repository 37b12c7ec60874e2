pub mod api;
pub mod auth;
pub mod collab;
pub mod config;
pub mod db;
pub mod error;

use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use sketchhub_engine::{
    AccessGuard, DrawingCatalog, GalleryProjector, SessionConfig, SessionRegistry, SnapshotStore,
};

use crate::auth::TokenStore;
use crate::config::Config;
use crate::db::Database;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub registry: Arc<SessionRegistry>,
    pub projector: Arc<GalleryProjector>,
    pub tokens: Arc<TokenStore>,
}

/// Run the server with the given configuration
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    // Initialize database
    let db = Database::connect(&config.database_url).await?;

    // Run migrations
    db.migrate().await?;

    // The database backs all three engine-facing interfaces.
    let shared = Arc::new(db.clone());
    let registry = SessionRegistry::new(
        Arc::clone(&shared) as Arc<dyn SnapshotStore>,
        Arc::clone(&shared) as Arc<dyn AccessGuard>,
        Arc::clone(&shared) as Arc<dyn DrawingCatalog>,
        SessionConfig {
            idle_flush: Duration::from_secs(config.flush_idle_secs),
            ..SessionConfig::default()
        },
    );
    let projector = Arc::new(GalleryProjector::new(
        Arc::clone(&shared) as Arc<dyn DrawingCatalog>,
        Arc::clone(&shared) as Arc<dyn SnapshotStore>,
    ));

    // Create application state
    let state = AppState {
        db,
        registry,
        projector,
        tokens: Arc::new(TokenStore::new()),
    };

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .merge(collab::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start the server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
