mod api;
mod app_state;
mod chunking;
mod config;
mod error;
mod events;
mod ingest;
mod models;
mod pipeline;
mod ports;
mod prompt;
mod retrieval;
#[cfg(test)]
mod test_support;

use crate::app_state::AppState;
use crate::ports::cache::MokaCache;
use crate::ports::embedding::RigEmbeddingAdapter;
use crate::ports::llm::RigLlmAdapter;
use crate::ports::relational::SqliteRelationalStore;
use crate::ports::session::RedbSessionStore;
use crate::ports::vector_store::LanceVectorStore;
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = config::AppConfig::from_env().expect("failed to load configuration");

    if let Some(parent) = std::path::Path::new(&cfg.sqlite_path).parent() {
        std::fs::create_dir_all(parent).expect("failed to create sqlite data directory");
    }
    if let Some(parent) = std::path::Path::new(&cfg.redb_path).parent() {
        std::fs::create_dir_all(parent).expect("failed to create redb data directory");
    }

    let sqlite_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&format!("sqlite://{}?mode=rwc", cfg.sqlite_path))
        .await
        .expect("failed to connect to sqlite");
    let relational = SqliteRelationalStore::new(sqlite_pool);
    relational.initialize().await.expect("failed to initialize relational schema");

    let vector_store = LanceVectorStore::connect(&cfg.lancedb_uri)
        .await
        .expect("failed to connect to lancedb");

    let session_store = RedbSessionStore::open(&cfg.redb_path).expect("failed to open session store");

    let cache = MokaCache::new(&cfg.cache_ttls);

    let embedding = RigEmbeddingAdapter::from_config(&cfg);
    let llm = RigLlmAdapter::from_config(&cfg);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let app_state = AppState {
        config: cfg.clone(),
        embedding: Arc::new(embedding),
        vector_store: Arc::new(vector_store),
        relational: Arc::new(relational),
        session_store: Arc::new(session_store),
        cache: Arc::new(cache),
        llm: Arc::new(llm),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    let cors_layer = if cfg.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(AllowOrigin::any()).allow_methods(tower_http::cors::Any).allow_headers(tower_http::cors::Any)
    } else {
        let origins: Vec<_> = cfg
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    };

    let app: Router = api::create_router(app_state.clone()).layer(cors_layer);

    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .expect("failed to bind server address");
    info!("listening on http://{}", cfg.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("shutdown signal received, closing server");
        })
        .await
        .expect("server error");

    info!("server closed");
}
