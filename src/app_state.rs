//! Shared application state, threaded into every handler via axum's
//! `with_state`. Grounded on the teacher's `app_state.rs`: the teacher held a
//! concrete `Graph` + `LlmManager`; here each external dependency is a port
//! trait object so the pipeline and handlers never see `rig`, `lancedb`,
//! `sqlx`, `redb` or `moka` directly.

use crate::config::AppConfig;
use crate::ports::{CachePort, EmbeddingPort, LlmPort, RelationalStorePort, SessionStorePort, VectorStorePort};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub embedding: Arc<dyn EmbeddingPort>,
    pub vector_store: Arc<dyn VectorStorePort>,
    pub relational: Arc<dyn RelationalStorePort>,
    pub session_store: Arc<dyn SessionStorePort>,
    pub cache: Arc<dyn CachePort>,
    pub llm: Arc<dyn LlmPort>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}
