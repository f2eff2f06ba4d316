//! Port traits (C1–C6). Each trait is the contract the core pipelines
//! consume; concrete adapters live in the sibling modules and are the only
//! places that know about `rig`, `lancedb`, `sqlx`, `redb` or `moka`.

pub mod cache;
pub mod embedding;
pub mod llm;
pub mod relational;
pub mod session;
pub mod vector_store;

use crate::error::CoreError;
use crate::models::{ChatMessage, FileRecord, Message, Role, VectorHit, VectorPoint};
use async_trait::async_trait;
use futures::stream::BoxStream;

#[async_trait]
pub trait EmbeddingPort: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError>;
}

#[async_trait]
pub trait VectorStorePort: Send + Sync {
    /// Idempotent: a second call against an existing partition is a no-op.
    async fn ensure_partition(&self, partition: &str) -> Result<(), CoreError>;
    async fn insert(&self, partition: &str, points: Vec<VectorPoint>) -> Result<(), CoreError>;
    /// Partitions absent from the store are silently skipped, not an error.
    async fn search(
        &self,
        partitions: &[String],
        query_vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<VectorHit>, CoreError>;
    async fn drop_partition(&self, partition: &str) -> Result<(), CoreError>;
}

#[async_trait]
pub trait RelationalStorePort: Send + Sync {
    async fn insert_file(&self, file: &FileRecord) -> Result<(), CoreError>;
    async fn update_ingest_state(
        &self,
        file_id: &str,
        state: crate::models::IngestState,
        chunk_count: Option<i64>,
    ) -> Result<(), CoreError>;
    async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>, CoreError>;
    async fn file_exists(&self, file_id: &str) -> Result<bool, CoreError>;
    async fn list_files(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileRecord>, CoreError>;
    async fn delete_file(&self, file_id: &str) -> Result<(), CoreError>;
    async fn insert_chunks(&self, chunks: &[crate::models::ChunkRecord]) -> Result<(), CoreError>;
}

#[async_trait]
pub trait SessionStorePort: Send + Sync {
    async fn create_if_absent(
        &self,
        session_id: &str,
        owner_id: Option<&str>,
        file_ids: &[String],
    ) -> Result<(), CoreError>;
    async fn append(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), CoreError>;
    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, CoreError>;
    async fn delete(&self, session_id: &str) -> Result<(), CoreError>;
}

#[async_trait]
pub trait CachePort: Send + Sync {
    async fn get(&self, kind: crate::models::CacheKind, key: &str) -> Option<serde_json::Value>;
    async fn set(&self, kind: crate::models::CacheKind, key: &str, value: serde_json::Value);
}

pub type TokenStream = BoxStream<'static, Result<String, CoreError>>;

#[async_trait]
pub trait LlmPort: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CoreError>;
    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, CoreError>;
}
