//! Domain model (§3): files, chunks, sessions, messages and the small
//! value types ports pass across their boundaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IngestState {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: String,
    pub owner_id: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub uploaded_at: DateTime<Utc>,
    pub chunk_count: i64,
    pub ingest_state: IngestState,
    pub vector_partition: String,
}

impl FileRecord {
    pub fn partition_name(file_id: &str) -> String {
        format!("file_{file_id}")
    }
}

/// One of the three hierarchy levels produced by the hierarchical chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChunkLevel {
    Parent = 0,
    Child = 1,
    Grandchild = 2,
}

impl ChunkLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub file_id: String,
    pub level: u8,
    pub level_index: i64,
    pub parent_chunk_id: Option<String>,
    pub content: String,
    pub token_count_estimate: i64,
    pub vector_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub owner_id: Option<String>,
    pub file_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

/// A single vector to be inserted into a partition; `content` is carried as
/// payload so the vector store can answer a search without a relational
/// round-trip.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub vector_id: String,
    pub level_index: i64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub inserted_at: DateTime<Utc>,
}

/// A single hit returned by the vector store, already scoped to the
/// partition (file) it was found in.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub file_id: String,
    pub level_index: i64,
    pub content: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Embedding,
    Expansion,
    SearchResults,
    FileMetadata,
}

impl CacheKind {
    pub fn key_prefix(self) -> &'static str {
        match self {
            CacheKind::Embedding => "emb",
            CacheKind::Expansion => "qexp",
            CacheKind::SearchResults => "search",
            CacheKind::FileMetadata => "filemeta",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// A single retrieved piece of context, ranked and ready for prompt assembly.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub content: String,
    pub score: f64,
    pub file_id: String,
    pub level_index: i64,
}

/// Best-effort LLM query-expansion output (§4.2).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryExpansion {
    pub original_query: String,
    pub intent: String,
    pub sub_questions: Vec<String>,
}
