//! In-memory stub port implementations shared by `ingest`, `retrieval` and
//! `pipeline` unit tests (§8: "ingest unit tests with an in-memory stub
//! `RelationalStorePort`", "retrieval unit tests with stub `Embedding`/
//! `VectorStore`/`Cache` ports"). Only compiled for `cargo test`.

use crate::config::{AppConfig, CacheTtls, ChunkingConfig, ChunkingStrategy};
use crate::error::CoreError;
use crate::models::*;
use crate::ports::{CachePort, EmbeddingPort, LlmPort, RelationalStorePort, SessionStorePort, TokenStream, VectorStorePort};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub fn test_config() -> AppConfig {
    AppConfig {
        server_addr: "127.0.0.1:0".to_string(),
        cors_origins: vec!["*".to_string()],
        llm_base_url: "http://localhost:0".to_string(),
        llm_api_key: None,
        llm_chat_model: "test-chat".to_string(),
        llm_embedding_model: "test-embed".to_string(),
        lancedb_uri: "memory://".to_string(),
        sqlite_path: ":memory:".to_string(),
        redb_path: "/dev/null".to_string(),
        upload_dir: "/tmp/test-uploads".to_string(),
        max_file_size_bytes: 50_000_000,
        allowed_extensions: vec!["pdf".to_string(), "docx".to_string(), "txt".to_string(), "md".to_string()],
        chunking: ChunkingConfig {
            strategy: ChunkingStrategy::Hierarchical,
            hierarchical_sizes: [2000, 1000, 500],
            hierarchical_overlap: 100,
            recursive_size: 1000,
            recursive_overlap: 200,
        },
        expansion_count: 3,
        cache_ttls: CacheTtls {
            embedding: Duration::from_secs(60),
            expansion: Duration::from_secs(60),
            search_results: Duration::from_secs(60),
            file_metadata: Duration::from_secs(60),
        },
        max_context_tokens: 8_000,
        history_message_limit: 10,
    }
}

pub struct StubEmbeddingPort {
    dim: usize,
}

impl StubEmbeddingPort {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    /// Deterministic, content-sensitive so distinct texts land at distinct
    /// points and a query embeds close to the text it was derived from.
    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, b) in text.bytes().enumerate() {
            v[i % self.dim] += b as f32;
        }
        v
    }
}

#[async_trait]
impl EmbeddingPort for StubEmbeddingPort {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

#[derive(Default)]
pub struct StubVectorStorePort {
    partitions: Mutex<HashMap<String, Vec<VectorPoint>>>,
}

impl StubVectorStorePort {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStorePort for StubVectorStorePort {
    async fn ensure_partition(&self, partition: &str) -> Result<(), CoreError> {
        self.partitions.lock().unwrap().entry(partition.to_string()).or_default();
        Ok(())
    }

    async fn insert(&self, partition: &str, points: Vec<VectorPoint>) -> Result<(), CoreError> {
        self.partitions.lock().unwrap().entry(partition.to_string()).or_default().extend(points);
        Ok(())
    }

    async fn search(&self, partitions: &[String], query_vector: Vec<f32>, k: usize) -> Result<Vec<VectorHit>, CoreError> {
        let store = self.partitions.lock().unwrap();
        let mut hits = Vec::new();
        for partition in partitions {
            let Some(points) = store.get(partition) else { continue };
            let file_id = partition.strip_prefix("file_").unwrap_or(partition).to_string();
            for point in points {
                let distance: f32 = point
                    .embedding
                    .iter()
                    .zip(query_vector.iter())
                    .map(|(a, b)| (a - b).powi(2))
                    .sum();
                hits.push(VectorHit {
                    file_id: file_id.clone(),
                    level_index: point.level_index,
                    content: point.content.clone(),
                    score: distance as f64,
                });
            }
        }
        hits.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap());
        hits.truncate(k);
        Ok(hits)
    }

    async fn drop_partition(&self, partition: &str) -> Result<(), CoreError> {
        self.partitions.lock().unwrap().remove(partition);
        Ok(())
    }
}

#[derive(Default)]
pub struct StubRelationalStorePort {
    files: Mutex<HashMap<String, FileRecord>>,
    chunks: Mutex<Vec<ChunkRecord>>,
}

impl StubRelationalStorePort {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelationalStorePort for StubRelationalStorePort {
    async fn insert_file(&self, file: &FileRecord) -> Result<(), CoreError> {
        self.files.lock().unwrap().insert(file.file_id.clone(), file.clone());
        Ok(())
    }

    async fn update_ingest_state(&self, file_id: &str, state: IngestState, chunk_count: Option<i64>) -> Result<(), CoreError> {
        let mut files = self.files.lock().unwrap();
        let file = files
            .get_mut(file_id)
            .ok_or_else(|| CoreError::NotFound(format!("file {file_id} not found")))?;
        file.ingest_state = state;
        if let Some(count) = chunk_count {
            file.chunk_count = count;
        }
        Ok(())
    }

    async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>, CoreError> {
        Ok(self.files.lock().unwrap().get(file_id).cloned())
    }

    async fn file_exists(&self, file_id: &str) -> Result<bool, CoreError> {
        Ok(self.files.lock().unwrap().contains_key(file_id))
    }

    async fn list_files(&self, owner_id: &str, limit: i64, offset: i64) -> Result<Vec<FileRecord>, CoreError> {
        let mut files: Vec<FileRecord> = self
            .files
            .lock()
            .unwrap()
            .values()
            .filter(|f| f.owner_id == owner_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(files.into_iter().skip(offset.max(0) as usize).take(limit.max(0) as usize).collect())
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), CoreError> {
        self.files.lock().unwrap().remove(file_id);
        self.chunks.lock().unwrap().retain(|c| c.file_id != file_id);
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[ChunkRecord]) -> Result<(), CoreError> {
        self.chunks.lock().unwrap().extend_from_slice(chunks);
        Ok(())
    }
}

#[derive(Default)]
pub struct StubSessionStorePort {
    sessions: Mutex<HashMap<String, Session>>,
}

impl StubSessionStorePort {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStorePort for StubSessionStorePort {
    async fn create_if_absent(&self, session_id: &str, owner_id: Option<&str>, file_ids: &[String]) -> Result<(), CoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        if !sessions.contains_key(session_id) {
            let now = Utc::now();
            sessions.insert(
                session_id.to_string(),
                Session {
                    session_id: session_id.to_string(),
                    owner_id: owner_id.map(str::to_string),
                    file_ids: file_ids.to_vec(),
                    created_at: now,
                    updated_at: now,
                    messages: Vec::new(),
                },
            );
        }
        Ok(())
    }

    async fn append(&self, session_id: &str, role: Role, content: &str, metadata: Option<serde_json::Value>) -> Result<(), CoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let now = Utc::now();
        let session = sessions.entry(session_id.to_string()).or_insert_with(|| Session {
            session_id: session_id.to_string(),
            owner_id: None,
            file_ids: Vec::new(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        });
        session.messages.push(Message { role, content: content.to_string(), timestamp: Utc::now(), metadata });
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, CoreError> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .get(session_id)
            .map(|s| {
                let start = s.messages.len().saturating_sub(limit);
                s.messages[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, session_id: &str) -> Result<(), CoreError> {
        self.sessions.lock().unwrap().remove(session_id);
        Ok(())
    }
}

/// Always-miss by default so a test can exercise the "every `get` returns
/// absent" path from §4.7; call [`StubCachePort::new`] for a real TTL-free
/// in-memory cache instead.
pub struct StubCachePort {
    entries: Mutex<HashMap<(CacheKind, String), serde_json::Value>>,
    always_miss: bool,
}

impl StubCachePort {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()), always_miss: false }
    }

    pub fn always_miss() -> Self {
        Self { entries: Mutex::new(HashMap::new()), always_miss: true }
    }
}

#[async_trait]
impl CachePort for StubCachePort {
    async fn get(&self, kind: CacheKind, key: &str) -> Option<serde_json::Value> {
        if self.always_miss {
            return None;
        }
        self.entries.lock().unwrap().get(&(kind, key.to_string())).cloned()
    }

    async fn set(&self, kind: CacheKind, key: &str, value: serde_json::Value) {
        if self.always_miss {
            return;
        }
        self.entries.lock().unwrap().insert((kind, key.to_string()), value);
    }
}

/// Scripted LLM: `complete()` always returns `complete_response`, `stream()`
/// always yields `stream_tokens` one at a time.
pub struct StubLlmPort {
    complete_response: Result<String, String>,
    stream_tokens: Vec<String>,
}

impl StubLlmPort {
    pub fn new(complete_response: Result<String, String>, stream_tokens: Vec<String>) -> Self {
        Self { complete_response, stream_tokens }
    }
}

#[async_trait]
impl LlmPort for StubLlmPort {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, CoreError> {
        self.complete_response.clone().map_err(CoreError::LlmFailed)
    }

    async fn stream(&self, _messages: &[ChatMessage]) -> Result<TokenStream, CoreError> {
        let tokens = self.stream_tokens.clone();
        let stream = futures::stream::iter(tokens.into_iter().map(Ok));
        Ok(Box::pin(stream))
    }
}
