//! Retrieval Engine (C8, §4.2): query expansion, cached embedding + vector
//! search fan-out across sub-questions, merge/rank/dedupe.

use crate::app_state::AppState;
use crate::models::{CacheKind, ChatMessage, ChatRole, QueryExpansion, RetrievedChunk, VectorHit};
use futures::future::join_all;
use sha2::{Digest, Sha256};
use tracing::warn;

fn hash_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    hasher
        .finalize()
        .iter()
        .take(16)
        .map(|b| format!("{b:02x}"))
        .collect()
}

const EXPANSION_SYSTEM_PROMPT: &str = "Expand the user's question into a compact JSON object with keys \
\"original_query\", \"intent\", and \"sub_questions\" (an array of 1 to N paraphrased questions). \
Respond with JSON only, no prose.";

/// Best-effort query expansion: a cache hit or a well-formed LLM response
/// returns multiple sub-questions; anything else degrades to `[query]`.
pub async fn expand_query(state: &AppState, query: &str) -> QueryExpansion {
    let cache_key = hash_key(&["qexp", query]);
    if let Some(cached) = state.cache.get(CacheKind::Expansion, &cache_key).await {
        if let Ok(expansion) = serde_json::from_value::<QueryExpansion>(cached) {
            return expansion;
        }
    }

    let fallback = QueryExpansion {
        original_query: query.to_string(),
        intent: "unknown".to_string(),
        sub_questions: vec![query.to_string()],
    };

    let messages = vec![
        ChatMessage { role: ChatRole::System, content: EXPANSION_SYSTEM_PROMPT.to_string() },
        ChatMessage { role: ChatRole::User, content: query.to_string() },
    ];

    let raw = match state.llm.complete(&messages).await {
        Ok(text) => text,
        Err(e) => {
            warn!("query expansion LLM call failed, falling back to literal query: {e}");
            return fallback;
        }
    };

    let json_slice = raw.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```");
    let mut expansion = match serde_json::from_str::<QueryExpansion>(json_slice) {
        Ok(mut parsed) => {
            if parsed.sub_questions.is_empty() {
                parsed.sub_questions.push(query.to_string());
            }
            parsed.sub_questions.truncate(state.config.expansion_count);
            parsed
        }
        Err(e) => {
            warn!("query expansion returned malformed JSON, falling back: {e}");
            fallback
        }
    };
    expansion.original_query = query.to_string();

    if let Ok(value) = serde_json::to_value(&expansion) {
        state.cache.set(CacheKind::Expansion, &cache_key, value).await;
    }
    expansion
}

async fn embed_cached(state: &AppState, text: &str) -> Result<Vec<f32>, crate::error::CoreError> {
    let cache_key = hash_key(&["emb", text]);
    if let Some(cached) = state.cache.get(CacheKind::Embedding, &cache_key).await {
        if let Ok(vector) = serde_json::from_value::<Vec<f32>>(cached) {
            return Ok(vector);
        }
    }
    let vector = state.embedding.embed(text).await?;
    if let Ok(value) = serde_json::to_value(&vector) {
        state.cache.set(CacheKind::Embedding, &cache_key, value).await;
    }
    Ok(vector)
}

async fn search_sub_question(
    state: &AppState,
    sub_question: &str,
    file_ids: &[String],
    k: usize,
) -> Vec<VectorHit> {
    let mut sorted_ids = file_ids.to_vec();
    sorted_ids.sort();
    let cache_key = hash_key(&["search", sub_question, &sorted_ids.join(","), &k.to_string()]);

    if let Some(cached) = state.cache.get(CacheKind::SearchResults, &cache_key).await {
        if let Ok(hits) = serde_json::from_value::<Vec<CachedHit>>(cached) {
            return hits.into_iter().map(CachedHit::into_hit).collect();
        }
    }

    let hits = async {
        let vector = embed_cached(state, sub_question).await?;
        let partitions: Vec<String> = file_ids.iter().map(|id| format!("file_{id}")).collect();
        state.vector_store.search(&partitions, vector, k).await
    }
    .await
    .unwrap_or_else(|e| {
        warn!("search fan-out failed for sub-question {sub_question:?}: {e}");
        Vec::new()
    });

    if !hits.is_empty() {
        let cacheable: Vec<CachedHit> = hits.iter().cloned().map(CachedHit::from_hit).collect();
        if let Ok(value) = serde_json::to_value(&cacheable) {
            state.cache.set(CacheKind::SearchResults, &cache_key, value).await;
        }
    }
    hits
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CachedHit {
    file_id: String,
    level_index: i64,
    content: String,
    score: f64,
}

impl CachedHit {
    fn from_hit(hit: VectorHit) -> Self {
        Self { file_id: hit.file_id, level_index: hit.level_index, content: hit.content, score: hit.score }
    }
    fn into_hit(self) -> VectorHit {
        VectorHit { file_id: self.file_id, level_index: self.level_index, content: self.content, score: self.score }
    }
}

/// `retrieve(query, sub_questions, file_ids, k)` (§4.2). Fans out over the
/// original query plus every paraphrase `sub_questions` carries — "for each
/// sub-question Q_i (including the original)" — deduped so a paraphrase
/// identical to the original query isn't searched twice. `sub_questions` is
/// expected to already be the result of a single upstream `expand_query` call
/// (or `&[]` when expansion is disabled); this function does not call it.
pub async fn retrieve(
    state: &AppState,
    query: &str,
    sub_questions: &[String],
    file_ids: &[String],
    k: usize,
) -> Vec<RetrievedChunk> {
    let mut fan_out: Vec<String> = vec![query.to_string()];
    for q in sub_questions {
        if !fan_out.contains(q) {
            fan_out.push(q.clone());
        }
    }

    let futures = fan_out
        .iter()
        .map(|q| search_sub_question(state, q, file_ids, k));
    let results: Vec<Vec<VectorHit>> = join_all(futures).await;

    let mut seen_content = std::collections::HashSet::new();
    let mut merged: Vec<RetrievedChunk> = Vec::new();
    for hits in results {
        for hit in hits {
            if seen_content.insert(hit.content.clone()) {
                merged.push(RetrievedChunk {
                    content: hit.content,
                    score: hit.score,
                    file_id: hit.file_id,
                    level_index: hit.level_index,
                });
            }
        }
    }

    merged.sort_by(|a, b| {
        a.score
            .partial_cmp(&b.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (a.file_id.as_str(), a.level_index).cmp(&(b.file_id.as_str(), b.level_index)))
    });
    merged.truncate(k);

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::AppState;
    use crate::error::CoreError;
    use crate::ports::{EmbeddingPort, VectorStorePort};
    use crate::test_support::{
        test_config, StubCachePort, StubLlmPort, StubRelationalStorePort, StubSessionStorePort, StubVectorStorePort,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Wraps a deterministic embedder to count `embed` calls, so tests can
    /// assert how many distinct texts a fan-out actually searched.
    struct CountingEmbeddingPort {
        dim: usize,
        calls: AtomicUsize,
    }

    impl CountingEmbeddingPort {
        fn new(dim: usize) -> Self {
            Self { dim, calls: AtomicUsize::new(0) }
        }

        fn vector_for(&self, text: &str) -> Vec<f32> {
            let mut v = vec![0f32; self.dim];
            for (i, b) in text.bytes().enumerate() {
                v[i % self.dim] += b as f32;
            }
            v
        }
    }

    #[async_trait]
    impl EmbeddingPort for CountingEmbeddingPort {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.vector_for(text))
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
            self.calls.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| self.vector_for(t)).collect())
        }
    }

    fn test_state(embedding: Arc<CountingEmbeddingPort>) -> AppState {
        AppState {
            config: test_config(),
            embedding,
            vector_store: Arc::new(StubVectorStorePort::new()),
            relational: Arc::new(StubRelationalStorePort::new()),
            session_store: Arc::new(StubSessionStorePort::new()),
            cache: Arc::new(StubCachePort::always_miss()),
            llm: Arc::new(StubLlmPort::new(Ok(String::new()), Vec::new())),
            shutdown_sender: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    #[tokio::test]
    async fn retrieve_always_searches_the_original_query_even_when_absent_from_sub_questions() {
        let embedding = Arc::new(CountingEmbeddingPort::new(16));
        let state = test_state(embedding.clone());
        let sub_questions = vec!["a completely distinct paraphrase".to_string()];

        let _ = retrieve(&state, "what is the refund policy?", &sub_questions, &["f1".to_string()], 5).await;

        // Original query + one distinct paraphrase: two distinct texts embedded.
        assert_eq!(embedding.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retrieve_dedupes_sub_question_identical_to_original_query() {
        let embedding = Arc::new(CountingEmbeddingPort::new(16));
        let state = test_state(embedding.clone());
        let query = "what is the refund policy?".to_string();
        let sub_questions = vec![query.clone()];

        let _ = retrieve(&state, &query, &sub_questions, &["f1".to_string()], 5).await;

        // The paraphrase duplicates the original verbatim, so only one text is embedded.
        assert_eq!(embedding.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retrieve_truncates_merged_hits_to_k() {
        let embedding = Arc::new(CountingEmbeddingPort::new(16));
        let state = test_state(embedding.clone());
        state.vector_store.ensure_partition("file_f1").await.unwrap();
        let points = (0..5)
            .map(|i| crate::models::VectorPoint {
                vector_id: format!("v{i}"),
                level_index: i,
                content: format!("chunk-{i}"),
                embedding: vec![i as f32; 16],
                inserted_at: chrono::Utc::now(),
            })
            .collect();
        state.vector_store.insert("file_f1", points).await.unwrap();

        let hits = retrieve(&state, "query", &[], &["f1".to_string()], 2).await;
        assert_eq!(hits.len(), 2);
    }

    fn hit(file_id: &str, level_index: i64, content: &str, score: f64) -> VectorHit {
        VectorHit { file_id: file_id.to_string(), level_index, content: content.to_string(), score }
    }

    #[test]
    fn dedup_and_sort_matches_contract() {
        let mut seen = std::collections::HashSet::new();
        // First occurrence of "dup" wins (score 0.1); "unique" arrives once.
        let raw = vec![
            hit("fileA", 2, "dup", 0.1),
            hit("fileA", 0, "dup", 0.5),
            hit("fileB", 1, "unique", 0.2),
        ];
        let mut merged: Vec<RetrievedChunk> = Vec::new();
        for h in raw {
            if seen.insert(h.content.clone()) {
                merged.push(RetrievedChunk { content: h.content, score: h.score, file_id: h.file_id, level_index: h.level_index });
            }
        }
        merged.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap());
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].content, "dup");
        assert_eq!(merged[0].score, 0.1);
        assert_eq!(merged[1].content, "unique");
        assert_eq!(merged[1].score, 0.2);
    }

}
