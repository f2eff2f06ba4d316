//! C1 — Embedding Port, backed by `rig-core`'s OpenAI-compatible embedding
//! client. Grounded on the teacher's `llm.rs::embed_with_openai`.

use super::EmbeddingPort;
use crate::config::AppConfig;
use crate::error::CoreError;
use async_trait::async_trait;
use rig::client::EmbeddingsClient as _;
use rig::embeddings::EmbeddingModel as _;
use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};
use tracing::warn;

pub struct RigEmbeddingAdapter {
    client: openai::Client,
    model_name: String,
}

impl RigEmbeddingAdapter {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let client = match &cfg.llm_api_key {
            Some(key) => openai::Client::builder(key)
                .base_url(&cfg.llm_base_url)
                .build()
                .unwrap_or_else(|_| openai::Client::from_env()),
            None => openai::Client::from_env(),
        };
        let model_name = if cfg.llm_embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL.to_string()
        } else {
            cfg.llm_embedding_model.clone()
        };
        Self { client, model_name }
    }
}

#[async_trait]
impl EmbeddingPort for RigEmbeddingAdapter {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        let vectors = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::EmbeddingFailed("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.client.embedding_model(&self.model_name);
        let embeddings = model.embed_texts(texts.to_vec()).await.map_err(|e| {
            warn!("embedding call failed: {e}");
            CoreError::EmbeddingFailed(e.to_string())
        })?;
        if embeddings.len() != texts.len() {
            return Err(CoreError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings
            .into_iter()
            .map(|e| e.vec.into_iter().map(|v| v as f32).collect())
            .collect())
    }
}
