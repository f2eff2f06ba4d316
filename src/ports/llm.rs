//! C6 — LLM Port, backed by `rig-core`'s OpenAI-compatible chat client.
//! Grounded on the teacher's `llm.rs::answer_with_openai`, extended with a
//! streaming variant for Phase 4 (§4.4).

use super::{LlmPort, TokenStream};
use crate::config::AppConfig;
use crate::error::CoreError;
use crate::models::{ChatMessage, ChatRole};
use async_trait::async_trait;
use futures::StreamExt;
use rig::client::CompletionClient as _;
use rig::providers::openai;
use rig::streaming::StreamingPrompt as _;
use tracing::warn;

pub struct RigLlmAdapter {
    client: openai::Client,
    model_name: String,
}

impl RigLlmAdapter {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let client = match &cfg.llm_api_key {
            Some(key) => openai::Client::builder(key)
                .base_url(&cfg.llm_base_url)
                .build()
                .unwrap_or_else(|_| openai::Client::from_env()),
            None => openai::Client::from_env(),
        };
        let model_name = if cfg.llm_chat_model.is_empty() {
            "gpt-4o-mini".to_string()
        } else {
            cfg.llm_chat_model.clone()
        };
        Self { client, model_name }
    }

    /// Splits an assembled message list into (preamble, transcript, final user prompt) —
    /// `rig`'s `agent` builder takes a single system preamble and a single prompt string,
    /// so every message but the last user turn is folded into the context string.
    fn split(messages: &[ChatMessage]) -> (String, String, String) {
        let mut preamble = String::new();
        let mut transcript = String::new();
        let mut last_user = String::new();

        for (idx, msg) in messages.iter().enumerate() {
            match msg.role {
                ChatRole::System => {
                    if !preamble.is_empty() {
                        preamble.push('\n');
                    }
                    preamble.push_str(&msg.content);
                }
                ChatRole::User if idx == messages.len() - 1 => {
                    last_user = msg.content.clone();
                }
                ChatRole::User => {
                    transcript.push_str("User: ");
                    transcript.push_str(&msg.content);
                    transcript.push('\n');
                }
                ChatRole::Assistant => {
                    transcript.push_str("Assistant: ");
                    transcript.push_str(&msg.content);
                    transcript.push('\n');
                }
            }
        }

        if last_user.is_empty() {
            // Defensive: assembled message lists always end in a user turn (§4.3),
            // but an empty fallback keeps this adapter total rather than panicking.
            last_user = transcript.clone();
        }

        (preamble, transcript, last_user)
    }
}

#[async_trait]
impl LlmPort for RigLlmAdapter {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CoreError> {
        let (preamble, transcript, prompt) = Self::split(messages);
        let agent = self
            .client
            .agent(&self.model_name)
            .preamble(&preamble)
            .context(&transcript)
            .build();

        agent
            .prompt(prompt)
            .await
            .map_err(|e| CoreError::LlmFailed(e.to_string()))
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, CoreError> {
        let (preamble, transcript, prompt) = Self::split(messages);
        let agent = self
            .client
            .agent(&self.model_name)
            .preamble(&preamble)
            .context(&transcript)
            .build();

        let response = agent
            .stream_prompt(prompt)
            .await
            .map_err(|e| CoreError::LlmFailed(e.to_string()))?;

        let stream = response.map(|chunk| match chunk {
            Ok(delta) => Ok(delta.to_string()),
            Err(e) => {
                warn!("llm stream chunk error: {e}");
                Err(CoreError::LlmFailed(e.to_string()))
            }
        });

        Ok(Box::pin(stream))
    }
}
