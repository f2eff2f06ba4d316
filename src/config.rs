//! Typed application configuration (§6, §9). All fields have explicit
//! defaults; a recognized variable that fails to parse is a startup error
//! rather than a silent fallback. Unrecognized variables are ignored.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ChunkingConfig {
    pub strategy: ChunkingStrategy,
    pub hierarchical_sizes: [usize; 3],
    pub hierarchical_overlap: usize,
    pub recursive_size: usize,
    pub recursive_overlap: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkingStrategy {
    Hierarchical,
    Recursive,
}

#[derive(Clone, Debug)]
pub struct CacheTtls {
    pub embedding: Duration,
    pub expansion: Duration,
    pub search_results: Duration,
    pub file_metadata: Duration,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub cors_origins: Vec<String>,

    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_chat_model: String,
    pub llm_embedding_model: String,

    pub lancedb_uri: String,
    pub sqlite_path: String,
    pub redb_path: String,

    pub upload_dir: String,
    pub max_file_size_bytes: i64,
    pub allowed_extensions: Vec<String>,

    pub chunking: ChunkingConfig,
    pub expansion_count: usize,
    pub cache_ttls: CacheTtls,
    pub max_context_tokens: usize,
    pub history_message_limit: usize,
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

fn env_usize_list(key: &str, default: [usize; 3]) -> Result<[usize; 3]> {
    match env::var(key) {
        Ok(raw) => {
            let parts: Vec<usize> = raw
                .split(',')
                .map(|s| s.trim().parse::<usize>())
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("invalid {key}={raw:?}"))?;
            if parts.len() != 3 {
                anyhow::bail!("{key} must have exactly 3 comma-separated sizes, got {raw:?}");
            }
            Ok([parts[0], parts[1], parts[2]])
        }
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let strategy = match env_string("CHUNKING_STRATEGY", "hierarchical").as_str() {
            "recursive" => ChunkingStrategy::Recursive,
            _ => ChunkingStrategy::Hierarchical,
        };

        Ok(Self {
            server_addr: env_string("SERVER_ADDR", "127.0.0.1:3322"),
            cors_origins: env_list("CORS_ORIGINS", &["*"]),

            llm_base_url: env_string("LLM_BASE_URL", "http://localhost:11434/v1"),
            llm_api_key: env::var("LLM_API_KEY").ok(),
            llm_chat_model: env_string("LLM_CHAT_MODEL", "gpt-4o-mini"),
            llm_embedding_model: env_string("LLM_EMBEDDING_MODEL", "text-embedding-3-small"),

            lancedb_uri: env_string("LANCEDB_URI", "./data/vectors.lance"),
            sqlite_path: env_string("SQLITE_PATH", "./data/docai.db"),
            redb_path: env_string("REDB_PATH", "./data/sessions.redb"),

            upload_dir: env_string("UPLOAD_DIR", "./uploadfiles"),
            max_file_size_bytes: env_parsed("MAX_FILE_SIZE_BYTES", 50_000_000i64)?,
            allowed_extensions: env_list("ALLOWED_EXTENSIONS", &["pdf", "docx", "txt", "md"]),

            chunking: ChunkingConfig {
                strategy,
                hierarchical_sizes: env_usize_list("HIERARCHICAL_CHUNK_SIZES", [2000, 1000, 500])?,
                hierarchical_overlap: env_parsed("HIERARCHICAL_OVERLAP", 100usize)?,
                recursive_size: env_parsed("RECURSIVE_CHUNK_SIZE", 1000usize)?,
                recursive_overlap: env_parsed("RECURSIVE_CHUNK_OVERLAP", 200usize)?,
            },
            expansion_count: env_parsed("EXPANSION_COUNT", 3usize)?,
            cache_ttls: CacheTtls {
                embedding: Duration::from_secs(env_parsed("CACHE_TTL_EMBEDDING_SECS", 86_400u64)?),
                expansion: Duration::from_secs(env_parsed("CACHE_TTL_EXPANSION_SECS", 3_600u64)?),
                search_results: Duration::from_secs(env_parsed(
                    "CACHE_TTL_SEARCH_SECS",
                    1_800u64,
                )?),
                file_metadata: Duration::from_secs(env_parsed(
                    "CACHE_TTL_FILE_META_SECS",
                    21_600u64,
                )?),
            },
            max_context_tokens: env_parsed("MAX_CONTEXT_TOKENS", 8_000usize)?,
            history_message_limit: env_parsed("HISTORY_MESSAGE_LIMIT", 10usize)?,
        })
    }
}
