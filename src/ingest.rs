//! Ingest Engine (C7, §4.1): validates an uploaded file, extracts its text,
//! chunks it, embeds and indexes the chunks, and records file/chunk rows.
//! Grounded on the teacher's `ingest.rs` pipeline shape (extract → chunk →
//! embed → persist) and on the original's `input_data_handle_service.py`
//! (`validate_file`, `extract_text_from_*`, `generate_unique_file_id`).

use crate::app_state::AppState;
use crate::chunking::{self, RawChunk};
use crate::config::ChunkingStrategy;
use crate::error::CoreError;
use crate::models::{ChunkRecord, FileRecord, IngestState, VectorPoint};
use chrono::Utc;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

const MAX_ID_COLLISION_RETRIES: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub file_id: String,
    pub chunk_count: usize,
    pub strategy: &'static str,
}

fn owner_id_is_valid(owner_id: &str) -> bool {
    !owner_id.is_empty()
        && owner_id.len() <= 256
        && owner_id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | ':'))
}

pub fn extension_of(filename: &str) -> String {
    filename.rsplit('.').next().unwrap_or("").to_lowercase()
}

/// `{upload_dir}/{file_id}.{ext}` (§6 Persisted layout).
pub fn upload_path(upload_dir: &str, file_id: &str, extension: &str) -> std::path::PathBuf {
    std::path::Path::new(upload_dir).join(format!("{file_id}.{extension}"))
}

fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "txt" => "text/plain",
        "md" => "text/markdown",
        _ => "application/octet-stream",
    }
}

fn random_hex(n_bytes: usize) -> String {
    let mut buf = vec![0u8; n_bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

fn candidate_file_id(bytes: &[u8]) -> String {
    let timestamp = Utc::now().timestamp();
    let random_part = random_hex(4);
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let content_hash = hasher.finalize();
    let hash_part = content_hash.iter().take(4).map(|b| format!("{b:02x}")).collect::<String>();
    format!("file_{timestamp:010}_{random_part}_{hash_part}")
}

async fn generate_unique_file_id(state: &AppState, bytes: &[u8]) -> Result<String, CoreError> {
    for attempt in 0..MAX_ID_COLLISION_RETRIES {
        let candidate = candidate_file_id(bytes);
        if !state.relational.file_exists(&candidate).await? {
            return Ok(candidate);
        }
        warn!(attempt, candidate, "file_id collision, retrying");
    }
    Err(CoreError::Internal(
        "failed to allocate a unique file_id after bounded retries".into(),
    ))
}

fn extract_text(extension: &str, bytes: &[u8]) -> Result<String, CoreError> {
    match extension {
        "pdf" => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| CoreError::ExtractionFailed(format!("pdf extraction failed: {e}"))),
        "docx" => extract_docx_text(bytes),
        "txt" | "md" => Ok(String::from_utf8(bytes.to_vec())
            .unwrap_or_else(|_| bytes.iter().map(|&b| b as char).collect())),
        other => Err(CoreError::Validation(format!("unsupported extension: {other}"))),
    }
}

fn extract_docx_text(bytes: &[u8]) -> Result<String, CoreError> {
    let docx = docx_rs::read_docx(bytes)
        .map_err(|e| CoreError::ExtractionFailed(format!("docx extraction failed: {e}")))?;

    let mut paragraphs = Vec::new();
    for child in &docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(p) = child {
            let mut text = String::new();
            for pc in &p.children {
                if let docx_rs::ParagraphChild::Run(run) = pc {
                    for rc in &run.children {
                        if let docx_rs::RunChild::Text(t) = rc {
                            text.push_str(&t.text);
                        }
                    }
                }
            }
            let text = text.trim();
            if !text.is_empty() {
                paragraphs.push(text.to_string());
            }
        }
    }
    Ok(paragraphs.join("\n\n"))
}

/// Validates, extracts, chunks, embeds, indexes and records an uploaded
/// file. Failures before the `File` row exists surface `VALIDATION`
/// directly; failures after it exists flip `ingest_state` to `FAILED`
/// rather than leaving it `PENDING` forever.
pub async fn ingest(
    state: &AppState,
    owner_id: &str,
    filename: &str,
    bytes: &[u8],
) -> Result<IngestOutcome, CoreError> {
    if !owner_id_is_valid(owner_id) {
        return Err(CoreError::Validation(format!("invalid owner_id shape: {owner_id:?}")));
    }

    let extension = extension_of(filename);
    if !state.config.allowed_extensions.contains(&extension) {
        return Err(CoreError::Validation(format!(
            "unsupported file type '{extension}'; allowed: {}",
            state.config.allowed_extensions.join(", ")
        )));
    }
    if bytes.is_empty() {
        return Err(CoreError::Validation("file is empty".into()));
    }
    if bytes.len() as i64 > state.config.max_file_size_bytes {
        return Err(CoreError::Validation(format!(
            "file too large: {} bytes (max {})",
            bytes.len(),
            state.config.max_file_size_bytes
        )));
    }

    let file_id = generate_unique_file_id(state, bytes).await?;
    let partition = FileRecord::partition_name(&file_id);

    let file_row = FileRecord {
        file_id: file_id.clone(),
        owner_id: owner_id.to_string(),
        filename: filename.to_string(),
        content_type: content_type_for(&extension).to_string(),
        size_bytes: bytes.len() as i64,
        uploaded_at: Utc::now(),
        chunk_count: 0,
        ingest_state: IngestState::Pending,
        vector_partition: partition.clone(),
    };
    state.relational.insert_file(&file_row).await?;

    match ingest_body(state, &file_id, &partition, &extension, bytes).await {
        Ok(outcome) => {
            state
                .relational
                .update_ingest_state(&file_id, IngestState::Completed, Some(outcome.chunk_count as i64))
                .await?;
            info!(file_id, chunk_count = outcome.chunk_count, "ingest completed");
            Ok(outcome)
        }
        Err(err) => {
            state
                .relational
                .update_ingest_state(&file_id, IngestState::Failed, None)
                .await
                .ok();
            Err(err)
        }
    }
}

async fn ingest_body(
    state: &AppState,
    file_id: &str,
    partition: &str,
    extension: &str,
    bytes: &[u8],
) -> Result<IngestOutcome, CoreError> {
    tokio::fs::create_dir_all(&state.config.upload_dir)
        .await
        .map_err(|e| CoreError::PersistenceFailed(format!("failed to create upload directory: {e}")))?;
    let blob_path = upload_path(&state.config.upload_dir, file_id, extension);
    tokio::fs::write(&blob_path, bytes)
        .await
        .map_err(|e| CoreError::PersistenceFailed(format!("failed to persist uploaded blob: {e}")))?;

    let text = extract_text(extension, bytes)?;
    if text.trim().is_empty() {
        return Err(CoreError::ExtractionFailed("extracted corpus is whitespace-only".into()));
    }

    let strategy = state.config.chunking.strategy;
    let raw_chunks: Vec<RawChunk> = match strategy {
        ChunkingStrategy::Hierarchical => chunking::chunk_hierarchical(&text, &state.config.chunking),
        ChunkingStrategy::Recursive => chunking::chunk_recursive(&text, &state.config.chunking),
    };
    if raw_chunks.is_empty() {
        return Err(CoreError::ExtractionFailed("no chunks produced from extracted text".into()));
    }

    let contents: Vec<String> = raw_chunks.iter().map(|c| c.content.clone()).collect();
    let embeddings = state.embedding.embed_batch(&contents).await?;

    state.vector_store.ensure_partition(partition).await?;

    let mut vector_points = Vec::with_capacity(raw_chunks.len());
    let mut chunk_records = Vec::with_capacity(raw_chunks.len());
    let mut by_level_id: Vec<Vec<String>> = vec![Vec::new(); 3];

    for (raw, embedding) in raw_chunks.iter().zip(embeddings.into_iter()) {
        let chunk_id = uuid::Uuid::new_v4().to_string();
        let vector_id = format!("{chunk_id}:v");

        vector_points.push(VectorPoint {
            vector_id: vector_id.clone(),
            level_index: raw.level_index,
            content: raw.content.clone(),
            embedding,
            inserted_at: Utc::now(),
        });

        let parent_chunk_id = raw
            .parent_index
            .and_then(|idx| by_level_id[(raw.level.as_u8() as usize).saturating_sub(1)].get(idx as usize).cloned());

        chunk_records.push(ChunkRecord {
            chunk_id: chunk_id.clone(),
            file_id: file_id.to_string(),
            level: raw.level.as_u8(),
            level_index: raw.level_index,
            parent_chunk_id,
            content: raw.content.clone(),
            token_count_estimate: estimate_tokens(&raw.content),
            vector_id,
        });

        by_level_id[raw.level.as_u8() as usize].push(chunk_id);
    }

    state.vector_store.insert(partition, vector_points).await?;
    state.relational.insert_chunks(&chunk_records).await?;

    Ok(IngestOutcome {
        file_id: file_id.to_string(),
        chunk_count: chunk_records.len(),
        strategy: match strategy {
            ChunkingStrategy::Hierarchical => "hierarchical",
            ChunkingStrategy::Recursive => "recursive",
        },
    })
}

fn estimate_tokens(text: &str) -> i64 {
    use tiktoken_rs::cl100k_base;
    cl100k_base()
        .map(|bpe| bpe.encode_ordinary(text).len() as i64)
        .unwrap_or_else(|_| (text.len() / 4) as i64)
}
