//! HTTP surface: upload, file management and the chat pipeline (streaming
//! and non-streaming). Grounded on the teacher's `create_router` shape
//! (`#[axum::debug_handler]`, `Result<Json<T>, (StatusCode, Json<Value>)>`)
//! and on `the-snesler-spacebot`'s SSE handler for the streaming endpoint.

use crate::app_state::AppState;
use crate::error::CoreError;
use crate::events::Event;
use crate::ingest;
use crate::pipeline::{self, AskOptions};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const USER_ID_HEADER: &str = "x-user-id";

fn require_user_id(headers: &HeaderMap) -> Result<String, CoreError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::Validation(format!("missing {USER_ID_HEADER} header")))
}

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/v1/upload", post(upload_handler))
        .route("/v1/files", get(list_files_handler))
        .route("/v1/files/:file_id", delete(delete_file_handler))
        .route("/v1/chat", post(chat_handler))
        .route("/v1/chat/stream", post(chat_stream_handler))
        .route("/v1/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    file_id: String,
    chunk_count: usize,
    strategy: &'static str,
}

#[axum::debug_handler]
async fn upload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, CoreError> {
    let owner_id = require_user_id(&headers)?;

    let mut filename: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CoreError::Validation(format!("malformed multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().map(|s| s.to_string());
            bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| CoreError::Validation(format!("failed to read upload: {e}")))?
                    .to_vec(),
            );
        }
    }

    let filename = filename.ok_or_else(|| CoreError::Validation("missing filename on 'file' field".into()))?;
    let bytes = bytes.ok_or_else(|| CoreError::Validation("missing 'file' field".into()))?;

    let outcome = ingest::ingest(&state, &owner_id, &filename, &bytes).await?;
    Ok(Json(UploadResponse {
        file_id: outcome.file_id,
        chunk_count: outcome.chunk_count,
        strategy: outcome.strategy,
    }))
}

#[derive(Debug, Deserialize)]
struct ListFilesQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
struct FileSummary {
    file_id: String,
    filename: String,
    content_type: String,
    size_bytes: i64,
    uploaded_at: chrono::DateTime<chrono::Utc>,
    chunk_count: i64,
    ingest_state: crate::models::IngestState,
}

#[axum::debug_handler]
async fn list_files_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListFilesQuery>,
) -> Result<Json<Vec<FileSummary>>, CoreError> {
    let owner_id = require_user_id(&headers)?;
    let files = state
        .relational
        .list_files(&owner_id, query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(
        files
            .into_iter()
            .map(|f| FileSummary {
                file_id: f.file_id,
                filename: f.filename,
                content_type: f.content_type,
                size_bytes: f.size_bytes,
                uploaded_at: f.uploaded_at,
                chunk_count: f.chunk_count,
                ingest_state: f.ingest_state,
            })
            .collect(),
    ))
}

#[axum::debug_handler]
async fn delete_file_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(file_id): Path<String>,
) -> Result<StatusCode, CoreError> {
    let owner_id = require_user_id(&headers)?;
    let file = state
        .relational
        .get_file(&file_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("file {file_id} not found")))?;
    if file.owner_id != owner_id {
        return Err(CoreError::Forbidden(format!("file {file_id} is not owned by {owner_id}")));
    }

    state.vector_store.drop_partition(&file.vector_partition).await?;
    state.relational.delete_file(&file_id).await?;

    let extension = ingest::extension_of(&file.filename);
    let blob_path = ingest::upload_path(&state.config.upload_dir, &file_id, &extension);
    if let Err(e) = tokio::fs::remove_file(&blob_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove on-disk blob for {file_id}: {e}");
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    session_id: String,
    query: String,
    file_ids: Vec<String>,
    #[serde(default)]
    enable_expansion: Option<bool>,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    language: Option<String>,
}

impl ChatRequest {
    fn options(&self) -> AskOptions {
        let defaults = AskOptions::default();
        AskOptions {
            enable_expansion: self.enable_expansion.unwrap_or(defaults.enable_expansion),
            top_k: self.top_k.unwrap_or(defaults.top_k),
            language: self.language.clone().unwrap_or(defaults.language),
            cancellation: CancellationToken::new(),
        }
    }
}

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let owner_id = require_user_id(&headers).map_err(|e| (e.status(), Json(json!({"error": e.code(), "message": e.to_string()}))))?;
    let options = req.options();

    let result = pipeline::ask_blocking(state, req.session_id, req.query, req.file_ids, owner_id, options).await;
    match result {
        Ok(Event::Complete { answer, context_count, expanded_questions, truncated }) => Ok(Json(json!({
            "answer": answer,
            "context_count": context_count,
            "expanded_questions": expanded_questions,
            "truncated": truncated,
        }))),
        Ok(_) => unreachable!("ask_blocking only resolves Ok with a Complete event"),
        Err(Event::Error { code, message }) => {
            let status = match code.as_str() {
                "VALIDATION" => StatusCode::BAD_REQUEST,
                "FORBIDDEN" => StatusCode::FORBIDDEN,
                "LLM_FAILED" => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err((status, Json(json!({"error": code, "message": message}))))
        }
        Err(_) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "INTERNAL", "message": "unexpected pipeline outcome"})),
        )),
    }
}

#[axum::debug_handler]
async fn chat_stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, CoreError> {
    let owner_id = require_user_id(&headers)?;
    let options = req.options();

    let event_stream = pipeline::ask(state, req.session_id, req.query, req.file_ids, owner_id, options);
    let sse_stream = event_stream.map(|event| {
        let name = event.sse_event_name();
        let data = serde_json::to_string(&event).unwrap_or_else(|e| {
            warn!("failed to serialize event for SSE: {e}");
            json!({"error": "INTERNAL", "message": "event serialization failed"}).to_string()
        });
        Ok(SseEvent::default().event(name).data(data))
    });

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    let sender = state.shutdown_sender.lock().unwrap().take();
    match sender {
        Some(tx) => {
            let _ = tx.send(());
            (StatusCode::OK, Json(json!({"status": "shutting down"})))
        }
        None => (StatusCode::OK, Json(json!({"status": "shutdown already requested"}))),
    }
}
