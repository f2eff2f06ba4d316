//! C3 — Relational Store Port, backed by `sqlx`'s SQLite driver.
//! Grounded on `the-snesler-spacebot`'s `memory/store.rs` and
//! `tasks/store.rs` (pool-held struct, `CREATE TABLE IF NOT EXISTS` on
//! `initialize`, row-to-struct helper functions).

use super::RelationalStorePort;
use crate::error::CoreError;
use crate::models::{ChunkRecord, FileRecord, IngestState};
use anyhow::Context as _;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

pub struct SqliteRelationalStore {
    pool: SqlitePool,
}

impl SqliteRelationalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                file_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                content_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                uploaded_at TIMESTAMP NOT NULL,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                ingest_state TEXT NOT NULL,
                vector_partition TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create files table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner_id)")
            .execute(&self.pool)
            .await
            .context("failed to create files owner index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT PRIMARY KEY,
                file_id TEXT NOT NULL,
                level INTEGER NOT NULL,
                level_index INTEGER NOT NULL,
                parent_chunk_id TEXT,
                content TEXT NOT NULL,
                token_count_estimate INTEGER NOT NULL,
                vector_id TEXT NOT NULL,
                FOREIGN KEY (file_id) REFERENCES files(file_id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create chunks table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_id)")
            .execute(&self.pool)
            .await
            .context("failed to create chunks file index")?;

        Ok(())
    }
}

fn ingest_state_str(state: IngestState) -> &'static str {
    match state {
        IngestState::Pending => "PENDING",
        IngestState::Completed => "COMPLETED",
        IngestState::Failed => "FAILED",
    }
}

fn parse_ingest_state(raw: &str) -> IngestState {
    match raw {
        "COMPLETED" => IngestState::Completed,
        "FAILED" => IngestState::Failed,
        _ => IngestState::Pending,
    }
}

fn row_to_file(row: &sqlx::sqlite::SqliteRow) -> Result<FileRecord, CoreError> {
    let state_raw: String = row
        .try_get("ingest_state")
        .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
    Ok(FileRecord {
        file_id: row.try_get("file_id").map_err(|e| CoreError::PersistenceFailed(e.to_string()))?,
        owner_id: row.try_get("owner_id").map_err(|e| CoreError::PersistenceFailed(e.to_string()))?,
        filename: row.try_get("filename").map_err(|e| CoreError::PersistenceFailed(e.to_string()))?,
        content_type: row
            .try_get("content_type")
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?,
        size_bytes: row.try_get("size_bytes").map_err(|e| CoreError::PersistenceFailed(e.to_string()))?,
        uploaded_at: row
            .try_get("uploaded_at")
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?,
        chunk_count: row
            .try_get("chunk_count")
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?,
        ingest_state: parse_ingest_state(&state_raw),
        vector_partition: row
            .try_get("vector_partition")
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?,
    })
}

#[async_trait]
impl RelationalStorePort for SqliteRelationalStore {
    async fn insert_file(&self, file: &FileRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO files (file_id, owner_id, filename, content_type, size_bytes,
                                uploaded_at, chunk_count, ingest_state, vector_partition)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.file_id)
        .bind(&file.owner_id)
        .bind(&file.filename)
        .bind(&file.content_type)
        .bind(file.size_bytes)
        .bind(file.uploaded_at)
        .bind(file.chunk_count)
        .bind(ingest_state_str(file.ingest_state))
        .bind(&file.vector_partition)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
        Ok(())
    }

    async fn update_ingest_state(
        &self,
        file_id: &str,
        state: IngestState,
        chunk_count: Option<i64>,
    ) -> Result<(), CoreError> {
        match chunk_count {
            Some(count) => {
                sqlx::query("UPDATE files SET ingest_state = ?, chunk_count = ? WHERE file_id = ?")
                    .bind(ingest_state_str(state))
                    .bind(count)
                    .bind(file_id)
                    .execute(&self.pool)
                    .await
            }
            None => {
                sqlx::query("UPDATE files SET ingest_state = ? WHERE file_id = ?")
                    .bind(ingest_state_str(state))
                    .bind(file_id)
                    .execute(&self.pool)
                    .await
            }
        }
        .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
        Ok(())
    }

    async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>, CoreError> {
        let row = sqlx::query("SELECT * FROM files WHERE file_id = ?")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
        row.as_ref().map(row_to_file).transpose()
    }

    async fn file_exists(&self, file_id: &str) -> Result<bool, CoreError> {
        let row = sqlx::query("SELECT 1 FROM files WHERE file_id = ?")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn list_files(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileRecord>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM files WHERE owner_id = ? ORDER BY uploaded_at DESC LIMIT ? OFFSET ?",
        )
        .bind(owner_id)
        .bind(limit.clamp(1, 500))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
        rows.iter().map(row_to_file).collect()
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), CoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;

        sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;

        sqlx::query("DELETE FROM files WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[ChunkRecord]) -> Result<(), CoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (chunk_id, file_id, level, level_index, parent_chunk_id,
                                     content, token_count_estimate, vector_id)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.file_id)
            .bind(chunk.level as i64)
            .bind(chunk.level_index)
            .bind(&chunk.parent_chunk_id)
            .bind(&chunk.content)
            .bind(chunk.token_count_estimate)
            .bind(&chunk.vector_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
        Ok(())
    }
}
