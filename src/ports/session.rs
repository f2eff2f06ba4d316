//! C4 — Session Store Port, backed by `redb`. `redb`'s API is synchronous,
//! so every operation is dispatched through `spawn_blocking`; a per-session
//! mutex registry serializes read-modify-write append sequences on the same
//! session without blocking unrelated sessions.

use super::SessionStorePort;
use crate::error::CoreError;
use crate::models::{Message, Role, Session};
use async_trait::async_trait;
use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex as AsyncMutex;

const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

pub struct RedbSessionStore {
    db: Arc<Database>,
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RedbSessionStore {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let db = Database::create(path)?;
        {
            let tx = db.begin_write()?;
            tx.open_table(SESSIONS)?;
            tx.commit()?;
        }
        Ok(Self {
            db: Arc::new(db),
            locks: StdMutex::new(HashMap::new()),
        })
    }

    fn lock_for(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .expect("session lock registry mutex poisoned")
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn read_session(db: &Database, session_id: &str) -> Result<Option<Session>, CoreError> {
        let tx = db
            .begin_read()
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
        let table = tx
            .open_table(SESSIONS)
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
        let Some(value) = table
            .get(session_id)
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?
        else {
            return Ok(None);
        };
        let session: Session = serde_json::from_slice(value.value())
            .map_err(|e| CoreError::PersistenceFailed(format!("corrupt session record: {e}")))?;
        Ok(Some(session))
    }

    fn write_session(db: &Database, session: &Session) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(session)
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
        let tx = db
            .begin_write()
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
        {
            let mut table = tx
                .open_table(SESSIONS)
                .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
            table
                .insert(session.session_id.as_str(), bytes.as_slice())
                .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStorePort for RedbSessionStore {
    async fn create_if_absent(
        &self,
        session_id: &str,
        owner_id: Option<&str>,
        file_ids: &[String],
    ) -> Result<(), CoreError> {
        let db = self.db.clone();
        let session_id = session_id.to_string();
        let owner_id = owner_id.map(str::to_string);
        let file_ids = file_ids.to_vec();
        let lock = self.lock_for(&session_id);
        let _guard = lock.lock().await;

        tokio::task::spawn_blocking(move || -> Result<(), CoreError> {
            if Self::read_session(&db, &session_id)?.is_some() {
                return Ok(());
            }
            let now = Utc::now();
            let session = Session {
                session_id,
                owner_id,
                file_ids,
                created_at: now,
                updated_at: now,
                messages: Vec::new(),
            };
            Self::write_session(&db, &session)
        })
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?
    }

    /// Appending to a session_id with no prior record creates it implicitly
    /// (§4.6), with no owner and no associated files.
    async fn append(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), CoreError> {
        let db = self.db.clone();
        let session_id = session_id.to_string();
        let content = content.to_string();
        let lock = self.lock_for(&session_id);
        let _guard = lock.lock().await;

        tokio::task::spawn_blocking(move || -> Result<(), CoreError> {
            let now = Utc::now();
            let mut session = Self::read_session(&db, &session_id)?.unwrap_or_else(|| Session {
                session_id: session_id.clone(),
                owner_id: None,
                file_ids: Vec::new(),
                created_at: now,
                updated_at: now,
                messages: Vec::new(),
            });
            session.messages.push(Message {
                role,
                content,
                timestamp: Utc::now(),
                metadata,
            });
            session.updated_at = Utc::now();
            Self::write_session(&db, &session)
        })
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?
    }

    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, CoreError> {
        let db = self.db.clone();
        let session_id = session_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<Message>, CoreError> {
            let Some(session) = Self::read_session(&db, &session_id)? else {
                return Ok(Vec::new());
            };
            let start = session.messages.len().saturating_sub(limit);
            Ok(session.messages[start..].to_vec())
        })
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?
    }

    async fn delete(&self, session_id: &str) -> Result<(), CoreError> {
        let db = self.db.clone();
        let session_id = session_id.to_string();
        let lock = self.lock_for(&session_id);
        let _guard = lock.lock().await;

        tokio::task::spawn_blocking(move || -> Result<(), CoreError> {
            let tx = db
                .begin_write()
                .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
            {
                let mut table = tx
                    .open_table(SESSIONS)
                    .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
                table
                    .remove(session_id.as_str())
                    .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
            }
            tx.commit()
                .map_err(|e| CoreError::PersistenceFailed(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?
    }
}
