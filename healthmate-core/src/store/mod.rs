//! Persistence for sessions, messages and prescriptions.
//!
//! `ChatStore` is the seam between the conversation pipeline and the storage
//! engine. Two implementations:
//! - **postgres**: `PgStore`, sqlx over Postgres (production)
//! - **memory**: `MemoryStore`, a mutex-guarded in-process store (dev, tests)

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{ChatMessage, ChatSession, ChatTurn, OpenedSession, PrescriptionRecord};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Session {0} not found")]
    SessionNotFound(Uuid),

    #[error("Session {0} is already closed")]
    SessionClosed(Uuid),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Everything written when a session ends. Applied atomically: either all
/// three writes commit or none do.
#[derive(Debug, Clone)]
pub struct SessionFinalization {
    pub session_id: Uuid,
    /// Upserted, keyed by `record.username`.
    pub record: PrescriptionRecord,
    /// Appended to the session as one combined-transcript message.
    pub transcript: Vec<ChatTurn>,
    pub ended_at: DateTime<Utc>,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Return the user's open session, creating one if none is open.
    /// Must be atomic: concurrent callers for one user observe one session.
    async fn open_session(&self, username: &str) -> Result<OpenedSession, StoreError>;

    /// The user's open session, if any.
    async fn current_session(&self, username: &str) -> Result<Option<ChatSession>, StoreError>;

    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// Messages of a session, oldest first.
    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessage>, StoreError>;

    /// Timestamp of the user's most recent message across all sessions.
    async fn last_message_at(&self, username: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Set `ended_at` on an open session. Fails with `SessionClosed` if it
    /// was already closed.
    async fn close_session(
        &self,
        session_id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<ChatSession, StoreError>;

    async fn prescription(&self, username: &str) -> Result<Option<PrescriptionRecord>, StoreError>;

    /// Upsert the record, append the transcript and close the session in one
    /// transaction.
    async fn finalize_session(&self, finalization: SessionFinalization) -> Result<(), StoreError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Create the store selected by `database.backend`.
pub async fn create_store(config: &DatabaseConfig) -> Result<Arc<dyn ChatStore>, StoreError> {
    match config.backend.as_str() {
        "postgres" => {
            let pool = crate::db::create_pool(config).await?;
            crate::db::ensure_schema(&pool).await?;
            Ok(Arc::new(PgStore::new(pool)))
        }
        "memory" => {
            tracing::warn!("Using in-memory store; conversations are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        other => Err(StoreError::Unavailable(format!(
            "unknown store backend '{}'",
            other
        ))),
    }
}
