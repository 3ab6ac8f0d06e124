use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ChatStore, SessionFinalization, StoreError};
use crate::models::{
    ChatMessage, ChatSession, ChatTurn, LifestyleAdvice, MedicineEntry, MessageKind,
    OpenedSession, PrescriptionRecord,
};

/// Postgres-backed store. Relies on the schema from `db::ensure_schema`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Whether the user has any session other than `except`.
    async fn has_other_session(&self, username: &str, except: Uuid) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM chat_sessions WHERE username = $1 AND id <> $2)",
        )
        .bind(username)
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    session_id: Uuid,
    kind: String,
    chat: Json<Vec<ChatTurn>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let kind: MessageKind = row.kind.parse().map_err(StoreError::Corrupt)?;
        Ok(ChatMessage {
            id: row.id,
            session_id: row.session_id,
            kind,
            chat: row.chat.0,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PrescriptionRow {
    username: String,
    health_issue: String,
    symptoms: Json<Vec<String>>,
    medicines_prescribed: Json<Vec<MedicineEntry>>,
    lifestyle_advice: Json<LifestyleAdvice>,
    updated_at: DateTime<Utc>,
}

impl From<PrescriptionRow> for PrescriptionRecord {
    fn from(row: PrescriptionRow) -> Self {
        PrescriptionRecord {
            username: row.username,
            health_issue: row.health_issue,
            symptoms: row.symptoms.0,
            medicines_prescribed: row.medicines_prescribed.0,
            lifestyle_advice: row.lifestyle_advice.0,
            updated_at: Some(row.updated_at),
        }
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn open_session(&self, username: &str) -> Result<OpenedSession, StoreError> {
        if let Some(session) = self.current_session(username).await? {
            let returning = self.has_other_session(username, session.id).await?;
            return Ok(OpenedSession {
                session,
                created: false,
                returning,
            });
        }

        let candidate = ChatSession::new(username);
        let returning = self.has_other_session(username, candidate.id).await?;

        // The partial unique index turns a concurrent insert into a no-op.
        let inserted: Option<ChatSession> = sqlx::query_as(
            r#"
            INSERT INTO chat_sessions (id, username, started_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (username) WHERE ended_at IS NULL DO NOTHING
            RETURNING id, username, started_at, ended_at
            "#,
        )
        .bind(candidate.id)
        .bind(&candidate.username)
        .bind(candidate.started_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(session) => {
                tracing::info!(session_id = %session.id, username, "Opened chat session");
                Ok(OpenedSession {
                    session,
                    created: true,
                    returning,
                })
            }
            None => {
                let session = self.current_session(username).await?.ok_or_else(|| {
                    StoreError::Unavailable("open session disappeared during creation".into())
                })?;
                let returning = self.has_other_session(username, session.id).await?;
                Ok(OpenedSession {
                    session,
                    created: false,
                    returning,
                })
            }
        }
    }

    async fn current_session(&self, username: &str) -> Result<Option<ChatSession>, StoreError> {
        let session = sqlx::query_as(
            r#"
            SELECT id, username, started_at, ended_at
            FROM chat_sessions
            WHERE username = $1 AND ended_at IS NULL
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, session_id, kind, chat, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(message.kind.as_str())
        .bind(Json(&message.chat))
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessage>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, kind, chat, created_at
            FROM chat_messages
            WHERE session_id = $1
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    async fn last_message_at(&self, username: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let latest: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MAX(m.created_at)
            FROM chat_messages m
            JOIN chat_sessions s ON s.id = m.session_id
            WHERE s.username = $1
            "#,
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(latest)
    }

    async fn close_session(
        &self,
        session_id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<ChatSession, StoreError> {
        let closed: Option<ChatSession> = sqlx::query_as(
            r#"
            UPDATE chat_sessions SET ended_at = $2
            WHERE id = $1 AND ended_at IS NULL
            RETURNING id, username, started_at, ended_at
            "#,
        )
        .bind(session_id)
        .bind(ended_at)
        .fetch_optional(&self.pool)
        .await?;

        match closed {
            Some(session) => Ok(session),
            None => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM chat_sessions WHERE id = $1)")
                        .bind(session_id)
                        .fetch_one(&self.pool)
                        .await?;
                if exists {
                    Err(StoreError::SessionClosed(session_id))
                } else {
                    Err(StoreError::SessionNotFound(session_id))
                }
            }
        }
    }

    async fn prescription(&self, username: &str) -> Result<Option<PrescriptionRecord>, StoreError> {
        let row: Option<PrescriptionRow> = sqlx::query_as(
            r#"
            SELECT username, health_issue, symptoms, medicines_prescribed,
                   lifestyle_advice, updated_at
            FROM prescriptions
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PrescriptionRecord::from))
    }

    async fn finalize_session(&self, finalization: SessionFinalization) -> Result<(), StoreError> {
        let SessionFinalization {
            session_id,
            record,
            transcript,
            ended_at,
        } = finalization;

        let mut tx = self.pool.begin().await?;

        // 1. Upsert the prescription keyed by owner
        sqlx::query(
            r#"
            INSERT INTO prescriptions
                (username, health_issue, symptoms, medicines_prescribed, lifestyle_advice)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (username) DO UPDATE SET
                health_issue = EXCLUDED.health_issue,
                symptoms = EXCLUDED.symptoms,
                medicines_prescribed = EXCLUDED.medicines_prescribed,
                lifestyle_advice = EXCLUDED.lifestyle_advice,
                updated_at = now()
            "#,
        )
        .bind(&record.username)
        .bind(&record.health_issue)
        .bind(Json(&record.symptoms))
        .bind(Json(&record.medicines_prescribed))
        .bind(Json(&record.lifestyle_advice))
        .execute(&mut *tx)
        .await?;

        // 2. Archive the conversation as one combined transcript
        let archived = ChatMessage::transcript(session_id, transcript);
        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, session_id, kind, chat, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(archived.id)
        .bind(archived.session_id)
        .bind(archived.kind.as_str())
        .bind(Json(&archived.chat))
        .bind(archived.created_at)
        .execute(&mut *tx)
        .await?;

        // 3. Close the session; losing a race with another close aborts everything
        let closed = sqlx::query(
            "UPDATE chat_sessions SET ended_at = $2 WHERE id = $1 AND ended_at IS NULL",
        )
        .bind(session_id)
        .bind(ended_at)
        .execute(&mut *tx)
        .await?;

        if closed.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::SessionClosed(session_id));
        }

        tx.commit().await?;

        tracing::info!(
            session_id = %session_id,
            username = %record.username,
            "Session finalized"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
