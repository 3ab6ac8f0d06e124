use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS chat_sessions (
        id UUID PRIMARY KEY,
        username TEXT NOT NULL,
        started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        ended_at TIMESTAMPTZ
    )
    "#,
    // At most one open session per user.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS chat_sessions_one_open_per_user
        ON chat_sessions (username) WHERE ended_at IS NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chat_messages (
        id UUID PRIMARY KEY,
        session_id UUID NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
        seq BIGSERIAL,
        kind TEXT NOT NULL,
        chat JSONB NOT NULL DEFAULT '[]'::jsonb,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS chat_messages_session_order
        ON chat_messages (session_id, created_at, seq)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS prescriptions (
        username TEXT PRIMARY KEY,
        health_issue TEXT NOT NULL DEFAULT '',
        symptoms JSONB NOT NULL DEFAULT '[]'::jsonb,
        medicines_prescribed JSONB NOT NULL DEFAULT '[]'::jsonb,
        lifestyle_advice JSONB NOT NULL DEFAULT '""'::jsonb,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

/// Create tables and indexes if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!("Database schema verified");
    Ok(())
}
