use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatSession {
    pub id: Uuid,
    pub username: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ChatSession {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Result of looking up (or opening) the caller's active session.
#[derive(Debug, Clone)]
pub struct OpenedSession {
    pub session: ChatSession,
    /// The session was created by this call.
    pub created: bool,
    /// The user has at least one session other than this one.
    pub returning: bool,
}

impl OpenedSession {
    /// First-time user: this is the only session they have ever had.
    pub fn is_new_user(&self) -> bool {
        !self.returning
    }
}
