use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Speaker of a turn. `System` covers both the assistant's replies and
/// instructions addressed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Exactly one turn.
    Turn,
    /// Combined transcript written when a session is finalized.
    Transcript,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Turn => "turn",
            MessageKind::Transcript => "transcript",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "turn" => Ok(MessageKind::Turn),
            "transcript" => Ok(MessageKind::Transcript),
            other => Err(format!("unknown message kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub kind: MessageKind,
    pub chat: Vec<ChatTurn>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn turn(session_id: Uuid, turn: ChatTurn) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            kind: MessageKind::Turn,
            chat: vec![turn],
            created_at: Utc::now(),
        }
    }

    pub fn transcript(session_id: Uuid, turns: Vec<ChatTurn>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            kind: MessageKind::Transcript,
            chat: turns,
            created_at: Utc::now(),
        }
    }

    /// The single turn of a `Turn` message; `None` for transcripts.
    pub fn as_turn(&self) -> Option<&ChatTurn> {
        match self.kind {
            MessageKind::Turn => self.chat.first(),
            MessageKind::Transcript => None,
        }
    }
}
