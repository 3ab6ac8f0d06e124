//! Conversation log: sessions and their append-only messages.

use chrono::Utc;
use healthmate_core::{ChatMessage, ChatSession, ChatStore, ChatTurn, OpenedSession, Role};

use crate::error::ServiceError;

/// Return the user's open session, opening a new one when none is open.
/// Closed sessions are never reused.
pub async fn get_or_create_open_session(
    store: &dyn ChatStore,
    username: &str,
) -> Result<OpenedSession, ServiceError> {
    let opened = store.open_session(username).await?;
    tracing::debug!(
        session_id = %opened.session.id,
        created = opened.created,
        returning = opened.returning,
        "Resolved chat session"
    );
    Ok(opened)
}

pub async fn append_message(
    store: &dyn ChatStore,
    session: &ChatSession,
    role: Role,
    content: impl Into<String>,
) -> Result<ChatMessage, ServiceError> {
    let message = ChatMessage::turn(
        session.id,
        ChatTurn {
            role,
            content: content.into(),
        },
    );
    store.append_message(&message).await?;
    Ok(message)
}

/// Append several turns collapsed into one combined-transcript message.
pub async fn append_transcript(
    store: &dyn ChatStore,
    session: &ChatSession,
    turns: Vec<ChatTurn>,
) -> Result<ChatMessage, ServiceError> {
    let message = ChatMessage::transcript(session.id, turns);
    store.append_message(&message).await?;
    Ok(message)
}

pub async fn list_messages(
    store: &dyn ChatStore,
    session: &ChatSession,
) -> Result<Vec<ChatMessage>, ServiceError> {
    Ok(store.list_messages(session.id).await?)
}

/// Close the user's open session.
pub async fn close(store: &dyn ChatStore, username: &str) -> Result<ChatSession, ServiceError> {
    let session = store
        .current_session(username)
        .await?
        .ok_or_else(|| ServiceError::NoActiveSession {
            username: username.to_string(),
        })?;
    let closed = store.close_session(session.id, Utc::now()).await?;
    tracing::info!(session_id = %closed.id, username, "Chat session closed");
    Ok(closed)
}

/// Project stored messages to the turns a model should see, oldest first.
/// Combined transcripts are archives and are skipped.
pub fn history_turns(messages: &[ChatMessage]) -> Vec<ChatTurn> {
    messages
        .iter()
        .filter_map(|m| m.as_turn().cloned())
        .collect()
}
