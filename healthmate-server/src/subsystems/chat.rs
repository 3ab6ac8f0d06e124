//! One conversational turn, plus the session-start and greeting entry points.

use chrono::Utc;
use healthmate_core::{ChatStore, CompletionBackend, OpenedSession, Role};
use serde::Serialize;

use crate::error::ServiceError;
use crate::subsystems::{conversation, prompt};

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub initial_response: String,
}

pub async fn chat_turn(
    store: &dyn ChatStore,
    completion: &dyn CompletionBackend,
    username: &str,
    utterance: &str,
) -> Result<ChatReply, ServiceError> {
    let opened = conversation::get_or_create_open_session(store, username).await?;
    let is_new_user = opened.is_new_user();

    // Read before this turn's message lands, so the gap covers the previous visit.
    let last_visit = store.last_message_at(username).await?;
    let initial_response = prompt::generate_initial_response(username, is_new_user, last_visit, Utc::now());

    let prior = if is_new_user {
        None
    } else {
        store.prescription(username).await?
    };
    let stored = conversation::list_messages(store, &opened.session).await?;
    let history = conversation::history_turns(&stored);

    conversation::append_message(store, &opened.session, Role::User, utterance).await?;

    let instruction = prompt::system_instruction(is_new_user, prior.as_ref());
    let messages = prompt::compose_messages(instruction, history, utterance);
    let response = completion.complete(&messages).await?;

    conversation::append_message(store, &opened.session, Role::System, response.as_str()).await?;

    tracing::debug!(
        session_id = %opened.session.id,
        username,
        history = messages.len() - 2,
        "Chat turn completed"
    );

    Ok(ChatReply {
        response,
        initial_response,
    })
}

pub async fn start_session(store: &dyn ChatStore, username: &str) -> Result<OpenedSession, ServiceError> {
    conversation::get_or_create_open_session(store, username).await
}

/// Dashboard greeting. Does not open a session.
pub async fn greeting(store: &dyn ChatStore, username: &str) -> Result<String, ServiceError> {
    let last_visit = store.last_message_at(username).await?;
    Ok(prompt::generate_initial_response(
        username,
        last_visit.is_none(),
        last_visit,
        Utc::now(),
    ))
}
