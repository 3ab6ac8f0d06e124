use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{ChatStore, SessionFinalization, StoreError};
use crate::models::{ChatMessage, ChatSession, OpenedSession, PrescriptionRecord};

#[derive(Debug, Default)]
struct MemoryState {
    sessions: Vec<ChatSession>,
    messages: Vec<ChatMessage>,
    prescriptions: HashMap<String, PrescriptionRecord>,
}

impl MemoryState {
    fn open_session_mut(&mut self, username: &str) -> Option<&mut ChatSession> {
        self.sessions
            .iter_mut()
            .rev()
            .find(|s| s.username == username && s.is_open())
    }
}

/// In-process store. A single lock covers every operation, which makes
/// `open_session` and `finalize_session` trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_next_finalize: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `finalize_session` call fail before writing anything.
    pub fn inject_finalize_failure(&self) {
        self.fail_next_finalize.store(true, Ordering::SeqCst);
    }

    /// All sessions of a user, oldest first.
    pub fn sessions_of(&self, username: &str) -> Result<Vec<ChatSession>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .sessions
            .iter()
            .filter(|s| s.username == username)
            .cloned()
            .collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn open_session(&self, username: &str) -> Result<OpenedSession, StoreError> {
        let mut state = self.lock()?;

        if let Some(session) = state.open_session_mut(username).map(|s| s.clone()) {
            let returning = state
                .sessions
                .iter()
                .any(|s| s.username == username && s.id != session.id);
            return Ok(OpenedSession {
                session,
                created: false,
                returning,
            });
        }

        let returning = state.sessions.iter().any(|s| s.username == username);
        let session = ChatSession::new(username);
        state.sessions.push(session.clone());
        tracing::info!(session_id = %session.id, username, "Opened chat session");

        Ok(OpenedSession {
            session,
            created: true,
            returning,
        })
    }

    async fn current_session(&self, username: &str) -> Result<Option<ChatSession>, StoreError> {
        let mut state = self.lock()?;
        Ok(state.open_session_mut(username).map(|s| s.clone()))
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if !state.sessions.iter().any(|s| s.id == message.session_id) {
            return Err(StoreError::SessionNotFound(message.session_id));
        }
        state.messages.push(message.clone());
        Ok(())
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessage>, StoreError> {
        let state = self.lock()?;
        let mut messages: Vec<ChatMessage> = state
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        // Stable: equal timestamps keep insertion order.
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn last_message_at(&self, username: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let state = self.lock()?;
        let owned: Vec<Uuid> = state
            .sessions
            .iter()
            .filter(|s| s.username == username)
            .map(|s| s.id)
            .collect();
        Ok(state
            .messages
            .iter()
            .filter(|m| owned.contains(&m.session_id))
            .map(|m| m.created_at)
            .max())
    }

    async fn close_session(
        &self,
        session_id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<ChatSession, StoreError> {
        let mut state = self.lock()?;
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or(StoreError::SessionNotFound(session_id))?;
        if !session.is_open() {
            return Err(StoreError::SessionClosed(session_id));
        }
        session.ended_at = Some(ended_at);
        Ok(session.clone())
    }

    async fn prescription(&self, username: &str) -> Result<Option<PrescriptionRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state.prescriptions.get(username).cloned())
    }

    async fn finalize_session(&self, finalization: SessionFinalization) -> Result<(), StoreError> {
        let mut state = self.lock()?;

        if self.fail_next_finalize.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected finalize failure".into()));
        }

        // Validate before the first write so a failure leaves nothing behind.
        let session = state
            .sessions
            .iter()
            .find(|s| s.id == finalization.session_id)
            .ok_or(StoreError::SessionNotFound(finalization.session_id))?;
        if !session.is_open() {
            return Err(StoreError::SessionClosed(finalization.session_id));
        }

        let SessionFinalization {
            session_id,
            mut record,
            transcript,
            ended_at,
        } = finalization;

        record.updated_at = Some(Utc::now());
        state.prescriptions.insert(record.username.clone(), record);
        state
            .messages
            .push(ChatMessage::transcript(session_id, transcript));
        if let Some(session) = state.sessions.iter_mut().find(|s| s.id == session_id) {
            session.ended_at = Some(ended_at);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
