//! Test doubles shared by the subsystem tests.

use std::sync::Mutex;

use async_trait::async_trait;
use healthmate_core::{ChatTurn, CompletionBackend, CompletionError};

/// Returns a canned reply and remembers what it was sent.
pub(crate) struct ScriptedCompletion {
    reply: Result<String, String>,
    pub(crate) seen: Mutex<Vec<Vec<ChatTurn>>>,
}

impl ScriptedCompletion {
    pub(crate) fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CompletionBackend for ScriptedCompletion {
    async fn complete(&self, messages: &[ChatTurn]) -> Result<String, CompletionError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        self.reply.clone().map_err(|message| CompletionError::Api { code: 503, message })
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
