use healthmate_core::{CompletionError, DocumentError, StoreError};
use thiserror::Error;

/// Failures of the conversation pipeline. Malformed model output never
/// appears here: the extractor recovers from it with a fallback record.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("No authenticated user")]
    Unauthenticated,

    #[error("No active chat session for {username}")]
    NoActiveSession { username: String },

    #[error("Completion unavailable: {0}")]
    CompletionUnavailable(#[from] CompletionError),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("Document failure: {0}")]
    Document(#[from] DocumentError),
}

impl From<crate::subsystems::extract::ExtractionError> for ServiceError {
    fn from(e: crate::subsystems::extract::ExtractionError) -> Self {
        match e {
            crate::subsystems::extract::ExtractionError::CompletionUnavailable(inner) => {
                ServiceError::CompletionUnavailable(inner)
            }
        }
    }
}
