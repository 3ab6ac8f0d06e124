use thiserror::Error;

/// Startup failures: configuration, connections, collaborators.
#[derive(Error, Debug)]
pub enum HealthmateError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Completion error: {0}")]
    Completion(#[from] crate::completion::CompletionError),

    #[error("Document error: {0}")]
    Document(#[from] crate::documents::DocumentError),
}
