pub mod completion;
pub mod config;
pub mod db;
pub mod documents;
pub mod error;
pub mod models;
pub mod store;

pub use completion::{
    create_backend, CompletionBackend, CompletionError, GroqCompletionClient, RetryingCompletion,
};
pub use config::HealthmateConfig;
pub use documents::{DocumentError, DocumentHandle, DocumentStore, FsDocumentStore};
pub use error::HealthmateError;
pub use models::{
    ChatMessage, ChatSession, ChatTurn, LifestyleAdvice, MedicineEntry, MessageKind,
    OpenedSession, PrescriptionRecord, Role,
};
pub use store::{create_store, ChatStore, MemoryStore, PgStore, SessionFinalization, StoreError};
