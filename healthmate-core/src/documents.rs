//! Storage for rendered prescription documents.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Render error: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid document name '{0}'")]
    InvalidName(String),
}

/// A stored document that can be streamed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHandle {
    pub filename: String,
    pub path: PathBuf,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn save(&self, filename: &str, bytes: &[u8]) -> Result<DocumentHandle, DocumentError>;

    async fn open(&self, handle: &DocumentHandle) -> Result<Vec<u8>, DocumentError>;

    /// Remove a document whose surrounding operation was rolled back.
    async fn discard(&self, handle: &DocumentHandle) -> Result<(), DocumentError>;
}

/// Writes documents as plain files under one directory.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    dir: PathBuf,
}

impl FsDocumentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn save(&self, filename: &str, bytes: &[u8]) -> Result<DocumentHandle, DocumentError> {
        if filename.is_empty() || filename.contains(['/', '\\']) || filename.starts_with('.') {
            return Err(DocumentError::InvalidName(filename.to_string()));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(filename);
        tokio::fs::write(&path, bytes).await?;

        tracing::info!(path = %path.display(), bytes = bytes.len(), "Document saved");
        Ok(DocumentHandle {
            filename: filename.to_string(),
            path,
        })
    }

    async fn open(&self, handle: &DocumentHandle) -> Result<Vec<u8>, DocumentError> {
        Ok(tokio::fs::read(&handle.path).await?)
    }

    async fn discard(&self, handle: &DocumentHandle) -> Result<(), DocumentError> {
        match tokio::fs::remove_file(&handle.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_open_discard() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path().join("prescription"));

        let handle = store.save("alice_prescription.pdf", b"%PDF-1.3").await.unwrap();
        assert_eq!(handle.filename, "alice_prescription.pdf");
        assert_eq!(store.open(&handle).await.unwrap(), b"%PDF-1.3");

        store.discard(&handle).await.unwrap();
        assert!(!handle.path.exists());
        // Second discard is a no-op
        store.discard(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());

        for name in ["../escape.pdf", "a/b.pdf", "", ".hidden"] {
            let result = store.save(name, b"x").await;
            assert!(matches!(result, Err(DocumentError::InvalidName(_))), "{}", name);
        }
    }
}
