//! Session end: extract, render, save, then commit record, transcript and
//! close in one store transaction.

use chrono::{DateTime, Utc};
use healthmate_core::{
    ChatStore, CompletionBackend, DocumentHandle, DocumentStore, PrescriptionRecord,
    SessionFinalization,
};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::subsystems::{extract, render};

#[derive(Debug, Clone)]
pub struct FinalizedSession {
    pub session_id: Uuid,
    pub handle: DocumentHandle,
    pub filename: String,
    /// The rendered PDF, as saved under `handle`.
    pub pdf: Vec<u8>,
    pub record: PrescriptionRecord,
    /// True when the model output was unusable and the fallback record was stored.
    pub fallback: bool,
}

/// `{username}_prescription_{YYYYMMDD_HHMMSS}.pdf`, with anything outside
/// `[A-Za-z0-9_-]` in the username replaced by `_`.
pub fn prescription_filename(username: &str, at: DateTime<Utc>) -> String {
    let mut safe: String = username
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if safe.is_empty() {
        safe.push_str("user");
    }
    format!("{}_prescription_{}.pdf", safe, at.format("%Y%m%d_%H%M%S"))
}

pub async fn end_session_and_finalize(
    store: &dyn ChatStore,
    completion: &dyn CompletionBackend,
    documents: &dyn DocumentStore,
    username: &str,
) -> Result<FinalizedSession, ServiceError> {
    let session = store
        .current_session(username)
        .await?
        .ok_or_else(|| ServiceError::NoActiveSession {
            username: username.to_string(),
        })?;

    let messages = store.list_messages(session.id).await?;
    let extraction = extract::extract(completion, username, &messages).await?;

    let bytes = render::render_pdf(&extraction.record)?;
    let now = Utc::now();
    let filename = prescription_filename(username, now);
    let handle = documents.save(&filename, &bytes).await?;

    let finalization = SessionFinalization {
        session_id: session.id,
        record: extraction.record.clone(),
        transcript: extraction.conversation().to_vec(),
        ended_at: now,
    };

    if let Err(e) = store.finalize_session(finalization).await {
        if let Err(discard_err) = documents.discard(&handle).await {
            tracing::warn!(
                path = %handle.path.display(),
                error = %discard_err,
                "Failed to discard document after aborted session end"
            );
        }
        return Err(e.into());
    }

    tracing::info!(
        session_id = %session.id,
        username,
        filename = %filename,
        fallback = extraction.is_fallback(),
        "Session ended with prescription"
    );

    Ok(FinalizedSession {
        session_id: session.id,
        handle,
        filename,
        pdf: bytes,
        fallback: extraction.is_fallback(),
        record: extraction.record,
    })
}
