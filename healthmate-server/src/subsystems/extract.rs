//! Prescription extraction from a finished conversation.
//!
//! The whole conversation is sent to the model with an instruction demanding
//! a bare JSON object. The reply is cut to its outermost braces (a missing closing
//! brace is appended) and parsed. Output
//! that still does not parse yields a fixed fallback record, so callers only
//! see an error when the completion call itself fails.

use healthmate_core::{ChatMessage, ChatTurn, CompletionBackend, CompletionError, PrescriptionRecord};
use thiserror::Error;

use crate::subsystems::conversation::history_turns;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Completion unavailable: {0}")]
    CompletionUnavailable(#[from] CompletionError),
}

/// Model output that could not be turned into a record.
#[derive(Error, Debug)]
#[error("Malformed completion: {0}")]
pub struct MalformedCompletion(String);

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionSource {
    Parsed,
    Fallback { reason: String },
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub record: PrescriptionRecord,
    /// Exactly what was sent: the extraction instruction, then the conversation.
    pub messages: Vec<ChatTurn>,
    pub source: ExtractionSource,
}

impl Extraction {
    /// The conversation turns without the leading instruction.
    pub fn conversation(&self) -> &[ChatTurn] {
        self.messages.get(1..).unwrap_or(&[])
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.source, ExtractionSource::Fallback { .. })
    }
}

pub fn extraction_instruction(username: &str) -> String {
    format!(
        r#"Write a prescription for this conversation: identify the health issue, list the symptoms, specify the medicines prescribed and give lifestyle advice. Reply with one well-formed JSON object and nothing else: no introduction, no explanation. Use exactly this format:
{{
"Username": "{}",
"HealthIssue": "",
"Symptoms": [],
"MedicinesPrescribed": [],
"LifestyleAdvice": ""
}}"#,
        username
    )
}

/// Cut a model reply down to its JSON object: the span from the first `{` to
/// the last `}`. An object with no closing brace after it gets one appended.
pub fn sanitize_completion(raw: &str) -> String {
    let text = raw.trim();
    let Some(start) = text.find('{') else {
        return text.to_string();
    };
    match text.rfind('}') {
        Some(end) if end > start => text[start..=end].to_string(),
        _ => format!("{}}}", &text[start..]),
    }
}

/// Parse a reply. `Username` is always replaced by `username`.
///
/// The sanitized span is tried first; a reply that does not end in `}` is
/// retried with the brace appended, which covers an unterminated object
/// whose nested values are closed.
pub fn parse_prescription(raw: &str, username: &str) -> Result<PrescriptionRecord, MalformedCompletion> {
    let trimmed = raw.trim();
    let mut value = parse_object(&sanitize_completion(trimmed));
    if value.is_err() && !trimmed.ends_with('}') {
        if let Some(start) = trimmed.find('{') {
            value = parse_object(&format!("{}}}", &trimmed[start..]));
        }
    }
    let mut record: PrescriptionRecord =
        serde_json::from_value(value?).map_err(|e| MalformedCompletion(e.to_string()))?;
    record.username = username.to_string();
    Ok(record)
}

fn parse_object(text: &str) -> Result<serde_json::Value, MalformedCompletion> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| MalformedCompletion(e.to_string()))?;
    if !value.is_object() {
        return Err(MalformedCompletion("expected a JSON object".to_string()));
    }
    Ok(value)
}

/// Run extraction over a session's stored messages.
pub async fn extract(
    completion: &dyn CompletionBackend,
    username: &str,
    session_messages: &[ChatMessage],
) -> Result<Extraction, ExtractionError> {
    let mut messages = Vec::with_capacity(session_messages.len() + 1);
    messages.push(ChatTurn::system(extraction_instruction(username)));
    messages.extend(history_turns(session_messages));

    let raw = completion.complete(&messages).await?;
    tracing::debug!(username, chars = raw.len(), "Prescription completion received");

    match parse_prescription(&raw, username) {
        Ok(record) => {
            tracing::info!(username, health_issue = %record.health_issue, "Prescription extracted");
            Ok(Extraction {
                record,
                messages,
                source: ExtractionSource::Parsed,
            })
        }
        Err(e) => {
            tracing::warn!(username, error = %e, "Unparseable prescription, using fallback");
            Ok(Extraction {
                record: PrescriptionRecord::fallback(username),
                messages,
                source: ExtractionSource::Fallback {
                    reason: e.to_string(),
                },
            })
        }
    }
}
