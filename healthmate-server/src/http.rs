//! Healthmate HTTP API
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, serde_json::Value)`, so the logic is testable
//! without going through the router.
//!
//! Endpoints:
//! - GET  /health         liveness plus store and model names
//! - GET  /version        server version info
//! - GET  /greeting       dashboard greeting for the caller
//! - POST /session/start  open (or reuse) the caller's chat session
//! - POST /chat           one conversational turn
//! - POST /session/end    finalize the session, respond with the prescription PDF
//!
//! The caller's identity is read from a configured request header. Sign-in
//! itself lives in front of this service.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use healthmate_core::config::HttpConfig;
use healthmate_core::{
    ChatStore, CompletionBackend, DocumentStore, FsDocumentStore, HealthmateConfig, HealthmateError,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::error::ServiceError;
use crate::subsystems::{chat, lifecycle};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<dyn ChatStore>,
    pub completion: Arc<dyn CompletionBackend>,
    pub documents: Arc<dyn DocumentStore>,
    /// Header carrying the authenticated username.
    pub user_header: String,
}

impl HttpState {
    /// Wire the configured store, completion backend and document directory.
    pub async fn from_config(config: &HealthmateConfig) -> std::result::Result<Self, HealthmateError> {
        let store = healthmate_core::create_store(&config.database).await?;
        let completion = healthmate_core::create_backend(&config.completion)?;
        tokio::fs::create_dir_all(&config.documents.dir).await?;

        Ok(Self {
            store,
            completion,
            documents: Arc::new(FsDocumentStore::new(&config.documents.dir)),
            user_header: config.auth.user_header.clone(),
        })
    }
}

pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/greeting", get(greeting_handler))
        .route("/session/start", post(start_session_handler))
        .route("/chat", post(chat_handler))
        .route("/session/end", post(end_session_handler))
        .with_state(state)
}

/// Serve until the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: HttpState,
    config: &HttpConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(Arc::new(state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Healthmate HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Username from the identity header; missing or blank means unauthenticated.
pub fn caller_identity(headers: &HeaderMap, user_header: &str) -> Option<String> {
    headers
        .get(user_header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn error_body(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "status": "error",
        "message": message.into(),
    })
}

/// Map a pipeline failure to a response. Internal failures are logged in
/// full and the caller only sees `generic`.
pub fn error_response(err: &ServiceError, generic: &str) -> (StatusCode, serde_json::Value) {
    match err {
        ServiceError::Unauthenticated => (StatusCode::UNAUTHORIZED, error_body("Authentication required")),
        ServiceError::NoActiveSession { username } => {
            tracing::info!(username = %username, "No active session");
            (StatusCode::NOT_FOUND, error_body("No active chat session found"))
        }
        other => {
            tracing::error!(error = %error_chain(other), "{}", generic);
            (StatusCode::INTERNAL_SERVER_ERROR, error_body(generic))
        }
    }
}

/// `err` followed by each of its sources, joined with `: `.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "store": state.store.name(),
            "model": state.completion.model(),
        }),
    )
}

pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": "healthmate",
    })
}

pub async fn greeting_inner(state: &HttpState, username: Option<String>) -> (StatusCode, serde_json::Value) {
    let Some(username) = username else {
        return error_response(&ServiceError::Unauthenticated, "");
    };
    match chat::greeting(state.store.as_ref(), &username).await {
        Ok(initial_response) => (
            StatusCode::OK,
            serde_json::json!({ "initial_response": initial_response }),
        ),
        Err(e) => error_response(&e, "Unable to load greeting"),
    }
}

pub async fn start_session_inner(
    state: &HttpState,
    username: Option<String>,
) -> (StatusCode, serde_json::Value) {
    let Some(username) = username else {
        return error_response(&ServiceError::Unauthenticated, "");
    };
    match chat::start_session(state.store.as_ref(), &username).await {
        Ok(opened) => (
            StatusCode::OK,
            serde_json::json!({
                "session_id": opened.session.id,
                "created": opened.created,
            }),
        ),
        Err(e) => error_response(&e, "Unable to start chat session"),
    }
}

pub async fn chat_inner(
    state: &HttpState,
    username: Option<String>,
    req: ChatRequest,
) -> (StatusCode, serde_json::Value) {
    let Some(username) = username else {
        return error_response(&ServiceError::Unauthenticated, "");
    };
    let message = match req.message {
        Some(m) if !m.trim().is_empty() => m,
        _ => return (StatusCode::BAD_REQUEST, error_body("message field is required")),
    };

    match chat::chat_turn(
        state.store.as_ref(),
        state.completion.as_ref(),
        &username,
        &message,
    )
    .await
    {
        Ok(reply) => (
            StatusCode::OK,
            serde_json::json!({
                "response": reply.response,
                "initial_response": reply.initial_response,
            }),
        ),
        Err(e) => error_response(&e, "Unable to generate a response right now"),
    }
}

/// On success returns the document's filename and bytes. Nothing can fail
/// once the session end has been committed.
pub async fn end_session_inner(
    state: &HttpState,
    username: Option<String>,
) -> std::result::Result<(String, Vec<u8>), (StatusCode, serde_json::Value)> {
    let username = username.ok_or_else(|| error_response(&ServiceError::Unauthenticated, ""))?;
    const FAILURE: &str = "Failed to extract prescription details";

    let finalized = lifecycle::end_session_and_finalize(
        state.store.as_ref(),
        state.completion.as_ref(),
        state.documents.as_ref(),
        &username,
    )
    .await
    .map_err(|e| error_response(&e, FAILURE))?;

    Ok((finalized.filename, finalized.pdf))
}

// ============================================================================
// Axum handler wrappers
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state);
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn greeting_handler(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> impl IntoResponse {
    let username = caller_identity(&headers, &state.user_header);
    let (status, body) = greeting_inner(&state, username).await;
    (status, Json(body))
}

pub async fn start_session_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let username = caller_identity(&headers, &state.user_header);
    let (status, body) = start_session_inner(&state, username).await;
    (status, Json(body))
}

pub async fn chat_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> impl IntoResponse {
    let username = caller_identity(&headers, &state.user_header);
    let (status, body) = match payload {
        Ok(Json(req)) => chat_inner(&state, username, req).await,
        Err(_) if username.is_none() => error_response(&ServiceError::Unauthenticated, ""),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Rejected chat request body");
            (rejection.status(), error_body(rejection.body_text()))
        }
    };
    (status, Json(body))
}

pub async fn end_session_handler(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    let username = caller_identity(&headers, &state.user_header);
    match end_session_inner(&state, username).await {
        Ok((filename, bytes)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/pdf".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", filename),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err((status, body)) => (status, Json(body)).into_response(),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::testing::ScriptedCompletion;
    use axum::http::HeaderValue;
    use healthmate_core::config::{
        AuthConfig, CompletionConfig, DatabaseConfig, DocumentsConfig, ServiceConfig,
    };
    use healthmate_core::MemoryStore;

    fn state(dir: &std::path::Path, reply: &str) -> (HttpState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let state = HttpState {
            store: store.clone(),
            completion: Arc::new(ScriptedCompletion::replying(reply)),
            documents: Arc::new(FsDocumentStore::new(dir)),
            user_header: "x-healthmate-user".into(),
        };
        (state, store)
    }

    fn memory_config(dir: &std::path::Path, api_key_env: &str) -> HealthmateConfig {
        HealthmateConfig {
            service: ServiceConfig {
                log_level: "info".into(),
            },
            database: DatabaseConfig {
                backend: "memory".into(),
                url: String::new(),
                max_connections: 1,
            },
            completion: CompletionConfig {
                api_key_env: api_key_env.into(),
                ..CompletionConfig::default()
            },
            documents: DocumentsConfig {
                dir: dir.join("prescriptions").to_string_lossy().into_owned(),
            },
            http: HttpConfig::default(),
            auth: AuthConfig {
                user_header: "x-remote-user".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_state_from_config_wires_memory_store() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("HEALTHMATE_TEST_KEY_PRESENT", "gsk-test");
        let config = memory_config(dir.path(), "HEALTHMATE_TEST_KEY_PRESENT");

        let state = HttpState::from_config(&config).await.unwrap();

        assert_eq!(state.store.name(), "memory");
        assert_eq!(state.completion.model(), "llama3-8b-8192");
        assert_eq!(state.user_header, "x-remote-user");
        assert!(dir.path().join("prescriptions").is_dir());
    }

    #[tokio::test]
    async fn test_state_from_config_requires_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let config = memory_config(dir.path(), "HEALTHMATE_TEST_KEY_NEVER_SET");

        let err = HttpState::from_config(&config).await.err().unwrap();
        assert!(matches!(err, HealthmateError::Completion(_)));
    }

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string());
        assert_eq!(v["service"], "healthmate");
    }

    #[test]
    fn test_caller_identity_requires_non_blank_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(caller_identity(&headers, "x-healthmate-user"), None);

        headers.insert("x-healthmate-user", HeaderValue::from_static("   "));
        assert_eq!(caller_identity(&headers, "x-healthmate-user"), None);

        headers.insert("x-healthmate-user", HeaderValue::from_static(" alice "));
        assert_eq!(
            caller_identity(&headers, "x-healthmate-user").as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn test_error_response_hides_internal_detail() {
        let err = ServiceError::Persistence(healthmate_core::StoreError::Unavailable(
            "connection refused to 10.0.0.3".into(),
        ));
        let (status, body) = error_response(&err, "Failed to extract prescription details");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Failed to extract prescription details");
        assert!(!body.to_string().contains("10.0.0.3"));
    }

    #[test]
    fn test_error_chain_walks_every_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "disk is read-only");
        let err = ServiceError::Document(healthmate_core::DocumentError::Io(io));
        assert_eq!(
            error_chain(&err),
            "Document failure: IO error: disk is read-only: IO error: disk is read-only: disk is read-only"
        );
    }

    /// Saves to disk but can never read a document back.
    struct WriteOnlyDocuments(FsDocumentStore);

    #[async_trait::async_trait]
    impl DocumentStore for WriteOnlyDocuments {
        async fn save(
            &self,
            filename: &str,
            bytes: &[u8],
        ) -> std::result::Result<healthmate_core::DocumentHandle, healthmate_core::DocumentError> {
            self.0.save(filename, bytes).await
        }

        async fn open(
            &self,
            _handle: &healthmate_core::DocumentHandle,
        ) -> std::result::Result<Vec<u8>, healthmate_core::DocumentError> {
            Err(healthmate_core::DocumentError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "unreadable",
            )))
        }

        async fn discard(
            &self,
            handle: &healthmate_core::DocumentHandle,
        ) -> std::result::Result<(), healthmate_core::DocumentError> {
            self.0.discard(handle).await
        }
    }

    #[tokio::test]
    async fn test_end_session_inner_serves_rendered_bytes_without_reading_back() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, store) = state(dir.path(), r#"{"HealthIssue":"cold"}"#);
        state.documents = Arc::new(WriteOnlyDocuments(FsDocumentStore::new(dir.path())));
        start_session_inner(&state, Some("erin".into())).await;

        let (_, bytes) = end_session_inner(&state, Some("erin".into())).await.unwrap();

        assert!(bytes.starts_with(b"%PDF"));
        assert!(store.current_session("erin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_health_inner_reports_collaborators() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state(dir.path(), "ok");
        let (status, body) = health_inner(&state);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["store"], "memory");
        assert_eq!(body["model"], "scripted");
    }

    #[tokio::test]
    async fn test_chat_inner_rejects_anonymous_and_blank_message() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state(dir.path(), "ok");

        let (status, body) = chat_inner(&state, None, ChatRequest { message: Some("hi".into()) }).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], "error");

        let (status, _) = chat_inner(&state, Some("alice".into()), ChatRequest { message: Some("  ".into()) }).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_chat_inner_returns_both_texts() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state(dir.path(), "Rest and fluids.");

        let (status, body) = chat_inner(
            &state,
            Some("alice".into()),
            ChatRequest {
                message: Some("I have a cold".into()),
            },
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "Rest and fluids.");
        assert_eq!(body["initial_response"], "Hi alice, how are you feeling today?");
    }

    #[tokio::test]
    async fn test_end_session_inner_without_session_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (state, store) = state(dir.path(), "{}");

        let (status, body) = end_session_inner(&state, Some("bob".into())).await.unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
        assert!(store.sessions_of("bob").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_end_session_inner_persistence_failure_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let (state, store) = state(dir.path(), r#"{"HealthIssue":"cold"}"#);
        start_session_inner(&state, Some("carol".into())).await;
        store.inject_finalize_failure();

        let (status, body) = end_session_inner(&state, Some("carol".into())).await.unwrap_err();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Failed to extract prescription details");
        assert!(store.current_session("carol").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_end_session_inner_returns_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = state(dir.path(), r#"{"HealthIssue":"cold"}"#);
        start_session_inner(&state, Some("dave".into())).await;

        let (filename, bytes) = end_session_inner(&state, Some("dave".into())).await.unwrap();
        assert!(filename.starts_with("dave_prescription_"));
        assert!(filename.ends_with(".pdf"));
        assert!(bytes.starts_with(b"%PDF"));
    }
}
