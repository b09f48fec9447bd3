//! HTTP API
//!
//! JSON endpoints consumed by the chat UI.
//!
//! # Endpoints
//!
//! - POST /api/chat - Send a message, get a reply
//! - GET /api/conversations - List conversations, most recent first
//! - GET /api/conversations/:id - Full history of one conversation
//! - DELETE /api/conversations/:id - Forget a conversation
//! - POST /api/generate - Free-form text generation
//! - GET /api/health - Liveness and inference readiness

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use sdk::errors::{EngineError, ErrorKind};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::orchestrator::{
    ChatFailure, ChatOrchestrator, GenerateOptions, FALLBACK_RESPONSE, GENERIC_FAILURE_MESSAGE,
};

/// Version reported by the health endpoint
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// State shared across handlers
#[derive(Clone)]
struct ApiState {
    orchestrator: Arc<ChatOrchestrator>,
}

/// Routes without middleware
pub fn router(orchestrator: Arc<ChatOrchestrator>) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/conversations", get(list_conversations_handler))
        .route(
            "/api/conversations/:id",
            get(get_conversation_handler).delete(delete_conversation_handler),
        )
        .route("/api/generate", post(generate_handler))
        .route("/api/health", get(health_handler))
        .with_state(ApiState { orchestrator })
}

/// Routes with request tracing and CORS for `cors_origin` (`*` allows any)
pub fn app(orchestrator: Arc<ChatOrchestrator>, cors_origin: &str) -> Result<Router, EngineError> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    let cors = if cors_origin.trim() == "*" {
        cors.allow_origin(Any)
    } else {
        let origin = HeaderValue::from_str(cors_origin.trim()).map_err(|e| {
            EngineError::Config(format!("Invalid CORS origin '{}': {}", cors_origin, e))
        })?;
        cors.allow_origin(origin)
    };

    Ok(router(orchestrator)
        .layer(TraceLayer::new_for_http())
        .layer(cors))
}

/// Bind the configured address and serve until Ctrl-C or SIGTERM
pub async fn serve(config: &Config) -> Result<(), EngineError> {
    let orchestrator = Arc::new(ChatOrchestrator::from_config(config));
    if !orchestrator.is_ready() {
        tracing::warn!(
            program = %config.inference.program,
            working_dir = %config.inference.working_dir.display(),
            "Inference program not found; chat requests will fail until it is available"
        );
    }

    let app = app(orchestrator, &config.server.cors_origin)?;

    let address = config.server.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| EngineError::Config(format!("Failed to bind to {}: {}", address, e)))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        base_url = %config.server.base_url,
        "API server listening on http://{}",
        local_addr
    );
    serve_on(listener, app, shutdown_signal()).await
}

/// Serve `app` on an already-bound listener until `shutdown` resolves
pub async fn serve_on<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<(), EngineError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("API server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

/// Error responses of the API
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound,
    Failed { kind: ErrorKind, detail: String },
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidInput(message) => Self::BadRequest(message),
            EngineError::NotFound(_) => Self::NotFound,
            other => Self::Failed {
                kind: other.kind(),
                detail: other.detail(),
            },
        }
    }
}

impl From<ChatFailure> for ApiError {
    fn from(failure: ChatFailure) -> Self {
        failure.error.into()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(format!("Invalid JSON body: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Conversation not found" })),
            )
                .into_response(),
            Self::Failed { kind, detail } => {
                tracing::error!(%kind, %detail, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": GENERIC_FAILURE_MESSAGE,
                        "response": FALLBACK_RESPONSE,
                        "kind": kind,
                        "details": detail,
                    })),
                )
                    .into_response()
            }
        }
    }
}

/// Required, non-null string field
fn required_str<'a>(body: &'a Value, field: &str, message: &str) -> Result<&'a str, ApiError> {
    body.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::bad_request(message))
}

/// POST /api/chat
async fn chat_handler(
    State(state): State<ApiState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;

    let message = required_str(&body, "message", "Message is required")?;
    let conversation_id = body.get("conversation_id").and_then(Value::as_str);

    let reply = state.orchestrator.chat(message, conversation_id).await?;

    Ok(Json(json!({
        "response": reply.response,
        "conversation_id": reply.conversation_id,
        "mode": reply.mode,
        "generation_time": reply.generation_time_ms,
        "timestamp": reply.timestamp,
    })))
}

/// GET /api/conversations
async fn list_conversations_handler(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({ "conversations": state.orchestrator.conversations() }))
}

/// GET /api/conversations/:id
async fn get_conversation_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let history = state.orchestrator.conversation(&id)?;

    Ok(Json(json!({
        "conversation_id": id,
        "message_count": history.len(),
        "history": history,
    })))
}

/// DELETE /api/conversations/:id
async fn delete_conversation_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.orchestrator.delete_conversation(&id)?;
    tracing::info!(conversation_id = %id, "Conversation deleted");

    Ok(Json(json!({
        "message": "Conversation deleted",
        "conversation_id": id,
    })))
}

/// POST /api/generate
async fn generate_handler(
    State(state): State<ApiState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;

    let prompt = required_str(&body, "prompt", "Prompt is required")?;

    let max_length = match body.get("max_length") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| ApiError::bad_request("max_length must be a positive integer"))?,
        ),
    };

    let temperature = match body.get("temperature") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_f64()
                .ok_or_else(|| ApiError::bad_request("temperature must be a number"))?
                as f32,
        ),
    };

    let reply = state
        .orchestrator
        .generate(GenerateOptions {
            prompt: prompt.to_string(),
            max_length,
            temperature,
        })
        .await?;

    Ok(Json(json!({
        "generated_text": reply.generated_text,
        "generation_time": reply.generation_time_ms,
        "timestamp": reply.timestamp,
    })))
}

/// GET /api/health
async fn health_handler(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "ai_ready": state.orchestrator.is_ready(),
        "timestamp": Utc::now(),
        "version": VERSION,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_errors_become_generic_500() {
        let err: ApiError = EngineError::ProcessFailure {
            exit_code: Some(1),
            stderr: "boom".to_string(),
        }
        .into();

        match &err {
            ApiError::Failed { kind, detail } => {
                assert_eq!(*kind, ErrorKind::ProcessFailure);
                assert!(detail.contains("boom"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_caller_errors_keep_their_status() {
        let bad: ApiError = EngineError::InvalidInput("Message is required".into()).into();
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);

        let missing: ApiError = EngineError::NotFound("x".into()).into();
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_required_str_rejects_non_strings() {
        let body = json!({ "message": 42 });
        assert!(required_str(&body, "message", "Message is required").is_err());
        assert!(required_str(&json!({}), "message", "Message is required").is_err());
        assert_eq!(
            required_str(&json!({ "message": "hi" }), "message", "Message is required").unwrap(),
            "hi"
        );
    }

    #[test]
    fn test_invalid_cors_origin_is_config_error() {
        let orchestrator = Arc::new(ChatOrchestrator::from_config(&Config::default()));
        assert!(matches!(
            app(orchestrator, "bad\norigin"),
            Err(EngineError::Config(_))
        ));
    }
}
