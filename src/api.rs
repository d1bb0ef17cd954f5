//! REST API Server for the workspace agent
//!
//! Exposes the orchestrator, the guarded chat, the reimbursement store, the
//! event log and the MCP endpoint over HTTP.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::Orchestrator;
use crate::audit::{EventLog, SessionSettings};
use crate::config::AppConfig;
use crate::error::OrchestrationError;
use crate::guardrail::{refusal_message, ChatGuardrail, GuardrailVerdict};
use crate::mcp::{JsonRpcRequest, McpServer};
use crate::model::LanguageModel;
use crate::models::{AgentRequest, Event, NewReimbursement, ReimbursementRequest, RequestStatus};
use crate::store::{receipt_digest, ClaimDesk, JsonFileRequestStore};
use crate::tools::create_default_registry;

/// Largest accepted request body (multipart uploads included).
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentRunRequest {
    pub request: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatResponse {
    pub response: String,
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StatusUpdate {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Store and validation failures rendered as `{"error": ...}` with a
/// matching status code.
pub struct ApiError(OrchestrationError);

impl From<OrchestrationError> for ApiError {
    fn from(e: OrchestrationError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OrchestrationError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestrationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub claims: ClaimDesk,
    pub guardrail: Arc<ChatGuardrail>,
    pub mcp: Arc<McpServer>,
    pub sessions: SessionSettings,
    pub uploads_dir: PathBuf,
}

impl ApiState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        claims: ClaimDesk,
        sessions: SessionSettings,
        uploads_dir: PathBuf,
    ) -> Self {
        let mcp = Arc::new(McpServer::new(orchestrator.clone(), sessions.clone()));
        Self {
            orchestrator,
            claims,
            guardrail: Arc::new(ChatGuardrail::new()),
            mcp,
            sessions,
            uploads_dir,
        }
    }

    /// Wire every component from configuration around `model`.
    pub async fn from_config(config: &AppConfig, model: Arc<dyn LanguageModel>) -> Self {
        let events = Arc::new(EventLog::open(config.events_file()));
        let store = Arc::new(JsonFileRequestStore::open(config.requests_file()).await);
        let registry = Arc::new(create_default_registry(config, model.clone()));

        info!(tools = ?registry.list(), "Tool registry ready");

        let orchestrator =
            Arc::new(Orchestrator::new(model, registry).with_event_log(events.clone()));

        Self::new(
            orchestrator,
            ClaimDesk::new(store, events),
            SessionSettings::new(&config.log_dir, config.session_log_console),
            config.uploads_dir.clone(),
        )
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Agent Endpoints
/// =============================

async fn run_agent(state: &ApiState, request: AgentRequest) -> (StatusCode, Json<ApiResponse>) {
    let session = state.sessions.start().await;
    let result = state.orchestrator.handle(&request, &session).await;
    session.end().await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "category": result.category,
            "answer": result.answer,
            "session_id": session.session_id(),
        }))),
    )
}

async fn agent_handler(
    State(state): State<ApiState>,
    Json(req): Json<AgentRunRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.request.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("request must not be empty".into())),
        );
    }
    info!(attachments = req.files.len(), "Received agent request");

    run_agent(&state, AgentRequest::new(req.request).with_files(req.files)).await
}

async fn agent_upload_handler(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> (StatusCode, Json<ApiResponse>) {
    let mut instruction = String::new();
    let mut files = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::error(format!("invalid multipart body: {}", e))),
                )
            }
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("instruction") => match field.text().await {
                Ok(text) => instruction = text,
                Err(e) => {
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(ApiResponse::error(format!("invalid instruction field: {}", e))),
                    )
                }
            },
            Some("file") | Some("files") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let saved = match field.bytes().await {
                    Ok(bytes) => save_upload(&state.uploads_dir, &filename, &bytes).await,
                    Err(e) => Err(OrchestrationError::InvalidRequest(e.to_string())),
                };
                match saved {
                    Ok((path, _)) => files.push(path.to_string_lossy().into_owned()),
                    Err(e) => {
                        return (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            Json(ApiResponse::error(format!("failed to store upload: {}", e))),
                        )
                    }
                }
            }
            _ => {}
        }
    }

    if instruction.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("instruction must not be empty".into())),
        );
    }
    info!(attachments = files.len(), "Received agent upload request");

    run_agent(&state, AgentRequest::new(instruction).with_files(files)).await
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ChatResponse>) {
    if req.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ChatResponse {
                response: "Message must not be empty.".to_string(),
                blocked: false,
                reason: None,
            }),
        );
    }

    // The guardrail sees exactly what the model would.
    let instruction = match req.context.as_deref().map(str::trim) {
        Some(context) if !context.is_empty() => {
            format!("Context: {}\n\n{}", context, req.message)
        }
        _ => req.message,
    };

    let verdict = match state.guardrail.enforce(&instruction, state.claims.events()).await {
        Ok(verdict) => verdict,
        Err(e) => {
            // The block stands even if the security event could not be written.
            warn!(error = %e, "Failed to record guardrail event");
            state.guardrail.check(&instruction)
        }
    };

    if let GuardrailVerdict::Blocked { term } = verdict {
        return (
            StatusCode::OK,
            Json(ChatResponse {
                response: refusal_message(term),
                blocked: true,
                reason: Some(format!("blocked term: {}", term)),
            }),
        );
    }

    let session = state.sessions.start().await;
    let answer = state
        .orchestrator
        .handle_request(&AgentRequest::new(instruction), &session)
        .await;
    session.end().await;

    (
        StatusCode::OK,
        Json(ChatResponse {
            response: answer,
            blocked: false,
            reason: None,
        }),
    )
}

/// =============================
/// Reimbursement Endpoints
/// =============================

async fn create_request(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<ReimbursementRequest>)> {
    let mut form = NewReimbursement {
        filename: String::new(),
        file_path: String::new(),
        size: 0,
        receipt_sha256: String::new(),
        uploaded_by: String::new(),
        emp_name: String::new(),
        emp_id: String::new(),
        emp_amount: String::new(),
        emp_date: String::new(),
        emp_reason: String::new(),
    };
    let mut has_file = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| OrchestrationError::InvalidRequest(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field.file_name().unwrap_or("receipt").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| OrchestrationError::InvalidRequest(e.to_string()))?;
            if bytes.is_empty() {
                continue;
            }
            let (path, digest) = save_upload(&state.uploads_dir, &filename, &bytes).await?;
            form.filename = filename;
            form.file_path = path.to_string_lossy().into_owned();
            form.size = bytes.len() as u64;
            form.receipt_sha256 = digest;
            has_file = true;
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| OrchestrationError::InvalidRequest(e.to_string()))?;
        match name.as_str() {
            "empName" => form.emp_name = value,
            "empId" => form.emp_id = value,
            "empAmount" => form.emp_amount = value,
            "empDate" => form.emp_date = value,
            "empReason" => form.emp_reason = value,
            "uploadedBy" => form.uploaded_by = value,
            _ => {}
        }
    }

    if !has_file {
        return Err(OrchestrationError::InvalidRequest("No file uploaded".to_string()).into());
    }
    let missing = missing_claim_fields(&form);
    if !missing.is_empty() {
        if let Err(e) = tokio::fs::remove_file(&form.file_path).await {
            warn!(path = %form.file_path, error = %e, "Failed to remove rejected upload");
        }
        return Err(OrchestrationError::InvalidRequest(format!(
            "missing required field(s): {}",
            missing.join(", ")
        ))
        .into());
    }

    let record = state.claims.submit(form).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Form fields left empty or absent, in form order.
fn missing_claim_fields(form: &NewReimbursement) -> Vec<&'static str> {
    [
        ("empName", &form.emp_name),
        ("empId", &form.emp_id),
        ("empAmount", &form.emp_amount),
        ("empDate", &form.emp_date),
        ("empReason", &form.emp_reason),
        ("uploadedBy", &form.uploaded_by),
    ]
    .into_iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(name, _)| name)
    .collect()
}

async fn list_requests(State(state): State<ApiState>) -> ApiResult<Json<Vec<ReimbursementRequest>>> {
    Ok(Json(state.claims.store().list().await?))
}

async fn get_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ReimbursementRequest>> {
    state
        .claims
        .store()
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| OrchestrationError::NotFound(format!("request {}", id)).into())
}

async fn requests_by_email(
    State(state): State<ApiState>,
    Path(email): Path<String>,
) -> ApiResult<Json<Vec<ReimbursementRequest>>> {
    Ok(Json(state.claims.store().list_by_uploader(&email).await?))
}

async fn requests_by_status(
    State(state): State<ApiState>,
    Path(status): Path<String>,
) -> ApiResult<Json<Vec<ReimbursementRequest>>> {
    let status: RequestStatus = status.parse()?;
    Ok(Json(state.claims.store().list_by_status(status).await?))
}

async fn update_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<Json<ReimbursementRequest>> {
    let status: RequestStatus = update.status.parse()?;
    Ok(Json(state.claims.decide(&id, status, update.reason).await?))
}

async fn delete_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.claims.store().delete(&id).await?;
    Ok(Json(serde_json::json!({
        "message": format!("Request {} deleted", id)
    })))
}

async fn logs_handler(State(state): State<ApiState>) -> ApiResult<Json<Vec<Event>>> {
    Ok(Json(state.claims.events().read_all().await?))
}

/// =============================
/// MCP Endpoint
/// =============================

async fn mcp_handler(State(state): State<ApiState>, Json(req): Json<JsonRpcRequest>) -> Response {
    match state.mcp.handle(req).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// =============================
/// Uploads
/// =============================

/// Write `bytes` under `dir` with a timestamped, sanitized name. Returns the
/// saved path and the content digest.
async fn save_upload(
    dir: &std::path::Path,
    filename: &str,
    bytes: &[u8],
) -> crate::Result<(PathBuf, String)> {
    tokio::fs::create_dir_all(dir).await?;
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let stored_name = format!(
        "{}_{}_{}",
        chrono::Utc::now().timestamp_millis(),
        &suffix[..8],
        sanitize_filename(filename)
    );
    let path = dir.join(stored_name);
    tokio::fs::write(&path, bytes).await?;

    info!(path = %path.display(), size = bytes.len(), "Upload saved");
    Ok((path, receipt_digest(bytes)))
}

fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/agent", post(agent_handler))
        .route("/api/agent/upload", post(agent_upload_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/requests", post(create_request).get(list_requests))
        .route(
            "/api/requests/:id",
            get(get_request).patch(update_request).delete(delete_request),
        )
        .route("/api/requests/email/:email", get(requests_by_email))
        .route("/api/requests/status/:status", get(requests_by_status))
        .route("/logs", get(logs_handler))
        .route("/mcp", post(mcp_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("receipt.pdf"), "receipt.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("my receipt (1).pdf"), "my_receipt__1_.pdf");
        assert_eq!(sanitize_filename("..."), "upload");
        assert_eq!(sanitize_filename("C:\\Users\\x\\taxi.png"), "taxi.png");
    }

    #[tokio::test]
    async fn test_save_upload_writes_file_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let (path, digest) = save_upload(dir.path(), "a b.txt", b"abc").await.unwrap();

        assert!(path.starts_with(dir.path()));
        assert!(path.to_string_lossy().ends_with("_a_b.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        assert_eq!(digest, receipt_digest(b"abc"));
    }

    #[tokio::test]
    async fn test_same_name_uploads_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let (first, _) = save_upload(dir.path(), "receipt.pdf", b"one").await.unwrap();
        let (second, _) = save_upload(dir.path(), "receipt.pdf", b"two").await.unwrap();

        assert_ne!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
    }

    #[test]
    fn test_missing_claim_fields() {
        let mut form = NewReimbursement {
            filename: "r.pdf".to_string(),
            file_path: "/tmp/r.pdf".to_string(),
            size: 1,
            receipt_sha256: String::new(),
            uploaded_by: "ada@example.com".to_string(),
            emp_name: "Ada".to_string(),
            emp_id: "E-1".to_string(),
            emp_amount: "10".to_string(),
            emp_date: "2026-10-01".to_string(),
            emp_reason: "Taxi".to_string(),
        };
        assert!(missing_claim_fields(&form).is_empty());

        form.emp_amount = "  ".to_string();
        form.uploaded_by.clear();
        assert_eq!(missing_claim_fields(&form), vec!["empAmount", "uploadedBy"]);
    }
}
