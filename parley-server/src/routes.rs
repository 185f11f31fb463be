//! HTTP API routes.

use crate::chat::ChatService;
use crate::error::ChatError;
use crate::grounding::ImageAsset;
use crate::session::Turn;
use axum::{
    extract::{
        multipart::MultipartRejection, rejection::QueryRejection, DefaultBodyLimit, Multipart,
        Query, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Question used when an upload arrives without `q`.
pub const DEFAULT_IMAGE_QUESTION: &str = "What is in this image?";

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub max_upload_bytes: usize,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(chat: ChatService, max_upload_bytes: usize) -> Self {
        Self {
            chat,
            max_upload_bytes,
            started_at: Utc::now(),
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.max_upload_bytes;
    Router::new()
        // Liveness
        .route("/ping", get(ping))
        .route("/health", get(health_check))
        // Conversation
        .route("/ask", get(ask))
        .route("/history", get(history))
        // Image grounding
        .route(
            "/analyze-image",
            post(analyze_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/analyze_image", get(analyze_url))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ReplyResponse {
    pub response: String,
}

// ============ Liveness ============

async fn ping() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "parley-server",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.chat.registry().len(),
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
    }))
}

/// Malformed query strings get the same JSON error body as other 400s.
fn bad_query(rejection: QueryRejection) -> ChatError {
    ChatError::Validation(rejection.body_text())
}

// ============ Conversation ============

#[derive(Debug, Deserialize)]
struct AskQuery {
    q: Option<String>,
    id: Option<String>,
}

async fn ask(
    State(state): State<AppState>,
    query: Result<Query<AskQuery>, QueryRejection>,
) -> Result<Json<ReplyResponse>, ChatError> {
    let Query(query) = query.map_err(bad_query)?;
    let (Some(q), Some(id)) = (query.q, query.id) else {
        return Err(ChatError::Validation(
            "Please provide both query and id parameters.".into(),
        ));
    };

    let reply = state.chat.ask(&id, &q).await?;
    Ok(Json(ReplyResponse { response: reply.text }))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub id: String,
    pub turns: Vec<Turn>,
}

async fn history(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, ChatError> {
    let Query(query) = query.map_err(bad_query)?;
    let id = query
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ChatError::Validation("Please provide the id parameter.".into()))?;

    let session = state
        .chat
        .registry()
        .get(&id)
        .ok_or_else(|| ChatError::SessionNotFound(id.clone()))?;

    Ok(Json(HistoryResponse {
        turns: session.history().await,
        id,
    }))
}

// ============ Image Grounding ============

#[derive(Debug, Deserialize)]
struct AnalyzeUrlQuery {
    id: Option<String>,
    q: Option<String>,
    image_url: Option<String>,
}

async fn analyze_url(
    State(state): State<AppState>,
    query: Result<Query<AnalyzeUrlQuery>, QueryRejection>,
) -> Result<Json<ReplyResponse>, ChatError> {
    let Query(query) = query.map_err(bad_query)?;
    let (Some(id), Some(q), Some(image_url)) = (query.id, query.q, query.image_url) else {
        return Err(ChatError::Validation(
            "Please provide id, q and image_url parameters.".into(),
        ));
    };

    let asset = ImageAsset::remote(&image_url)?;
    let reply = state.chat.ask_about_image(&id, &q, asset).await?;
    Ok(Json(ReplyResponse { response: reply.text }))
}

/// Fields collected from an `/analyze-image` upload.
#[derive(Default)]
struct UploadForm {
    id: Option<String>,
    q: Option<String>,
    file: Option<UploadedFile>,
}

struct UploadedFile {
    name: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, ChatError> {
    let mut form = UploadForm::default();
    let bad_part = |e: axum::extract::multipart::MultipartError| {
        ChatError::Validation(format!("Malformed multipart body: {e}"))
    };

    while let Some(field) = multipart.next_field().await.map_err(bad_part)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().map(String::from);
                let content_type = field.content_type().map(String::from);
                let bytes = field.bytes().await.map_err(bad_part)?;
                form.file = Some(UploadedFile {
                    name: file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "id" => form.id = Some(field.text().await.map_err(bad_part)?),
            "q" => form.q = Some(field.text().await.map_err(bad_part)?),
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }
    Ok(form)
}

async fn analyze_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ReplyResponse>, ChatError> {
    let multipart = multipart.map_err(|e| ChatError::Validation(e.body_text()))?;
    let form = read_upload(multipart).await?;

    let file = form
        .file
        .ok_or_else(|| ChatError::Validation("No file part".into()))?;
    if file.name.as_deref().map_or(true, str::is_empty) {
        return Err(ChatError::Validation("No selected file".into()));
    }
    let id = form
        .id
        .ok_or_else(|| ChatError::Validation("Please provide the id field.".into()))?;
    let q = form
        .q
        .filter(|q| !q.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_IMAGE_QUESTION.to_string());

    tracing::info!(
        session_id = %id,
        file_name = file.name.as_deref().unwrap_or_default(),
        bytes = file.bytes.len(),
        "Image upload received"
    );

    let asset = ImageAsset::uploaded(file.bytes, file.content_type);
    let reply = state.chat.ask_about_image(&id, &q, asset).await?;
    Ok(Json(ReplyResponse { response: reply.text }))
}
