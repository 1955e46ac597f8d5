//! REST endpoint handlers.
//!
//! Each handler extracts parameters, calls into the dialogue controller or
//! a speech backend, and returns JSON (or audio for `/tts`).

use axum::body::{Body, Bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::{Json, RequestExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tutor_chat::ChatReply;
use tutor_speech::{AudioArtifact, FrameReader};
use tutor_whisper::transcribe_file;

use crate::error::ApiError;
use crate::state::AppState;

/// Session used when a request does not name one.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Chunk size for the `/tts` response body.
const TTS_BODY_CHUNK: usize = 16 * 1024;

// =============================================================================
// Request / Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Whether a generation provider is configured.
    pub rag_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Whether answers are grounded in retrieved passages.
    pub retrieval: bool,
    pub active_sessions: usize,
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default = "default_session_id")]
    pub session_id: String,
    #[serde(default)]
    pub query: String,
}

fn default_session_id() -> String {
    DEFAULT_SESSION_ID.to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SttResponse {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /healthz - liveness plus generation availability.
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let controller = &state.controller;
    let engine = controller.engine();
    Json(HealthResponse {
        status: "ok".to_string(),
        rag_available: controller.is_available(),
        provider: engine.map(|e| e.descriptor().name.clone()),
        retrieval: engine.is_some_and(|e| e.has_retrieval()),
        active_sessions: controller.sessions().len(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        started_at: state.started_at,
    })
}

/// POST /query - one-shot answer without session history.
pub async fn query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(req) = payload?;
    let reply = state.controller.query(&req.query).await?;
    Ok(Json(reply))
}

/// POST /chat - answer within a session and record the exchange.
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(req) = payload?;
    let reply = state.controller.chat(&req.session_id, &req.query).await?;
    Ok(Json(reply))
}

/// POST /stt - transcribe an uploaded clip.
///
/// Accepts either a multipart form with a `file` field or the raw audio as
/// the request body. The upload lives in a temporary file that is removed
/// when the handler returns.
pub async fn stt(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<SttResponse>, ApiError> {
    let (data, filename) = read_upload(&state, request).await?;
    if data.is_empty() {
        return Err(ApiError::BadRequest("No audio uploaded".to_string()));
    }

    let upload = tempfile::Builder::new()
        .prefix("stt_")
        .suffix(&upload_suffix(filename.as_deref()))
        .tempfile_in(&state.upload_dir)
        .map_err(|e| ApiError::Internal(format!("Failed to stage upload: {}", e)))?;
    tokio::fs::write(upload.path(), &data)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to stage upload: {}", e)))?;

    let result = transcribe_file(state.transcriber.as_ref(), upload.path()).await?;
    tracing::info!(
        bytes = data.len(),
        duration_secs = result.duration_secs,
        "Transcribed upload"
    );
    Ok(Json(SttResponse { text: result.text }))
}

/// POST /tts - synthesize text and return it as a WAV download.
pub async fn tts(
    State(state): State<AppState>,
    payload: Result<Json<TtsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    if req.text.trim().is_empty() {
        return Err(ApiError::BadRequest("Empty text payload".to_string()));
    }

    let artifact = state
        .synthesizer
        .synthesize(&req.text, req.voice.as_deref())
        .await?;
    let reader = artifact.frames(TTS_BODY_CHUNK).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "audio/wav"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=response.wav",
            ),
        ],
        artifact_body(artifact, reader),
    )
        .into_response())
}

// =============================================================================
// Helpers
// =============================================================================

async fn read_upload(
    state: &AppState,
    request: Request,
) -> Result<(Bytes, Option<String>), ApiError> {
    let headers = request.headers();
    let is_multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));
    let declared_len = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    if declared_len.is_some_and(|len| len > state.max_upload_bytes) {
        return Err(ApiError::PayloadTooLarge(format!(
            "Upload exceeds {} bytes",
            state.max_upload_bytes
        )));
    }

    if !is_multipart {
        let data = axum::body::to_bytes(request.into_body(), state.max_upload_bytes)
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
        return Ok((data, None));
    }

    let mut multipart = request
        .extract::<Multipart, _>()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart payload: {e}")))?;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed reading multipart field: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let data = field.bytes().await.map_err(|e| {
            ApiError::BadRequest(format!("Failed reading multipart 'file' field: {e}"))
        })?;
        return Ok((data, filename));
    }
    Err(ApiError::BadRequest(
        "Missing multipart field 'file'".to_string(),
    ))
}

/// Extension of the uploaded filename with its dot, `.wav` when absent.
fn upload_suffix(filename: Option<&str>) -> String {
    filename
        .and_then(|name| std::path::Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext))
        .unwrap_or_else(|| ".wav".to_string())
}

/// Stream the artifact as the response body. The file is deleted once the
/// body finishes or the client goes away.
fn artifact_body(artifact: AudioArtifact, reader: FrameReader) -> Body {
    let stream = futures_util::stream::unfold(
        Some((artifact, reader)),
        |state| async move {
            let Some((artifact, mut reader)) = state else {
                return None;
            };
            match reader.next_frame().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some((artifact, reader)))),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "Audio body read failed");
                    Some((Err(std::io::Error::other(e.to_string())), None))
                }
            }
        },
    );
    Body::from_stream(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_suffix() {
        assert_eq!(upload_suffix(Some("clip.mp3")), ".mp3");
        assert_eq!(upload_suffix(Some("voice.note.WAV")), ".WAV");
        assert_eq!(upload_suffix(Some("noext")), ".wav");
        assert_eq!(upload_suffix(Some("../../etc/passwd")), ".wav");
        assert_eq!(upload_suffix(Some("weird.a/b")), ".wav");
        assert_eq!(upload_suffix(None), ".wav");
    }

    #[test]
    fn test_chat_request_defaults_session() {
        let req: ChatRequest = serde_json::from_str(r#"{"query":"hi"}"#).unwrap();
        assert_eq!(req.session_id, "default");
        assert_eq!(req.query, "hi");
    }
}
