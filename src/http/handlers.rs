use super::state::AppState;
use crate::error::VoiceError;
use crate::session::{SessionHandle, SessionStatus, VoiceSession};
use crate::transport::{self, DEFAULT_VOICE, VOICE_OPTIONS};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    /// Optional session ID (if not provided, generate UUID)
    pub session_id: Option<String>,

    /// Prebuilt voice for this session (default from config)
    pub voice: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub message: String,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct VoicesResponse {
    pub voices: Vec<String>,
    pub default: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error returned from a handler as `{ "error": ... }`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(session_id: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("Session {} not found", session_id))
    }
}

impl From<VoiceError> for ApiError {
    fn from(err: VoiceError) -> Self {
        let status = match &err {
            VoiceError::Unauthorized => StatusCode::FORBIDDEN,
            VoiceError::InvalidState { .. } | VoiceError::Config(_) => StatusCode::BAD_REQUEST,
            VoiceError::Permission(_) | VoiceError::Device(_) => StatusCode::SERVICE_UNAVAILABLE,
            VoiceError::Transport(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

fn respond(session_id: &str, message: impl Into<String>, status: SessionStatus) -> Json<SessionResponse> {
    Json(SessionResponse {
        session_id: session_id.to_string(),
        message: message.into(),
        status,
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /voice/sessions
/// Create a session and start its conversation; the body is optional
pub async fn start_session(
    State(state): State<AppState>,
    body: Option<Json<StartSessionRequest>>,
) -> Result<Json<SessionResponse>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    if let Some(voice) = &req.voice {
        if !transport::is_known_voice(voice) {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                format!("Unknown voice '{}'", voice),
            ));
        }
    }

    let mut config = state.config.session_config(req.session_id);
    if let Some(voice) = req.voice {
        config.transport.voice = voice;
    }
    let session_id = config.session_id.clone();

    info!("Starting voice session: {}", session_id);

    let handle = {
        let mut sessions = state.sessions.write().await;
        if sessions.contains_key(&session_id) {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                format!("Session {} already exists", session_id),
            ));
        }

        let handle = VoiceSession::spawn(config, state.devices.clone(), state.authorizer.clone());
        sessions.insert(session_id.clone(), handle.clone());
        handle
    };

    match handle.start().await {
        Ok(status) => {
            info!("Voice session started: {}", session_id);
            Ok(respond(&session_id, "Conversation started", status))
        }
        Err(e) => {
            error!("Failed to start session {}: {}", session_id, e);
            state.sessions.write().await.remove(&session_id);
            shutdown(&handle).await;
            Err(e.into())
        }
    }
}

/// POST /voice/sessions/:session_id/stop
/// Stop the conversation and release the session
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    info!("Stopping voice session: {}", session_id);

    let handle = state
        .sessions
        .write()
        .await
        .remove(&session_id)
        .ok_or_else(|| ApiError::not_found(&session_id))?;

    let status = handle.stop().await?;
    shutdown(&handle).await;

    Ok(respond(&session_id, "Conversation stopped", status))
}

/// POST /voice/sessions/:session_id/mute
pub async fn mute_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let handle = state
        .session(&session_id)
        .await
        .ok_or_else(|| ApiError::not_found(&session_id))?;

    let status = handle.mute().await?;
    Ok(respond(&session_id, "Microphone muted", status))
}

/// POST /voice/sessions/:session_id/unmute
pub async fn unmute_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let handle = state
        .session(&session_id)
        .await
        .ok_or_else(|| ApiError::not_found(&session_id))?;

    let status = handle.unmute().await?;
    Ok(respond(&session_id, "Microphone unmuted", status))
}

/// GET /voice/sessions/:session_id/status
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatus>, ApiError> {
    state
        .session(&session_id)
        .await
        .map(|handle| Json(handle.status()))
        .ok_or_else(|| ApiError::not_found(&session_id))
}

/// GET /voices
pub async fn list_voices() -> Json<VoicesResponse> {
    Json(VoicesResponse {
        voices: VOICE_OPTIONS.iter().map(|v| v.to_string()).collect(),
        default: DEFAULT_VOICE.to_string(),
    })
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn shutdown(handle: &SessionHandle) {
    if let Err(e) = handle.shutdown().await {
        warn!("Session {} did not shut down cleanly: {}", handle.session_id(), e);
    }
}
