//! HTTP API server for external control
//!
//! This module provides a REST API for controlling voice sessions:
//! - POST /voice/sessions - Create and start a session
//! - POST /voice/sessions/:id/stop - Stop a session
//! - POST /voice/sessions/:id/mute - Mute the microphone
//! - POST /voice/sessions/:id/unmute - Unmute the microphone
//! - GET /voice/sessions/:id/status - Query session status
//! - GET /voices - List prebuilt voices
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::ApiError;
pub use routes::create_router;
pub use state::AppState;
