//! Error types for the voice pipeline

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while running a voice conversation
#[derive(Error, Debug)]
pub enum VoiceError {
    /// Microphone access denied or no capture device present
    #[error("Permission error: {0}")]
    Permission(String),

    /// Capture or output device could not be opened in the requested format
    #[error("Audio device error: {0}")]
    Device(String),

    /// Connection to the voice model failed or closed abnormally
    #[error("Transport error: {0}")]
    Transport(String),

    /// Audio clock unavailable or a chunk failed to schedule
    #[error("Playback error: {0}")]
    Playback(String),

    /// Malformed inbound audio payload
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Not authorized to use premium voice features")]
    Unauthorized,

    #[error("Cannot {action} while {state}")]
    InvalidState { state: String, action: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    pub fn invalid_state(state: impl ToString, action: impl Into<String>) -> Self {
        VoiceError::InvalidState {
            state: state.to_string(),
            action: action.into(),
        }
    }
}

impl From<base64::DecodeError> for VoiceError {
    fn from(err: base64::DecodeError) -> Self {
        VoiceError::Decode(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        VoiceError::Transport(err.to_string())
    }
}

impl From<hound::Error> for VoiceError {
    fn from(err: hound::Error) -> Self {
        VoiceError::Device(err.to_string())
    }
}
