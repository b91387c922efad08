use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{VoiceError, VoiceResult};

/// Lifecycle of one voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    /// Microphone frames are forwarded to the model
    Listening,
    /// Model audio is playing; microphone frames are suppressed
    Speaking,
    Muted,
    Stopped,
    Error,
}

impl SessionState {
    /// Whether a conversation may be started from this state
    pub fn can_start(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Stopped | SessionState::Error)
    }

    /// Whether a conversation is in progress
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Listening | SessionState::Speaking | SessionState::Muted
        )
    }

    /// Short label for terminal output
    pub fn label(self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Connecting => "Connecting...",
            SessionState::Listening => "Listening...",
            SessionState::Speaking => "AI Speaking...",
            SessionState::Muted => "Mic Muted",
            SessionState::Stopped => "Stopped",
            SessionState::Error => "Error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Listening => "listening",
            SessionState::Speaking => "speaking",
            SessionState::Muted => "muted",
            SessionState::Stopped => "stopped",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Session state plus the last human-readable error
///
/// Transitions that don't apply in the current state are ignored and return
/// `false`; commands that don't apply return `InvalidState`.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: SessionState,
    message: Option<String>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            message: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Frames reach the transport only while listening
    pub fn forwards_frames(&self) -> bool {
        self.state == SessionState::Listening
    }

    fn set(&mut self, next: SessionState) -> bool {
        if self.state == next {
            return false;
        }
        debug!("Session state: {} -> {}", self.state, next);
        self.state = next;
        true
    }

    pub fn begin_connecting(&mut self) -> VoiceResult<()> {
        if !self.state.can_start() {
            return Err(VoiceError::invalid_state(self.state, "start"));
        }
        self.message = None;
        self.set(SessionState::Connecting);
        Ok(())
    }

    pub fn connected(&mut self) -> bool {
        self.state == SessionState::Connecting && self.set(SessionState::Listening)
    }

    /// First audio of a model turn
    pub fn audio_received(&mut self) -> bool {
        self.state == SessionState::Listening && self.set(SessionState::Speaking)
    }

    pub fn playback_drained(&mut self) -> bool {
        self.state == SessionState::Speaking && self.set(SessionState::Listening)
    }

    pub fn interrupted(&mut self) -> bool {
        self.state == SessionState::Speaking && self.set(SessionState::Listening)
    }

    pub fn mute(&mut self) -> VoiceResult<bool> {
        match self.state {
            SessionState::Listening | SessionState::Speaking => Ok(self.set(SessionState::Muted)),
            SessionState::Muted => Ok(false),
            state => Err(VoiceError::invalid_state(state, "mute")),
        }
    }

    /// `playing` selects Speaking over Listening when model audio is still
    /// scheduled
    pub fn unmute(&mut self, playing: bool) -> VoiceResult<bool> {
        match self.state {
            SessionState::Muted => {
                let next = if playing {
                    SessionState::Speaking
                } else {
                    SessionState::Listening
                };
                Ok(self.set(next))
            }
            SessionState::Listening | SessionState::Speaking => Ok(false),
            state => Err(VoiceError::invalid_state(state, "unmute")),
        }
    }

    pub fn stop(&mut self) -> bool {
        self.message = None;
        self.set(SessionState::Stopped)
    }

    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        self.message = Some(message.into());
        self.set(SessionState::Error)
    }

    /// Record a failure that leaves the state unchanged (permission refused)
    pub fn refuse(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
