use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;

/// Snapshot of a voice session, published after every change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,

    pub state: SessionState,

    /// Selected prebuilt voice
    pub voice: String,

    /// When the current conversation started
    pub started_at: Option<DateTime<Utc>>,

    /// Microphone level of the last captured frame (0 to 100)
    pub level: f32,

    /// Latest transcription of the user's speech
    pub transcript: String,

    /// Latest model text
    pub subtitle: String,

    /// Last human-readable error
    pub error: Option<String>,

    /// Informational status such as "Connection ending soon"
    pub note: Option<String>,

    /// Chunks waiting or playing
    pub queue_len: usize,

    pub frames_sent: u64,

    /// Frames dropped by half-duplex suppression or mute
    pub frames_suppressed: u64,

    pub chunks_received: u64,

    /// Chunks that failed to decode or schedule
    pub chunks_dropped: u64,

    /// Latest session resumption handle from the server
    pub resumption_handle: Option<String>,
}

impl SessionStatus {
    pub fn new(session_id: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: SessionState::Idle,
            voice: voice.into(),
            started_at: None,
            level: 0.0,
            transcript: String::new(),
            subtitle: String::new(),
            error: None,
            note: None,
            queue_len: 0,
            frames_sent: 0,
            frames_suppressed: 0,
            chunks_received: 0,
            chunks_dropped: 0,
            resumption_handle: None,
        }
    }

    /// Clear per-conversation fields, keeping identity and voice
    pub fn reset_conversation(&mut self) {
        self.started_at = None;
        self.level = 0.0;
        self.transcript.clear();
        self.subtitle.clear();
        self.note = None;
        self.queue_len = 0;
        self.frames_sent = 0;
        self.frames_suppressed = 0;
        self.chunks_received = 0;
        self.chunks_dropped = 0;
        self.resumption_handle = None;
    }

    /// Seconds since the conversation started
    pub fn duration_secs(&self) -> f64 {
        self.started_at
            .map(|started| (Utc::now() - started).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}
