use crate::audio::{AccumulatorConfig, SchedulerConfig};
use crate::transport::TransportConfig;

/// Configuration for one voice session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "voice-3f2a...")
    pub session_id: String,

    /// Connection to the voice model, including the selected voice
    pub transport: TransportConfig,

    /// Capture framing (Gemini Live expects 16kHz mono PCM16)
    pub capture: AccumulatorConfig,

    /// Playback batching and retry
    pub playback: SchedulerConfig,

    /// Output clock rate; model audio arrives at 24kHz
    pub playback_sample_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("voice-{}", uuid::Uuid::new_v4()),
            transport: TransportConfig::default(),
            capture: AccumulatorConfig::default(),
            playback: SchedulerConfig::default(),
            playback_sample_rate: 24000,
        }
    }
}
