use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::audio::{AccumulatorConfig, CaptureSource, ConfiguredDevices, OverflowPolicy, SchedulerConfig};
use crate::error::VoiceError;
use crate::session::{SessionConfig, StaticAuthorizer};
use crate::transport::{self, client::DEFAULT_ENDPOINT, TransportConfig};

/// Environment overrides look like `LIVE_VOICE__AUDIO__FRAME_SIZE=4096`
pub const ENV_PREFIX: &str = "LIVE_VOICE";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub voice: VoiceSettings,
    pub audio: AudioConfig,
    pub access: AccessConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "live-voice".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub model: String,
    pub voice: String,
    pub endpoint: String,
    /// Name of the environment variable holding the API key; empty disables the key
    pub api_key_env: String,
    pub system_instruction: Option<String>,
    pub temperature: f32,
    pub input_transcription: bool,
    pub connect_timeout_ms: u64,
    pub outbound_queue_capacity: usize,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            model: transport.model,
            voice: transport.voice,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            system_instruction: transport.system_instruction,
            temperature: transport.temperature,
            input_transcription: transport.input_transcription,
            connect_timeout_ms: transport.connect_timeout.as_millis() as u64,
            outbound_queue_capacity: transport.outbound_capacity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Samples per capture frame
    pub frame_size: usize,
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    /// Chunks committed per playback pass
    pub max_lookahead: usize,
    pub level_gain: f32,
    pub retry_delay_ms: u64,
    pub overflow_policy: OverflowPolicy,
    /// Samples delivered per capture callback
    pub callback_size: usize,
    /// "silence" or a path to a WAV file replayed as the microphone
    pub capture_source: String,
    /// Where rendered playback is written, if anywhere
    pub record_dir: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        let capture = AccumulatorConfig::default();
        let playback = SchedulerConfig::default();
        Self {
            frame_size: capture.frame_size,
            capture_sample_rate: capture.sample_rate,
            playback_sample_rate: 24000,
            max_lookahead: playback.max_lookahead,
            level_gain: capture.gain,
            retry_delay_ms: playback.retry_delay.as_millis() as u64,
            overflow_policy: capture.overflow,
            callback_size: 128,
            capture_source: "silence".to_string(),
            record_dir: None,
        }
    }
}

impl AudioConfig {
    pub fn capture_source(&self) -> CaptureSource {
        match self.capture_source.trim() {
            "" | "silence" => CaptureSource::Silence,
            path => CaptureSource::File(PathBuf::from(path)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Whether premium voice features are unlocked
    pub premium: bool,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self { premium: true }
    }
}

impl Config {
    /// Load from `path` (extension optional, file optional) plus environment
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), VoiceError> {
        if !transport::is_known_voice(&self.voice.voice) {
            return Err(VoiceError::Config(format!(
                "Unknown voice '{}' (expected one of {})",
                self.voice.voice,
                transport::VOICE_OPTIONS.join(", ")
            )));
        }
        if self.audio.frame_size == 0 || self.audio.callback_size == 0 {
            return Err(VoiceError::Config(
                "audio.frame_size and audio.callback_size must be positive".to_string(),
            ));
        }
        if self.audio.capture_sample_rate == 0 || self.audio.playback_sample_rate == 0 {
            return Err(VoiceError::Config("Sample rates must be positive".to_string()));
        }
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        let voice = &self.voice;
        TransportConfig {
            endpoint: voice.endpoint.clone(),
            api_key_env: Some(voice.api_key_env.trim().to_string()).filter(|var| !var.is_empty()),
            model: voice.model.clone(),
            voice: voice.voice.clone(),
            system_instruction: voice.system_instruction.clone().filter(|text| !text.is_empty()),
            temperature: voice.temperature,
            input_transcription: voice.input_transcription,
            connect_timeout: Duration::from_millis(voice.connect_timeout_ms),
            outbound_capacity: voice.outbound_queue_capacity,
        }
    }

    /// Per-session projection; a random id is generated when none is given
    pub fn session_config(&self, session_id: Option<String>) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            session_id: session_id.unwrap_or(defaults.session_id),
            transport: self.transport_config(),
            capture: AccumulatorConfig {
                frame_size: self.audio.frame_size,
                sample_rate: self.audio.capture_sample_rate,
                gain: self.audio.level_gain,
                overflow: self.audio.overflow_policy,
            },
            playback: SchedulerConfig {
                max_lookahead: self.audio.max_lookahead,
                retry_delay: Duration::from_millis(self.audio.retry_delay_ms),
            },
            playback_sample_rate: self.audio.playback_sample_rate,
        }
    }

    pub fn devices(&self) -> ConfiguredDevices {
        ConfiguredDevices {
            capture: self.audio.capture_source(),
            callback_size: self.audio.callback_size,
            record_dir: self.audio.record_dir.clone(),
        }
    }

    pub fn authorizer(&self) -> StaticAuthorizer {
        StaticAuthorizer::new(self.access.premium)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.audio.frame_size, 2048);
        assert_eq!(cfg.audio.capture_sample_rate, 16000);
        assert_eq!(cfg.audio.playback_sample_rate, 24000);
        assert_eq!(cfg.audio.max_lookahead, 3);
        assert_eq!(cfg.audio.retry_delay_ms, 100);
        assert_eq!(cfg.audio.overflow_policy, OverflowPolicy::Drop);
        assert_eq!(cfg.voice.voice, "Zephyr");
        assert_eq!(cfg.audio.capture_source(), CaptureSource::Silence);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let cfg = Config::load("/nonexistent/live-voice").unwrap();
        assert_eq!(cfg.audio.frame_size, 2048);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[voice]
voice = "Kore"
api_key_env = ""

[audio]
frame_size = 4096
overflow_policy = "carry"
capture_source = "/tmp/mic.wav"
"#
        )
        .unwrap();

        let cfg = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.voice.voice, "Kore");
        assert_eq!(cfg.audio.frame_size, 4096);
        assert_eq!(cfg.audio.overflow_policy, OverflowPolicy::Carry);
        assert_eq!(cfg.audio.capture_source(), CaptureSource::File(PathBuf::from("/tmp/mic.wav")));
        // Untouched sections keep their defaults
        assert_eq!(cfg.audio.capture_sample_rate, 16000);
        assert_eq!(cfg.service.http.port, 8787);

        let transport = cfg.transport_config();
        assert_eq!(transport.voice, "Kore");
        assert!(transport.api_key_env.is_none());
    }

    #[test]
    fn test_load_rejects_unknown_voice() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[voice]\nvoice = \"Nobody\"").unwrap();

        assert!(Config::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_session_config_projection() {
        let mut cfg = Config::default();
        cfg.audio.frame_size = 1024;
        cfg.audio.retry_delay_ms = 250;

        let session = cfg.session_config(Some("desk".to_string()));
        assert_eq!(session.session_id, "desk");
        assert_eq!(session.capture.frame_size, 1024);
        assert_eq!(session.playback.retry_delay, Duration::from_millis(250));
        assert_eq!(session.playback_sample_rate, 24000);

        let generated = cfg.session_config(None);
        assert!(generated.session_id.starts_with("voice-"));
    }
}
