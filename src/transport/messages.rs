// Wire messages for the Gemini Live BidiGenerateContent WebSocket.
//
// Outbound messages are plain serde structs. Inbound messages arrive with
// loosely overlapping optional fields; they are decoded once here into an
// ordered list of `ServerEvent`s so nothing downstream inspects raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Base64 PCM tagged with a MIME descriptor such as `audio/pcm;rate=16000`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedChunk {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String, // Base64-encoded PCM bytes
}

impl EncodedChunk {
    pub fn pcm(pcm: &[u8], sample_rate: u32) -> Self {
        Self {
            mime_type: format!("audio/pcm;rate={}", sample_rate),
            data: crate::audio::codec::encode_base64(pcm),
        }
    }

    pub fn is_pcm(&self) -> bool {
        self.mime_type.starts_with("audio/pcm")
    }

    /// Sample rate declared in the MIME descriptor
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.trim().parse().ok())
    }
}

// ============================================================================
// Client → server
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    pub fn audio(chunk: EncodedChunk) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![chunk],
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Empty>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub candidate_count: u32,
    pub temperature: f32,
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Serializes as `{}`
#[derive(Debug, Clone, Default, Serialize)]
pub struct Empty {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<EncodedChunk>,
}

// ============================================================================
// Server → client
// ============================================================================

/// One decoded inbound event, in the order it appeared in the server message
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    /// Transcription of the user's speech
    InputTranscription(String),
    /// Inline model audio
    Audio(EncodedChunk),
    /// Model text (subtitle)
    Text(String),
    TurnComplete,
    Interrupted,
    ToolCall(Value),
    GoAway { time_left: Option<String> },
    SessionResumption { handle: Option<String>, resumable: bool },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    server_content: Option<RawServerContent>,
    setup_complete: Option<Value>,
    tool_call: Option<Value>,
    go_away: Option<RawGoAway>,
    session_resumption_update: Option<RawResumptionUpdate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    setup_complete: Option<Value>,
    input_transcription: Option<RawTranscription>,
    model_turn: Option<RawModelTurn>,
    turn_complete: Option<bool>,
    interrupted: Option<bool>,
    tool_call: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawTranscription {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawModelTurn {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    inline_data: Option<EncodedChunk>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGoAway {
    #[serde(alias = "time_left")]
    time_left: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResumptionUpdate {
    resumable: Option<bool>,
    new_handle: Option<String>,
}

fn is_set(value: &Option<Value>) -> bool {
    !matches!(value, None | Some(Value::Bool(false)))
}

/// Decode one server message into events
pub fn parse_server_message(payload: &[u8]) -> Result<Vec<ServerEvent>, serde_json::Error> {
    let raw: RawServerMessage = serde_json::from_slice(payload)?;
    let mut events = Vec::new();

    if let Some(call) = raw.tool_call {
        events.push(ServerEvent::ToolCall(call));
    }
    if let Some(go_away) = raw.go_away {
        events.push(ServerEvent::GoAway {
            time_left: go_away.time_left,
        });
    }
    if let Some(update) = raw.session_resumption_update {
        events.push(ServerEvent::SessionResumption {
            handle: update.new_handle,
            resumable: update.resumable.unwrap_or(false),
        });
    }
    if is_set(&raw.setup_complete) {
        events.push(ServerEvent::SetupComplete);
    }

    let Some(content) = raw.server_content else {
        return Ok(events);
    };

    if is_set(&content.setup_complete) {
        events.push(ServerEvent::SetupComplete);
    }
    if let Some(call) = content.tool_call {
        events.push(ServerEvent::ToolCall(call));
    }
    if let Some(text) = content.input_transcription.and_then(|t| t.text) {
        if !text.is_empty() {
            events.push(ServerEvent::InputTranscription(text));
        }
    }
    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            match (part.inline_data, part.text) {
                (Some(chunk), _) if chunk.is_pcm() => events.push(ServerEvent::Audio(chunk)),
                (_, Some(text)) if !text.is_empty() => events.push(ServerEvent::Text(text)),
                _ => {}
            }
        }
    }
    if content.turn_complete.unwrap_or(false) {
        events.push(ServerEvent::TurnComplete);
    }
    if content.interrupted.unwrap_or(false) {
        events.push(ServerEvent::Interrupted);
    }

    Ok(events)
}
