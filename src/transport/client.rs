use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::messages::{
    parse_server_message, ClientMessage, Content, EncodedChunk, Empty, GenerationConfig,
    PrebuiltVoiceConfig, ServerEvent, Setup, SpeechConfig, TextPart, VoiceConfig,
};
use crate::error::{VoiceError, VoiceResult};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Close code for a normal, intentional closure
pub const NORMAL_CLOSURE: u16 = 1000;

/// Reported when the stream ends without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

const EVENT_CHANNEL_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Open,
    Closed,
    Errored,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Disconnected => "disconnected",
            TransportState::Connecting => "connecting",
            TransportState::Open => "open",
            TransportState::Closed => "closed",
            TransportState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Events delivered by an open connection
///
/// Every connection ends with exactly one `Closed` or `Failed`, unless it was
/// closed locally.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Server(ServerEvent),
    /// The server closed the connection normally
    Closed { code: u16, reason: String },
    /// Abnormal close, stream error, or the stream ended without a close frame
    Failed(String),
}

/// Connection parameters for one voice session
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: String,
    /// Environment variable holding the API key; `None` connects without a key
    pub api_key_env: Option<String>,
    pub model: String,
    pub voice: String,
    pub system_instruction: Option<String>,
    pub temperature: f32,
    pub input_transcription: bool,
    pub connect_timeout: Duration,
    pub outbound_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key_env: Some("GEMINI_API_KEY".to_string()),
            model: "models/gemini-2.0-flash-live-001".to_string(),
            voice: "Zephyr".to_string(),
            system_instruction: Some("You are a helpful AI assistant.".to_string()),
            temperature: 0.2,
            input_transcription: true,
            connect_timeout: Duration::from_secs(10),
            outbound_capacity: 32,
        }
    }
}

impl TransportConfig {
    /// Endpoint URL with the API key appended
    pub fn url(&self) -> VoiceResult<String> {
        let Some(var) = &self.api_key_env else {
            return Ok(self.endpoint.clone());
        };

        let key = std::env::var(var)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| VoiceError::Transport(format!("API key not set: {} is empty or missing", var)))?;

        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        Ok(format!("{}{}key={}", self.endpoint, separator, key))
    }

    /// The single setup message sent when a connection opens
    pub fn setup_message(&self) -> ClientMessage {
        ClientMessage::Setup(Setup {
            model: self.model.clone(),
            generation_config: GenerationConfig {
                candidate_count: 1,
                temperature: self.temperature,
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: self.system_instruction.as_ref().map(|text| Content {
                parts: vec![TextPart { text: text.clone() }],
            }),
            input_audio_transcription: self.input_transcription.then(Empty::default),
        })
    }
}

enum Outbound {
    Audio(EncodedChunk),
    Close(String),
}

/// One duplex connection to the voice model
///
/// At most one connection is live at a time; opening again closes the
/// previous one first.
pub struct TransportSession {
    state: Arc<Mutex<TransportState>>,
    outbound: Option<mpsc::Sender<Outbound>>,
    task: Option<JoinHandle<()>>,
}

impl TransportSession {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState::Disconnected)),
            outbound: None,
            task: None,
        }
    }

    pub fn state(&self) -> TransportState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: TransportState) {
        set_state(&self.state, state);
    }

    pub fn is_open(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Connect, send setup, and start the IO task
    pub async fn open(&mut self, config: &TransportConfig) -> VoiceResult<mpsc::Receiver<TransportEvent>> {
        if self.outbound.is_some() {
            warn!("Transport already connected, closing previous connection");
            self.close("Superseded by new connection");
        }

        self.set_state(TransportState::Connecting);

        match self.connect(config).await {
            Ok(rx) => Ok(rx),
            Err(e) => {
                error!("Transport failed to open: {}", e);
                self.set_state(TransportState::Errored);
                Err(e)
            }
        }
    }

    async fn connect(&mut self, config: &TransportConfig) -> VoiceResult<mpsc::Receiver<TransportEvent>> {
        let url = config.url()?;
        info!("Connecting to {} (model={})", config.endpoint, config.model);

        let (ws, _response) = tokio::time::timeout(config.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                VoiceError::Transport(format!(
                    "Connection timed out after {}ms",
                    config.connect_timeout.as_millis()
                ))
            })??;

        let (mut sink, source) = ws.split();

        let setup = serde_json::to_string(&config.setup_message())
            .map_err(|e| VoiceError::Transport(format!("Failed to encode setup: {}", e)))?;
        sink.send(Message::Text(setup.into())).await?;
        info!("Setup sent (voice={})", config.voice);

        let (out_tx, out_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        self.set_state(TransportState::Open);
        self.outbound = Some(out_tx);
        self.task = Some(tokio::spawn(run_connection(
            sink,
            source,
            out_rx,
            event_tx,
            Arc::clone(&self.state),
        )));

        Ok(event_rx)
    }

    /// Queue one audio frame; dropped when the connection is not open
    pub fn send_frame(&self, chunk: EncodedChunk) {
        if !self.is_open() {
            debug!("Transport not open, dropping frame");
            return;
        }
        let Some(outbound) = &self.outbound else {
            return;
        };

        match outbound.try_send(Outbound::Audio(chunk)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Outbound queue full, dropping frame"),
            Err(TrySendError::Closed(_)) => debug!("Connection task gone, dropping frame"),
        }
    }

    /// Close with code 1000. Safe to call in any state.
    pub fn close(&mut self, reason: &str) {
        if let Some(outbound) = self.outbound.take() {
            info!("Closing transport: {}", reason);
            // A full queue still closes: dropping the sender ends the task loop
            let _ = outbound.try_send(Outbound::Close(reason.to_string()));
        }
        // Detached so the close frame can still be flushed
        self.task.take();

        if self.state() != TransportState::Errored {
            self.set_state(TransportState::Closed);
        }
    }
}

impl Default for TransportSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if self.outbound.is_some() {
            self.close("Transport dropped");
        }
    }
}

fn set_state(state: &Mutex<TransportState>, next: TransportState) {
    *state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
}

/// Terminal state set by the IO task, unless the connection was already
/// closed locally
fn finish(state: &Mutex<TransportState>, next: TransportState) {
    let mut current = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if *current == TransportState::Open {
        *current = next;
    }
}

async fn run_connection(
    mut sink: WsSink,
    mut source: WsSource,
    mut outbound: mpsc::Receiver<Outbound>,
    events: mpsc::Sender<TransportEvent>,
    state: Arc<Mutex<TransportState>>,
) {
    let terminal = loop {
        tokio::select! {
            command = outbound.recv() => {
                match command {
                    Some(Outbound::Audio(chunk)) => {
                        let json = match serde_json::to_string(&ClientMessage::audio(chunk)) {
                            Ok(json) => json,
                            Err(e) => {
                                error!("Failed to serialize audio frame: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            break Some(TransportEvent::Failed(format!("Send failed: {}", e)));
                        }
                    }
                    Some(Outbound::Close(reason)) => {
                        send_close(&mut sink, &reason).await;
                        break None;
                    }
                    None => {
                        send_close(&mut sink, "Transport dropped").await;
                        break None;
                    }
                }
            }

            message = source.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if !forward(text.as_bytes(), &events).await {
                            break None;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if !forward(&data, &events).await {
                            break None;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            warn!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((1005, String::new()));
                        info!("WebSocket closed by server: code={} reason={:?}", code, reason);

                        if code == NORMAL_CLOSURE {
                            break Some(TransportEvent::Closed { code, reason });
                        }
                        break Some(TransportEvent::Failed(format!(
                            "WebSocket Disconnected: {}. Code: {}",
                            reason, code
                        )));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break Some(TransportEvent::Failed(format!("WebSocket error: {}", e)));
                    }
                    None => {
                        break Some(TransportEvent::Failed(format!(
                            "WebSocket Disconnected: connection lost. Code: {}",
                            ABNORMAL_CLOSURE
                        )));
                    }
                }
            }
        }
    };

    match terminal {
        Some(event) => {
            let next = match &event {
                TransportEvent::Closed { .. } => TransportState::Closed,
                _ => TransportState::Errored,
            };
            if let TransportEvent::Failed(message) = &event {
                error!("{}", message);
            }
            finish(&state, next);
            let _ = events.send(event).await;
        }
        None => finish(&state, TransportState::Closed),
    }

    debug!("Connection task finished");
}

/// Decode one inbound message and pass its events on. Returns false once the
/// receiver is gone.
async fn forward(payload: &[u8], events: &mpsc::Sender<TransportEvent>) -> bool {
    let decoded = match parse_server_message(payload) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("Failed to parse server message: {}", e);
            return true;
        }
    };

    for event in decoded {
        if events.send(TransportEvent::Server(event)).await.is_err() {
            debug!("Event receiver dropped");
            return false;
        }
    }
    true
}

async fn send_close(sink: &mut WsSink, reason: &str) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: reason.to_string().into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        debug!("Failed to send close frame: {}", e);
    }
    let _ = sink.close().await;
}
