// Shared fakes for integration tests: a scripted microphone and a local
// WebSocket server standing in for the voice model.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use live_voice::audio::{
    codec, AudioDevices, AudioFrame, AudioOutput, CaptureDevice, DecodedChunk, FrameAccumulator,
    PlaybackEvent, SourceId, TimelineOutput,
};
use live_voice::{Config, SessionHandle, SessionStatus, VoiceError, VoiceResult};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub const TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Scripted capture
// ============================================================================

/// Capture device fed by the test instead of hardware
pub struct ScriptedCapture {
    feed: Option<mpsc::UnboundedReceiver<Vec<f32>>>,
    enabled: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl CaptureDevice for ScriptedCapture {
    async fn start(&mut self, mut accumulator: FrameAccumulator) -> VoiceResult<mpsc::Receiver<AudioFrame>> {
        let mut feed = self
            .feed
            .take()
            .ok_or_else(|| VoiceError::Device("scripted capture already started".to_string()))?;
        let enabled = Arc::clone(&self.enabled);
        let (tx, rx) = mpsc::channel(64);

        self.task = Some(tokio::spawn(async move {
            while let Some(mut block) = feed.recv().await {
                if !enabled.load(Ordering::SeqCst) {
                    block.fill(0.0);
                }
                for frame in accumulator.push(&block) {
                    if tx.send(frame).await.is_err() {
                        return;
                    }
                }
            }
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> VoiceResult<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.task.is_some()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Timeline output that logs every started source and can fake a dead clock
pub struct ScriptedOutput {
    inner: TimelineOutput,
    broken_clock: bool,
    started: Arc<Mutex<Vec<usize>>>,
}

#[async_trait::async_trait]
impl AudioOutput for ScriptedOutput {
    fn name(&self) -> &str {
        "scripted"
    }

    fn current_time(&self) -> f64 {
        self.inner.current_time()
    }

    fn is_suspended(&self) -> bool {
        self.broken_clock
    }

    async fn resume(&mut self) -> VoiceResult<()> {
        if self.broken_clock {
            return Err(VoiceError::Device("audio clock refused to resume".to_string()));
        }
        self.inner.resume().await
    }

    fn start_source(&mut self, chunk: &DecodedChunk, at: f64) -> VoiceResult<SourceId> {
        let id = self.inner.start_source(chunk, at)?;
        self.started.lock().unwrap().push(chunk.samples.len());
        Ok(id)
    }

    fn stop_source(&mut self, id: SourceId) {
        self.inner.stop_source(id);
    }

    async fn close(&mut self) -> VoiceResult<()> {
        self.inner.close().await
    }
}

/// Devices whose capture is driven by `feed` and whose output is a timeline
#[derive(Default)]
pub struct ScriptedDevices {
    current_feed: Mutex<Option<mpsc::UnboundedSender<Vec<f32>>>>,
    deny_capture: AtomicBool,
    broken_clock: AtomicBool,
    captures_opened: std::sync::atomic::AtomicUsize,
    started_sources: Arc<Mutex<Vec<usize>>>,
}

impl ScriptedDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denying_capture() -> Arc<Self> {
        let devices = Self::default();
        devices.deny_capture.store(true, Ordering::SeqCst);
        Arc::new(devices)
    }

    /// Outputs whose clock is suspended and cannot be resumed
    pub fn with_broken_clock() -> Arc<Self> {
        let devices = Self::default();
        devices.broken_clock.store(true, Ordering::SeqCst);
        Arc::new(devices)
    }

    /// Sample counts of every source started on any output, in order
    pub fn started_sources(&self) -> Vec<usize> {
        self.started_sources.lock().unwrap().clone()
    }

    /// Deliver samples to the capture of the current conversation
    pub fn feed(&self, samples: Vec<f32>) {
        let feed = self.current_feed.lock().unwrap();
        feed.as_ref()
            .expect("no capture opened")
            .send(samples)
            .expect("capture task gone");
    }

    pub fn captures_opened(&self) -> usize {
        self.captures_opened.load(Ordering::SeqCst)
    }
}

impl AudioDevices for ScriptedDevices {
    fn open_capture(&self, _sample_rate: u32) -> VoiceResult<Box<dyn CaptureDevice>> {
        if self.deny_capture.load(Ordering::SeqCst) {
            return Err(VoiceError::Permission(
                "Microphone access denied. Please enable microphone access.".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.current_feed.lock().unwrap() = Some(tx);
        self.captures_opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(ScriptedCapture {
            feed: Some(rx),
            enabled: Arc::new(AtomicBool::new(true)),
            task: None,
        }))
    }

    fn open_output(
        &self,
        _session_id: &str,
        sample_rate: u32,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> VoiceResult<Box<dyn AudioOutput>> {
        Ok(Box::new(ScriptedOutput {
            inner: TimelineOutput::new(sample_rate, None, events),
            broken_clock: self.broken_clock.load(Ordering::SeqCst),
            started: Arc::clone(&self.started_sources),
        }))
    }
}

// ============================================================================
// Mock voice model server
// ============================================================================

/// What the server saw from the client
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Json(Value),
    Close(Option<(u16, String)>),
    Disconnected,
}

enum ServerAction {
    Send(Message),
    Drop,
}

/// Local WebSocket server; accepts connections one after another
pub struct MockServer {
    pub addr: SocketAddr,
    received: mpsc::UnboundedReceiver<Received>,
    actions: mpsc::UnboundedSender<ServerAction>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received) = mpsc::unbounded_channel();
        let (actions, mut actions_rx) = mpsc::unbounded_channel::<ServerAction>();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (mut sink, mut source) = ws.split();

                loop {
                    tokio::select! {
                        message = source.next() => match message {
                            Some(Ok(Message::Text(text))) => {
                                let value: Value = serde_json::from_str(&text).unwrap();
                                let _ = received_tx.send(Received::Json(value));
                            }
                            Some(Ok(Message::Close(frame))) => {
                                let frame = frame.map(|f| (u16::from(f.code), f.reason.to_string()));
                                let _ = received_tx.send(Received::Close(frame));
                            }
                            Some(Ok(_)) => {}
                            Some(Err(_)) | None => {
                                let _ = received_tx.send(Received::Disconnected);
                                break;
                            }
                        },
                        action = actions_rx.recv() => match action {
                            Some(ServerAction::Send(message)) => {
                                let _ = sink.send(message).await;
                            }
                            Some(ServerAction::Drop) | None => break,
                        },
                    }
                }
            }
        });

        Self {
            addr,
            received,
            actions,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Config pointing at this server, without an API key
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.voice.endpoint = self.url();
        cfg.voice.api_key_env = String::new();
        cfg.voice.connect_timeout_ms = 2000;
        cfg
    }

    pub fn send_json(&self, value: Value) {
        let _ = self
            .actions
            .send(ServerAction::Send(Message::Text(value.to_string().into())));
    }

    pub fn send_binary(&self, value: Value) {
        let _ = self
            .actions
            .send(ServerAction::Send(Message::Binary(value.to_string().into_bytes().into())));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        let _ = self.actions.send(ServerAction::Send(Message::Close(Some(frame))));
    }

    /// Drop the TCP connection without a close frame
    pub fn drop_connection(&self) {
        let _ = self.actions.send(ServerAction::Drop);
    }

    pub async fn next(&mut self) -> Received {
        tokio::time::timeout(TIMEOUT, self.received.recv())
            .await
            .expect("timed out waiting for client message")
            .expect("server task gone")
    }

    pub async fn next_json(&mut self) -> Value {
        match self.next().await {
            Received::Json(value) => value,
            other => panic!("expected JSON message, got {:?}", other),
        }
    }

    /// True if nothing arrives within `wait`
    pub async fn stays_quiet(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.received.recv()).await.is_err()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Server message carrying `samples` of silence as model audio
pub fn audio_message(samples: usize) -> Value {
    audio_message_at(samples, 24000)
}

/// Like `audio_message`, declaring `rate` in the mime type
pub fn audio_message_at(samples: usize, rate: u32) -> Value {
    serde_json::json!({
        "serverContent": {
            "modelTurn": {
                "parts": [{
                    "inlineData": {
                        "mimeType": format!("audio/pcm;rate={}", rate),
                        "data": codec::encode_base64(&vec![0u8; samples * 2])
                    }
                }]
            }
        }
    })
}

pub async fn wait_for(
    handle: &SessionHandle,
    what: &str,
    predicate: impl FnMut(&SessionStatus) -> bool,
) -> SessionStatus {
    let mut updates = handle.subscribe();
    let status = tokio::time::timeout(TIMEOUT, updates.wait_for(predicate))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
        .expect("session task gone");
    SessionStatus::clone(&status)
}
