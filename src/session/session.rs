use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::access::Authorizer;
use super::config::SessionConfig;
use super::state::StateMachine;
use super::stats::SessionStatus;
use crate::audio::{
    codec, AudioDevices, AudioFrame, CaptureDevice, Completion, DecodedChunk, FrameAccumulator,
    PassOutcome, PlaybackEvent, PlaybackScheduler, SourceId,
};
use crate::error::{VoiceError, VoiceResult};
use crate::transport::{self, EncodedChunk, ServerEvent, TransportEvent, TransportSession};

const COMMAND_CHANNEL_CAPACITY: usize = 16;
const EVENT_CHANNEL_CAPACITY: usize = 256;

type Reply = oneshot::Sender<VoiceResult<SessionStatus>>;

enum Command {
    Start(Reply),
    Stop(Reply),
    Mute(Reply),
    Unmute(Reply),
    SelectVoice(String, Reply),
    Shutdown(Reply),
}

/// Everything the actor reacts to besides commands
enum Pumped {
    Transport(TransportEvent),
    Frame(AudioFrame),
    CaptureEnded,
    Playback(PlaybackEvent),
    RetryPlayback,
}

/// An event tagged with the conversation that produced it
struct SessionEvent {
    generation: u64,
    kind: Pumped,
}

/// Resources of one running conversation
struct Conversation {
    generation: u64,
    transport: TransportSession,
    capture: Box<dyn CaptureDevice>,
    scheduler: PlaybackScheduler,
    pump: JoinHandle<()>,
    retry: Option<JoinHandle<()>>,
    decode_failures: u64,
}

/// Control handle for a running `VoiceSession`
#[derive(Clone)]
pub struct SessionHandle {
    session_id: String,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Latest published status
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub async fn start(&self) -> VoiceResult<SessionStatus> {
        self.request(Command::Start, "start").await
    }

    pub async fn stop(&self) -> VoiceResult<SessionStatus> {
        self.request(Command::Stop, "stop").await
    }

    pub async fn mute(&self) -> VoiceResult<SessionStatus> {
        self.request(Command::Mute, "mute").await
    }

    pub async fn unmute(&self) -> VoiceResult<SessionStatus> {
        self.request(Command::Unmute, "unmute").await
    }

    pub async fn select_voice(&self, voice: &str) -> VoiceResult<SessionStatus> {
        let voice = voice.to_string();
        self.request(|reply| Command::SelectVoice(voice, reply), "change voice")
            .await
    }

    /// Stop any conversation and end the actor
    pub async fn shutdown(&self) -> VoiceResult<SessionStatus> {
        self.request(Command::Shutdown, "shut down").await
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command, action: &str) -> VoiceResult<SessionStatus> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| VoiceError::invalid_state("shut down", action))?;
        rx.await
            .map_err(|_| VoiceError::invalid_state("shut down", action))?
    }
}

/// A voice conversation engine bound to one session id
///
/// Runs as a single task that owns the state machine and, while a
/// conversation is active, its transport, capture device and playback
/// scheduler. All state changes happen on this task.
pub struct VoiceSession {
    config: SessionConfig,
    devices: Arc<dyn AudioDevices>,
    authorizer: Arc<dyn Authorizer>,
    machine: StateMachine,
    status: SessionStatus,
    status_tx: watch::Sender<SessionStatus>,
    conversation: Option<Conversation>,
    generation: u64,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
    commands: mpsc::Receiver<Command>,
}

impl VoiceSession {
    /// Spawn the session task and return its handle
    pub fn spawn(
        config: SessionConfig,
        devices: Arc<dyn AudioDevices>,
        authorizer: Arc<dyn Authorizer>,
    ) -> SessionHandle {
        let session_id = config.session_id.clone();
        info!("Creating voice session: {}", session_id);

        let status = SessionStatus::new(&session_id, &config.transport.voice);
        let (status_tx, status_rx) = watch::channel(status.clone());
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let session = Self {
            config,
            devices,
            authorizer,
            machine: StateMachine::new(),
            status,
            status_tx,
            conversation: None,
            generation: 0,
            events_tx,
            events_rx,
            commands: command_rx,
        };
        tokio::spawn(session.run());

        SessionHandle {
            session_id,
            commands: command_tx,
            status: status_rx,
        }
    }

    async fn run(mut self) {
        info!("Voice session task started: {}", self.config.session_id);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.stop().await;
                        self.publish();
                        let _ = reply.send(Ok(self.status.clone()));
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.stop().await;
                        break;
                    }
                },
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event).await;
                    self.publish();
                }
            }
        }

        info!("Voice session task stopped: {}", self.config.session_id);
    }

    async fn handle_command(&mut self, command: Command) {
        let (result, reply) = match command {
            Command::Start(reply) => (self.start().await, reply),
            Command::Stop(reply) => (Ok(self.stop().await), reply),
            Command::Mute(reply) => (self.mute(), reply),
            Command::Unmute(reply) => (self.unmute(), reply),
            Command::SelectVoice(voice, reply) => (self.select_voice(voice), reply),
            Command::Shutdown(reply) => (Ok(self.stop().await), reply),
        };

        self.publish();
        let _ = reply.send(result.map(|()| self.status.clone()));
    }

    fn publish(&mut self) {
        self.status.state = self.machine.state();
        self.status.error = self.machine.message().map(str::to_string);
        if let Some(conversation) = &self.conversation {
            self.status.queue_len = conversation.scheduler.queue_len();
            self.status.chunks_dropped =
                conversation.decode_failures + conversation.scheduler.dropped_chunks() as u64;
        }
        self.status_tx.send_replace(self.status.clone());
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    async fn start(&mut self) -> VoiceResult<()> {
        let state = self.machine.state();
        if !state.can_start() {
            return Err(VoiceError::invalid_state(state, "start"));
        }

        if !self.authorizer.is_authorized() {
            warn!("Session {} not authorized", self.config.session_id);
            self.machine.refuse(VoiceError::Unauthorized.to_string());
            return Err(VoiceError::Unauthorized);
        }

        let capture = match self.devices.open_capture(self.config.capture.sample_rate) {
            Ok(capture) => capture,
            Err(e) => {
                warn!("Microphone unavailable: {}", e);
                self.machine.refuse(e.to_string());
                return Err(e);
            }
        };

        self.machine.begin_connecting()?;
        self.status.reset_conversation();
        self.publish();

        self.generation += 1;
        info!(
            "Starting conversation {} on session {} (voice={})",
            self.generation, self.config.session_id, self.config.transport.voice
        );

        match self.open_conversation(self.generation, capture).await {
            Ok(conversation) => {
                self.conversation = Some(conversation);
                self.machine.connected();
                self.status.started_at = Some(Utc::now());
                info!("Conversation started, listening");
                Ok(())
            }
            Err(e) => {
                error!("Failed to start conversation: {}", e);
                self.machine.fail(format!("Failed to start conversation: {}", e));
                Err(e)
            }
        }
    }

    async fn open_conversation(
        &mut self,
        generation: u64,
        mut capture: Box<dyn CaptureDevice>,
    ) -> VoiceResult<Conversation> {
        let mut transport = TransportSession::new();
        let transport_rx = transport.open(&self.config.transport).await?;

        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let output = match self.devices.open_output(
            &self.config.session_id,
            self.config.playback_sample_rate,
            playback_tx,
        ) {
            Ok(output) => output,
            Err(e) => {
                transport.close("Failed to open audio output");
                return Err(e);
            }
        };
        let mut scheduler = PlaybackScheduler::new(output, self.config.playback.clone());

        let accumulator = FrameAccumulator::new(self.config.capture.clone());
        let frames_rx = match capture.start(accumulator).await {
            Ok(rx) => rx,
            Err(e) => {
                transport.close("Failed to start capture");
                if let Err(close_err) = scheduler.close().await {
                    warn!("Failed to close audio output: {}", close_err);
                }
                return Err(e);
            }
        };
        info!("Capture started: {}", capture.name());

        let pump = tokio::spawn(pump_events(
            generation,
            transport_rx,
            frames_rx,
            playback_rx,
            self.events_tx.clone(),
        ));

        Ok(Conversation {
            generation,
            transport,
            capture,
            scheduler,
            pump,
            retry: None,
            decode_failures: 0,
        })
    }

    async fn stop(&mut self) {
        self.teardown("User initiated stop").await;
        if self.machine.stop() {
            info!("Session {} stopped", self.config.session_id);
        }
        self.status.reset_conversation();
    }

    fn mute(&mut self) -> VoiceResult<()> {
        if self.machine.mute()? {
            if let Some(conversation) = &mut self.conversation {
                conversation.capture.set_enabled(false);
            }
            self.status.level = 0.0;
            info!("Microphone muted");
        }
        Ok(())
    }

    fn unmute(&mut self) -> VoiceResult<()> {
        let playing = self
            .conversation
            .as_ref()
            .map(|c| c.scheduler.is_playing() || c.scheduler.queue_len() > 0)
            .unwrap_or(false);

        if self.machine.unmute(playing)? {
            if let Some(conversation) = &mut self.conversation {
                conversation.capture.set_enabled(true);
            }
            info!("Microphone unmuted");
        }
        Ok(())
    }

    fn select_voice(&mut self, voice: String) -> VoiceResult<()> {
        if !transport::is_known_voice(&voice) {
            return Err(VoiceError::Config(format!(
                "Unknown voice '{}' (expected one of {})",
                voice,
                transport::VOICE_OPTIONS.join(", ")
            )));
        }

        let state = self.machine.state();
        if state.is_active() {
            return Err(VoiceError::invalid_state(state, "change voice"));
        }

        info!("Voice set to {}", voice);
        self.status.voice = voice.clone();
        self.config.transport.voice = voice;
        Ok(())
    }

    /// Release every resource of the current conversation
    async fn teardown(&mut self, reason: &str) {
        let Some(mut conversation) = self.conversation.take() else {
            return;
        };
        info!("Tearing down conversation {}: {}", conversation.generation, reason);

        conversation.pump.abort();
        if let Some(retry) = conversation.retry.take() {
            retry.abort();
        }

        conversation.transport.close(reason);

        if let Err(e) = conversation.capture.stop().await {
            warn!("Failed to stop capture: {}", e);
        }
        if let Err(e) = conversation.scheduler.close().await {
            warn!("Failed to close audio output: {}", e);
        }

        self.status.queue_len = 0;
        self.status.level = 0.0;
    }

    async fn fail(&mut self, message: String) {
        self.teardown(&message).await;
        self.machine.fail(message);
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    async fn handle_event(&mut self, event: SessionEvent) {
        match &self.conversation {
            Some(conversation) if conversation.generation == event.generation => {}
            _ => {
                debug!("Ignoring event from conversation {}", event.generation);
                return;
            }
        }

        match event.kind {
            Pumped::Frame(frame) => self.on_frame(frame),
            Pumped::CaptureEnded => info!("Capture input ended"),
            Pumped::Transport(event) => self.on_transport_event(event).await,
            Pumped::Playback(PlaybackEvent::SourceEnded(id)) => self.on_source_ended(id).await,
            Pumped::RetryPlayback => {
                if let Some(conversation) = &mut self.conversation {
                    conversation.retry = None;
                }
                self.run_playback_pass().await;
            }
        }
    }

    fn on_frame(&mut self, frame: AudioFrame) {
        let Some(conversation) = &self.conversation else {
            return;
        };

        self.status.level = frame.level;
        if !self.machine.forwards_frames() {
            self.status.frames_suppressed += 1;
            return;
        }

        conversation
            .transport
            .send_frame(EncodedChunk::pcm(&frame.pcm, frame.sample_rate));
        self.status.frames_sent += 1;
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Server(event) => self.on_server_event(event).await,
            TransportEvent::Closed { code, reason } => {
                info!("Connection closed normally (code {}): {}", code, reason);
                self.teardown("Server closed connection").await;
                self.machine.stop();
                self.status.note = Some("Disconnected (normal closure)".to_string());
            }
            TransportEvent::Failed(message) => {
                error!("Connection failed: {}", message);
                self.fail(message).await;
            }
        }
    }

    async fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SetupComplete => {
                info!("Model setup complete");
                self.status.note = Some("Setup complete".to_string());
            }
            ServerEvent::InputTranscription(text) => {
                debug!("Transcript: {}", text);
                self.status.transcript = text;
            }
            ServerEvent::Audio(chunk) => self.on_audio_chunk(chunk).await,
            ServerEvent::Text(text) => self.status.subtitle = text,
            ServerEvent::TurnComplete => info!("Model turn complete"),
            ServerEvent::Interrupted => {
                if let Some(conversation) = &mut self.conversation {
                    if let Some(retry) = conversation.retry.take() {
                        retry.abort();
                    }
                    let discarded = conversation.scheduler.interrupt();
                    info!("Model interrupted, discarded {} chunks", discarded);
                }
                self.machine.interrupted();
                self.status.subtitle.clear();
            }
            ServerEvent::ToolCall(call) => {
                info!("Tool call requested: {}", call);
                self.status.note = Some("Model requested a tool".to_string());
            }
            ServerEvent::GoAway { time_left } => {
                let time_left = time_left.unwrap_or_else(|| "unknown".to_string());
                warn!("Server going away, time left: {}", time_left);
                self.status.note = Some(format!("Connection ending soon ({})", time_left));
            }
            ServerEvent::SessionResumption { handle, resumable } => {
                debug!("Session resumption update (resumable={})", resumable);
                if handle.is_some() {
                    self.status.resumption_handle = handle;
                }
            }
        }
    }

    async fn on_audio_chunk(&mut self, chunk: EncodedChunk) {
        let sample_rate = chunk.sample_rate().unwrap_or(self.config.playback_sample_rate);
        let Some(conversation) = &mut self.conversation else {
            return;
        };
        self.status.chunks_received += 1;

        let samples = match codec::decode(&chunk.data) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Dropping undecodable audio chunk: {}", e);
                conversation.decode_failures += 1;
                return;
            }
        };

        let needs_pass = conversation
            .scheduler
            .enqueue(DecodedChunk::new(samples, sample_rate));
        self.machine.audio_received();

        if needs_pass {
            self.run_playback_pass().await;
        }
    }

    async fn run_playback_pass(&mut self) {
        let Some(conversation) = &mut self.conversation else {
            return;
        };
        let result = conversation.scheduler.schedule().await;
        self.after_pass(result).await;
    }

    async fn on_source_ended(&mut self, id: SourceId) {
        let Some(conversation) = &mut self.conversation else {
            return;
        };

        match conversation.scheduler.on_source_ended(id).await {
            Ok(Completion::Ignored) => {}
            Ok(Completion::Drained) => self.playback_drained(),
            Ok(Completion::Continued(outcome)) => self.after_pass(Ok(outcome)).await,
            Err(e) => self.after_pass(Err(e)).await,
        }
    }

    async fn after_pass(&mut self, result: VoiceResult<PassOutcome>) {
        match result {
            Ok(PassOutcome::Scheduled { count, start }) => {
                debug!("Scheduled {} chunks at {:.3}s", count, start);
            }
            Ok(PassOutcome::Busy) => {}
            Ok(PassOutcome::Idle) => self.playback_drained(),
            Ok(PassOutcome::Retry(delay)) => self.schedule_retry(delay),
            Err(e) => {
                error!("Playback failed: {}", e);
                self.fail(e.to_string()).await;
            }
        }
    }

    fn schedule_retry(&mut self, delay: Duration) {
        let Some(conversation) = &mut self.conversation else {
            return;
        };
        debug!("Retrying playback in {:?}", delay);

        let events = self.events_tx.clone();
        let generation = conversation.generation;
        let retry = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events
                .send(SessionEvent {
                    generation,
                    kind: Pumped::RetryPlayback,
                })
                .await;
        });

        if let Some(previous) = conversation.retry.replace(retry) {
            previous.abort();
        }
    }

    fn playback_drained(&mut self) {
        if self.machine.playback_drained() {
            info!("Playback complete, listening");
        }
        self.status.subtitle.clear();
    }
}

/// Forward one conversation's channels into the session task
async fn pump_events(
    generation: u64,
    mut transport: mpsc::Receiver<TransportEvent>,
    mut frames: mpsc::Receiver<AudioFrame>,
    mut playback: mpsc::UnboundedReceiver<PlaybackEvent>,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut transport_open = true;
    let mut frames_open = true;
    let mut playback_open = true;

    loop {
        let kind = tokio::select! {
            event = transport.recv(), if transport_open => match event {
                Some(event) => Some(Pumped::Transport(event)),
                None => {
                    transport_open = false;
                    None
                }
            },
            frame = frames.recv(), if frames_open => match frame {
                Some(frame) => Some(Pumped::Frame(frame)),
                None => {
                    frames_open = false;
                    Some(Pumped::CaptureEnded)
                }
            },
            event = playback.recv(), if playback_open => match event {
                Some(event) => Some(Pumped::Playback(event)),
                None => {
                    playback_open = false;
                    None
                }
            },
            else => break,
        };

        let Some(kind) = kind else {
            continue;
        };
        if events.send(SessionEvent { generation, kind }).await.is_err() {
            break;
        }
    }

    debug!("Event pump for conversation {} finished", generation);
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .field("state", &self.status.borrow().state)
            .finish()
    }
}
