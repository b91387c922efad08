use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use hound::WavReader;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use super::accumulator::FrameAccumulator;
use super::backend::{AudioFrame, CaptureDevice};
use crate::error::{VoiceError, VoiceResult};

/// Frames buffered between the capture thread and the session
const FRAME_CHANNEL_CAPACITY: usize = 64;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> VoiceResult<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        if !path.exists() {
            return Err(VoiceError::Permission(format!(
                "No microphone found: {} does not exist",
                path.display()
            )));
        }

        let reader = WavReader::open(path)?;

        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()?;

        let duration_seconds = samples.len() as f64 /
            (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono float samples at `target_rate`
    ///
    /// Channels are averaged; the rate is decimated when the source rate is
    /// an integer multiple of the target.
    pub fn to_mono(&self, target_rate: u32) -> VoiceResult<Vec<f32>> {
        if self.sample_rate < target_rate || self.sample_rate % target_rate != 0 {
            return Err(VoiceError::Device(format!(
                "Cannot convert {}Hz to {}Hz (needs an integer decimation ratio)",
                self.sample_rate, target_rate
            )));
        }

        let channels = self.channels.max(1) as usize;
        let ratio = (self.sample_rate / target_rate) as usize;

        Ok(self
            .samples
            .chunks_exact(channels)
            .step_by(ratio)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                sum as f32 / channels as f32 / 32768.0
            })
            .collect())
    }
}

enum ReplaySource {
    Samples(Arc<[f32]>),
    Silence,
}

/// Capture device that delivers samples on a dedicated thread, paced like a
/// hardware callback
pub struct ReplayCapture {
    name: String,
    source: ReplaySource,
    sample_rate: u32,
    callback_size: usize,
    running: Arc<AtomicBool>,
    enabled: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReplayCapture {
    pub fn from_file(path: impl AsRef<Path>, sample_rate: u32, callback_size: usize) -> VoiceResult<Self> {
        let file = AudioFile::open(path)?;
        let samples = file.to_mono(sample_rate)?;

        Ok(Self::new(
            format!("file:{}", file.path),
            ReplaySource::Samples(samples.into()),
            sample_rate,
            callback_size,
        ))
    }

    pub fn silence(sample_rate: u32, callback_size: usize) -> Self {
        Self::new("silence".to_string(), ReplaySource::Silence, sample_rate, callback_size)
    }

    fn new(name: String, source: ReplaySource, sample_rate: u32, callback_size: usize) -> Self {
        Self {
            name,
            source,
            sample_rate,
            callback_size: callback_size.max(1),
            running: Arc::new(AtomicBool::new(false)),
            enabled: Arc::new(AtomicBool::new(true)),
            thread: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureDevice for ReplayCapture {
    async fn start(&mut self, mut accumulator: FrameAccumulator) -> VoiceResult<mpsc::Receiver<AudioFrame>> {
        if self.running.load(Ordering::SeqCst) {
            return Err(VoiceError::Device(format!("{} is already capturing", self.name)));
        }

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

        let samples = match &self.source {
            ReplaySource::Samples(samples) => Some(Arc::clone(samples)),
            ReplaySource::Silence => None,
        };
        let running = Arc::clone(&self.running);
        let enabled = Arc::clone(&self.enabled);
        let callback_size = self.callback_size;
        let period = Duration::from_secs_f64(callback_size as f64 / self.sample_rate as f64);
        let name = self.name.clone();

        self.running.store(true, Ordering::SeqCst);

        let thread = std::thread::Builder::new()
            .name("voice-capture".to_string())
            .spawn(move || {
                info!("Capture thread started: {}", name);

                let mut block = vec![0.0f32; callback_size];
                let mut position = 0;
                let mut deadline = Instant::now();

                while running.load(Ordering::SeqCst) {
                    match &samples {
                        Some(samples) => {
                            if position >= samples.len() {
                                info!("End of capture input: {}", name);
                                break;
                            }
                            let end = (position + callback_size).min(samples.len());
                            block.clear();
                            block.extend_from_slice(&samples[position..end]);
                            position = end;
                        }
                        None => {
                            block.clear();
                            block.resize(callback_size, 0.0);
                        }
                    }

                    if !enabled.load(Ordering::SeqCst) {
                        block.fill(0.0);
                    }

                    for frame in accumulator.push(&block) {
                        match tx.try_send(frame) {
                            Ok(()) => {}
                            Err(TrySendError::Full(frame)) => {
                                warn!("Frame channel full, dropping frame {}", frame.sequence);
                            }
                            Err(TrySendError::Closed(_)) => {
                                debug!("Frame receiver dropped, stopping capture thread");
                                running.store(false, Ordering::SeqCst);
                                return;
                            }
                        }
                    }

                    deadline += period;
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                }

                running.store(false, Ordering::SeqCst);
                info!("Capture thread stopped: {}", name);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                VoiceError::Device(format!("Failed to spawn capture thread: {}", e))
            })?;

        self.thread = Some(thread);
        Ok(rx)
    }

    async fn stop(&mut self) -> VoiceResult<()> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(thread) = self.thread.take() {
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                error!("Capture thread panicked: {}", self.name);
            }
        }

        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
