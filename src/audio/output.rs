// Audio output seam and the timeline-backed output
//
// An output exposes a monotonic clock in seconds and plays sources that were
// scheduled against it. Natural completion of a source is reported on the
// event channel handed to the output at construction; stopped sources report
// nothing.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::codec;
use crate::error::{VoiceError, VoiceResult};

/// Identifier of one scheduled playback source
pub type SourceId = u64;

/// Decoded inbound audio awaiting playback
#[derive(Debug, Clone)]
pub struct DecodedChunk {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

impl DecodedChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Playback duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Notifications from an audio output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A source played to its end
    SourceEnded(SourceId),
}

/// Audio output with a monotonic clock
#[async_trait::async_trait]
pub trait AudioOutput: Send {
    fn name(&self) -> &str;

    /// Current clock time in seconds
    fn current_time(&self) -> f64;

    /// Whether the clock is suspended and must be resumed before scheduling
    fn is_suspended(&self) -> bool;

    async fn resume(&mut self) -> VoiceResult<()>;

    /// Schedule `chunk` to begin at clock time `at`
    fn start_source(&mut self, chunk: &DecodedChunk, at: f64) -> VoiceResult<SourceId>;

    /// Stop a source immediately; no completion is reported for it
    fn stop_source(&mut self, id: SourceId);

    /// Release the output
    async fn close(&mut self) -> VoiceResult<()>;
}

struct PlayedSource {
    start: f64,
    samples: Arc<[f32]>,
    stopped_at: Option<f64>,
}

/// Output driven by the system monotonic clock
///
/// Completion is signalled by a timer per source. When a record path is set,
/// everything that was audible is rendered to a 16-bit mono WAV on close.
pub struct TimelineOutput {
    sample_rate: u32,
    epoch: Instant,
    next_id: SourceId,
    timers: HashMap<SourceId, JoinHandle<()>>,
    played: HashMap<SourceId, PlayedSource>,
    record_path: Option<PathBuf>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    closed: bool,
}

impl TimelineOutput {
    pub fn new(
        sample_rate: u32,
        record_path: Option<PathBuf>,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Self {
        info!(
            "Timeline output initialized: {}Hz (recording: {})",
            sample_rate,
            record_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "off".to_string())
        );

        Self {
            sample_rate,
            epoch: Instant::now(),
            next_id: 1,
            timers: HashMap::new(),
            played: HashMap::new(),
            record_path,
            events,
            closed: false,
        }
    }

    /// Forget timers of sources that already ended
    fn prune_timers(&mut self) {
        self.timers.retain(|_, timer| !timer.is_finished());
    }

    fn render(&self) -> Vec<f32> {
        let rate = self.sample_rate as f64;
        let mut timeline: Vec<f32> = Vec::new();

        for source in self.played.values() {
            let offset = (source.start * rate).round() as usize;
            let audible = match source.stopped_at {
                Some(stop) => (((stop - source.start) * rate).max(0.0) as usize).min(source.samples.len()),
                None => source.samples.len(),
            };

            if timeline.len() < offset + audible {
                timeline.resize(offset + audible, 0.0);
            }
            for (slot, &sample) in timeline[offset..offset + audible].iter_mut().zip(source.samples.iter()) {
                *slot += sample;
            }
        }

        timeline
    }

    fn write_recording(&self, path: &PathBuf) -> anyhow::Result<usize> {
        use anyhow::Context;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create recording directory")?;
        }

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer: hound::WavWriter<BufWriter<File>> = hound::WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        let timeline = self.render();
        for &sample in &timeline {
            writer
                .write_sample(codec::quantize(sample))
                .context("Failed to write sample to WAV")?;
        }

        writer.finalize().context("Failed to finalize WAV file")?;
        Ok(timeline.len())
    }
}

#[async_trait::async_trait]
impl AudioOutput for TimelineOutput {
    fn name(&self) -> &str {
        "timeline"
    }

    fn current_time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn is_suspended(&self) -> bool {
        false
    }

    async fn resume(&mut self) -> VoiceResult<()> {
        Ok(())
    }

    fn start_source(&mut self, chunk: &DecodedChunk, at: f64) -> VoiceResult<SourceId> {
        if self.closed {
            return Err(VoiceError::Playback("Output is closed".to_string()));
        }
        if chunk.sample_rate != self.sample_rate {
            return Err(VoiceError::Playback(format!(
                "Chunk sample rate {}Hz does not match output rate {}Hz",
                chunk.sample_rate, self.sample_rate
            )));
        }

        self.prune_timers();

        let id = self.next_id;
        self.next_id += 1;

        let end = at.max(0.0) + chunk.duration();
        let deadline = tokio::time::Instant::from_std(self.epoch) + Duration::from_secs_f64(end);
        let events = self.events.clone();

        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = events.send(PlaybackEvent::SourceEnded(id));
        });
        self.timers.insert(id, timer);

        if self.record_path.is_some() {
            self.played.insert(
                id,
                PlayedSource {
                    start: at.max(0.0),
                    samples: Arc::clone(&chunk.samples),
                    stopped_at: None,
                },
            );
        }

        debug!("Source {} scheduled at {:.3}s for {:.3}s", id, at, chunk.duration());
        Ok(id)
    }

    fn stop_source(&mut self, id: SourceId) {
        if let Some(timer) = self.timers.remove(&id) {
            timer.abort();
        }
        let now = self.current_time();
        if let Some(source) = self.played.get_mut(&id) {
            source.stopped_at.get_or_insert(now);
        }
    }

    async fn close(&mut self) -> VoiceResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        for (_, timer) in self.timers.drain() {
            timer.abort();
        }

        if let Some(path) = &self.record_path {
            match self.write_recording(path) {
                Ok(samples) => info!("Playback recorded to {} ({} samples)", path.display(), samples),
                Err(e) => {
                    warn!("Failed to record playback: {:#}", e);
                    return Err(VoiceError::Device(e.to_string()));
                }
            }
        }

        Ok(())
    }
}

impl Drop for TimelineOutput {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}
