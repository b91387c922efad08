use std::path::PathBuf;

use tokio::sync::mpsc;

use super::accumulator::FrameAccumulator;
use super::file::ReplayCapture;
use super::output::{AudioOutput, PlaybackEvent, TimelineOutput};
use crate::error::VoiceResult;

/// One accumulated capture frame (16-bit PCM, mono, little-endian)
#[derive(Debug)]
pub struct AudioFrame {
    /// Raw PCM16 bytes, moved to the transport without copying
    pub pcm: Vec<u8>,
    /// Coarse amplitude level in [0, 100]
    pub level: f32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Position of this frame in the capture stream
    pub sequence: u64,
}

impl AudioFrame {
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }
}

/// Where microphone audio comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// Replay a WAV file in real time
    File(PathBuf),
    /// Paced silence
    Silence,
}

/// Audio capture device
///
/// The accumulator handed to `start` runs on the device's own callback
/// context; completed frames arrive on the returned channel.
#[async_trait::async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Start capturing audio
    async fn start(&mut self, accumulator: FrameAccumulator) -> VoiceResult<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> VoiceResult<()>;

    /// Enable or disable the capture track. A disabled track delivers silence.
    fn set_enabled(&mut self, enabled: bool);

    /// Check if device is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get device name for logging
    fn name(&self) -> &str;
}

/// Acquires the per-conversation capture device and audio output
///
/// Every call returns a fresh, exclusively owned resource.
pub trait AudioDevices: Send + Sync {
    /// Acquire the capture device (permission check happens here)
    fn open_capture(&self, sample_rate: u32) -> VoiceResult<Box<dyn CaptureDevice>>;

    /// Open an audio output whose completions are reported on `events`
    fn open_output(
        &self,
        session_id: &str,
        sample_rate: u32,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> VoiceResult<Box<dyn AudioOutput>>;
}

/// Devices built from configuration
#[derive(Debug, Clone)]
pub struct ConfiguredDevices {
    pub capture: CaptureSource,
    /// Samples delivered per capture callback
    pub callback_size: usize,
    /// Directory for rendered playback, if any
    pub record_dir: Option<PathBuf>,
}

impl AudioDevices for ConfiguredDevices {
    fn open_capture(&self, sample_rate: u32) -> VoiceResult<Box<dyn CaptureDevice>> {
        let device = match &self.capture {
            CaptureSource::File(path) => ReplayCapture::from_file(path, sample_rate, self.callback_size)?,
            CaptureSource::Silence => ReplayCapture::silence(sample_rate, self.callback_size),
        };
        Ok(Box::new(device))
    }

    fn open_output(
        &self,
        session_id: &str,
        sample_rate: u32,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> VoiceResult<Box<dyn AudioOutput>> {
        let record_path = self
            .record_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}-playback.wav", session_id)));

        Ok(Box::new(TimelineOutput::new(sample_rate, record_path, events)))
    }
}
