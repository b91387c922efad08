// Capture frame accumulator
//
// Runs inside the capture callback. Incoming float samples are collected into
// a fixed-size frame; each full frame is quantized to PCM16, given a coarse
// amplitude level and handed to the session layer.

use serde::{Deserialize, Serialize};

use super::backend::AudioFrame;
use super::codec;

/// What happens to samples that arrive after the current frame is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Surplus samples in the same callback are discarded
    #[default]
    Drop,
    /// Surplus samples start the next frame
    Carry,
}

/// Accumulator configuration
#[derive(Debug, Clone)]
pub struct AccumulatorConfig {
    /// Samples per emitted frame
    pub frame_size: usize,
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Visual amplification applied to the level
    pub gain: f32,
    pub overflow: OverflowPolicy,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            frame_size: 2048,
            sample_rate: 16000,
            gain: 5.0,
            overflow: OverflowPolicy::Drop,
        }
    }
}

/// Collects capture samples into fixed-size PCM16 frames
pub struct FrameAccumulator {
    config: AccumulatorConfig,
    buffer: Vec<f32>,
    sequence: u64,
}

impl FrameAccumulator {
    pub fn new(mut config: AccumulatorConfig) -> Self {
        config.frame_size = config.frame_size.max(1);
        let buffer = Vec::with_capacity(config.frame_size);
        Self {
            config,
            buffer,
            sequence: 0,
        }
    }

    /// Feed one callback's worth of samples, returning any completed frames
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        let mut remaining = samples;

        loop {
            let needed = self.config.frame_size - self.buffer.len();
            let take = needed.min(remaining.len());
            self.buffer.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];

            if self.buffer.len() < self.config.frame_size {
                break;
            }

            frames.push(self.emit());

            if remaining.is_empty() || self.config.overflow == OverflowPolicy::Drop {
                break;
            }
        }

        frames
    }

    /// Samples buffered toward the next frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Discard a partial frame
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn config(&self) -> &AccumulatorConfig {
        &self.config
    }

    fn emit(&mut self) -> AudioFrame {
        let mut pcm = Vec::with_capacity(self.buffer.len() * 2);
        let mut sum: u64 = 0;

        for &sample in &self.buffer {
            let value = codec::quantize(sample);
            sum += value.unsigned_abs() as u64;
            pcm.extend_from_slice(&value.to_le_bytes());
        }

        // Mean absolute amplitude, not RMS
        let mean = sum as f32 / self.buffer.len() as f32;
        let level = (mean / i16::MAX as f32 * 100.0 * self.config.gain).min(100.0);

        let frame = AudioFrame {
            pcm,
            level,
            sample_rate: self.config.sample_rate,
            sequence: self.sequence,
        };

        self.sequence += 1;
        self.buffer.clear();
        frame
    }
}
