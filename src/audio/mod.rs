pub mod accumulator;
pub mod backend;
pub mod codec;
pub mod file;
pub mod output;
pub mod scheduler;

pub use accumulator::{AccumulatorConfig, FrameAccumulator, OverflowPolicy};
pub use backend::{AudioDevices, AudioFrame, CaptureDevice, CaptureSource, ConfiguredDevices};
pub use file::{AudioFile, ReplayCapture};
pub use output::{AudioOutput, DecodedChunk, PlaybackEvent, SourceId, TimelineOutput};
pub use scheduler::{Completion, PassOutcome, PlaybackScheduler, SchedulerConfig};
