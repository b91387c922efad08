// Playback scheduler
//
// Decoded chunks are queued in arrival order and committed to the output in
// batches of at most `max_lookahead`, each starting exactly where the previous
// one ends on the output clock:
//
//     start = max(clock_now, scheduled_end)
//
// Only the tail source of a batch carries the completion that triggers the
// next pass. An in-flight batch is the single-flight guard: while one exists,
// further passes are no-ops.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::output::{AudioOutput, DecodedChunk, SourceId};
use crate::error::{VoiceError, VoiceResult};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum chunks committed per pass
    pub max_lookahead: usize,
    /// Delay before retrying after a pass scheduled nothing
    pub retry_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_lookahead: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Result of one scheduling pass
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// A batch is already in flight
    Busy,
    /// Nothing queued
    Idle,
    /// `count` chunks were committed starting at `start`
    Scheduled { count: usize, start: f64 },
    /// Nothing could be scheduled; try again after the delay
    Retry(Duration),
}

/// Result of a source completion
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Not the tail of the in-flight batch
    Ignored,
    /// The batch finished and another pass ran
    Continued(PassOutcome),
    /// The batch finished and the buffer is empty
    Drained,
}

struct Batch {
    sources: Vec<SourceId>,
    tail: SourceId,
}

pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    config: SchedulerConfig,
    queue: VecDeque<DecodedChunk>,
    scheduled_end: f64,
    batch: Option<Batch>,
    dropped_chunks: usize,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>, config: SchedulerConfig) -> Self {
        info!(
            "Playback scheduler initialized: output={}, lookahead={}",
            output.name(),
            config.max_lookahead
        );

        Self {
            output,
            config,
            queue: VecDeque::new(),
            scheduled_end: 0.0,
            batch: None,
            dropped_chunks: 0,
        }
    }

    /// Append a chunk; returns true when a pass should run now
    pub fn enqueue(&mut self, chunk: DecodedChunk) -> bool {
        self.queue.push_back(chunk);
        self.batch.is_none()
    }

    /// Commit the next batch to the output
    pub async fn schedule(&mut self) -> VoiceResult<PassOutcome> {
        if self.batch.is_some() {
            return Ok(PassOutcome::Busy);
        }
        if self.queue.is_empty() {
            return Ok(PassOutcome::Idle);
        }

        if self.output.is_suspended() {
            info!("Resuming audio clock for playback");
            if let Err(e) = self.output.resume().await {
                error!("Failed to resume audio clock: {}", e);
                self.queue.clear();
                self.scheduled_end = 0.0;
                return Err(VoiceError::Playback(format!("Audio clock unavailable: {}", e)));
            }
        }

        let start = self.output.current_time().max(self.scheduled_end);
        let mut cursor = start;
        let take = self.queue.len().min(self.config.max_lookahead.max(1));
        let mut sources = Vec::with_capacity(take);

        while sources.len() < take {
            let index = sources.len();
            match self.output.start_source(&self.queue[index], cursor) {
                Ok(id) => {
                    debug!("Scheduled chunk {} at {:.3}s", index, cursor);
                    cursor += self.queue[index].duration();
                    sources.push(id);
                }
                Err(e) => {
                    warn!("Dropping chunk that failed to schedule: {}", e);
                    self.queue.remove(index);
                    self.dropped_chunks += 1;
                    break;
                }
            }
        }

        match sources.last().copied() {
            Some(tail) => {
                let count = sources.len();
                self.scheduled_end = cursor;
                self.batch = Some(Batch { sources, tail });
                debug!("Batch of {} chunks runs {:.3}s..{:.3}s", count, start, cursor);
                Ok(PassOutcome::Scheduled { count, start })
            }
            None if self.queue.is_empty() => Ok(PassOutcome::Idle),
            None => Ok(PassOutcome::Retry(self.config.retry_delay)),
        }
    }

    /// Handle a source reaching its end
    pub async fn on_source_ended(&mut self, id: SourceId) -> VoiceResult<Completion> {
        let finished = match &self.batch {
            Some(batch) if batch.tail == id => batch.sources.len(),
            _ => return Ok(Completion::Ignored),
        };

        self.batch = None;
        self.queue.drain(..finished.min(self.queue.len()));

        if self.queue.is_empty() {
            debug!("Playback buffer drained");
            self.scheduled_end = 0.0;
            return Ok(Completion::Drained);
        }

        Ok(Completion::Continued(self.schedule().await?))
    }

    /// Cut playback short: stop in-flight sources and discard everything queued
    ///
    /// Returns the number of chunks discarded.
    pub fn interrupt(&mut self) -> usize {
        if let Some(batch) = self.batch.take() {
            for id in batch.sources {
                self.output.stop_source(id);
            }
        }

        let discarded = self.queue.len();
        self.queue.clear();
        self.scheduled_end = 0.0;
        discarded
    }

    /// Clear all playback state
    pub fn reset(&mut self) {
        self.interrupt();
        self.dropped_chunks = 0;
    }

    /// Reset and release the output
    pub async fn close(&mut self) -> VoiceResult<()> {
        self.reset();
        self.output.close().await
    }

    pub fn is_playing(&self) -> bool {
        self.batch.is_some()
    }

    /// Chunks waiting or playing
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn scheduled_end(&self) -> f64 {
        self.scheduled_end
    }

    pub fn dropped_chunks(&self) -> usize {
        self.dropped_chunks
    }
}
