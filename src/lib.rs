pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod transport;

pub use audio::{
    AudioDevices, AudioFile, AudioFrame, AudioOutput, CaptureDevice, CaptureSource, ConfiguredDevices,
    DecodedChunk, FrameAccumulator, PlaybackScheduler, TimelineOutput,
};
pub use config::Config;
pub use error::{VoiceError, VoiceResult};
pub use http::{create_router, AppState};
pub use session::{
    Authorizer, SessionConfig, SessionHandle, SessionState, SessionStatus, StaticAuthorizer, VoiceSession,
};
pub use transport::{EncodedChunk, ServerEvent, TransportConfig, TransportEvent, TransportSession};
