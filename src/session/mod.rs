//! Voice session management
//!
//! This module provides the `VoiceSession` actor that manages:
//! - Microphone capture and half-duplex frame forwarding
//! - The duplex connection to the voice model
//! - Gapless playback of model audio
//! - Session state, status snapshots and teardown

mod access;
mod config;
mod session;
mod state;
mod stats;

pub use access::{Authorizer, StaticAuthorizer};
pub use config::SessionConfig;
pub use session::{SessionHandle, VoiceSession};
pub use state::{SessionState, StateMachine};
pub use stats::SessionStatus;
