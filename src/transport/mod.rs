pub mod client;
pub mod messages;

pub use client::{TransportConfig, TransportEvent, TransportSession, TransportState};
pub use messages::{EncodedChunk, ServerEvent};

/// Prebuilt voices offered by the model
pub const VOICE_OPTIONS: [&str; 8] = [
    "Puck", "Charon", "Kore", "Fenrir", "Aoede", "Leda", "Orus", "Zephyr",
];

pub const DEFAULT_VOICE: &str = "Zephyr";

pub fn is_known_voice(name: &str) -> bool {
    VOICE_OPTIONS.contains(&name)
}
