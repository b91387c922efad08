//! Conversion between base64 PCM16 (little-endian) and normalized float samples.

use base64::Engine;

use crate::error::VoiceResult;

/// Divisor used when normalizing inbound PCM16 to [-1.0, 1.0)
const DECODE_SCALE: f32 = 32768.0;

/// Multiplier used when quantizing outbound float samples
const ENCODE_SCALE: f32 = 32767.0;

/// Decode a base64 PCM16 payload into normalized float samples.
///
/// A trailing odd byte cannot form a sample and is ignored.
pub fn decode(data: &str) -> VoiceResult<Vec<f32>> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / DECODE_SCALE)
        .collect())
}

/// Quantize one float sample to PCM16
#[inline]
pub fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * ENCODE_SCALE).round() as i16
}

/// Encode float samples as little-endian PCM16 bytes
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&quantize(sample).to_le_bytes());
    }
    bytes
}

/// Base64 text for raw PCM bytes
pub fn encode_base64(pcm: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm)
}
