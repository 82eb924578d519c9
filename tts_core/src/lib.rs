//! Speech synthesis boundary used by the gateway.
//!
//! The gateway never generates audio itself. It hands a [`SynthesisRequest`]
//! to something implementing [`Synthesizer`] and gets encoded audio bytes
//! back (MP3 for the default backend).

pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use remote::RemoteSynthesizer;

pub const DEFAULT_VOICE: &str = "en-US-AriaNeural";
pub const DEFAULT_RATE: &str = "+0%";
pub const DEFAULT_PITCH: &str = "+0Hz";

/// Parameters of a single synthesis call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    pub rate: String,
    pub pitch: String,
}

impl SynthesisRequest {
    /// Request with the default voice, rate and pitch.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: DEFAULT_VOICE.to_string(),
            rate: DEFAULT_RATE.to_string(),
            pitch: DEFAULT_PITCH.to_string(),
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_rate(mut self, rate: impl Into<String>) -> Self {
        self.rate = rate.into();
        self
    }

    pub fn with_pitch(mut self, pitch: impl Into<String>) -> Self {
        self.pitch = pitch.into();
        self
    }
}

/// A speech backend.
///
/// Implementations may return an empty buffer; callers decide whether that
/// counts as a failure.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> anyhow::Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req = SynthesisRequest::new("Hello");
        assert_eq!(req.text, "Hello");
        assert_eq!(req.voice, "en-US-AriaNeural");
        assert_eq!(req.rate, "+0%");
        assert_eq!(req.pitch, "+0Hz");
    }

    #[test]
    fn test_request_builders() {
        let req = SynthesisRequest::new("Hallo")
            .with_voice("de-DE-KatjaNeural")
            .with_rate("+10%")
            .with_pitch("-5Hz");
        assert_eq!(req.voice, "de-DE-KatjaNeural");
        assert_eq!(req.rate, "+10%");
        assert_eq!(req.pitch, "-5Hz");
    }
}
