use serde::Deserialize;
use tts_core::{SynthesisRequest, DEFAULT_PITCH, DEFAULT_RATE, DEFAULT_VOICE};

use crate::error::ApiError;

/// JSON body of `POST /tts`.
#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_rate")]
    pub rate: String,
    #[serde(default = "default_pitch")]
    pub pitch: String,
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_rate() -> String {
    DEFAULT_RATE.to_string()
}

fn default_pitch() -> String {
    DEFAULT_PITCH.to_string()
}

impl From<TtsRequest> for SynthesisRequest {
    fn from(req: TtsRequest) -> Self {
        SynthesisRequest {
            text: req.text,
            voice: req.voice,
            rate: req.rate,
            pitch: req.pitch,
        }
    }
}

/// `POST /tts` body as the handler managed to buffer it.
#[derive(Debug, Clone, Copy)]
pub enum RequestBody<'a> {
    Buffered(&'a [u8]),
    /// Ran past [`ServerConfig::max_body_bytes`](crate::config::ServerConfig::max_body_bytes).
    TooLarge,
}

/// Decode and validate a `POST /tts` body. An oversized body is rejected
/// the same way as an over-long text.
pub fn parse_request_body(
    body: RequestBody<'_>,
    max_text_length: usize,
) -> Result<SynthesisRequest, ApiError> {
    match body {
        RequestBody::Buffered(bytes) => parse_tts_request(bytes, max_text_length),
        RequestBody::TooLarge => Err(text_too_long(max_text_length)),
    }
}

/// Decode and validate a raw `POST /tts` body.
pub fn parse_tts_request(body: &[u8], max_text_length: usize) -> Result<SynthesisRequest, ApiError> {
    let req: TtsRequest =
        serde_json::from_slice(body).map_err(|_| ApiError::InvalidInput("Invalid JSON".to_string()))?;
    validate_tts_request(&req.text, max_text_length)?;
    Ok(req.into())
}

/// Validate TTS request text
pub fn validate_tts_request(text: &str, max_text_length: usize) -> Result<(), ApiError> {
    if text.is_empty() {
        return Err(ApiError::InvalidInput("Text is required".to_string()));
    }
    // Length is counted in characters, not bytes.
    if text.chars().count() > max_text_length {
        return Err(text_too_long(max_text_length));
    }
    Ok(())
}

fn text_too_long(max_text_length: usize) -> ApiError {
    ApiError::InvalidInput(format!("Text too long (max {} characters)", max_text_length))
}
