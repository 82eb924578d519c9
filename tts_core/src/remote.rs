use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::debug;

use crate::{SynthesisRequest, Synthesizer};

/// Synthesizer backed by an HTTP service.
///
/// The request is POSTed as JSON (`text`, `voice`, `rate`, `pitch`) and the
/// response body is taken verbatim as the audio payload.
pub struct RemoteSynthesizer {
    client: Client,
    endpoint: String,
}

impl RemoteSynthesizer {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        Self::build(endpoint.into(), None)
    }

    /// Same as [`RemoteSynthesizer::new`] but every call is bounded by `timeout`.
    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        Self::build(endpoint.into(), Some(timeout))
    }

    fn build(endpoint: String, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .context("failed to build HTTP client for synthesis backend")?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Synthesizer for RemoteSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(header::ACCEPT, "audio/mpeg")
            .json(request)
            .send()
            .await
            .with_context(|| format!("synthesis backend unreachable at {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("synthesis backend returned {status}: {body}"));
        }

        let audio = response
            .bytes()
            .await
            .context("failed to read audio from synthesis backend")?;
        debug!(bytes = audio.len(), voice = %request.voice, "backend synthesis complete");
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use tokio::net::TcpListener;

    async fn spawn_backend(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/synthesize")
    }

    #[tokio::test]
    async fn test_remote_returns_body_bytes() {
        let app = Router::new().route(
            "/synthesize",
            post(|Json(req): Json<SynthesisRequest>| async move {
                format!("ID3:{}:{}", req.text, req.voice).into_bytes()
            }),
        );
        let url = spawn_backend(app).await;

        let synth = RemoteSynthesizer::new(url).unwrap();
        let audio = synth
            .synthesize(&SynthesisRequest::new("Hello world"))
            .await
            .unwrap();
        assert_eq!(audio, b"ID3:Hello world:en-US-AriaNeural".to_vec());
    }

    #[tokio::test]
    async fn test_remote_error_status_is_failure() {
        let app = Router::new().route(
            "/synthesize",
            post(|| async { (StatusCode::BAD_GATEWAY, "voice unavailable") }),
        );
        let url = spawn_backend(app).await;

        let synth = RemoteSynthesizer::with_timeout(url, Duration::from_secs(5)).unwrap();
        let err = synth
            .synthesize(&SynthesisRequest::new("Hello"))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("502"));
        assert!(msg.contains("voice unavailable"));
    }

    #[tokio::test]
    async fn test_remote_unreachable_is_failure() {
        // Bind and drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let synth = RemoteSynthesizer::new(format!("http://{addr}/synthesize")).unwrap();
        assert!(synth.synthesize(&SynthesisRequest::new("Hello")).await.is_err());
    }
}
