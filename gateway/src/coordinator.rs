//! Per-request flow of `POST /tts`.
//!
//! rate limit -> API key -> payload -> cache lookup -> synthesis -> cache write.
//! Every step that ends the request early maps to one [`ApiError`] variant;
//! cache trouble never does.

use std::net::IpAddr;
use std::sync::Arc;

use axum::body::Bytes;
use tracing::{info, warn};
use tts_core::{SynthesisRequest, Synthesizer};

use crate::cache::{CacheKey, CacheStore};
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::metrics::Stats;
use crate::rate_limit::RateLimiter;
use crate::validation::{parse_request_body, RequestBody};

const LOG_TEXT_PREVIEW: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSource {
    Cache,
    Fresh,
}

#[derive(Debug, Clone)]
pub struct TtsAudio {
    pub bytes: Bytes,
    pub source: AudioSource,
}

pub struct TtsCoordinator {
    config: ServerConfig,
    cache: Arc<CacheStore>,
    limiter: RateLimiter,
    stats: Stats,
    synthesizer: Arc<dyn Synthesizer>,
}

impl TtsCoordinator {
    pub fn new(config: ServerConfig, cache: CacheStore, synthesizer: Arc<dyn Synthesizer>) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_requests, config.rate_limit_window());
        Self {
            config,
            cache: Arc::new(cache),
            limiter,
            stats: Stats::new(),
            synthesizer,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Run one `POST /tts` request to completion.
    pub async fn handle(
        &self,
        identity: IpAddr,
        api_key: Option<&str>,
        body: &[u8],
    ) -> Result<TtsAudio, ApiError> {
        self.handle_body(identity, api_key, RequestBody::Buffered(body)).await
    }

    /// Like [`handle`](Self::handle), for bodies the handler may have given
    /// up buffering.
    pub async fn handle_body(
        &self,
        identity: IpAddr,
        api_key: Option<&str>,
        body: RequestBody<'_>,
    ) -> Result<TtsAudio, ApiError> {
        self.stats.record_request();

        if !self.limiter.admit(identity) {
            self.stats.record_rate_limited();
            warn!("Rate limited: {}", identity);
            return Err(ApiError::RateLimitExceeded);
        }

        if let Some(expected) = self.config.api_key.as_deref() {
            if api_key != Some(expected) {
                warn!("Unauthorized access: {}", identity);
                return Err(ApiError::Unauthorized);
            }
        }

        let request = parse_request_body(body, self.config.max_text_length).inspect_err(|e| {
            self.stats.record_error();
            warn!("Rejected request from {}: {}", identity, e);
        })?;

        info!(
            "Request from {}: {}... (voice: {})",
            identity,
            preview(&request.text),
            request.voice
        );

        let key = CacheKey::for_request(&request);
        if let Some(bytes) = self.lookup(&key).await {
            self.stats.record_cache_hit();
            info!("Cache hit: {}", key);
            return Ok(TtsAudio {
                bytes,
                source: AudioSource::Cache,
            });
        }

        self.stats.record_cache_miss();
        let bytes = self.synthesize(&request).await.inspect_err(|_| {
            self.stats.record_error();
        })?;

        self.persist(key, bytes.clone()).await;
        info!("Generated: {} bytes", bytes.len());
        Ok(TtsAudio {
            bytes,
            source: AudioSource::Fresh,
        })
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Bytes, ApiError> {
        match self.synthesizer.synthesize(request).await {
            Ok(audio) if audio.is_empty() => Err(ApiError::SynthesisFailed(
                "backend returned no audio".to_string(),
            )),
            Ok(audio) => Ok(Bytes::from(audio)),
            Err(e) => Err(ApiError::SynthesisFailed(format!("{e:#}"))),
        }
    }

    /// Read failures degrade to a miss.
    async fn lookup(&self, key: &CacheKey) -> Option<Bytes> {
        if !self.cache.is_enabled() {
            return None;
        }
        let cache = self.cache.clone();
        let key = key.clone();
        match tokio::task::spawn_blocking(move || cache.read(&key)).await {
            Ok(Ok(found)) => found.map(Bytes::from),
            Ok(Err(e)) => {
                warn!("Cache read error: {}", e);
                None
            }
            Err(e) => {
                warn!("Cache read task failed: {}", e);
                None
            }
        }
    }

    /// Write failures are logged; the caller still gets its audio.
    async fn persist(&self, key: CacheKey, bytes: Bytes) {
        if !self.cache.is_enabled() {
            return;
        }
        let cache = self.cache.clone();
        match tokio::task::spawn_blocking(move || cache.write(&key, &bytes)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Cache write error: {}", e),
            Err(e) => warn!("Cache write task failed: {}", e),
        }
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(LOG_TEXT_PREVIEW) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
