//! Common utilities for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    extract::connect_info::MockConnectInfo,
    http::{Request, Response},
    Router,
};
use gateway::{
    build_router, cache::CacheStore, config::ServerConfig, coordinator::TtsCoordinator, AppState,
};
use tower::ServiceExt;
use tts_core::{SynthesisRequest, Synthesizer};

pub const AUDIO: &[u8] = b"ID3...audio...";

/// Synthesizer double that returns fixed bytes and counts calls.
pub struct FakeSynth {
    audio: Vec<u8>,
    outcome: Outcome,
    calls: AtomicUsize,
}

enum Outcome {
    Audio,
    Fail,
    Panic,
}

impl FakeSynth {
    fn with(audio: &[u8], outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            audio: audio.to_vec(),
            outcome,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn returning(audio: &[u8]) -> Arc<Self> {
        Self::with(audio, Outcome::Audio)
    }

    pub fn failing() -> Arc<Self> {
        Self::with(&[], Outcome::Fail)
    }

    pub fn panicking() -> Arc<Self> {
        Self::with(&[], Outcome::Panic)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for FakeSynth {
    async fn synthesize(&self, _request: &SynthesisRequest) -> anyhow::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcome {
            Outcome::Audio => Ok(self.audio.clone()),
            Outcome::Fail => anyhow::bail!("backend exploded"),
            Outcome::Panic => panic!("synthesizer bug"),
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub synth: Arc<FakeSynth>,
}

/// Config with caching off and a generous rate limit.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        cache_enabled: false,
        rate_limit_requests: 1000,
        rate_limit_window_secs: 60,
        ..ServerConfig::default()
    }
}

/// Create a test app instance served as if from `127.0.0.1`.
pub fn create_test_app(config: ServerConfig, cache: CacheStore, synth: Arc<FakeSynth>) -> TestApp {
    let state = AppState::new(TtsCoordinator::new(config, cache, synth.clone()));
    let router = build_router(state.clone())
        .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    TestApp {
        router,
        state,
        synth,
    }
}

pub fn tts_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/tts")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn send(app: &TestApp, request: Request<Body>) -> Response<Body> {
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
