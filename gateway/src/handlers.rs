use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use tracing::debug;

use crate::coordinator::{AudioSource, TtsAudio};
use crate::error::ApiError;
use crate::metrics::{
    CacheMetrics, DetailedMetricsResponse, HealthResponse, StatsResponse, SystemMetrics,
};
use crate::validation::RequestBody;
use crate::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

pub async fn tts_endpoint(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let start = Instant::now();
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    // The coordinator still counts and answers a body we refuse to buffer.
    let limit = state.coordinator.config().max_body_bytes();
    let buffered = to_bytes(body, limit).await;
    let body = match &buffered {
        Ok(bytes) => RequestBody::Buffered(&bytes[..]),
        Err(e) => {
            debug!("Request body from {} not buffered: {}", peer, e);
            RequestBody::TooLarge
        }
    };

    let result = state.coordinator.handle_body(peer.ip(), api_key, body).await;

    match &result {
        Ok(_) => state
            .latency
            .record_request(start.elapsed().as_millis() as u64),
        Err(ApiError::SynthesisFailed(_)) | Err(ApiError::InternalError(_)) => {
            state.latency.record_error()
        }
        Err(_) => {}
    }

    result.map(audio_response)
}

fn audio_response(audio: TtsAudio) -> Response {
    let cache_status = match audio.source {
        AudioSource::Cache => "HIT",
        AudioSource::Fresh => "MISS",
    };
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
            (header::HeaderName::from_static("x-cache"), cache_status),
        ],
        audio.bytes,
    )
        .into_response()
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = state.coordinator.config();
    Json(HealthResponse {
        status: "healthy",
        uptime_seconds: state.coordinator.stats().uptime_secs_f64() as u64,
        cache_enabled: config.cache_enabled,
        rate_limit: config.rate_limit_label(),
    })
}

pub async fn stats_endpoint(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(state.coordinator.stats().snapshot().to_response())
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<DetailedMetricsResponse> {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    // CPU usage is a delta between two refreshes; a single sample reads 0.
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    system.refresh_cpu();
    let cpu_usage = system.global_cpu_info().cpu_usage();

    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    // Get system load (Unix-like systems only)
    let system_load = {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/proc/loadavg")
                .ok()
                .and_then(|l| l.split_whitespace().next().and_then(|s| s.parse::<f64>().ok()))
        }
        #[cfg(not(unix))]
        None
    };

    let store = state.coordinator.cache().clone();
    let usage = tokio::task::spawn_blocking(move || store.usage())
        .await
        .ok()
        .and_then(|r| r.ok())
        .unwrap_or_default();

    Json(DetailedMetricsResponse {
        timestamp: Utc::now(),
        system: SystemMetrics {
            cpu_usage_percent: cpu_usage,
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            uptime_seconds: state.coordinator.stats().uptime_secs_f64() as u64,
            system_load,
        },
        tts: state.latency.stats(),
        cache: CacheMetrics {
            enabled: state.coordinator.cache().is_enabled(),
            entries: usage.entries,
            size_bytes: usage.bytes,
            max_size_bytes: state.coordinator.cache().max_bytes(),
        },
    })
}

/// OPTIONS that is not a CORS preflight still gets an empty 200.
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

pub async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        ApiError::NotFound.into_response()
    }
}
