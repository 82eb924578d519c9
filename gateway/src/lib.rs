//! HTTP gateway in front of a speech synthesis backend: caching, per-client
//! rate limiting, optional API key and request statistics.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod rate_limit;
pub mod validation;

use std::sync::Arc;

use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::coordinator::TtsCoordinator;
use crate::error::ApiError;
use crate::handlers::{
    fallback, health_check, metrics_endpoint, preflight, stats_endpoint, tts_endpoint,
};
use crate::metrics::EndpointMetrics;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<TtsCoordinator>,
    pub latency: Arc<EndpointMetrics>,
}

impl AppState {
    pub fn new(coordinator: TtsCoordinator) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            latency: Arc::new(EndpointMetrics::new()),
        }
    }
}

pub fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(handlers::API_KEY_HEADER)])
        .allow_credentials(false);

    if config.allows_any_origin() {
        return base.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        warn!("ALLOWED_ORIGINS has no usable entries, falling back to permissive CORS");
        base.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = value.clone() {
        request.headers_mut().insert("x-request-id", value);
    }
    let mut response = next.run(request).await;
    if let Some(value) = value {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Turns a panic inside `POST /tts` into a counted 500.
fn tts_panic_handler(
    state: AppState,
) -> impl Fn(Box<dyn std::any::Any + Send + 'static>) -> Response + Clone {
    move |panic| {
        let detail = if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = panic.downcast_ref::<&str>() {
            s.to_string()
        } else {
            "unknown panic".to_string()
        };
        error!("TTS handler panicked: {}", detail);
        state.coordinator.stats().record_error();
        state.latency.record_error();
        ApiError::InternalError("request handler panicked".to_string()).into_response()
    }
}

/// Full application router. Serve it with connect info so the rate limiter
/// can see peer addresses.
pub fn build_router(state: AppState) -> Router {
    let config = state.coordinator.config().clone();

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(&config))
        .into_inner();

    let api = Router::new()
        .route("/health", get(health_check).options(preflight))
        .route("/healthz", get(health_check).options(preflight))
        .route("/stats", get(stats_endpoint).options(preflight))
        .route("/metrics", get(metrics_endpoint).options(preflight))
        .route(
            "/tts",
            post(tts_endpoint)
                .options(preflight)
                .layer(CatchPanicLayer::custom(tts_panic_handler(state.clone()))),
        );

    Router::new()
        .merge(api.clone()) // root paths
        .nest("/api", api) // /api prefix
        .fallback(fallback)
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state)
}
