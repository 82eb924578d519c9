// Configuration for the gateway, read once at startup

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub cache_enabled: bool,
    pub cache_dir: PathBuf,
    pub cache_max_size_mb: u64,
    /// Requests admitted per identity and window. Zero disables rate limiting.
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub api_key: Option<String>,
    pub max_text_length: usize,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
    pub backend_url: String,
    pub backend_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8765,
            cache_enabled: true,
            cache_dir: PathBuf::from("cache"),
            cache_max_size_mb: 500,
            rate_limit_requests: 100,
            rate_limit_window_secs: 60,
            api_key: None,
            max_text_length: 5000,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 60,
            backend_url: "http://127.0.0.1:5050/synthesize".to_string(),
            backend_timeout_secs: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = env_parse("PORT").unwrap_or(defaults.port);

        let cache_enabled = std::env::var("CACHE_ENABLED")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.cache_enabled);

        let cache_dir = std::env::var("CACHE_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let cache_max_size_mb = env_parse("CACHE_MAX_SIZE_MB").unwrap_or(defaults.cache_max_size_mb);

        // Negative values are accepted and mean "disabled", same as zero.
        let rate_limit_requests = env_parse::<i64>("RATE_LIMIT_REQUESTS")
            .map(|n| n.clamp(0, u32::MAX as i64) as u32)
            .unwrap_or(defaults.rate_limit_requests);

        let rate_limit_window_secs =
            env_parse("RATE_LIMIT_WINDOW").unwrap_or(defaults.rate_limit_window_secs);

        let api_key = std::env::var("TTS_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());

        let max_text_length = env_parse("MAX_TEXT_LENGTH").unwrap_or(defaults.max_text_length);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|origins| parse_origins(&origins))
            .unwrap_or(defaults.allowed_origins);

        let request_timeout_secs =
            env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(defaults.request_timeout_secs);

        let backend_url = std::env::var("TTS_BACKEND_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.backend_url);

        let backend_timeout_secs = env_parse("TTS_BACKEND_TIMEOUT_SECS");

        Self {
            port,
            cache_enabled,
            cache_dir,
            cache_max_size_mb,
            rate_limit_requests,
            rate_limit_window_secs,
            api_key,
            max_text_length,
            allowed_origins,
            request_timeout_secs,
            backend_url,
            backend_timeout_secs,
        }
    }

    pub fn cache_max_bytes(&self) -> u64 {
        self.cache_max_size_mb * 1024 * 1024
    }

    /// Largest `POST /tts` body buffered before the text length check.
    /// A single character can take up to 12 bytes as an escaped JSON
    /// surrogate pair; the slack covers the other fields.
    pub fn max_body_bytes(&self) -> usize {
        self.max_text_length
            .saturating_mul(12)
            .saturating_add(BODY_SLACK_BYTES)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn backend_timeout(&self) -> Option<Duration> {
        self.backend_timeout_secs.map(Duration::from_secs)
    }

    /// Human readable limit, e.g. `100/60s`.
    pub fn rate_limit_label(&self) -> String {
        format!("{}/{}s", self.rate_limit_requests, self.rate_limit_window_secs)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

const BODY_SLACK_BYTES: usize = 64 * 1024;

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
