// Request statistics and latency tracking

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

const LATENCY_SAMPLES: usize = 1000;

/// Outcome counters for `POST /tts`.
///
/// Each counter is its own atomic. Snapshots read them one by one, so ratios
/// derived from a snapshot are approximate under load.
#[derive(Debug)]
pub struct Stats {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    errors: AtomicU64,
    rate_limited: AtomicU64,
    started_at: Instant,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs_f64(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            uptime_secs: self.uptime_secs_f64(),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
    pub rate_limited: u64,
    pub uptime_secs: f64,
}

impl StatsSnapshot {
    /// Hits as a percentage of lookups.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64 * 100.0
    }

    pub fn requests_per_second(&self) -> f64 {
        if self.uptime_secs <= 0.0 {
            return 0.0;
        }
        self.total_requests as f64 / self.uptime_secs
    }

    pub fn to_response(&self) -> StatsResponse {
        StatsResponse {
            uptime_seconds: self.uptime_secs as u64,
            total_requests: self.total_requests,
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            cache_hit_rate: format!("{:.1}%", self.cache_hit_rate()),
            errors: self.errors,
            rate_limited: self.rate_limited,
            requests_per_second: self.requests_per_second(),
        }
    }
}

/// Latency of served `/tts` requests
#[derive(Debug)]
pub struct EndpointMetrics {
    request_count: AtomicU64,
    error_count: AtomicU64,
    total_latency_ms: AtomicU64,
    min_latency_ms: AtomicU64,
    max_latency_ms: AtomicU64,
    latency_samples: Mutex<VecDeque<u64>>,
}

impl EndpointMetrics {
    pub fn new() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            min_latency_ms: AtomicU64::new(u64::MAX),
            max_latency_ms: AtomicU64::new(0),
            latency_samples: Mutex::new(VecDeque::with_capacity(LATENCY_SAMPLES)),
        }
    }

    pub fn record_request(&self, latency_ms: u64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_latency_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.latency_samples.lock() {
            if samples.len() == LATENCY_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(latency_ms);
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.request_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        total as f64 / count as f64
    }

    fn percentile(&self, p: u8) -> u64 {
        let Ok(samples) = self.latency_samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn stats(&self) -> EndpointStats {
        let min = self.min_latency_ms.load(Ordering::Relaxed);
        EndpointStats {
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
            min_latency_ms: if min == u64::MAX { 0 } else { min },
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            p50_latency_ms: self.percentile(50),
            p95_latency_ms: self.percentile(95),
            p99_latency_ms: self.percentile(99),
        }
    }
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub cache_enabled: bool,
    pub rate_limit: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: String,
    pub errors: u64,
    pub rate_limited: u64,
    pub requests_per_second: f64,
}

#[derive(Serialize)]
pub struct DetailedMetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub tts: EndpointStats,
    pub cache: CacheMetrics,
}

#[derive(Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
}

#[derive(Serialize)]
pub struct CacheMetrics {
    pub enabled: bool,
    pub entries: u64,
    pub size_bytes: u64,
    pub max_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let snap = Stats::new().snapshot();
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.cache_hits, 0);
        assert_eq!(snap.cache_misses, 0);
        assert_eq!(snap.errors, 0);
        assert_eq!(snap.rate_limited, 0);
        assert_eq!(snap.cache_hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_formatting() {
        let stats = Stats::new();
        for _ in 0..3 {
            stats.record_request();
        }
        stats.record_cache_hit();
        stats.record_cache_miss();
        stats.record_cache_miss();

        let resp = stats.snapshot().to_response();
        assert_eq!(resp.total_requests, 3);
        assert_eq!(resp.cache_hits, 1);
        assert_eq!(resp.cache_misses, 2);
        assert_eq!(resp.cache_hit_rate, "33.3%");
    }

    #[test]
    fn test_requests_per_second_handles_zero_uptime() {
        let snap = StatsSnapshot {
            total_requests: 10,
            cache_hits: 0,
            cache_misses: 0,
            errors: 0,
            rate_limited: 0,
            uptime_secs: 0.0,
        };
        assert_eq!(snap.requests_per_second(), 0.0);

        let snap = StatsSnapshot { uptime_secs: 5.0, ..snap };
        assert_eq!(snap.requests_per_second(), 2.0);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let stats = std::sync::Arc::new(Stats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_request();
                        stats.record_error();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 4000);
        assert_eq!(snap.errors, 4000);
    }

    #[test]
    fn test_endpoint_latency_summary() {
        let metrics = EndpointMetrics::new();
        assert_eq!(metrics.stats().min_latency_ms, 0);

        for ms in [10, 20, 30, 40] {
            metrics.record_request(ms);
        }
        metrics.record_error();

        let stats = metrics.stats();
        assert_eq!(stats.request_count, 4);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.min_latency_ms, 10);
        assert_eq!(stats.max_latency_ms, 40);
        assert_eq!(stats.avg_latency_ms, 25.0);
        assert_eq!(stats.p50_latency_ms, 30);
        assert_eq!(stats.p99_latency_ms, 40);
    }

    #[test]
    fn test_latency_samples_are_bounded() {
        let metrics = EndpointMetrics::new();
        for ms in 0..(LATENCY_SAMPLES as u64 + 500) {
            metrics.record_request(ms);
        }
        assert_eq!(metrics.latency_samples.lock().unwrap().len(), LATENCY_SAMPLES);
        // Oldest samples were dropped.
        assert_eq!(metrics.stats().p50_latency_ms, 1000);
    }
}
