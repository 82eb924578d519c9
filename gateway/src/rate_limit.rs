// Sliding-window rate limiting keyed by client address

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Admits at most `limit` requests per identity in any trailing `window`.
///
/// One lock covers the whole table, so prune, check and record happen as a
/// single step for each call.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// A `limit` of zero turns the limiter off.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn admit(&self, identity: IpAddr) -> bool {
        self.admit_at(identity, Instant::now())
    }

    /// Denied requests are not recorded.
    pub fn admit_at(&self, identity: IpAddr, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }

        // A poisoned table is still structurally valid: every mutation below
        // leaves it consistent.
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        let stamps = windows.entry(identity).or_default();
        Self::prune(stamps, now, self.window);

        if stamps.len() >= self.limit as usize {
            return false;
        }
        stamps.push_back(now);
        true
    }

    /// Drop identities with no request inside the window.
    pub fn purge_idle(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        let before = windows.len();
        windows.retain(|_, stamps| {
            Self::prune(stamps, now, self.window);
            !stamps.is_empty()
        });
        before - windows.len()
    }

    pub fn tracked_identities(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    // Timestamps are appended in call order, so expired ones sit at the front.
    // `saturating_duration_since` keeps out-of-order `now` values from panicking.
    fn prune(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&oldest) = stamps.front() {
            if now.saturating_duration_since(oldest) >= window {
                stamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_fourth_request_in_window_is_denied() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        let results: Vec<bool> = (0..4)
            .map(|i| limiter.admit_at(ip(1), start + Duration::from_millis(i * 200)))
            .collect();
        assert_eq!(results, vec![true, true, true, false]);
    }

    #[test]
    fn test_admits_again_after_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            assert!(limiter.admit_at(ip(1), start));
        }
        assert!(!limiter.admit_at(ip(1), start + Duration::from_secs(30)));
        // Entries exactly one window old no longer count.
        assert!(limiter.admit_at(ip(1), start + Duration::from_secs(60)));
    }

    #[test]
    fn test_denied_requests_are_not_recorded() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        let start = Instant::now();
        assert!(limiter.admit_at(ip(1), start));
        for s in 1..10 {
            assert!(!limiter.admit_at(ip(1), start + Duration::from_secs(s)));
        }
        // Only the first admission occupies the window.
        assert!(limiter.admit_at(ip(1), start + Duration::from_secs(10)));
    }

    #[test]
    fn test_identities_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.admit_at(ip(1), now));
        assert!(!limiter.admit_at(ip(1), now));
        assert!(limiter.admit_at(ip(2), now));
    }

    #[test]
    fn test_zero_limit_disables() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..1000 {
            assert!(limiter.admit_at(ip(1), now));
        }
        assert_eq!(limiter.tracked_identities(), 0);
    }

    #[test]
    fn test_purge_idle_drops_expired_identities() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let start = Instant::now();
        limiter.admit_at(ip(1), start);
        limiter.admit_at(ip(2), start + Duration::from_secs(50));
        assert_eq!(limiter.tracked_identities(), 2);

        let removed = limiter.purge_idle(start + Duration::from_secs(70));
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_identities(), 1);
    }

    #[test]
    fn test_concurrent_callers_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::new(10, Duration::from_secs(60)));
        let admitted = Arc::new(AtomicUsize::new(0));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let admitted = admitted.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        if limiter.admit_at(ip(7), now) {
                            admitted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(admitted.load(Ordering::Relaxed), 10);
    }
}
