use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fixed-window failure counter keyed by client.
///
/// Only failures are recorded; a client that has used up its window is refused before the
/// credential is even compared, so a correct guess cannot slip through a blocked window.
#[derive(Clone)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    entries: Arc<DashMap<String, (u32, Instant)>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn is_exhausted(&self, key: &str) -> bool {
        self.is_exhausted_at(key, Instant::now())
    }

    pub fn record_failure(&self, key: &str) {
        self.record_failure_at(key, Instant::now())
    }

    fn is_exhausted_at(&self, key: &str, now: Instant) -> bool {
        self.entries
            .get(key)
            .map(|entry| now.duration_since(entry.1) <= self.window && entry.0 >= self.limit)
            .unwrap_or(false)
    }

    fn record_failure_at(&self, key: &str, now: Instant) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if now.duration_since(entry.1) > self.window {
                *entry = (1, now);
            } else {
                entry.0 += 1;
            }
            return;
        }
        let window = self.window;
        self.entries
            .retain(|_, (_, started)| now.duration_since(*started) <= window);
        self.entries.insert(key.to_string(), (1, now));
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_limit_within_window() {
        let limiter = RateLimiter::per_minute(3);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(!limiter.is_exhausted_at("10.0.0.1", now));
            limiter.record_failure_at("10.0.0.1", now);
        }
        assert!(limiter.is_exhausted_at("10.0.0.1", now));
        assert!(!limiter.is_exhausted_at("10.0.0.2", now));
    }

    #[test]
    fn window_expiry_resets_and_evicts_stale_keys() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();
        limiter.record_failure_at("a", start);
        assert!(limiter.is_exhausted_at("a", start));

        let later = start + Duration::from_secs(61);
        assert!(!limiter.is_exhausted_at("a", later));
        limiter.record_failure_at("b", later);
        assert_eq!(limiter.tracked_keys(), 1);

        limiter.record_failure_at("b", later);
        assert!(limiter.is_exhausted_at("b", later));
    }
}
