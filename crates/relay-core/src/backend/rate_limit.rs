use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Concurrent map keyed by `(backend, keyName)` (5. Locking). Tracks only the
/// "limited until" deadline observed from a prior 429 with `Retry-After` —
/// there is no proactive token-bucket model here, since the source leaves
/// exact rate-limiter semantics undefined (9. Open Questions). The limiter's
/// job is to let the dispatch loop skip a step/key still serving out a prior
/// backoff, not to throttle traffic it hasn't seen fail yet.
#[derive(Default)]
pub struct RateLimiter {
    limited_until: Mutex<HashMap<(String, String), Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_limited(&self, backend: &str, key_name: &str) -> bool {
        let map = self.limited_until.lock().unwrap();
        map.get(&(backend.to_string(), key_name.to_string()))
            .map(|until| Instant::now() < *until)
            .unwrap_or(false)
    }

    pub fn mark_limited(&self, backend: &str, key_name: &str, retry_after: Duration) {
        let mut map = self.limited_until.lock().unwrap();
        map.insert((backend.to_string(), key_name.to_string()), Instant::now() + retry_after);
    }

    pub fn record_success(&self, backend: &str, key_name: &str) {
        let mut map = self.limited_until.lock().unwrap();
        map.remove(&(backend.to_string(), key_name.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_and_expires() {
        let limiter = RateLimiter::new();
        assert!(!limiter.is_limited("openrouter", "k1"));
        limiter.mark_limited("openrouter", "k1", Duration::from_millis(20));
        assert!(limiter.is_limited("openrouter", "k1"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!limiter.is_limited("openrouter", "k1"));
    }

    #[test]
    fn success_clears_limit() {
        let limiter = RateLimiter::new();
        limiter.mark_limited("openrouter", "k1", Duration::from_secs(30));
        limiter.record_success("openrouter", "k1");
        assert!(!limiter.is_limited("openrouter", "k1"));
    }
}
