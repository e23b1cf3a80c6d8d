// =============================================================================
// Provider Rate Limiter — token bucket per configured provider
// =============================================================================
//
// Each provider gets a bucket that refills at `requests_per_sec` tokens per
// second up to `burst`. `try_acquire` is lock-free on the fast path; the
// refill calculation only takes the mutex long enough to update the last-
// refill timestamp and token count.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::warn;

pub struct RateLimiter {
    tokens: AtomicU32,
    burst: u32,
    requests_per_sec: f64,
    last_refill: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(requests_per_sec: f64, burst: u32) -> Self {
        Self {
            tokens: AtomicU32::new(burst),
            burst,
            requests_per_sec,
            last_refill: Mutex::new(Instant::now()),
        }
    }

    fn refill(&self) {
        let mut last = self.last_refill.lock();
        let elapsed = last.elapsed().as_secs_f64();
        let new_tokens = (elapsed * self.requests_per_sec) as u32;
        if new_tokens > 0 {
            let current = self.tokens.load(Ordering::Relaxed);
            let updated = (current + new_tokens).min(self.burst);
            self.tokens.store(updated, Ordering::Relaxed);
            *last = Instant::now();
        }
    }

    /// Attempt to consume one token. Returns `false` (and logs) when the
    /// bucket is empty — the caller should back off rather than proceed.
    pub fn try_acquire(&self, provider: &str) -> bool {
        self.refill();
        let current = self.tokens.load(Ordering::Relaxed);
        if current == 0 {
            warn!(provider, "rate limiter exhausted — request blocked");
            return false;
        }
        self.tokens
            .compare_exchange(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_allows_up_to_capacity() {
        let limiter = RateLimiter::new(1.0, 3);
        assert!(limiter.try_acquire("p"));
        assert!(limiter.try_acquire("p"));
        assert!(limiter.try_acquire("p"));
        assert!(!limiter.try_acquire("p"));
    }

    #[test]
    fn refill_adds_tokens_back_over_time() {
        let limiter = RateLimiter::new(1000.0, 1);
        assert!(limiter.try_acquire("p"));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(limiter.try_acquire("p"));
    }
}
