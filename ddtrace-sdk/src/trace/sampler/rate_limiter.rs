use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Token bucket bounding how many traces per second may be kept by rules
/// or the configured sample rate.
///
/// The bucket holds at most `limit` tokens and refills continuously at
/// `limit` tokens per second. It also tracks the share of requests allowed,
/// reported on limited traces as `_dd.limit_psr`.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    limit: f64,
    state: Mutex<LimiterState>,
}

#[derive(Debug)]
struct LimiterState {
    tokens: f64,
    last_refill: Instant,
    window_start: Instant,
    window_allowed: u64,
    window_seen: u64,
    previous_rate: Option<f64>,
}

const WINDOW: Duration = Duration::from_secs(1);

impl RateLimiter {
    /// Returns `None` for a limit of zero, which disables limiting.
    pub(crate) fn new(limit: u32) -> Option<Self> {
        if limit == 0 {
            return None;
        }
        let now = Instant::now();
        Some(RateLimiter {
            limit: f64::from(limit),
            state: Mutex::new(LimiterState {
                tokens: f64::from(limit),
                last_refill: now,
                window_start: now,
                window_allowed: 0,
                window_seen: 0,
                previous_rate: None,
            }),
        })
    }

    pub(crate) fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&self, now: Instant) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return true;
        };

        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.limit).min(self.limit);
        state.last_refill = now;

        if now.saturating_duration_since(state.window_start) >= WINDOW {
            state.previous_rate = Some(window_rate(&state));
            state.window_start = now;
            state.window_allowed = 0;
            state.window_seen = 0;
        }

        state.window_seen += 1;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            state.window_allowed += 1;
            true
        } else {
            false
        }
    }

    /// Share of requests allowed, averaged over the current and previous
    /// window.
    pub(crate) fn effective_rate(&self) -> f64 {
        let Ok(state) = self.state.lock() else {
            return 1.0;
        };
        let current = window_rate(&state);
        match state.previous_rate {
            Some(previous) => (current + previous) / 2.0,
            None => current,
        }
    }
}

fn window_rate(state: &LimiterState) -> f64 {
    if state.window_seen == 0 {
        1.0
    } else {
        state.window_allowed as f64 / state.window_seen as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_disables_limiting() {
        assert!(RateLimiter::new(0).is_none());
    }

    #[test]
    fn burst_is_bounded_by_limit() {
        let limiter = RateLimiter::new(5).unwrap();
        let now = Instant::now();
        let allowed = (0..10).filter(|_| limiter.allow_at(now)).count();

        assert_eq!(allowed, 5);
        assert!((limiter.effective_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(2).unwrap();
        let start = Instant::now();
        assert!(limiter.allow_at(start));
        assert!(limiter.allow_at(start));
        assert!(!limiter.allow_at(start));

        let later = start + Duration::from_millis(500);
        assert!(limiter.allow_at(later));
        assert!(!limiter.allow_at(later));
    }
}
