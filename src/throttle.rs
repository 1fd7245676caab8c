//! Simple throttler: a single-window failsafe for when no per-group rate
//! limit information is available (spec §4.9).

use std::sync::Mutex;
use std::time::{Duration, Instant};

const MIN_DELAY_MS: u64 = 10;
const SHORT_GAP_MS: u64 = 100;

/// One `(period, max)` window with no per-interval breakdown, tracking
/// `last_executed`/`requests_since`/`next_reset`.
///
/// Used as a fallback throttle when a request carries no rate-limit group
/// (spec §4.9), so a caller always gets *some* pacing even before the first
/// response has taught [`crate::ratelimit::RateLimitEngine`] anything.
pub struct SimpleThrottle {
    state: Mutex<ThrottleState>,
    period: Duration,
    max: u32,
}

struct ThrottleState {
    last_executed: Option<Instant>,
    requests_since: u32,
    next_reset: Instant,
}

impl SimpleThrottle {
    /// A throttle with the spec defaults: 60s period, 250 max.
    pub fn new() -> Self {
        SimpleThrottle::with_limits(Duration::from_secs(60), 250)
    }

    /// A throttle with caller-supplied period/max.
    pub fn with_limits(period: Duration, max: u32) -> Self {
        SimpleThrottle {
            state: Mutex::new(ThrottleState {
                last_executed: None,
                requests_since: 0,
                next_reset: Instant::now() + period,
            }),
            period,
            max,
        }
    }

    /// Delay before the next send is admitted: at most `period`, at least
    /// 10ms.
    ///
    /// - If the previous request was under 100ms ago, wait 100ms (protects
    ///   against callers hammering the throttle faster than any server
    ///   could plausibly account for).
    /// - Else if budget remains and enough time has passed within the
    ///   window, return the proportional default spacing.
    /// - Else wait until `next_reset`.
    pub fn calculate_delay(&self) -> Duration {
        self.calculate_delay_at(Instant::now())
    }

    fn calculate_delay_at(&self, now: Instant) -> Duration {
        let mut state = self.state.lock().unwrap();
        if now >= state.next_reset {
            state.next_reset = now + self.period;
            state.requests_since = 0;
        }

        if let Some(last) = state.last_executed {
            let since_last = now.saturating_duration_since(last);
            if since_last < Duration::from_millis(SHORT_GAP_MS) {
                return Duration::from_millis(SHORT_GAP_MS);
            }
        }

        let remaining = self.max.saturating_sub(state.requests_since);
        if remaining > 0 {
            let proportional = self.period / self.max.max(1);
            return proportional.clamp(Duration::from_millis(MIN_DELAY_MS), self.period);
        }

        state
            .next_reset
            .saturating_duration_since(now)
            .clamp(Duration::from_millis(MIN_DELAY_MS), self.period)
    }

    /// Record one admitted request.
    pub fn increment(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        if now >= state.next_reset {
            state.next_reset = now + self.period;
            state.requests_since = 0;
        }
        state.requests_since += 1;
        state.last_executed = Some(now);
    }
}

impl Default for SimpleThrottle {
    fn default() -> Self {
        SimpleThrottle::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_throttle_admits_at_proportional_spacing() {
        let throttle = SimpleThrottle::with_limits(Duration::from_secs(60), 250);
        let delay = throttle.calculate_delay();
        assert!(delay >= Duration::from_millis(MIN_DELAY_MS));
        assert!(delay <= Duration::from_secs(60));
    }

    #[test]
    fn rapid_successor_waits_the_short_gap() {
        let throttle = SimpleThrottle::with_limits(Duration::from_secs(60), 250);
        throttle.increment();
        let delay = throttle.calculate_delay();
        assert_eq!(delay, Duration::from_millis(SHORT_GAP_MS));
    }

    #[test]
    fn exhausted_budget_waits_for_reset() {
        let throttle = SimpleThrottle::with_limits(Duration::from_millis(200), 1);
        throttle.increment();
        std::thread::sleep(Duration::from_millis(150));
        let delay = throttle.calculate_delay();
        assert!(delay >= Duration::from_millis(MIN_DELAY_MS));
        assert!(delay <= Duration::from_millis(200));
    }

    #[test]
    fn delay_never_exceeds_period() {
        let throttle = SimpleThrottle::with_limits(Duration::from_millis(50), 1);
        throttle.increment();
        let delay = throttle.calculate_delay();
        assert!(delay <= Duration::from_millis(50));
    }
}
