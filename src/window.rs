//! `RequestWindow`: the live state of one (group, interval) pair (spec §3).

use std::time::{Duration, Instant};

use crate::interval::RequestInterval;

/// Lower bound for `calculateDelay()` and the queueing threshold (10ms).
pub const MIN_DELAY_MS: u64 = 10;
/// Upper bound for a group's effective delay (spec §3 "Rate limits").
pub const MAX_GROUP_DELAY_MS: u64 = 29_999;

/// Live state of one (group, interval) pair.
///
/// Created lazily on first use of an (interval, group) combination and lives
/// for the process lifetime of the owning [`crate::ratelimit::RateLimits`]
/// (spec §3 "Lifecycle").
#[derive(Debug, Clone)]
pub struct RequestWindow {
    opened: Instant,
    interval: RequestInterval,
    num_allowed: u32,
    num_made: u32,
    max_delay_before_queueing: Duration,
    /// Advisory override from `X-RateLimit-Remaining`, cleared on reset.
    remaining_override: Option<u32>,
}

impl RequestWindow {
    /// Create a new window for `interval`, allowing `num_allowed` requests
    /// per period, opened at the current instant.
    pub fn new(interval: RequestInterval, num_allowed: u32) -> Self {
        RequestWindow {
            opened: Instant::now(),
            interval,
            num_allowed,
            num_made: 0,
            max_delay_before_queueing: Duration::from_millis(2500),
            remaining_override: None,
        }
    }

    /// The interval this window tracks.
    pub fn interval(&self) -> RequestInterval {
        self.interval
    }

    /// Current allowance for one period of this window.
    pub fn num_allowed(&self) -> u32 {
        self.num_allowed
    }

    /// Requests made within the current (possibly stale) period.
    pub fn num_made(&self) -> u32 {
        self.num_made
    }

    /// Server-declared allowance is authoritative once it has spoken
    /// (spec §4.5): bump `num_allowed` without otherwise touching the
    /// window's open/made bookkeeping.
    pub fn set_num_allowed(&mut self, num_allowed: u32) {
        self.num_allowed = num_allowed;
    }

    /// Advisory override of `requests_remaining` from `X-RateLimit-Remaining`.
    pub fn set_remaining_override(&mut self, remaining: u32) {
        self.remaining_override = Some(remaining);
    }

    pub(crate) fn set_max_delay_before_queueing(&mut self, v: Duration) {
        self.max_delay_before_queueing = v;
    }

    fn next_reset(&self) -> Instant {
        self.opened + self.interval.duration()
    }

    /// Reset the window if its period has elapsed. Every read operation
    /// calls this first (spec §3 invariant).
    fn maybe_reset(&mut self, now: Instant) {
        if now >= self.next_reset() {
            self.opened = now;
            self.num_made = 0;
            self.remaining_override = None;
        }
    }

    /// `max(0, num_allowed - num_made)`, after a reset-if-due. If the server
    /// has sent an advisory `X-RateLimit-Remaining` since the last reset,
    /// that value is used instead (spec §6).
    pub fn requests_remaining(&mut self) -> u32 {
        self.requests_remaining_at(Instant::now())
    }

    pub(crate) fn requests_remaining_at(&mut self, now: Instant) -> u32 {
        self.maybe_reset(now);
        self.remaining_override
            .unwrap_or_else(|| self.num_allowed.saturating_sub(self.num_made))
    }

    /// 10ms if `requests_remaining > 0`, otherwise `max(10, next_reset - now)`.
    pub fn calculate_delay(&mut self) -> Duration {
        self.calculate_delay_at(Instant::now())
    }

    pub(crate) fn calculate_delay_at(&mut self, now: Instant) -> Duration {
        if self.requests_remaining_at(now) > 0 {
            return Duration::from_millis(MIN_DELAY_MS);
        }
        let until_reset = self.next_reset().saturating_duration_since(now);
        until_reset.max(Duration::from_millis(MIN_DELAY_MS))
    }

    /// `requestsRemaining > 0 OR calculateDelay() <= maxDelayBeforeQueueing`.
    pub fn can_send(&mut self) -> bool {
        let now = Instant::now();
        self.requests_remaining_at(now) > 0
            || self.calculate_delay_at(now) <= self.max_delay_before_queueing
    }

    /// Record one admitted request. Performs a reset first if the window's
    /// period has elapsed, in which case `num_made` becomes exactly 1
    /// (spec §8 testable property) rather than `previous + 1`.
    pub fn increment(&mut self) {
        self.maybe_reset(Instant::now());
        self.num_made += 1;
    }
}
