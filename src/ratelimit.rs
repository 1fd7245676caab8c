//! Rate-limit engine (spec §4.5, component C5).

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use regex::Regex;

use crate::interval::RequestInterval;
use crate::window::{RequestWindow, MAX_GROUP_DELAY_MS, MIN_DELAY_MS};

/// Per-interval allowance a group starts out with, before any server header
/// has had a chance to correct it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Allowances {
    /// Burst allowance.
    pub burst: u32,
    /// Requests per second.
    pub per_second: u32,
    /// Requests per minute.
    pub per_minute: u32,
    /// Requests per hour.
    pub per_hour: u32,
    /// Requests per day.
    pub per_day: u32,
}

impl Allowances {
    fn get(&self, interval: RequestInterval) -> u32 {
        match interval {
            RequestInterval::Burst => self.burst,
            RequestInterval::PerSecond => self.per_second,
            RequestInterval::PerMinute => self.per_minute,
            RequestInterval::PerHour => self.per_hour,
            RequestInterval::PerDay => self.per_day,
        }
    }

    fn set(&mut self, interval: RequestInterval, value: u32) {
        match interval {
            RequestInterval::Burst => self.burst = value,
            RequestInterval::PerSecond => self.per_second = value,
            RequestInterval::PerMinute => self.per_minute = value,
            RequestInterval::PerHour => self.per_hour = value,
            RequestInterval::PerDay => self.per_day = value,
        }
    }
}

/// All windows tracked for one quota group.
///
/// The windows map is lazily populated: a window for an interval only comes
/// into being the first time it's asked for, using the group's currently
/// configured allowance for that interval (spec §3 "Lifecycle").
pub struct RateLimits {
    group: String,
    allowances: Mutex<Allowances>,
    windows: Mutex<HashMap<RequestInterval, RequestWindow>>,
}

impl RateLimits {
    /// A new, empty group with the given initial allowances.
    pub fn new(group: impl Into<String>, allowances: Allowances) -> Self {
        RateLimits {
            group: group.into(),
            allowances: Mutex::new(allowances),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// The group name.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Get (creating if necessary) the window for `interval`.
    ///
    /// Runs the body that reads/mutates the window while holding the lock,
    /// so a read that would transition the window through a reset is
    /// serialized against concurrent callers observing the same window
    /// (spec §5 "Shared resources").
    fn with_window<R>(&self, interval: RequestInterval, f: impl FnOnce(&mut RequestWindow) -> R) -> R {
        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(interval).or_insert_with(|| {
            let allowed = self.allowances.lock().unwrap().get(interval);
            RequestWindow::new(interval, allowed)
        });
        f(window)
    }

    /// Effective delay before the next send: the clamped maximum over every
    /// window's `calculate_delay()`.
    pub fn calculate_delay(&self) -> Duration {
        let mut max = Duration::from_millis(MIN_DELAY_MS);
        for interval in RequestInterval::ALL {
            let d = self.with_window(interval, |w| w.calculate_delay());
            if d > max {
                max = d;
            }
        }
        max.min(Duration::from_millis(MAX_GROUP_DELAY_MS))
    }

    /// Increment every one of this group's windows. Must be called once per
    /// admitted request, before the caller observes the completion, so
    /// concurrent callers see the charge (spec §5 "Ordering guarantees").
    pub fn increment(&self) {
        for interval in RequestInterval::ALL {
            self.with_window(interval, |w| w.increment());
        }
    }

    /// Apply a parsed `X-RateLimit-Limit` header: set the burst allowance and
    /// update each window whose interval the header mentions.
    pub fn apply_limit_header(&self, parsed: &ParsedLimitHeader) {
        {
            let mut allowances = self.allowances.lock().unwrap();
            allowances.burst = parsed.burst;
        }
        self.with_window(RequestInterval::Burst, |w| w.set_num_allowed(parsed.burst));
        for &(interval, value) in &parsed.windows {
            {
                let mut allowances = self.allowances.lock().unwrap();
                allowances.set(interval, value);
            }
            self.with_window(interval, |w| w.set_num_allowed(value));
        }
    }

    /// Advisory override from `X-RateLimit-Remaining`: pin the burst
    /// window's remaining count directly (spec §6, §3 "Rate limits").
    pub fn apply_remaining_header(&self, remaining: u32) {
        self.with_window(RequestInterval::Burst, |w| {
            w.set_remaining_override(remaining);
        });
    }
}

/// One `(value, window_seconds)` pair parsed out of an `X-RateLimit-Limit`
/// header value.
#[derive(Debug, Clone, Copy)]
pub struct ParsedWindow {
    /// The interval the server is describing.
    pub interval: RequestInterval,
    /// The allowance for that interval.
    pub value: u32,
}

/// Result of parsing an `X-RateLimit-Limit` header (spec §4.5).
#[derive(Debug, Clone, Default)]
pub struct ParsedLimitHeader {
    /// The leading burst integer.
    pub burst: u32,
    /// Each subsequent `v;w=s` pair, as `(interval, value)`.
    pub windows: Vec<(RequestInterval, u32)>,
}

/// Parse `"<burst> <v1>;w=<s1>,<v2>;w=<s2>,..."`.
///
/// The leading burst integer is optional; the expression iterates
/// `(\d+);w=(\d+)` pairs regardless of whether a leading integer was found
/// (spec §4.5 parsing details).
pub fn parse_rate_limit_header(value: &str) -> ParsedLimitHeader {
    static HEAD: once_regex::OnceRegex = once_regex::OnceRegex::new(r"^\s*(\d+)\s+");
    static PAIR: once_regex::OnceRegex = once_regex::OnceRegex::new(r"(\d+)\s*;\s*w=(\d+)");

    let mut out = ParsedLimitHeader::default();
    if let Some(caps) = HEAD.get().captures(value) {
        out.burst = caps[1].parse().unwrap_or(0);
    }
    for caps in PAIR.get().captures_iter(value) {
        let v: u32 = caps[1].parse().unwrap_or(0);
        let s: u64 = caps[2].parse().unwrap_or(0);
        out.windows.push((RequestInterval::from_window_seconds(s), v));
    }
    out
}

/// Thin lazy-regex helper: `regex::Regex` compilation is not `const`, and we
/// want the patterns above compiled once per process, not once per call.
mod once_regex {
    use super::*;
    use std::sync::OnceLock;

    pub struct OnceRegex {
        pattern: &'static str,
        cell: OnceLock<Regex>,
    }

    impl OnceRegex {
        pub const fn new(pattern: &'static str) -> Self {
            OnceRegex {
                pattern,
                cell: OnceLock::new(),
            }
        }

        pub fn get(&self) -> &Regex {
            self.cell
                .get_or_init(|| Regex::new(self.pattern).expect("static regex pattern"))
        }
    }
}

/// The engine: one [`RateLimits`] per quota group, created lazily on first
/// use of a group and living for the process lifetime of the client
/// (spec §3 "Lifecycle", component C5).
#[derive(Default)]
pub struct RateLimitEngine {
    groups: RwLock<HashMap<String, std::sync::Arc<RateLimits>>>,
    default_allowances: Allowances,
}

impl RateLimitEngine {
    /// A new engine. `default_allowances` seeds any group created without an
    /// explicit allowance (i.e. one the server hasn't described yet).
    pub fn new(default_allowances: Allowances) -> Self {
        RateLimitEngine {
            groups: RwLock::new(HashMap::new()),
            default_allowances,
        }
    }

    /// Get (creating if necessary) the rate-limit state for `group`.
    pub fn group(&self, group: &str) -> std::sync::Arc<RateLimits> {
        if let Some(existing) = self.groups.read().unwrap().get(group) {
            return existing.clone();
        }
        let mut groups = self.groups.write().unwrap();
        groups
            .entry(group.to_string())
            .or_insert_with(|| {
                std::sync::Arc::new(RateLimits::new(group, self.default_allowances))
            })
            .clone()
    }

    /// Update `group`'s windows from a response's rate-limit headers, but
    /// only if the response's declared group matches (spec §4.5).
    pub fn update_from_headers(&self, local_group: &str, header_group: Option<&str>, limit_header: Option<&str>) {
        if let Some(hg) = header_group {
            if !hg.eq_ignore_ascii_case(local_group) {
                return;
            }
        }
        if let Some(limit) = limit_header {
            let parsed = parse_rate_limit_header(limit);
            self.group(local_group).apply_limit_header(&parsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_burst_and_window_pairs() {
        let parsed = parse_rate_limit_header("10 10;w=1,250;w=60,15000;w=3600,360000;w=86400");
        assert_eq!(parsed.burst, 10);
        assert_eq!(parsed.windows.len(), 4);
        assert!(parsed
            .windows
            .iter()
            .any(|&(i, v)| matches!(i, RequestInterval::PerSecond) && v == 10));
        assert!(parsed
            .windows
            .iter()
            .any(|&(i, v)| matches!(i, RequestInterval::PerDay) && v == 360_000));
    }

    #[test]
    fn unknown_window_seconds_fall_back_to_burst() {
        let parsed = parse_rate_limit_header("5 7;w=42");
        assert!(matches!(parsed.windows[0].0, RequestInterval::Burst));
    }

    #[test]
    fn header_driven_reconfig_updates_group() {
        let engine = RateLimitEngine::new(Allowances::default());
        engine.update_from_headers(
            "contacts",
            Some("Contacts"),
            Some("10 10;w=1,250;w=60,15000;w=3600,360000;w=86400"),
        );
        let group = engine.group("contacts");
        assert_eq!(group.calculate_delay(), Duration::from_millis(10));
    }

    #[test]
    fn mismatched_header_group_is_ignored() {
        let engine = RateLimitEngine::new(Allowances {
            burst: 1,
            ..Default::default()
        });
        let group = engine.group("contacts");
        group.increment();
        let before = group.calculate_delay();
        engine.update_from_headers("contacts", Some("other-group"), Some("99 99;w=1"));
        assert_eq!(group.calculate_delay(), before);
    }

    #[test]
    fn engine_group_delay_is_clamped() {
        let engine = RateLimitEngine::new(Allowances::default());
        let group = engine.group("g");
        let d = group.calculate_delay();
        assert!(d.as_millis() >= MIN_DELAY_MS as u128);
        assert!(d.as_millis() <= MAX_GROUP_DELAY_MS as u128);
    }
}
