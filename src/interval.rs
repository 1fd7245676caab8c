//! Named durations a quota window can be keyed on (spec §3 "Request interval").

use std::time::Duration;

/// One of the five durations a server's quota can be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestInterval {
    /// 100ms. The shortest window; governs short-term concurrency bursts.
    Burst,
    /// 1 second.
    PerSecond,
    /// 60 seconds.
    PerMinute,
    /// 3600 seconds.
    PerHour,
    /// 86400 seconds.
    PerDay,
}

impl RequestInterval {
    /// All five intervals, in increasing order of duration.
    pub const ALL: [RequestInterval; 5] = [
        RequestInterval::Burst,
        RequestInterval::PerSecond,
        RequestInterval::PerMinute,
        RequestInterval::PerHour,
        RequestInterval::PerDay,
    ];

    /// The wall-clock duration of this interval.
    pub fn duration(&self) -> Duration {
        match self {
            RequestInterval::Burst => Duration::from_millis(100),
            RequestInterval::PerSecond => Duration::from_secs(1),
            RequestInterval::PerMinute => Duration::from_secs(60),
            RequestInterval::PerHour => Duration::from_secs(3600),
            RequestInterval::PerDay => Duration::from_secs(86_400),
        }
    }

    /// Parse the standard `w=<seconds>` notation used in `X-RateLimit-Limit`.
    ///
    /// `w=1` -> second, `w=60` -> minute, `w=3600` -> hour, `w=86400` -> day.
    /// Anything else resolves to burst (spec §4.5).
    pub fn from_window_seconds(seconds: u64) -> RequestInterval {
        match seconds {
            1 => RequestInterval::PerSecond,
            60 => RequestInterval::PerMinute,
            3600 => RequestInterval::PerHour,
            86_400 => RequestInterval::PerDay,
            _ => RequestInterval::Burst,
        }
    }
}
