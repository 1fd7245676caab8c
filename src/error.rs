//! Error taxonomy (spec §7).

use std::fmt;
use std::io::Error as IoError;

use crate::envelope::Envelope;

/// Errors produced by this crate.
///
/// Variants mirror the taxonomy from the rate-limit/retry/redirect state
/// machine: most are terminal for the call that produced them, they are
/// never silently retried beyond what the crate already attempted.
#[derive(Debug)]
pub enum Error {
    /// Caller-supplied configuration could not be made consistent even after
    /// clamping (e.g. bounds that remain inverted).
    Config(String),
    /// Underlying transport failure: DNS, TLS, reset, I/O.
    Transport(String),
    /// A deadline was exceeded before the call completed.
    Timeout,
    /// `redirects > max_redirects`.
    TooManyRedirects,
    /// `retries > max_retries`.
    RetryExhausted,
    /// All throttle and queue strategies were exhausted without admission.
    RateLimitExceeded,
    /// All three priority queues were at capacity.
    QueueFull,
    /// The call was aborted, either by the caller or by a timeout.
    Cancelled,
    /// A 5xx response survived retries.
    ServerError(Box<Envelope>),
    /// A 4xx response that was not retry-eligible.
    ClientError(Box<Envelope>),
    /// A malformed URL.
    BadUrl(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Error::Transport(msg) => write!(f, "transport error: {msg}"),
            Error::Timeout => write!(f, "request timed out"),
            Error::TooManyRedirects => write!(f, "too many redirects"),
            Error::RetryExhausted => write!(f, "retries exhausted"),
            Error::RateLimitExceeded => write!(f, "rate limit exceeded"),
            Error::QueueFull => write!(f, "request queue full"),
            Error::Cancelled => write!(f, "request cancelled"),
            Error::ServerError(env) => write!(f, "server error: status {}", env.status),
            Error::ClientError(env) => write!(f, "client error: status {}", env.status),
            Error::BadUrl(msg) => write!(f, "bad url: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<IoError> for Error {
    fn from(err: IoError) -> Error {
        Error::Transport(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Error {
        Error::BadUrl(err.to_string())
    }
}

/// Convenience alias, mirrors the teacher's crate-root `Error` export.
pub type Result<T> = std::result::Result<T, Error>;
