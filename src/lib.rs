#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(missing_docs)]
//! A rate-limit-aware HTTP client for third-party APIs whose quotas are
//! expressed in multi-window "leaky bucket" form: a burst limit plus
//! several `N requests per T seconds` windows, with the remaining budget
//! communicated back through response headers.
//!
//! Callers issue ordinary request operations (GET/POST/PUT/PATCH/DELETE/
//! HEAD/OPTIONS/TRACE, plus streamed downloads and uploads) against a
//! [`Client`] or a [`RateLimitedClient`]; the client transparently
//! schedules, delays, queues, retries, and follows redirects so that a
//! server's advertised quotas are never exceeded and transient failures
//! are absorbed without caller involvement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quota_client::{Client, ClientConfig, DefaultTransport};
//!
//! let client = Client::new(Arc::new(DefaultTransport::default()));
//! let response = client.get("https://api.example.com/api/widgets", &ClientConfig::default())?;
//! let body = response.body.map(|b| b.text()).unwrap_or_default();
//! # Ok::<(), quota_client::Error>(())
//! ```
//!
//! For quota-aware scheduling against one named group per URL, use
//! [`RateLimitedClient`] instead, which consults a [`RequestGroupMapper`]
//! and a per-group [`RateLimitEngine`] before every dispatch.
//!
//! ## Logging
//!
//! This crate logs through the [`log`] facade at state-machine
//! transitions (admit-vs-queue decisions, retries, redirects, wire
//! calls). No logger implementation is bundled; plug in `env_logger` or
//! equivalent.
//!
//! ## JSON
//!
//! With the `json` feature (default on), [`RequestBody::from_json`] and
//! [`crate::envelope::Body::json`] encode/decode request and response
//! bodies via `serde_json`.

mod client;
mod config;
mod envelope;
mod error;
mod group_mapper;
mod interval;
mod priority;
mod queue;
mod rate_limited_client;
mod ratelimit;
mod retry;
mod throttle;
mod transport;
mod verb;
mod window;

pub use client::Client;
pub use config::{
    AccessToken, AgentConfig, ApiConfig, ClientConfig, ConfigResolver, ExtendedAgentConfig,
    Headers, Scheduling,
};
pub use envelope::{Body, Envelope, HeaderMap};
pub use error::{Error, Result};
pub use group_mapper::RequestGroupMapper;
pub use interval::RequestInterval;
pub use priority::Priority;
pub use queue::{PendingRequest, QueuedRequest, RequestQueue};
pub use rate_limited_client::{Dispatch, RateLimitedClient};
pub use ratelimit::{Allowances, RateLimitEngine, RateLimits};
pub use throttle::SimpleThrottle;
pub use transport::{DefaultTransport, RequestBody, TransportDelegate};
pub use verb::Verb;
