//! Rate-limited client: the orchestrator (spec §4.7, component C7).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, trace};

use crate::config::{ClientConfig, ConfigResolver};
use crate::envelope::Envelope;
use crate::error::Error;
use crate::group_mapper::RequestGroupMapper;
use crate::queue::{PendingRequest, RequestQueue};
use crate::ratelimit::{Allowances, RateLimitEngine};
use crate::retry;
use crate::transport::{RequestBody, TransportDelegate};
use crate::verb::Verb;

/// What a caller gets back from [`RateLimitedClient::send_request`]: either
/// the call went through immediately, or it's sitting in a priority queue
/// waiting for capacity.
pub enum Dispatch {
    /// Completed (successfully or not) without queueing.
    Done(Result<Envelope, Error>),
    /// Queued; await the pending handle for the eventual outcome.
    Queued(PendingRequest),
}

/// Component C7: for each call, resolves config, maps to a quota group,
/// asks the rate-limit engine for a delay, and either dispatches after
/// sleeping or hands off to the request queue.
pub struct RateLimitedClient {
    resolver: ConfigResolver,
    mapper: RequestGroupMapper,
    engine: RateLimitEngine,
    queue: Arc<RequestQueue>,
    transport: Arc<dyn TransportDelegate>,
}

impl RateLimitedClient {
    /// Build a client around a transport delegate and a quota-group mapper.
    /// `default_allowances` seeds any group before the server has had a
    /// chance to describe its real quota via headers.
    pub fn new(
        transport: Arc<dyn TransportDelegate>,
        mapper: RequestGroupMapper,
        default_allowances: Allowances,
    ) -> Self {
        RateLimitedClient {
            resolver: ConfigResolver::new(),
            mapper,
            engine: RateLimitEngine::new(default_allowances),
            queue: Arc::new(RequestQueue::default()),
            transport,
        }
    }

    /// The underlying queue, exposed so a caller can periodically drain it
    /// (spec §4.6 `process(client)`).
    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    /// Resolve config, map to a group, and either dispatch now or enqueue.
    pub fn send_request(
        &self,
        method: Verb,
        url: &str,
        user_config: &ClientConfig,
        body: RequestBody,
    ) -> Dispatch {
        let config = self.resolver.resolve(user_config);
        let group_name = self.mapper.map(url, config.request_group());
        let group = self.engine.group(&group_name);
        let delay = group.calculate_delay();

        if delay > config.max_delay_before_queueing() {
            debug!("{method} {url}: delay {delay:?} exceeds threshold, queueing in group {group_name}");
            match self.queue.add(config.priority(), method, url.to_string(), config, Some(body.0)) {
                Ok(pending) => return Dispatch::Queued(pending),
                Err(e) => return Dispatch::Done(Err(e)),
            }
        }

        trace!("{method} {url}: dispatching after {delay:?} in group {group_name}");
        thread::sleep(delay);
        let outcome = self.dispatch_with_retries(method, url, &config, &body, &group_name);
        self.drain_in_background();
        Dispatch::Done(outcome)
    }

    /// Convenience wrapper matching spec §4.7 "Per-verb wrappers".
    pub fn get(&self, url: &str, config: &ClientConfig) -> Dispatch {
        self.send_request(Verb::Get, url, config, RequestBody::empty())
    }

    /// Convenience wrapper matching spec §4.7 "Per-verb wrappers".
    pub fn post(&self, url: &str, config: &ClientConfig, body: RequestBody) -> Dispatch {
        self.send_request(Verb::Post, url, config, body)
    }

    /// `getRequestedData`: a data-only convenience on top of
    /// `sendGetRequest` that follows redirects, raises on 4xx/5xx, and
    /// falls back to a throttled retry on a rate-limit response that
    /// slipped past the primary throttle (spec §4.7).
    pub fn get_requested_data(&self, url: &str, config: &ClientConfig) -> Result<Vec<u8>, Error> {
        let mut current_url = url.to_string();
        let mut redirects = 0u32;
        let mut retries = 0u32;

        loop {
            let outcome = match self.get(&current_url, config) {
                Dispatch::Done(r) => r,
                Dispatch::Queued(pending) => pending.wait(),
            }?;

            if outcome.ok() {
                return Ok(outcome.body.map(|b| b.raw()).unwrap_or_default());
            }
            if outcome.is_redirect() {
                redirects += 1;
                if redirects > config.max_redirects() {
                    return Err(Error::TooManyRedirects);
                }
                current_url = outcome.redirect_url().to_string();
                continue;
            }
            if outcome.is_exceeds_rate_limit() {
                let delay = retry::retry_delay(outcome.status, outcome.retry_after(), retries + 1);
                thread::sleep(delay);
                retries += 1;
                if retries > config.max_retries() {
                    return Err(Error::RateLimitExceeded);
                }
                continue;
            }
            if outcome.status >= 500 {
                return Err(Error::ServerError(Box::new(outcome)));
            }
            return Err(Error::ClientError(Box::new(outcome)));
        }
    }

    /// Dispatch with the retry/redirect state machine from spec §4.2,
    /// charging and updating the group's windows around the single
    /// "real" send.
    fn dispatch_with_retries(
        &self,
        method: Verb,
        url: &str,
        config: &ClientConfig,
        body: &RequestBody,
        group_name: &str,
    ) -> Result<Envelope, Error> {
        let mut current_url = url.to_string();
        let mut redirects = 0u32;
        let mut retries = 0u32;

        let group = self.engine.group(group_name);

        loop {
            // Charge before the wire call returns, so concurrent callers
            // see the admission immediately (spec §4.7 step 4, §5 ordering).
            group.increment();

            let result = self.transport.send(method, &current_url, config, body);

            let envelope = match result {
                Ok(env) => env,
                Err(e) => return Err(e),
            };

            self.engine.update_from_headers(
                group_name,
                envelope.rate_limit_group(),
                envelope.rate_limit_limit(),
            );
            if let Some(remaining) = envelope.rate_limit_remaining() {
                group.apply_remaining_header(remaining);
            }

            if envelope.ok() || envelope.is_use_cached() {
                return Ok(envelope);
            }
            if envelope.is_redirect() {
                redirects += 1;
                if redirects > config.max_redirects() {
                    return Err(Error::TooManyRedirects);
                }
                current_url = envelope.redirect_url().to_string();
                continue;
            }
            if envelope.is_retry_eligible() {
                retries += 1;
                if retries > config.max_retries() {
                    debug!("{group_name}: retries exhausted after {retries} attempts (status {})", envelope.status);
                    return Err(Error::RetryExhausted);
                }
                let delay = retry::retry_delay(envelope.status, envelope.retry_after(), retries);
                debug!("{group_name}: status {} retry {retries} after {delay:?}", envelope.status);
                thread::sleep(delay);
                continue;
            }
            if envelope.status >= 500 {
                return Err(Error::ServerError(Box::new(envelope)));
            }
            return Err(Error::ClientError(Box::new(envelope)));
        }
    }

    /// Kick off a best-effort drain of the queue on a background thread.
    /// Mirrors spec §4.6 `process(client)`: a `processing` guard
    /// ([`RequestQueue::try_begin_drain`]) means a drain already in flight
    /// (background or caller-triggered via [`RateLimitedClient::drain_queue`])
    /// makes this a no-op rather than spawning a second, reentrant drain.
    fn drain_in_background(&self) {
        if !self.queue.try_begin_drain() {
            return;
        }
        let queue = self.queue.clone();
        let transport = self.transport.clone();
        thread::spawn(move || {
            run_drain_loop(&queue, transport.as_ref());
        });
    }

    /// Drain the queue synchronously: repeatedly takes a batch of up to
    /// [`crate::queue::DRAIN_BATCH_SIZE`] items (jittering between each)
    /// until empty, re-checking every [`crate::queue::DRAIN_RESCHEDULE`]
    /// (spec §4.6). Intended for a caller-owned periodic timer; a no-op if
    /// a drain (background or otherwise) is already in progress.
    pub fn drain_queue(&self) {
        if !self.queue.try_begin_drain() {
            return;
        }
        run_drain_loop(&self.queue, self.transport.as_ref());
    }
}

fn run_drain_loop(queue: &RequestQueue, transport: &dyn TransportDelegate) {
    loop {
        drain_once(queue, transport);
        if queue.is_empty() {
            break;
        }
        thread::sleep(crate::queue::DRAIN_RESCHEDULE);
    }
    queue.end_drain();
}

fn drain_once(queue: &RequestQueue, transport: &dyn TransportDelegate) {
    let batch = queue.take_batch(crate::queue::DRAIN_BATCH_SIZE);
    for (i, item) in batch.into_iter().enumerate() {
        if item.is_aborted() {
            continue;
        }
        if i > 0 {
            thread::sleep(jittered_inter_take_delay());
        }
        let body = RequestBody::from_bytes(item.body.clone().unwrap_or_default());
        let result = transport.send(item.method, &item.url, &item.config, &body);
        item.resolve(result);
    }
}

fn jittered_inter_take_delay() -> Duration {
    use crate::queue::{DRAIN_JITTER_MAX, DRAIN_JITTER_MIN};
    let span = (DRAIN_JITTER_MAX - DRAIN_JITTER_MIN).as_millis() as u64;
    let jitter = if span == 0 {
        0
    } else {
        // A cheap, dependency-free jitter source: the low bits of the
        // current instant. Not cryptographic, doesn't need to be.
        let nanos = std::time::Instant::now().elapsed().subsec_nanos() as u64;
        nanos % (span + 1)
    };
    DRAIN_JITTER_MIN + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Envelope, HeaderMap};
    use crate::group_mapper::RequestGroupMapper;
    use std::sync::Mutex;

    /// Allowances with headroom on every interval, so `calculate_delay()`
    /// stays at the floor and these tests exercise dispatch logic rather
    /// than queueing.
    fn open_allowances() -> Allowances {
        Allowances {
            burst: 10,
            per_second: 10,
            per_minute: 100,
            per_hour: 1000,
            per_day: 10_000,
        }
    }

    struct ScriptedTransport {
        responses: Mutex<Vec<Envelope>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Envelope>) -> Self {
            ScriptedTransport {
                responses: Mutex::new(responses),
            }
        }
    }

    impl TransportDelegate for ScriptedTransport {
        fn send(
            &self,
            _method: Verb,
            url: &str,
            _config: &ClientConfig,
            _body: &RequestBody,
        ) -> Result<Envelope, Error> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(Envelope::new(200, None, HeaderMap::new(), url.to_string(), None));
            }
            let mut env = responses.remove(0);
            env.url = url.to_string();
            Ok(env)
        }
    }

    #[test]
    fn admits_on_empty_window() {
        let transport = Arc::new(ScriptedTransport::new(vec![Envelope::new(
            200,
            None,
            HeaderMap::new(),
            "u".into(),
            None,
        )]));
        let client = RateLimitedClient::new(
            transport,
            RequestGroupMapper::default(),
            open_allowances(),
        );
        let result = match client.get("https://api.example.com/api/contacts/123", &ClientConfig::default()) {
            Dispatch::Done(r) => r,
            Dispatch::Queued(p) => p.wait(),
        };
        assert!(result.unwrap().ok());
    }

    #[test]
    fn retries_on_429_then_succeeds() {
        let mut limited = Envelope::new(429, None, HeaderMap::new(), "u".into(), None);
        limited.headers.insert("Retry-After", "0");
        let ok = Envelope::new(200, None, HeaderMap::new(), "u".into(), None);
        let transport = Arc::new(ScriptedTransport::new(vec![limited, ok]));
        let client = RateLimitedClient::new(
            transport,
            RequestGroupMapper::default(),
            open_allowances(),
        );
        let result = match client.get("https://api.example.com/api/contacts", &ClientConfig::default()) {
            Dispatch::Done(r) => r,
            Dispatch::Queued(p) => p.wait(),
        };
        assert!(result.unwrap().ok());
    }

    #[test]
    fn redirect_chain_within_max_redirects_succeeds() {
        let mut r1 = Envelope::new(302, None, HeaderMap::new(), "u".into(), None);
        r1.headers.insert("Location", "/b");
        let mut r2 = Envelope::new(302, None, HeaderMap::new(), "u".into(), None);
        r2.headers.insert("Location", "/c");
        let ok = Envelope::new(200, None, HeaderMap::new(), "u".into(), None);
        let transport = Arc::new(ScriptedTransport::new(vec![r1, r2, ok]));
        let client = RateLimitedClient::new(
            transport,
            RequestGroupMapper::default(),
            open_allowances(),
        );
        let result = match client.get("https://api.example.com/api/a", &ClientConfig::default()) {
            Dispatch::Done(r) => r,
            Dispatch::Queued(p) => p.wait(),
        };
        assert!(result.unwrap().ok());
    }

    #[test]
    fn too_many_redirects_is_fatal() {
        let chain: Vec<Envelope> = (0..4)
            .map(|i| {
                let mut env = Envelope::new(302, None, HeaderMap::new(), "u".into(), None);
                env.headers.insert("Location", format!("/hop{i}"));
                env
            })
            .collect();
        let transport = Arc::new(ScriptedTransport::new(chain));
        let client = RateLimitedClient::new(
            transport,
            RequestGroupMapper::default(),
            open_allowances(),
        );
        let config = ClientConfig::default().max_redirects_mut(3);
        let result = match client.get("https://api.example.com/api/a", &config) {
            Dispatch::Done(r) => r,
            Dispatch::Queued(p) => p.wait(),
        };
        assert!(matches!(result, Err(Error::TooManyRedirects)));
    }
}
