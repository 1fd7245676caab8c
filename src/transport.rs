//! Transport delegate: one wire request in, one normalized envelope out
//! (spec §4.2, component C2).
//!
//! The byte-level HTTP/TLS work is explicitly out of scope (spec §1); the
//! default delegate here is a thin adapter over the `ureq` blocking client,
//! used purely as the wire-level collaborator spec §6 describes.

use std::io::Read;
use std::time::Duration;

use log::debug;

use crate::config::ClientConfig;
use crate::envelope::{Body, Envelope, HeaderMap};
use crate::error::Error;
use crate::verb::Verb;

/// A request body as handed to a [`TransportDelegate`].
///
/// Body resolution (spec §4.2): a caller-supplied value is normalized to
/// this shape by [`crate::client::Client`] before the delegate ever sees it
/// — a string/byte-slice/stream passes through, an object is JSON-encoded,
/// a number is stringified.
#[derive(Debug, Clone, Default)]
pub struct RequestBody(pub Vec<u8>);

impl RequestBody {
    /// Build from anything already byte-shaped.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        RequestBody(bytes.into())
    }

    /// JSON-encode a serializable value.
    #[cfg(feature = "json")]
    pub fn from_json<T: serde::Serialize>(value: &T) -> Result<Self, Error> {
        let bytes = serde_json::to_vec(value).map_err(|e| Error::Transport(e.to_string()))?;
        Ok(RequestBody(bytes))
    }

    /// An empty body.
    pub fn empty() -> Self {
        RequestBody(Vec::new())
    }
}

/// Issues exactly one wire request and returns a normalized [`Envelope`].
///
/// Implementations must not throw to the caller except for infrastructure
/// failures (DNS, TLS, cancellation) — anything status-shaped is returned
/// as data, classified by [`Envelope`]'s predicates (spec §4.2).
pub trait TransportDelegate: Send + Sync {
    /// Perform one request. No redirect-following, no retrying: that's the
    /// state machine spec §4.2 describes, implemented by the callers of
    /// this trait ([`crate::rate_limited_client::RateLimitedClient`],
    /// [`crate::client::Client`]).
    fn send(
        &self,
        method: Verb,
        url: &str,
        config: &ClientConfig,
        body: &RequestBody,
    ) -> Result<Envelope, Error>;

    /// Streaming download support. `None` means the caller falls back to a
    /// plain streaming GET (spec §4.8).
    fn download(
        &self,
        _url: &str,
        _config: &ClientConfig,
    ) -> Option<Result<(HeaderMap, Box<dyn Read>), Error>> {
        None
    }

    /// Multipart upload support. `None` means the caller falls back to
    /// `sendPostRequest` (spec §4.8).
    fn upload(
        &self,
        _url: &str,
        _config: &ClientConfig,
        _body: &RequestBody,
    ) -> Option<Result<Envelope, Error>> {
        None
    }
}

/// Default delegate: a single-request (no internal redirect/retry) wrapper
/// around a shared `ureq::Agent`.
pub struct DefaultTransport {
    agent: ureq::Agent,
}

impl Default for DefaultTransport {
    fn default() -> Self {
        DefaultTransport {
            agent: ureq::AgentBuilder::new().build(),
        }
    }
}

impl DefaultTransport {
    /// Build a delegate around an already-configured `ureq::Agent`, e.g. one
    /// with a custom resolver or proxy.
    pub fn with_agent(agent: ureq::Agent) -> Self {
        DefaultTransport { agent }
    }
}

impl TransportDelegate for DefaultTransport {
    fn send(
        &self,
        method: Verb,
        url: &str,
        config: &ClientConfig,
        body: &RequestBody,
    ) -> Result<Envelope, Error> {
        let mut req = self
            .agent
            .request(method.as_str(), url)
            .timeout(Duration::from_millis(config.timeout_millis()));

        for (name, value) in config.headers().iter() {
            req = req.set(name, value);
        }
        if !config.content_type.is_empty() {
            req = req.set("Content-Type", &config.content_type);
        }
        if !config.accept.is_empty() {
            req = req.set("Accept", &config.accept);
        }

        debug!("{method} {url}");
        let result = if body.0.is_empty() {
            req.call()
        } else {
            req.send(body.0.as_slice())
        };

        normalize_ureq_result(result, url)
    }

    fn download(
        &self,
        url: &str,
        config: &ClientConfig,
    ) -> Option<Result<(HeaderMap, Box<dyn Read>), Error>> {
        let req = self
            .agent
            .request("GET", url)
            .set("Accept", "application/octet-stream")
            .timeout(Duration::from_millis(config.timeout_millis()));

        Some(match req.call() {
            Ok(resp) => {
                let headers = headers_from_ureq(&resp);
                Ok((headers, Box::new(resp.into_reader())))
            }
            Err(ureq::Error::Status(_, resp)) => {
                let headers = headers_from_ureq(&resp);
                Ok((headers, Box::new(resp.into_reader())))
            }
            Err(ureq::Error::Transport(t)) => Err(Error::Transport(t.to_string())),
        })
    }
}

fn headers_from_ureq(resp: &ureq::Response) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in resp.headers_names() {
        if let Some(value) = resp.header(&name) {
            headers.insert(name, value.to_string());
        }
    }
    headers
}

fn normalize_ureq_result(
    result: Result<ureq::Response, ureq::Error>,
    url: &str,
) -> Result<Envelope, Error> {
    match result {
        Ok(resp) => Ok(envelope_from_ureq_response(resp, url)),
        Err(ureq::Error::Status(_, resp)) => Ok(envelope_from_ureq_response(resp, url)),
        Err(ureq::Error::Transport(t)) => Err(Error::Transport(t.to_string())),
    }
}

fn envelope_from_ureq_response(resp: ureq::Response, url: &str) -> Envelope {
    let status = resp.status();
    let status_text = resp.status_text().to_string();
    let headers = headers_from_ureq(&resp);
    let mut bytes = Vec::new();
    let _ = resp.into_reader().read_to_end(&mut bytes);
    Envelope::new(
        status,
        Some(status_text),
        headers,
        url.to_string(),
        Some(Body::from_bytes(bytes)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use std::sync::Mutex;

    /// A transport that returns canned envelopes in sequence, for testing
    /// the layers above [`TransportDelegate`] without touching the network.
    pub struct MockTransport {
        responses: Mutex<Vec<Envelope>>,
        pub calls: Mutex<Vec<(Verb, String)>>,
    }

    impl MockTransport {
        pub fn new(responses: Vec<Envelope>) -> Self {
            MockTransport {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl TransportDelegate for MockTransport {
        fn send(
            &self,
            method: Verb,
            url: &str,
            _config: &ClientConfig,
            _body: &RequestBody,
        ) -> Result<Envelope, Error> {
            self.calls.lock().unwrap().push((method, url.to_string()));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(Error::Transport("mock exhausted".into()));
            }
            Ok(responses.remove(0))
        }
    }

    #[test]
    fn mock_transport_replays_canned_responses() {
        let mock = MockTransport::new(vec![Envelope::new(
            200,
            None,
            HeaderMap::new(),
            "u".into(),
            None,
        )]);
        let env = mock
            .send(Verb::Get, "http://x", &ClientConfig::default(), &RequestBody::empty())
            .unwrap();
        assert!(env.ok());
        assert_eq!(mock.calls.lock().unwrap().len(), 1);
    }
}
