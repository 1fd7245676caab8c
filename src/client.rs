//! Facade client: the public entry point (spec §4.8, component C8).

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use log::debug;

use crate::config::{ClientConfig, ConfigResolver};
use crate::envelope::{Envelope, HeaderMap};
use crate::error::Error;
use crate::retry;
use crate::throttle::SimpleThrottle;
use crate::transport::{RequestBody, TransportDelegate};
use crate::verb::Verb;

/// Public entry point. Selects a transport delegate by `(verb,
/// content-type)`, forwards all request operations, and implements
/// retry/redirect/rate-limit handling at a second layer — paced by a
/// [`SimpleThrottle`] rather than the per-group engine C7 uses, since this
/// facade is the path taken when no rate-limit group applies.
pub struct Client {
    resolver: ConfigResolver,
    default_delegate: Arc<dyn TransportDelegate>,
    delegates: HashMap<(Verb, String), Arc<dyn TransportDelegate>>,
    throttle: SimpleThrottle,
}

impl Client {
    /// A client backed by a single default delegate, with no per-route
    /// overrides.
    pub fn new(default_delegate: Arc<dyn TransportDelegate>) -> Self {
        Client {
            resolver: ConfigResolver::new(),
            default_delegate,
            delegates: HashMap::new(),
            throttle: SimpleThrottle::new(),
        }
    }

    /// Route `(verb, content_type)` to a specific delegate, e.g. sending
    /// `POST`/`multipart/form-data` through an upload-capable transport
    /// while everything else uses the default.
    pub fn with_delegate(
        mut self,
        verb: Verb,
        content_type: impl Into<String>,
        delegate: Arc<dyn TransportDelegate>,
    ) -> Self {
        self.delegates.insert((verb, content_type.into()), delegate);
        self
    }

    fn delegate_for(&self, verb: Verb, content_type: &str) -> &Arc<dyn TransportDelegate> {
        self.delegates
            .get(&(verb, content_type.to_string()))
            .unwrap_or(&self.default_delegate)
    }

    /// Per-verb wrapper.
    pub fn get(&self, url: &str, config: &ClientConfig) -> Result<Envelope, Error> {
        self.send(Verb::Get, url, config, RequestBody::empty())
    }

    /// Per-verb wrapper.
    pub fn post(&self, url: &str, config: &ClientConfig, body: RequestBody) -> Result<Envelope, Error> {
        self.send(Verb::Post, url, config, body)
    }

    /// Per-verb wrapper.
    pub fn put(&self, url: &str, config: &ClientConfig, body: RequestBody) -> Result<Envelope, Error> {
        self.send(Verb::Put, url, config, body)
    }

    /// Per-verb wrapper.
    pub fn patch(&self, url: &str, config: &ClientConfig, body: RequestBody) -> Result<Envelope, Error> {
        self.send(Verb::Patch, url, config, body)
    }

    /// Per-verb wrapper.
    pub fn delete(&self, url: &str, config: &ClientConfig) -> Result<Envelope, Error> {
        self.send(Verb::Delete, url, config, RequestBody::empty())
    }

    /// Per-verb wrapper.
    pub fn head(&self, url: &str, config: &ClientConfig) -> Result<Envelope, Error> {
        self.send(Verb::Head, url, config, RequestBody::empty())
    }

    /// Per-verb wrapper.
    pub fn options(&self, url: &str, config: &ClientConfig) -> Result<Envelope, Error> {
        self.send(Verb::Options, url, config, RequestBody::empty())
    }

    /// Per-verb wrapper.
    pub fn trace(&self, url: &str, config: &ClientConfig) -> Result<Envelope, Error> {
        self.send(Verb::Trace, url, config, RequestBody::empty())
    }

    /// Resolve config, pick a delegate, and run the retry/redirect state
    /// machine, paced by the fallback throttle (spec §4.8, §4.9).
    pub fn send(
        &self,
        method: Verb,
        url: &str,
        user_config: &ClientConfig,
        body: RequestBody,
    ) -> Result<Envelope, Error> {
        let config = self.resolver.resolve(user_config);
        let delegate = self.delegate_for(method, &config.content_type);

        let mut current_url = url.to_string();
        let mut redirects = 0u32;
        let mut retries = 0u32;

        loop {
            thread::sleep(self.throttle.calculate_delay());
            self.throttle.increment();

            let envelope = delegate.send(method, &current_url, &config, &body)?;

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
                    return Err(Error::RetryExhausted);
                }
                let delay = retry::retry_delay(envelope.status, envelope.retry_after(), retries);
                debug!("{method} {current_url}: status {} retry {retries} after {delay:?}", envelope.status);
                thread::sleep(delay);
                continue;
            }
            if envelope.status >= 500 {
                return Err(Error::ServerError(Box::new(envelope)));
            }
            return Err(Error::ClientError(Box::new(envelope)));
        }
    }

    /// Stream `url` to `output_dir/filename`, deriving the actual filename
    /// from `Content-Disposition` when the server supplies one (spec §4.8).
    /// Existing files are overwritten; `output_dir` is not created.
    pub fn download(
        &self,
        url: &str,
        config: &ClientConfig,
        output_dir: &Path,
        filename: &str,
    ) -> Result<PathBuf, Error> {
        let resolved = self.resolver.resolve(config);
        let delegate = self.delegate_for(Verb::Get, &resolved.content_type);

        let (headers, mut reader) = match delegate.download(url, &resolved) {
            Some(result) => result?,
            None => {
                let envelope = delegate.send(Verb::Get, url, &resolved, &RequestBody::empty())?;
                if !envelope.ok() {
                    if envelope.status >= 500 {
                        return Err(Error::ServerError(Box::new(envelope)));
                    }
                    return Err(Error::ClientError(Box::new(envelope)));
                }
                let bytes = envelope.body.map(|b| b.raw()).unwrap_or_default();
                let name = content_disposition_filename(&envelope.headers).unwrap_or_else(|| filename.to_string());
                let path = output_dir.join(name);
                fs::write(&path, &bytes)?;
                return Ok(path);
            }
        };

        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let name = content_disposition_filename(&headers).unwrap_or_else(|| filename.to_string());
        let path = output_dir.join(name);
        fs::write(&path, &bytes)?;
        Ok(path)
    }

    /// Forward to the delegate's `upload` if it implements one, otherwise
    /// fall back to a plain POST (spec §4.8).
    pub fn upload(&self, url: &str, config: &ClientConfig, body: RequestBody) -> Result<Envelope, Error> {
        let resolved = self.resolver.resolve(config);
        let delegate = self.delegate_for(Verb::Post, &resolved.content_type);
        if let Some(result) = delegate.upload(url, &resolved, &body) {
            return result;
        }
        self.post(url, config, body)
    }
}

/// Extract a filename from a `Content-Disposition` header, preferring the
/// RFC 5987 extended `filename*=` form over the plain `filename=` form when
/// both are present (spec §4.8 step 2).
fn content_disposition_filename(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("content-disposition")?;
    let mut plain = None;
    let mut extended = None;

    for part in value.split(';').skip(1) {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("filename*=") {
            extended = decode_extended_filename(rest);
        } else if let Some(rest) = part.strip_prefix("filename=") {
            plain = Some(unquote(rest));
        }
    }

    extended.or(plain)
}

/// Decode an RFC 5987 `ext-value`: `charset'language'percent-encoded-value`.
fn decode_extended_filename(raw: &str) -> Option<String> {
    let mut parts = raw.splitn(3, '\'');
    let _charset = parts.next()?;
    let _language = parts.next()?;
    let value = parts.next()?;
    percent_encoding::percent_decode_str(value)
        .decode_utf8()
        .ok()
        .map(|cow| cow.into_owned())
}

fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        raw[1..raw.len() - 1].replace("\\\"", "\"").replace("\\\\", "\\")
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::HeaderMap;
    use std::sync::Mutex;

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
    fn plain_get_returns_ok_envelope() {
        let transport = Arc::new(ScriptedTransport::new(vec![Envelope::new(
            200,
            None,
            HeaderMap::new(),
            "u".into(),
            None,
        )]));
        let client = Client::new(transport);
        let env = client.get("https://api.example.com/ping", &ClientConfig::default()).unwrap();
        assert!(env.ok());
    }

    #[test]
    fn delegate_routing_prefers_registered_delegate() {
        let default_transport = Arc::new(ScriptedTransport::new(vec![Envelope::new(
            500,
            None,
            HeaderMap::new(),
            "u".into(),
            None,
        )]));
        let special_transport = Arc::new(ScriptedTransport::new(vec![Envelope::new(
            200,
            None,
            HeaderMap::new(),
            "u".into(),
            None,
        )]));
        let client = Client::new(default_transport).with_delegate(Verb::Post, "multipart/form-data", special_transport);

        let mut config = ClientConfig::default();
        config.content_type = "multipart/form-data".to_string();
        let env = client.post("https://api.example.com/upload", &config, RequestBody::empty()).unwrap();
        assert!(env.ok());
    }

    #[test]
    fn client_error_status_is_raised_as_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![Envelope::new(
            400,
            None,
            HeaderMap::new(),
            "u".into(),
            None,
        )]));
        let client = Client::new(transport);
        let result = client.get("https://api.example.com/bad", &ClientConfig::default());
        assert!(matches!(result, Err(Error::ClientError(_))));
    }

    #[test]
    fn content_disposition_prefers_extended_filename() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Content-Disposition",
            "attachment; filename=\"fallback.txt\"; filename*=UTF-8''report%20final.csv",
        );
        assert_eq!(
            content_disposition_filename(&headers),
            Some("report final.csv".to_string())
        );
    }

    #[test]
    fn content_disposition_falls_back_to_plain_filename() {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Disposition", "attachment; filename=\"report.csv\"");
        assert_eq!(content_disposition_filename(&headers), Some("report.csv".to_string()));
    }

    #[test]
    fn download_without_content_disposition_uses_fallback_name() {
        let envelope = Envelope::new(
            200,
            None,
            HeaderMap::new(),
            "u".into(),
            Some(crate::envelope::Body::from_bytes(b"payload".to_vec())),
        );
        let transport = Arc::new(ScriptedTransport::new(vec![envelope]));
        let client = Client::new(transport);
        let dir = std::env::temp_dir();
        let path = client
            .download("https://api.example.com/file", &ClientConfig::default(), &dir, "fallback.bin")
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "fallback.bin");
        assert_eq!(fs::read(&path).unwrap(), b"payload");
        let _ = fs::remove_file(&path);
    }
}
