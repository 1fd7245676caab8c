//! Response envelope: uniform normalized response (spec §4.3, component C3).

use std::cell::RefCell;
use std::time::{Duration, SystemTime};

use crate::error::Error;
use crate::retry;

/// A header map that is case-insensitive on lookup but preserves insertion
/// order on iteration, matching the "CI map" called for in spec §3.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// An empty map.
    pub fn new() -> Self {
        HeaderMap::default()
    }

    /// Insert a header, replacing any existing value(s) for the same name
    /// case-insensitively.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.entries.push((name, value.into()));
    }

    /// First value for `name`, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Iterate `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Lazily-read, idempotent body accessor.
///
/// Mirrors spec §4.3: "each [accessor] idempotent and each callable at most
/// once on a streamed body (subsequent calls return the cached value)".
#[derive(Debug)]
pub struct Body {
    raw: RefCell<Option<Vec<u8>>>,
    cached_text: RefCell<Option<String>>,
    #[cfg(feature = "json")]
    cached_json: RefCell<Option<serde_json::Value>>,
}

impl Body {
    /// Wrap already-read bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Body {
            raw: RefCell::new(Some(bytes)),
            cached_text: RefCell::new(None),
            #[cfg(feature = "json")]
            cached_json: RefCell::new(None),
        }
    }

    /// An empty body.
    pub fn empty() -> Self {
        Body::from_bytes(Vec::new())
    }

    /// The raw bytes. Idempotent: repeated calls return the same cached
    /// bytes rather than re-reading a (possibly already-consumed) stream.
    pub fn raw(&self) -> Vec<u8> {
        self.raw.borrow().clone().unwrap_or_default()
    }

    /// The body decoded as UTF-8 text (lossy).
    pub fn text(&self) -> String {
        if let Some(cached) = self.cached_text.borrow().as_ref() {
            return cached.clone();
        }
        let bytes = self.raw();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        *self.cached_text.borrow_mut() = Some(text.clone());
        text
    }

    /// The body parsed as JSON.
    #[cfg(feature = "json")]
    pub fn json(&self) -> Result<serde_json::Value, Error> {
        if let Some(cached) = self.cached_json.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let text = self.text();
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| Error::Transport(e.to_string()))?;
        *self.cached_json.borrow_mut() = Some(value.clone());
        Ok(value)
    }
}

/// Status code classes recognized by the crate (spec §6).
pub mod status_class {
    /// `{200, 201, 202, 204}`.
    pub const OK: [u16; 4] = [200, 201, 202, 204];
    /// `{304}`.
    pub const USE_CACHED: [u16; 1] = [304];
    /// `{301, 302, 303, 307, 308}`.
    pub const REDIRECT: [u16; 5] = [301, 302, 303, 307, 308];
    /// `{400, 406, 411, 412, 413, 414, 415, 416, 417, 421, 422, 431}`.
    pub const CLIENT_ERROR: [u16; 12] = [400, 406, 411, 412, 413, 414, 415, 416, 417, 421, 422, 431];
    /// `{425, 429}`.
    pub const EXCEEDS_RATE_LIMIT: [u16; 2] = [425, 429];
}

/// Normalized response returned by any [`crate::transport::TransportDelegate`]
/// (spec §4.3, component C3).
pub struct Envelope {
    /// HTTP status code.
    pub status: u16,
    /// HTTP status text, derived from a lookup table when the transport
    /// didn't supply one.
    pub status_text: String,
    /// Response headers.
    pub headers: HeaderMap,
    /// The final URL this response was produced for (after any redirects
    /// the transport followed internally).
    pub url: String,
    /// Response body, if any (HEAD responses carry none).
    pub body: Option<Body>,
    /// Error classification, populated for non-ok/non-redirect statuses.
    pub error: Option<Error>,
}

impl Envelope {
    /// Build an envelope from transport-reported fields, deriving
    /// `status_text` from the standard table when the transport gave none.
    pub fn new(status: u16, status_text: Option<String>, headers: HeaderMap, url: String, body: Option<Body>) -> Self {
        let status_text = status_text.unwrap_or_else(|| default_status_text(status).to_string());
        Envelope {
            status,
            status_text,
            headers,
            url,
            body,
            error: None,
        }
    }

    /// `2xx` except none of the other "ok" carve-outs apply; precisely the
    /// spec §6 `ok` class.
    pub fn ok(&self) -> bool {
        status_class::OK.contains(&self.status)
    }

    /// `3xx` with a `Location` header present.
    pub fn is_redirect(&self) -> bool {
        status_class::REDIRECT.contains(&self.status) && self.headers.get("location").is_some()
    }

    /// `304`.
    pub fn is_use_cached(&self) -> bool {
        status_class::USE_CACHED.contains(&self.status)
    }

    /// `4xx`, restricted to the enumerated client-error set (spec §6).
    pub fn is_client_error(&self) -> bool {
        status_class::CLIENT_ERROR.contains(&self.status)
    }

    /// `425` or `429`.
    pub fn is_exceeds_rate_limit(&self) -> bool {
        status_class::EXCEEDS_RATE_LIMIT.contains(&self.status)
    }

    /// True if this envelope carries an error classification.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// `Location` header value when this is a redirect, else empty.
    pub fn redirect_url(&self) -> &str {
        if self.is_redirect() {
            self.headers.get("location").unwrap_or("")
        } else {
            ""
        }
    }

    /// `Retry-After`, parsed as either an integer seconds count or an
    /// HTTP-date.
    pub fn retry_after(&self) -> Option<Duration> {
        let raw = self.headers.get("retry-after")?;
        parse_retry_after(raw)
    }

    /// The group this response claims to belong to, from
    /// `X-RateLimit-Group`.
    pub fn rate_limit_group(&self) -> Option<&str> {
        self.headers.get("x-ratelimit-group")
    }

    /// Raw `X-RateLimit-Limit` string.
    pub fn rate_limit_limit(&self) -> Option<&str> {
        self.headers.get("x-ratelimit-limit")
    }

    /// Parsed `X-RateLimit-Remaining`.
    pub fn rate_limit_remaining(&self) -> Option<u32> {
        self.headers.get("x-ratelimit-remaining")?.parse().ok()
    }

    /// Parsed `X-RateLimit-Reset`, in seconds.
    pub fn rate_limit_reset(&self) -> Option<u64> {
        self.headers.get("x-ratelimit-reset")?.parse().ok()
    }

    /// Is this status in the retry-eligible set (spec §6)?
    pub fn is_retry_eligible(&self) -> bool {
        retry::RETRY_ELIGIBLE.contains(&self.status)
    }
}

fn parse_retry_after(raw: &str) -> Option<Duration> {
    if let Ok(secs) = raw.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP-date form, e.g. "Wed, 21 Oct 2015 07:28:00 GMT".
    let target = httpdate::parse_http_date(raw.trim()).ok()?;
    let now = SystemTime::now();
    target
        .duration_since(now)
        .ok()
        .or_else(|| Some(Duration::from_secs(0)))
}

/// Minimal HTTP-date parser, just enough for `Retry-After`. A full date
/// library is unwarranted for one header; this mirrors the scope of
/// `ureq`'s own hand-rolled status-line parsing in `response.rs`.
mod httpdate {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn parse_http_date(s: &str) -> Result<SystemTime, ()> {
        // RFC 7231 IMF-fixdate: "Sun, 06 Nov 1994 08:49:37 GMT"
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.len() != 6 {
            return Err(());
        }
        let day: u64 = parts[1].parse().map_err(|_| ())?;
        let month = month_index(parts[2]).ok_or(())?;
        let year: u64 = parts[3].parse().map_err(|_| ())?;
        let time: Vec<&str> = parts[4].split(':').collect();
        if time.len() != 3 {
            return Err(());
        }
        let hour: u64 = time[0].parse().map_err(|_| ())?;
        let minute: u64 = time[1].parse().map_err(|_| ())?;
        let second: u64 = time[2].parse().map_err(|_| ())?;

        let days_since_epoch = days_from_civil(year, month, day);
        let secs = days_since_epoch * 86_400 + hour * 3600 + minute * 60 + second;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }

    fn month_index(name: &str) -> Option<u64> {
        const MONTHS: [&str; 12] = [
            "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
        ];
        MONTHS.iter().position(|m| m.eq_ignore_ascii_case(name)).map(|p| p as u64 + 1)
    }

    // Howard Hinnant's days-from-civil algorithm (proleptic Gregorian).
    fn days_from_civil(y: u64, m: u64, d: u64) -> u64 {
        let y = y as i64 - i64::from(m <= 2);
        let era = if y >= 0 { y } else { y - 399 } / 400;
        let yoe = (y - era * 400) as u64;
        let mp = (m + 9) % 12;
        let doy = (153 * mp + 2) / 5 + d - 1;
        let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
        era as u64 * 146_097 + doe - 719_468
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn epoch_date_resolves_to_unix_epoch() {
            let t = parse_http_date("Thu, 01 Jan 1970 00:00:00 GMT").unwrap();
            assert_eq!(t, UNIX_EPOCH);
        }

        #[test]
        fn known_date_resolves_to_correct_offset() {
            // 2015-10-21 07:28:00Z is 1_445_412_480s after the epoch.
            let t = parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
            assert_eq!(
                t.duration_since(UNIX_EPOCH).unwrap(),
                Duration::from_secs(1_445_412_480)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_accessors_are_idempotent() {
        let body = Body::from_bytes(b"{\"a\":1}".to_vec());
        assert_eq!(body.text(), body.text());
        #[cfg(feature = "json")]
        {
            let first = body.json().unwrap();
            let second = body.json().unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn classification_predicates() {
        let env = Envelope::new(429, None, HeaderMap::new(), "u".into(), None);
        assert!(env.is_exceeds_rate_limit());
        assert!(!env.ok());

        let env = Envelope::new(204, None, HeaderMap::new(), "u".into(), None);
        assert!(env.ok());
    }

    #[test]
    fn redirect_url_requires_location_header() {
        let mut headers = HeaderMap::new();
        headers.insert("Location", "https://example.com/next");
        let env = Envelope::new(302, None, headers, "u".into(), None);
        assert!(env.is_redirect());
        assert_eq!(env.redirect_url(), "https://example.com/next");

        let env = Envelope::new(302, None, HeaderMap::new(), "u".into(), None);
        assert!(!env.is_redirect());
        assert_eq!(env.redirect_url(), "");
    }

    #[test]
    fn retry_after_parses_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("Retry-After", "2");
        let env = Envelope::new(429, None, headers, "u".into(), None);
        assert_eq!(env.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn status_text_falls_back_to_table() {
        let env = Envelope::new(404, None, HeaderMap::new(), "u".into(), None);
        assert_eq!(env.status_text, "Not Found");
    }
}

fn default_status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        425 => "Too Early",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown Status",
    }
}
