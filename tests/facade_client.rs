use std::sync::{Arc, Mutex};

use quota_client::{
    Client, ClientConfig, Envelope, Error, HeaderMap, RequestBody, TransportDelegate, Verb,
};

/// A transport that replays canned envelopes in sequence, standing in for a
/// real backend the way `ureq`'s own test server does for its integration
/// tests, minus the real TCP listener (the wire transport is out of scope
/// for this crate).
struct MockTransport {
    responses: Mutex<Vec<Envelope>>,
    calls: Mutex<Vec<(Verb, String)>>,
}

impl MockTransport {
    fn new(responses: Vec<Envelope>) -> Self {
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
            return Ok(Envelope::new(200, None, HeaderMap::new(), url.to_string(), None));
        }
        let mut env = responses.remove(0);
        env.url = url.to_string();
        Ok(env)
    }
}

#[test]
fn get_returns_ok_body() {
    let transport = Arc::new(MockTransport::new(vec![Envelope::new(
        200,
        None,
        HeaderMap::new(),
        "u".into(),
        Some(quota_client::Body::from_bytes(b"{\"ok\":true}".to_vec())),
    )]));
    let client = Client::new(transport);

    let response = client
        .get("https://api.example.com/api/widgets/1", &ClientConfig::default())
        .expect("request should succeed");

    assert!(response.ok());
    assert_eq!(response.body.unwrap().text(), "{\"ok\":true}");
}

#[test]
fn retries_503_then_succeeds() {
    let busy = Envelope::new(503, None, HeaderMap::new(), "u".into(), None);
    let ok = Envelope::new(200, None, HeaderMap::new(), "u".into(), None);
    let transport = Arc::new(MockTransport::new(vec![busy, ok]));
    let client = Client::new(transport.clone());

    let response = client
        .get("https://api.example.com/api/widgets", &ClientConfig::default())
        .expect("request should eventually succeed");

    assert!(response.ok());
    assert_eq!(transport.calls.lock().unwrap().len(), 2);
}

#[test]
fn follows_redirect_chain() {
    let mut hop = Envelope::new(302, None, HeaderMap::new(), "u".into(), None);
    hop.headers.insert("Location", "https://api.example.com/api/widgets/final");
    let ok = Envelope::new(200, None, HeaderMap::new(), "u".into(), None);
    let transport = Arc::new(MockTransport::new(vec![hop, ok]));
    let client = Client::new(transport);

    let response = client
        .get("https://api.example.com/api/widgets/1", &ClientConfig::default())
        .expect("redirect should be followed");

    assert!(response.ok());
}

#[test]
fn client_error_status_surfaces_as_error() {
    let transport = Arc::new(MockTransport::new(vec![Envelope::new(
        404,
        None,
        HeaderMap::new(),
        "u".into(),
        None,
    )]));
    let client = Client::new(transport);

    let result = client.get("https://api.example.com/api/widgets/missing", &ClientConfig::default());
    assert!(matches!(result, Err(Error::ClientError(_))));
}

#[test]
fn download_uses_content_disposition_filename() {
    let mut env = Envelope::new(
        200,
        None,
        HeaderMap::new(),
        "u".into(),
        Some(quota_client::Body::from_bytes(b"file contents".to_vec())),
    );
    env.headers.insert("Content-Disposition", "attachment; filename=\"report.csv\"");
    let transport = Arc::new(MockTransport::new(vec![env]));
    let client = Client::new(transport);

    let dir = std::env::temp_dir();
    let path = client
        .download(
            "https://api.example.com/api/reports/latest",
            &ClientConfig::default(),
            &dir,
            "unused-fallback.bin",
        )
        .expect("download should succeed");

    assert_eq!(path.file_name().unwrap(), "report.csv");
    assert_eq!(std::fs::read(&path).unwrap(), b"file contents");
    let _ = std::fs::remove_file(&path);
}
