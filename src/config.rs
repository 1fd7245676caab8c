//! Config resolution (spec §3 data model, §4.1, component C1).
//!
//! Mirrors `ureq::config::Config`'s consuming-builder shape
//! (`examples/algesten-ureq/src/config.rs`): plain getters plus a
//! `fn field(mut self, v) -> Self` builder, minus the typestate-scope
//! machinery the teacher needs for its agent/request/http-crate split (this
//! crate has exactly one config scope).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;

use crate::group_mapper::RequestGroupMapper;
use crate::priority::Priority;
use crate::verb::Verb;

fn clamp_u64(v: u64, lo: u64, hi: u64) -> u64 {
    v.clamp(lo, hi)
}

/// Pooling/transport knobs (spec §3 "Agent configuration").
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    keep_alive: bool,
    keep_alive_millis: u64,
    max_free_sockets: Option<u64>,
    max_total_sockets: Option<u64>,
    reject_unauthorized: bool,
}

impl AgentConfig {
    /// Whether pooled connections are kept alive between requests.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Clamped to `[1000, 300000]`.
    pub fn keep_alive_millis(&self) -> u64 {
        clamp_u64(self.keep_alive_millis, 1000, 300_000)
    }

    /// Clamped to `[64, 1024]`, or `None` for unbounded.
    pub fn max_free_sockets(&self) -> Option<u64> {
        self.max_free_sockets.map(|v| clamp_u64(v, 64, 1024))
    }

    /// `None` (unbounded) or a value greater than `max_free_sockets`.
    pub fn max_total_sockets(&self) -> Option<u64> {
        self.max_total_sockets
    }

    /// Whether to validate TLS peer certificates.
    pub fn reject_unauthorized(&self) -> bool {
        self.reject_unauthorized
    }

    /// Whether this looks like a real agent config rather than a stray
    /// object literal that survived a shallow merge (spec §4.1 "fix-agents
    /// pattern"). In a statically typed config this is trivially always
    /// true: the type itself proves it.
    pub fn is_real_agent(&self) -> bool {
        true
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            keep_alive: true,
            keep_alive_millis: 5000,
            max_free_sockets: Some(256),
            max_total_sockets: None,
            reject_unauthorized: true,
        }
    }
}

/// Connection pool scheduling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheduling {
    /// Most-recently-freed connection is reused first.
    #[default]
    Lifo,
    /// Least-recently-freed connection is reused first.
    Fifo,
}

/// [`AgentConfig`] plus the extended knobs spec §3 calls out.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedAgentConfig {
    base: AgentConfig,
    agent_keep_alive_timeout_buffer: u64,
    scheduling: Scheduling,
    timeout_millis: u64,
}

impl ExtendedAgentConfig {
    /// The base (non-extended) fields.
    pub fn base(&self) -> &AgentConfig {
        &self.base
    }

    /// Clamped to `[128, 4500]`.
    pub fn agent_keep_alive_timeout_buffer(&self) -> u64 {
        clamp_u64(self.agent_keep_alive_timeout_buffer, 128, 4500)
    }

    /// Defaults to [`Scheduling::Lifo`].
    pub fn scheduling(&self) -> Scheduling {
        self.scheduling
    }

    /// Clamped to `[5000, 19000]`.
    pub fn timeout_millis(&self) -> u64 {
        clamp_u64(self.timeout_millis, 5000, 19000)
    }
}

impl Default for ExtendedAgentConfig {
    fn default() -> Self {
        ExtendedAgentConfig {
            base: AgentConfig::default(),
            agent_keep_alive_timeout_buffer: 1000,
            scheduling: Scheduling::Lifo,
            timeout_millis: 10_000,
        }
    }
}

/// Ordered, duplicate-overwriting header map built from either a string
/// (spec §4.1: split CRLF, then first `:`) or field-wise copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// An empty header set.
    pub fn new() -> Self {
        Headers::default()
    }

    /// Parse `"Name: value\r\nName2: value2"`. A line that fails the
    /// header-name predicate is skipped, matching spec §4.1.
    pub fn parse(raw: &str) -> Self {
        let mut headers = Headers::new();
        for line in raw.split(|c| c == '\r' || c == '\n') {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                let value = value.trim();
                if is_valid_header_name(name) {
                    headers.set(name, value);
                }
            }
        }
        headers
    }

    /// Set (overwriting) a header value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.entries.push((name, value.into()));
    }

    /// Remove a key entirely (a `null` value in spec §4.1's merge rules).
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Look up a header value, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Merge `other` over `self`: non-null values overwrite, matching spec
    /// §4.1.
    pub fn merged_with(&self, other: &Headers) -> Headers {
        let mut out = self.clone();
        for (k, v) in other.iter() {
            out.set(k, v);
        }
        out
    }
}

fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && b != b':' && !b.is_ascii_whitespace())
}

/// Per-request/agent configuration (spec §3 "Client configuration").
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) allow_absolute_urls: bool,
    pub(crate) timeout_millis: u64,
    pub(crate) max_content_length: u64,
    pub(crate) max_body_length: u64,
    pub(crate) max_redirects: u32,
    pub(crate) decompress: bool,
    pub(crate) method: Verb,
    pub(crate) content_type: String,
    pub(crate) headers: Headers,
    pub(crate) accept: String,
    pub(crate) agent: Arc<AgentConfig>,
    pub(crate) extended: Arc<ExtendedAgentConfig>,
    pub(crate) priority: Priority,
    pub(crate) max_delay_before_queueing_millis: u64,
    pub(crate) max_retries: u32,
    pub(crate) request_group: Option<String>,
    pub(crate) group_mapper: Option<Arc<RequestGroupMapper>>,
}

impl ClientConfig {
    /// `status in [200, 500)` is the default "not a transport error" band
    /// (spec §3 "Client configuration").
    pub fn is_not_transport_error(status: u16) -> bool {
        (200..500).contains(&status)
    }

    /// Clamped to `[10000, 60000]`, default 30000.
    pub fn timeout_millis(&self) -> u64 {
        clamp_u64(self.timeout_millis, 10_000, 60_000)
    }

    /// Clamped to `[64KB, 200MB]`.
    pub fn max_content_length(&self) -> u64 {
        clamp_u64(self.max_content_length, 64 * 1024, 200 * 1024 * 1024)
    }

    /// Clamped to `[64KB, 200MB]`.
    pub fn max_body_length(&self) -> u64 {
        clamp_u64(self.max_body_length, 64 * 1024, 200 * 1024 * 1024)
    }

    /// Clamped to `[3, 10]`, default 5.
    pub fn max_redirects(&self) -> u32 {
        self.max_redirects.clamp(3, 10)
    }

    /// Clamped to `[100, 10000]`, default 2500 (spec §4.7).
    pub fn max_delay_before_queueing(&self) -> Duration {
        Duration::from_millis(clamp_u64(self.max_delay_before_queueing_millis, 100, 10_000))
    }

    /// Clamped to `[0, MAX_RETRIES_CAP]`, default 5 (spec §4.2).
    pub fn max_retries(&self) -> u32 {
        self.max_retries.min(crate::retry::MAX_RETRIES_CAP)
    }

    /// Method for this request.
    pub fn method(&self) -> Verb {
        self.method
    }

    /// The configured headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The agent-level pooling config.
    pub fn agent(&self) -> &AgentConfig {
        &self.agent
    }

    /// The extended agent-level config.
    pub fn extended(&self) -> &ExtendedAgentConfig {
        &self.extended
    }

    /// Priority this request should be scheduled at.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// An explicit group override, bypassing the mapper entirely (spec
    /// §4.4 step 1).
    pub fn request_group(&self) -> Option<&str> {
        self.request_group.as_deref()
    }

    // --- builder-style setters, mirroring ureq::ConfigBuilder's
    // `fn field(mut self, v) -> Self` shape ---

    /// Set the method.
    pub fn with_method(mut self, v: Verb) -> Self {
        self.method = v;
        self
    }

    /// Set the timeout.
    pub fn timeout_millis_mut(mut self, v: u64) -> Self {
        self.timeout_millis = v;
        self
    }

    /// Set max redirects.
    pub fn max_redirects_mut(mut self, v: u32) -> Self {
        self.max_redirects = v;
        self
    }

    /// Set max retries.
    pub fn max_retries_mut(mut self, v: u32) -> Self {
        self.max_retries = v;
        self
    }

    /// Set priority.
    pub fn priority_mut(mut self, v: Priority) -> Self {
        self.priority = v;
        self
    }

    /// Set an explicit rate-limit group, bypassing the mapper.
    pub fn request_group_mut(mut self, v: impl Into<String>) -> Self {
        self.request_group = Some(v.into());
        self
    }

    /// Set a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }
}

impl PartialEq for ClientConfig {
    // Equality ignores `group_mapper` (compared by pointer identity instead
    // of structural equality, since `RequestGroupMapper` embeds `Regex`
    // which doesn't implement `PartialEq`). Every other field participates.
    fn eq(&self, other: &Self) -> bool {
        self.allow_absolute_urls == other.allow_absolute_urls
            && self.timeout_millis == other.timeout_millis
            && self.max_content_length == other.max_content_length
            && self.max_body_length == other.max_body_length
            && self.max_redirects == other.max_redirects
            && self.decompress == other.decompress
            && self.method == other.method
            && self.content_type == other.content_type
            && self.headers == other.headers
            && self.accept == other.accept
            && self.agent == other.agent
            && self.extended == other.extended
            && self.priority == other.priority
            && self.max_delay_before_queueing_millis == other.max_delay_before_queueing_millis
            && self.max_retries == other.max_retries
            && self.request_group == other.request_group
            && match (&self.group_mapper, &other.group_mapper) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            allow_absolute_urls: true,
            timeout_millis: 30_000,
            max_content_length: 10 * 1024 * 1024,
            max_body_length: 10 * 1024 * 1024,
            max_redirects: 5,
            decompress: true,
            method: Verb::Get,
            content_type: "application/json".to_string(),
            headers: Headers::new(),
            accept: "application/json".to_string(),
            agent: Arc::new(AgentConfig::default()),
            extended: Arc::new(ExtendedAgentConfig::default()),
            priority: Priority::Auto,
            max_delay_before_queueing_millis: 2500,
            max_retries: crate::retry::DEFAULT_MAX_RETRIES,
            request_group: None,
            group_mapper: None,
        }
    }
}

/// Bearer token, which may be a plain string or a structured
/// `(token, expires_in_secs)` pair (spec §3 "Access token").
#[derive(Debug, Clone, PartialEq)]
pub enum AccessToken {
    /// A plain bearer token string.
    Plain(String),
    /// A token plus its expiry, in seconds from issuance.
    Structured {
        /// The token value.
        token: String,
        /// Seconds until expiry.
        expires_in: u64,
    },
}

impl AccessToken {
    /// The bearer value to put on the wire, regardless of shape.
    pub fn token(&self) -> &str {
        match self {
            AccessToken::Plain(t) => t,
            AccessToken::Structured { token, .. } => token,
        }
    }
}

/// [`ClientConfig`] extended with third-party API auth fields (spec §3 "API
/// configuration").
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// The underlying client config.
    pub client: ClientConfig,
    /// A raw API key.
    pub api_key: Option<String>,
    /// A bearer access token.
    pub access_token: Option<AccessToken>,
    /// A personal access token.
    pub personal_access_token: Option<String>,
    /// OAuth client id.
    pub client_id: Option<String>,
    /// OAuth client secret.
    pub client_secret: Option<String>,
    /// Tenant org id.
    pub org_id: Option<String>,
    /// Tenant user id.
    pub user_id: Option<String>,
    /// URL to exchange client credentials for an access token.
    pub access_token_url: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            client: ClientConfig::default(),
            api_key: None,
            access_token: None,
            personal_access_token: None,
            client_id: None,
            client_secret: None,
            org_id: None,
            user_id: None,
            access_token_url: None,
        }
    }
}

impl ApiConfig {
    /// Given a mapping of *target key -> source field name*, produce a flat
    /// `target key -> value` record, with any unmapped non-empty field
    /// preserved under its own name (spec §3 "mapToTargetConfig").
    pub fn map_to_target_config(&self, mapping: &HashMap<String, String>) -> HashMap<String, String> {
        let mut fields: HashMap<String, String> = HashMap::new();
        if let Some(v) = &self.api_key {
            fields.insert("apiKey".to_string(), v.clone());
        }
        if let Some(v) = &self.access_token {
            fields.insert("accessToken".to_string(), v.token().to_string());
        }
        if let Some(v) = &self.personal_access_token {
            fields.insert("personalAccessToken".to_string(), v.clone());
        }
        if let Some(v) = &self.client_id {
            fields.insert("clientId".to_string(), v.clone());
        }
        if let Some(v) = &self.client_secret {
            fields.insert("clientSecret".to_string(), v.clone());
        }
        if let Some(v) = &self.org_id {
            fields.insert("orgId".to_string(), v.clone());
        }
        if let Some(v) = &self.user_id {
            fields.insert("userId".to_string(), v.clone());
        }
        if let Some(v) = &self.access_token_url {
            fields.insert("accessTokenUrl".to_string(), v.clone());
        }

        let mut out = HashMap::new();
        let mut consumed: Vec<&String> = Vec::new();
        for (target_key, source_field) in mapping {
            if let Some(value) = fields.get(source_field) {
                out.insert(target_key.clone(), value.clone());
                consumed.push(source_field);
            }
        }
        for (field, value) in &fields {
            if !consumed.contains(&field) && !value.is_empty() {
                out.insert(field.clone(), value.clone());
            }
        }
        out
    }

    /// HTTP Basic auth header value for exchanging `client_id`/`client_secret`
    /// at `access_token_url` (RFC 7617): `base64(client_id ++ ":" ++
    /// client_secret)`.
    pub fn basic_auth_header(&self) -> Option<String> {
        let id = self.client_id.as_deref()?;
        let secret = self.client_secret.as_deref()?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{id}:{secret}"));
        Some(format!("Basic {encoded}"))
    }
}

/// Merges user overrides onto defaults, re-upgrades any agent reference
/// that looks like a stray plain object, and produces a frozen effective
/// config per request (spec §4.1, component C1).
#[derive(Default)]
pub struct ConfigResolver {
    default_agent: Arc<AgentConfig>,
    default_extended_agent: Arc<ExtendedAgentConfig>,
}

impl ConfigResolver {
    /// A resolver seeded with the process-wide default agents
    /// (spec §9 "Global state").
    pub fn new() -> Self {
        ConfigResolver {
            default_agent: Arc::new(AgentConfig::default()),
            default_extended_agent: Arc::new(ExtendedAgentConfig::default()),
        }
    }

    /// Merge `base` and `overrides`, producing `c`. Idempotent:
    /// `merge(merge(a,b), b) == merge(a,b)` (spec §8).
    pub fn merge(&self, base: &ClientConfig, overrides: &ClientConfig) -> ClientConfig {
        let mut merged = overrides.clone();
        merged.headers = base.headers.merged_with(&overrides.headers);
        self.fix_agents(&mut merged);
        merged
    }

    /// Resolve a user-provided config against the built-in defaults.
    pub fn resolve(&self, user: &ClientConfig) -> ClientConfig {
        self.merge(&ClientConfig::default(), user)
    }

    /// Resolve an [`ApiConfig`], delegating the `client` half to
    /// [`ConfigResolver::resolve`], then stamping an `Authorization` header
    /// from whichever credential is present: a bearer access token takes
    /// precedence over client-credential Basic auth.
    pub fn resolve_api(&self, user: &ApiConfig) -> ApiConfig {
        let mut resolved = user.clone();
        resolved.client = self.resolve(&user.client);
        let authorization = resolved
            .access_token
            .as_ref()
            .map(|token| format!("Bearer {}", token.token()))
            .or_else(|| resolved.basic_auth_header());
        if let Some(value) = authorization {
            resolved.client.headers.set("Authorization", value);
        }
        resolved
    }

    /// Re-upgrade a shallow-merge-downgraded agent reference to a real
    /// agent (spec §4.1, §9 "fix-agents pattern"). Because `agent`/
    /// `extended` are `Arc<AgentConfig>`/`Arc<ExtendedAgentConfig>` here
    /// rather than `Any`-typed fields, this can never actually observe a
    /// fake agent — the type system already guarantees it. The check is
    /// kept so the contract ("the effective config always holds a real
    /// agent") stays assertable, and so a future refactor that loosens the
    /// field's type doesn't silently disable pooling.
    fn fix_agents(&self, cfg: &mut ClientConfig) {
        if !cfg.agent.is_real_agent() {
            cfg.agent = self.default_agent.clone();
        }
        if !cfg.extended.base().is_real_agent() {
            cfg.extended = self.default_extended_agent.clone();
        }
    }
}
