//! Request-group mapper: URL -> quota bucket (spec §4.4, component C4).

use regex::Regex;
use url::Url;

/// Deterministic function from a URL (plus an optional explicit override) to
/// a quota group name.
///
/// Immutable once built; [`RequestGroupMapper::mixin`] returns a *new*
/// mapper combining two mappers' literal and regex maps, preferring the
/// newer one's entries on key collision.
#[derive(Clone)]
pub struct RequestGroupMapper {
    api_path: Option<String>,
    literal: Vec<(String, String)>,
    regex: Vec<(Regex, String)>,
}

impl Default for RequestGroupMapper {
    fn default() -> Self {
        RequestGroupMapper {
            api_path: Some("api".to_string()),
            literal: Vec::new(),
            regex: Vec::new(),
        }
    }
}

impl RequestGroupMapper {
    /// A mapper with no literal/regex maps, anchored on `api_path`
    /// (defaults to `"api"`, matching spec §4.4 step 3).
    pub fn new(api_path: Option<impl Into<String>>) -> Self {
        RequestGroupMapper {
            api_path: api_path.map(Into::into),
            literal: Vec::new(),
            regex: Vec::new(),
        }
    }

    /// Add a literal `path-segment -> group` mapping. Later entries win on
    /// exact/lowercase collision with the same key.
    pub fn add_literal(&mut self, segment: impl Into<String>, group: impl Into<String>) -> &mut Self {
        self.literal.push((segment.into(), group.into()));
        self
    }

    /// Add a `regex -> group` mapping, checked in insertion order.
    pub fn add_regex(&mut self, pattern: Regex, group: impl Into<String>) -> &mut Self {
        self.regex.push((pattern, group.into()));
        self
    }

    /// Concatenate two mappers' literal and regex maps, preferring `other`'s
    /// entries (it is the "newer" one) when both define the same literal
    /// key. `api_path` is taken from `other` if it set one, else from self.
    pub fn mixin(&self, other: &RequestGroupMapper) -> RequestGroupMapper {
        let mut literal = self.literal.clone();
        literal.extend(other.literal.iter().cloned());
        let mut regex = self.regex.clone();
        regex.extend(other.regex.iter().cloned());
        RequestGroupMapper {
            api_path: other.api_path.clone().or_else(|| self.api_path.clone()),
            literal,
            regex,
        }
    }

    fn lookup_literal(&self, candidate: &str) -> Option<String> {
        // exact match first
        for (key, group) in &self.literal {
            if key == candidate {
                return Some(group.clone());
            }
        }
        // then case-insensitive
        for (key, group) in &self.literal {
            if key.eq_ignore_ascii_case(candidate) {
                return Some(group.clone());
            }
        }
        None
    }

    fn lookup_regex(&self, candidate: &str, segments: &[&str]) -> Option<String> {
        for (re, group) in &self.regex {
            if re.is_match(candidate) || segments.iter().any(|s| re.is_match(s)) {
                return Some(group.clone());
            }
        }
        None
    }

    /// Derive the quota group for `url`. `explicit_group`, if set, always
    /// wins (spec §4.4 step 1).
    pub fn map(&self, url: &str, explicit_group: Option<&str>) -> String {
        if let Some(g) = explicit_group {
            return g.to_string();
        }

        let path = path_without_query_or_fragment(url);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let candidate = self
            .api_path
            .as_deref()
            .and_then(|anchor| {
                segments
                    .iter()
                    .rposition(|s| s.eq_ignore_ascii_case(anchor))
                    .and_then(|idx| segments.get(idx + 1).copied())
            })
            .or_else(|| segments.last().copied());

        if let Some(candidate) = candidate {
            if let Some(group) = self.lookup_literal(candidate) {
                return group;
            }
            if let Some(group) = self.lookup_regex(candidate, &segments) {
                return group;
            }
            return candidate.to_string();
        }

        if !path.is_empty() {
            return path.to_string();
        }

        url.to_string()
    }
}

fn path_without_query_or_fragment(url: &str) -> String {
    if let Ok(parsed) = Url::parse(url) {
        return parsed.path().to_string();
    }
    // Not an absolute URL (e.g. a bare path): strip query/fragment manually.
    let without_fragment = url.split('#').next().unwrap_or(url);
    without_fragment.split('?').next().unwrap_or(without_fragment).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchors_on_api_path_segment() {
        let mapper = RequestGroupMapper::default();
        let group = mapper.map("https://api.example.com/api/contacts/123", None);
        assert_eq!(group, "contacts");
    }

    #[test]
    fn explicit_group_always_wins() {
        let mapper = RequestGroupMapper::default();
        let group = mapper.map("https://api.example.com/api/contacts/123", Some("override"));
        assert_eq!(group, "override");
    }

    #[test]
    fn literal_map_overrides_candidate() {
        let mut mapper = RequestGroupMapper::default();
        mapper.add_literal("contacts", "people");
        let group = mapper.map("https://api.example.com/api/contacts/123", None);
        assert_eq!(group, "people");
    }

    #[test]
    fn regex_map_matches_any_segment() {
        let mut mapper = RequestGroupMapper::default();
        mapper.add_regex(Regex::new(r"^v\d+$").unwrap(), "versioned");
        let group = mapper.map("https://api.example.com/v2/api/widgets", None);
        assert_eq!(group, "versioned");
    }

    #[test]
    fn mixin_prefers_newer_entries() {
        let mut a = RequestGroupMapper::default();
        a.add_literal("contacts", "old");
        let mut b = RequestGroupMapper::default();
        b.add_literal("contacts", "new");
        let combined = a.mixin(&b);
        assert_eq!(
            combined.map("https://api.example.com/api/contacts", None),
            "new"
        );
    }

    #[test]
    fn deterministic_for_equal_normalized_urls() {
        let mapper = RequestGroupMapper::default();
        let a = mapper.map("https://api.example.com/api/contacts/123?x=1", None);
        let b = mapper.map("https://api.example.com/api/contacts/123?y=2", None);
        assert_eq!(a, b);
    }
}
