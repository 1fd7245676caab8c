//! HTTP verb (spec §3 "HTTP verb").

use std::fmt;

/// The closed set of HTTP methods this crate schedules and retries for.
///
/// Kept as an explicit enum rather than a string or a type check on an
/// arbitrary method object (see spec §9 "Dynamic dispatch -> tagged
/// variants"): delegate lookup in [`crate::client::Client`] is a table keyed
/// by this enum, not a runtime shape test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// HEAD
    Head,
    /// OPTIONS
    Options,
    /// TRACE
    Trace,
}

impl Verb {
    /// The canonical uppercase method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
            Verb::Head => "HEAD",
            Verb::Options => "OPTIONS",
            Verb::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
