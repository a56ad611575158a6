//! Path resolution and header rules for forwarding.
//!
//! Plain (non-CONNECT) API calls resolve against a configured table of
//! path → target-base-URL entries. An exact path match always wins over a
//! prefix match; among prefix matches the longest wins; the remaining path
//! segment is appended to the matched target. No match is a 404.
//!
//! Header handling on forward: an explicit allow-list is copied from the
//! inbound request, an explicit deny-list is stripped, and endpoint-specific
//! headers may be injected per matched path. The Host header is always
//! rewritten to the upstream host.

use http::header::HeaderName;
use http::{HeaderMap, HeaderValue};
use tracing::trace;

/// Headers copied from the inbound request when forwarding.
const COPIED_HEADERS: &[&str] = &[
    "accept",
    "accept-encoding",
    "accept-language",
    "authorization",
    "content-type",
    "openai-organization",
    "user-agent",
    "x-api-key",
    "x-request-id",
];

/// Headers never forwarded, even if allow-listed upstream of this table.
const STRIPPED_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "transfer-encoding",
    "upgrade",
];

/// One configured path mapping.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    /// Inbound path (exact or prefix).
    pub path: String,
    /// Target base URL the remaining segment is appended to.
    pub target: String,
    /// Endpoint-specific headers injected on forward.
    pub extra_headers: Vec<(String, String)>,
}

/// A resolved forwarding target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Full target URL: matched base + remaining segment.
    pub url: String,
    /// Headers to inject for this endpoint.
    pub extra_headers: Vec<(String, String)>,
}

/// The configured path → target table.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// Build a table from configured entries.
    pub fn new(entries: Vec<RouteEntry>) -> Self {
        Self { entries }
    }

    /// Resolve a request path.
    ///
    /// Exact match wins over prefix match; among prefixes the longest wins;
    /// the remaining segment is appended to the target. `None` means 404.
    pub fn resolve(&self, path: &str) -> Option<ResolvedTarget> {
        if let Some(entry) = self.entries.iter().find(|e| e.path == path) {
            trace!("Exact path match '{}' -> {}", entry.path, entry.target);
            return Some(ResolvedTarget {
                url: entry.target.clone(),
                extra_headers: entry.extra_headers.clone(),
            });
        }

        let best = self
            .entries
            .iter()
            .filter(|e| {
                path.starts_with(&e.path)
                    && (e.path.ends_with('/') || path.as_bytes().get(e.path.len()) == Some(&b'/'))
            })
            .max_by_key(|e| e.path.len())?;

        let rest = &path[best.path.len()..];
        trace!("Prefix path match '{}' + '{rest}'", best.path);
        Some(ResolvedTarget {
            url: format!("{}{rest}", best.target),
            extra_headers: best.extra_headers.clone(),
        })
    }

    /// Number of configured entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Apply the allow/deny header rules and inject per-endpoint extras.
///
/// The returned map carries only allow-listed inbound headers (minus the
/// deny-list) plus the injected ones; Host is set by the sender.
pub fn filter_headers(inbound: &HeaderMap, extra: &[(String, String)]) -> HeaderMap {
    let mut out = HeaderMap::new();

    for (name, value) in inbound {
        let lower = name.as_str().to_lowercase();
        if COPIED_HEADERS.contains(&lower.as_str()) && !STRIPPED_HEADERS.contains(&lower.as_str())
        {
            out.append(name.clone(), value.clone());
        }
    }

    for (name, value) in extra {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            out.insert(name, value);
        }
    }

    out
}
