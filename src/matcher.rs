//! Named request matchers
//!
//! A matcher is a predicate over two requests: the one an adapter is about to
//! send and one stored in a cassette. Cassettes refer to matchers by name
//! through their match-requests-on list.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use url::Url;

use crate::request::Request;
use crate::{Result, TapedeckError};

/// Matchers used when a cassette does not name any
pub const DEFAULT_MATCHERS: [&str; 2] = ["method", "uri"];

type MatchFn = dyn Fn(&Request, &Request) -> bool + Send + Sync;

/// A registered comparison between two requests
#[derive(Clone)]
pub struct RequestMatcher {
    name: Arc<str>,
    compare: Arc<MatchFn>,
}

impl RequestMatcher {
    fn new<F>(name: &str, compare: F) -> Self
    where
        F: Fn(&Request, &Request) -> bool + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            compare: Arc::new(compare),
        }
    }

    /// Name the matcher was registered under
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply the matcher to (incoming, stored)
    #[must_use]
    pub fn matches(&self, incoming: &Request, stored: &Request) -> bool {
        (self.compare)(incoming, stored)
    }
}

impl fmt::Debug for RequestMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMatcher")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Catalog of request matchers keyed by name
pub struct RequestMatcherRegistry {
    matchers: DashMap<String, RequestMatcher>,
}

impl RequestMatcherRegistry {
    /// Create a registry holding the built-in matchers
    #[must_use]
    pub fn new() -> Self {
        let registry = Self {
            matchers: DashMap::new(),
        };
        registry.register_built_ins();
        registry
    }

    /// Register a matcher, overwriting any previous one with the same name
    pub fn register<F>(&self, name: &str, compare: F)
    where
        F: Fn(&Request, &Request) -> bool + Send + Sync + 'static,
    {
        self.matchers.insert(name.to_string(), RequestMatcher::new(name, compare));
    }

    /// Look up a matcher by name
    ///
    /// # Errors
    ///
    /// Returns `UnregisteredMatcher` if nothing is registered under `name`
    pub fn get(&self, name: &str) -> Result<RequestMatcher> {
        self.matchers
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TapedeckError::UnregisteredMatcher(name.to_string()))
    }

    /// Whether every named matcher accepts (incoming, stored)
    ///
    /// Matchers run left to right and evaluation stops at the first rejection.
    ///
    /// # Errors
    ///
    /// Returns `UnregisteredMatcher` when a name is reached that was never registered
    pub fn matches<S: AsRef<str>>(
        &self,
        names: &[S],
        incoming: &Request,
        stored: &Request,
    ) -> Result<bool> {
        for name in names {
            // Clone out of the map so a matcher may itself use the registry.
            let matcher = self.get(name.as_ref())?;
            if !matcher.matches(incoming, stored) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn register_built_ins(&self) {
        self.register("method", |a, b| a.method == b.method);
        self.register("uri", |a, b| a.uri == b.uri);
        self.register("host", |a, b| a.host() == b.host());
        self.register("path", |a, b| path_of(a) == path_of(b));
        self.register("query", |a, b| query_of(a) == query_of(b));
        self.register("body", |a, b| {
            a.body.as_deref().unwrap_or_default() == b.body.as_deref().unwrap_or_default()
        });
        self.register("headers", |a, b| {
            a.headers.normalized() == b.headers.normalized()
        });
    }
}

impl Default for RequestMatcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn path_of(request: &Request) -> Option<String> {
    request.parsed_uri().map(|url| url.path().to_string())
}

/// Decoded query pairs grouped by key, order-insensitive across keys
fn query_of(request: &Request) -> Option<BTreeMap<String, Vec<String>>> {
    request.parsed_uri().as_ref().map(query_pairs)
}

fn query_pairs(url: &Url) -> BTreeMap<String, Vec<String>> {
    let mut pairs: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        pairs.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    pairs
}

/// A registry paired with the match-requests-on list of one cassette
#[derive(Clone)]
pub struct MatchContext {
    registry: Arc<RequestMatcherRegistry>,
    match_requests_on: Vec<String>,
}

impl MatchContext {
    /// Create a context, checking every name against the registry
    ///
    /// # Errors
    ///
    /// Returns `UnregisteredMatcher` for the first unknown name
    pub fn new(
        registry: Arc<RequestMatcherRegistry>,
        match_requests_on: Vec<String>,
    ) -> Result<Self> {
        for name in &match_requests_on {
            registry.get(name)?;
        }
        Ok(Self {
            registry,
            match_requests_on,
        })
    }

    /// Context using [`DEFAULT_MATCHERS`]
    #[must_use]
    pub fn with_defaults(registry: Arc<RequestMatcherRegistry>) -> Self {
        Self {
            registry,
            match_requests_on: DEFAULT_MATCHERS.iter().map(ToString::to_string).collect(),
        }
    }

    /// Matcher names in evaluation order
    #[must_use]
    pub fn match_requests_on(&self) -> &[String] {
        &self.match_requests_on
    }

    /// Whether `incoming` matches `stored` under every configured matcher
    ///
    /// # Errors
    ///
    /// Returns `UnregisteredMatcher` if a name is not registered
    pub fn matches(&self, incoming: &Request, stored: &Request) -> Result<bool> {
        self.registry.matches(&self.match_requests_on, incoming, stored)
    }
}

impl fmt::Debug for MatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchContext")
            .field("match_requests_on", &self.match_requests_on)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Headers, Method};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(method: Method, uri: &str) -> Request {
        Request::new(method, uri, None, Headers::new())
    }

    #[test]
    fn test_unregistered_matcher() {
        let registry = RequestMatcherRegistry::new();
        let err = registry.get("custom").unwrap_err();
        assert!(matches!(err, TapedeckError::UnregisteredMatcher(name) if name == "custom"));
    }

    #[test]
    fn test_register_custom_matcher() {
        let registry = RequestMatcherRegistry::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        registry.register("custom", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        let req = request(Method::Get, "http://example.com/");
        assert!(registry.get("custom").unwrap().matches(&req, &req));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reregister_overwrites() {
        let registry = RequestMatcherRegistry::new();
        registry.register("method", |_, _| true);

        let a = request(Method::Get, "http://example.com/");
        let b = request(Method::Post, "http://example.com/");
        assert!(registry.matches(&["method"], &a, &b).unwrap());
    }

    #[test]
    fn test_built_in_matchers() {
        let registry = RequestMatcherRegistry::new();
        let a = request(Method::Get, "http://example.com/foo?a=1&b=2");
        let b = request(Method::Post, "http://example.com/foo?b=2&a=1");
        let c = request(Method::Get, "http://other.com/bar?a=1&b=2");

        assert!(!registry.matches(&["method"], &a, &b).unwrap());
        assert!(registry.matches(&["method"], &a, &c).unwrap());
        assert!(!registry.matches(&["uri"], &a, &b).unwrap());
        assert!(registry.matches(&["host", "path", "query"], &a, &b).unwrap());
        assert!(!registry.matches(&["host"], &a, &c).unwrap());
        assert!(!registry.matches(&["path"], &a, &c).unwrap());
        assert!(registry.matches(&["query"], &a, &c).unwrap());
    }

    #[test]
    fn test_body_and_headers_matchers() {
        let registry = RequestMatcherRegistry::new();
        let mut a = request(Method::Post, "http://example.com/");
        let mut b = request(Method::Post, "http://example.com/");

        assert!(registry.matches(&["body"], &a, &b).unwrap());
        a.body = Some(Bytes::from_static(b"x=1"));
        assert!(!registry.matches(&["body"], &a, &b).unwrap());
        b.body = Some(Bytes::from_static(b"x=1"));
        assert!(registry.matches(&["body"], &a, &b).unwrap());

        a.headers.insert("Accept", "text/plain");
        b.headers.insert("accept", "text/plain");
        assert!(registry.matches(&["headers"], &a, &b).unwrap());
        b.headers.insert("X-Extra", "1");
        assert!(!registry.matches(&["headers"], &a, &b).unwrap());
    }

    #[test]
    fn test_matches_short_circuits_left_to_right() {
        let registry = RequestMatcherRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.register("never", |_, _| false);
        registry.register("counted", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        let req = request(Method::Get, "http://example.com/");
        assert!(!registry.matches(&["never", "counted"], &req, &req).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(registry.matches(&["counted", "method"], &req, &req).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_matches_reports_unregistered_name() {
        let registry = RequestMatcherRegistry::new();
        let req = request(Method::Get, "http://example.com/");
        assert!(registry.matches(&["method", "nope"], &req, &req).is_err());
    }

    #[test]
    fn test_match_context_validates_names() {
        let registry = Arc::new(RequestMatcherRegistry::new());
        let names = vec!["method".to_string(), "bogus".to_string()];
        assert!(MatchContext::new(Arc::clone(&registry), names).is_err());

        let context = MatchContext::with_defaults(registry);
        assert_eq!(context.match_requests_on(), &["method", "uri"]);
    }
}
