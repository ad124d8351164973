use super::matcher::RequestMatcher;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use serde_json::Value;

/// Header the collector uses to advertise its config version.
pub const CONFIG_ETAG_HEADER: &str = "x-moesif-config-etag";

/// An expectation for a request
#[derive(Debug, Clone)]
pub struct Expectation {
    pub(crate) matcher: RequestMatcher,
    pub(crate) response: MockResponse,
    pub(crate) times: Times,
    pub(crate) call_count: usize,
}

impl Expectation {
    /// Create a new expectation
    pub fn new(matcher: RequestMatcher) -> Self {
        Self {
            matcher,
            response: MockResponse::default(),
            times: Times::Any,
            call_count: 0,
        }
    }

    /// Set the response to send
    pub fn respond_with(mut self, response: MockResponse) -> Self {
        self.response = response;
        self
    }

    /// Expect the request exactly `n` times
    pub fn times(mut self, n: usize) -> Self {
        self.times = Times::Exactly(n);
        self
    }

    /// Number of requests this expectation answered.
    pub fn call_count(&self) -> usize {
        self.call_count
    }

    /// Describe the mismatch between expected and actual calls, if any.
    pub(crate) fn unmet(&self) -> Option<String> {
        let n = self.call_count;
        let ok = match self.times {
            Times::Once => n == 1,
            Times::Exactly(want) => n == want,
            Times::AtLeast(want) => n >= want,
            Times::AtMost(want) => n <= want,
            Times::Any => true,
        };
        (!ok).then(|| format!("{:?} expected {:?} calls, got {}", self.matcher, self.times, n))
    }
}

/// How many times an expectation should be matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Times {
    Once,
    Exactly(usize),
    AtLeast(usize),
    AtMost(usize),
    Any,
}

/// A scripted response
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

impl MockResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// `201 Created` with no body, the collector's answer to ingestion calls.
    pub fn accepted() -> Self {
        Self::new().status(StatusCode::CREATED)
    }

    /// A `/config` answer carrying `etag`.
    pub fn config(body: Value, etag: &str) -> Self {
        Self::new().json(body).header(CONFIG_ETAG_HEADER, etag)
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Add a header. Names or values that are not valid HTTP are ignored.
    pub fn header(mut self, key: &str, value: &str) -> Self {
        match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => tracing::warn!(key, value, "Ignoring invalid mock response header"),
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Bytes::from(body.to_string());
        self
    }
}
