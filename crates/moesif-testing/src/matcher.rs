use http::{HeaderMap, Method};
use serde_json::Value;

const APPLICATION_ID_HEADER: &str = "x-moesif-application-id";

/// Matcher for collector requests
#[derive(Debug, Clone, Default)]
pub struct RequestMatcher {
    pub(crate) method: Option<Method>,
    pub(crate) path: Option<String>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body_json: Option<Value>,
}

impl RequestMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// `GET <path>`
    pub fn get(path: impl Into<String>) -> Self {
        Self::new().method(Method::GET).path(path)
    }

    /// `POST <path>`
    pub fn post(path: impl Into<String>) -> Self {
        Self::new().method(Method::POST).path(path)
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Match the exact path (query excluded)
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Match a header value exactly. Names are case-insensitive.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Match the application id header
    pub fn application_id(self, id: impl Into<String>) -> Self {
        self.header(APPLICATION_ID_HEADER, id)
    }

    /// Match a JSON body, ignoring formatting and key order
    pub fn body_json(mut self, body: Value) -> Self {
        self.body_json = Some(body);
        self
    }

    /// Check if the matcher matches a request
    pub fn matches(&self, method: &Method, path: &str, headers: &HeaderMap, body: &[u8]) -> bool {
        if self.method.as_ref().is_some_and(|m| m != method) {
            return false;
        }
        if self.path.as_deref().is_some_and(|p| p != path) {
            return false;
        }

        let headers_ok = self
            .headers
            .iter()
            .all(|(k, v)| headers.get(k.as_str()).is_some_and(|actual| actual == v.as_str()));
        if !headers_ok {
            return false;
        }

        match &self.body_json {
            Some(expected) => serde_json::from_slice::<Value>(body).is_ok_and(|actual| &actual == expected),
            None => true,
        }
    }
}
