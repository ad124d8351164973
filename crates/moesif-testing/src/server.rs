use super::expectation::{Expectation, MockResponse, Times};
use super::matcher::RequestMatcher;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

type GenericError = Box<dyn std::error::Error + Send + Sync>;
type Result<T> = std::result::Result<T, GenericError>;

/// Path prefix the collector serves under.
const API_PREFIX: &str = "/v1";

/// A local stand-in for the Moesif collection service
pub struct MockCollector {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct ServerState {
    expectations: Vec<Expectation>,
    received: Vec<RecordedRequest>,
}

/// A request the collector received
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: http::Method,
    pub path: String,
    pub headers: http::HeaderMap,
    pub body: Bytes,
    /// Whether an expectation answered it
    pub matched: bool,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Number of elements of a JSON array body, such as an event batch.
    pub fn batch_len(&self) -> usize {
        self.json()
            .and_then(|v| v.as_array().map(Vec::len))
            .unwrap_or(0)
    }
}

impl MockCollector {
    /// Start a collector on a random local port, with nothing scripted
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(Mutex::new(ServerState::default()));
        let state_clone = state.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let state = state_clone.clone();

                                tokio::spawn(async move {
                                    if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                                        .serve_connection(io, service_fn(move |req| handle_request(req, state.clone())))
                                        .await
                                    {
                                        tracing::debug!(error = %err, "Mock collector connection ended with an error");
                                    }
                                });
                            }
                            Err(err) => tracing::warn!(error = %err, "Mock collector accept failed"),
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Start a collector answering every endpoint the middleware calls.
    ///
    /// `/config` returns `{}` with ETag `initial`, `/governance-rules`
    /// returns `[]` and ingestion calls return `201`.
    pub async fn start_with_defaults() -> std::io::Result<Self> {
        let server = Self::start().await?;
        server
            .expect(RequestMatcher::get("/v1/config"))
            .respond_with(MockResponse::config(json!({}), "initial"));
        server
            .expect(RequestMatcher::get("/v1/governance-rules"))
            .respond_with(MockResponse::new().json(json!([])));
        for path in ["/v1/events/batch", "/v1/users", "/v1/users/batch", "/v1/companies", "/v1/companies/batch"] {
            server
                .expect(RequestMatcher::post(path))
                .respond_with(MockResponse::accepted());
        }
        Ok(server)
    }

    /// Root URL of the server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Value for the middleware's `base_uri` setting
    pub fn base_uri(&self) -> String {
        format!("{}{}", self.base_url(), API_PREFIX)
    }

    /// Add an expectation; later expectations take precedence
    pub fn expect(&self, matcher: RequestMatcher) -> ExpectationBuilder {
        ExpectationBuilder {
            server: self.state.clone(),
            expectation: Some(Expectation::new(matcher)),
        }
    }

    /// Every request received so far, in arrival order
    pub fn received_requests(&self) -> Vec<RecordedRequest> {
        self.lock().received.clone()
    }

    /// Requests no expectation matched
    pub fn unmatched_requests(&self) -> Vec<RecordedRequest> {
        self.lock().received.iter().filter(|r| !r.matched).cloned().collect()
    }

    /// Requests received on `path`
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.lock().received.iter().filter(|r| r.path == path).cloned().collect()
    }

    /// Every event delivered through `/events/batch`, flattened
    pub fn events(&self) -> Vec<Value> {
        self.requests_to("/v1/events/batch")
            .iter()
            .filter_map(RecordedRequest::json)
            .filter_map(|batch| match batch {
                Value::Array(events) => Some(events),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Wait until `path` has received at least `count` requests.
    ///
    /// Returns what arrived, which may be fewer on timeout.
    pub async fn wait_for(&self, path: &str, count: usize, timeout: Duration) -> Vec<RecordedRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let requests = self.requests_to(path);
            if requests.len() >= count || tokio::time::Instant::now() >= deadline {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Assert that every expectation got its expected number of calls
    pub fn verify(&self) {
        let failures: Vec<String> = self.lock().expectations.iter().filter_map(Expectation::unmet).collect();
        assert!(failures.is_empty(), "Unmet expectations:\n{}", failures.join("\n"));
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for MockCollector {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Registers its expectation when dropped
pub struct ExpectationBuilder {
    server: Arc<Mutex<ServerState>>,
    expectation: Option<Expectation>,
}

impl ExpectationBuilder {
    pub fn respond_with(mut self, response: MockResponse) -> Self {
        if let Some(exp) = self.expectation.take() {
            self.expectation = Some(exp.respond_with(response));
        }
        self
    }

    pub fn times(self, n: usize) -> Self {
        self.set_times(Times::Exactly(n))
    }

    pub fn once(self) -> Self {
        self.set_times(Times::Once)
    }

    pub fn at_least_once(self) -> Self {
        self.set_times(Times::AtLeast(1))
    }

    pub fn never(self) -> Self {
        self.set_times(Times::Exactly(0))
    }

    fn set_times(mut self, times: Times) -> Self {
        if let Some(exp) = self.expectation.as_mut() {
            exp.times = times;
        }
        self
    }
}

impl Drop for ExpectationBuilder {
    fn drop(&mut self) {
        if let Some(exp) = self.expectation.take() {
            let mut state = self.server.lock().unwrap_or_else(PoisonError::into_inner);
            state.expectations.push(exp);
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<Mutex<ServerState>>,
) -> Result<Response<Full<Bytes>>> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    let path = parts.uri.path().to_string();

    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);

    let response = state
        .expectations
        .iter_mut()
        .rev()
        .find(|exp| exp.matcher.matches(&parts.method, &path, &parts.headers, &body))
        .map(|exp| {
            exp.call_count += 1;
            exp.response.clone()
        });

    state.received.push(RecordedRequest {
        method: parts.method,
        path,
        headers: parts.headers,
        body,
        matched: response.is_some(),
    });

    let Some(scripted) = response else {
        return Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("No expectation matched")))?);
    };

    let mut response = Response::builder().status(scripted.status);
    for (name, value) in &scripted.headers {
        response = response.header(name, value);
    }
    Ok(response.body(Full::new(scripted.body))?)
}
