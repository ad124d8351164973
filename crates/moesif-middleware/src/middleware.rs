//! The middleware handle and its per-request flow.

use crate::api::{CollectorApi, HttpCollectorApi};
use crate::app_config::DEFAULT_SAMPLE_RATE;
use crate::capture::{
    read_request_body, CapturedExchange, CapturedRequest, CapturedResponse, ReplayBody,
    ResponseCapture, TRANSACTION_ID_HEADER_NAME,
};
use crate::config::MoesifConfig;
use crate::config_cache::{spawn_refresher, ConfigCache, ConfigSnapshot};
use crate::error::{BoxError, MoesifError, Result};
use crate::event::Direction;
use crate::governance::{self, GovernanceOutcome, Subject};
use crate::hooks::isolate;
use crate::identity;
use crate::layer::MoesifLayer;
use crate::mapper::{self, Identity};
use crate::pipeline::{EventPipeline, PipelineSettings, PipelineStats};
use crate::profiles::{self, CompanyProfile, UserProfile};
use crate::regex_config::{route_of, RequestFields};
use crate::sampling;
use bytes::Bytes;
use http::{header, request, response, HeaderValue, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::Full;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tower::Service;

/// Moesif API monitoring for a tower service stack.
///
/// Creating the middleware starts its background tasks (config refresher,
/// batcher and delivery workers), so it must happen inside a Tokio runtime.
///
/// ```ignore
/// use moesif_middleware::{MoesifConfig, MoesifMiddleware};
///
/// let moesif = MoesifMiddleware::new(MoesifConfig::new("my-application-id"))?;
/// let service = tower::ServiceBuilder::new()
///     .layer(moesif.layer())
///     .service(app);
///
/// // on exit
/// moesif.shutdown().await;
/// ```
#[derive(Clone)]
pub struct MoesifMiddleware {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    config: MoesifConfig,
    api: Arc<dyn CollectorApi>,
    cache: Arc<ConfigCache>,
    pipeline: EventPipeline,
    stop: watch::Sender<bool>,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl MoesifMiddleware {
    /// Build the middleware with the HTTP collector client.
    pub fn new(config: MoesifConfig) -> Result<Self> {
        validate(&config)?;
        let api = HttpCollectorApi::new(config.application_id.clone(), config.base_uri.clone())?;
        Self::with_api(config, Arc::new(api))
    }

    /// Build the middleware on a custom collector transport.
    pub fn with_api(config: MoesifConfig, api: Arc<dyn CollectorApi>) -> Result<Self> {
        validate(&config)?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(MoesifError::RuntimeUnavailable);
        }

        let (stop, stop_rx) = watch::channel(false);
        let (cache, triggers) = ConfigCache::new(config.config_refresh_interval, config.debug);
        let cache = Arc::new(cache);

        let refresher = spawn_refresher(
            cache.clone(),
            api.clone(),
            triggers,
            config.config_poll_interval,
            stop_rx.clone(),
        );

        let pipeline = EventPipeline::start(
            PipelineSettings {
                batch_size: config.batch_size,
                worker_count: config.event_worker_count,
                queue_size: config.event_queue_size,
                batch_timeout: config.event_batch_timeout,
                debug: config.debug,
            },
            api.clone(),
            cache.clone(),
            stop_rx,
        );

        if config.debug {
            tracing::info!(config = ?config, "Moesif middleware initialized");
        }

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                api,
                cache,
                pipeline,
                stop,
                refresher: Mutex::new(Some(refresher)),
            }),
        })
    }

    /// A tower layer sharing this middleware's pipeline and config.
    pub fn layer(&self) -> MoesifLayer {
        MoesifLayer::new(self.inner.clone())
    }

    /// Current pipeline counters.
    pub fn stats(&self) -> PipelineStats {
        self.inner.pipeline.stats()
    }

    /// Current remote configuration snapshot.
    pub fn config_snapshot(&self) -> Arc<ConfigSnapshot> {
        self.inner.cache.snapshot()
    }

    /// Stop background work, delivering every queued event first.
    ///
    /// Returns once the queue is empty and the last batch has been attempted.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        self.inner.stop.send_replace(true);
        self.inner.pipeline.join().await;
        if let Some(refresher) = self.inner.refresher.lock().await.take() {
            if let Err(err) = refresher.await {
                tracing::error!(error = %err, "Config refresher task failed");
            }
        }
        tracing::debug!(stats = ?self.stats(), "Moesif middleware shut down");
    }

    /// Record a call this application made to another service.
    ///
    /// Ignored (returns `false`) unless outgoing capture is enabled. Sampling
    /// and masking apply as for incoming calls.
    pub fn capture_outgoing(&self, exchange: &CapturedExchange, identity: Identity) -> bool {
        if !self.inner.config.capture_outgoing_requests {
            return false;
        }
        self.inner.record(exchange, identity, None, Direction::Outgoing)
    }

    /// Create or update one user profile.
    pub async fn update_user(&self, user: &UserProfile) -> Result<()> {
        profiles::validate_user(user)?;
        self.inner.api.update_user(user).await?;
        Ok(())
    }

    /// Create or update user profiles in one call.
    pub async fn update_users_batch(&self, users: &[UserProfile]) -> Result<()> {
        profiles::validate_batch(users, profiles::validate_user)?;
        self.inner.api.update_users_batch(users).await?;
        Ok(())
    }

    /// Create or update one company profile.
    pub async fn update_company(&self, company: &CompanyProfile) -> Result<()> {
        profiles::validate_company(company)?;
        self.inner.api.update_company(company).await?;
        Ok(())
    }

    /// Create or update company profiles in one call.
    pub async fn update_companies_batch(&self, companies: &[CompanyProfile]) -> Result<()> {
        profiles::validate_batch(companies, profiles::validate_company)?;
        self.inner.api.update_companies_batch(companies).await?;
        Ok(())
    }
}

impl std::fmt::Debug for MoesifMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoesifMiddleware")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

fn validate(config: &MoesifConfig) -> Result<()> {
    if config.application_id.trim().is_empty() {
        return Err(MoesifError::MissingApplicationId);
    }
    Ok(())
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

impl Inner {
    /// Run one request through capture, governance and telemetry.
    ///
    /// A request whose body fails to arrive is answered with `400` and never
    /// reaches `service`. A response body that fails mid-stream reaches the
    /// caller as a failing [`ReplayBody`].
    pub(crate) async fn handle<S, ReqB, ResB>(
        &self,
        req: Request<ReqB>,
        service: &mut S,
    ) -> std::result::Result<Response<ReplayBody>, S::Error>
    where
        S: Service<Request<Full<Bytes>>, Response = Response<ResB>>,
        ReqB: Body,
        ReqB::Error: Display,
        ResB: Body,
        ResB::Error: Into<BoxError>,
    {
        self.pipeline.record_request();
        let debug = self.config.debug;
        let hooks = self.config.hooks.as_ref();

        let (parts, body) = req.into_parts();
        let body = read_request_body(body).await;
        let request = CapturedRequest::from_parts(
            &parts,
            body.as_deref().unwrap_or_default(),
            self.config.transaction_id_enabled(),
        );

        let identity = self.identify(&parts);
        let skip = isolate("skip", debug, || hooks.skip(&parts)).unwrap_or(false);

        let mut outcome = GovernanceOutcome::default();
        let forward = match body {
            Some(body) => {
                outcome = govern(&self.cache.snapshot(), &request, &identity);
                match outcome.blocked_response() {
                    Ok(Some(blocked)) => Err(blocked),
                    Ok(None) => Ok(body),
                    Err(err) => {
                        tracing::warn!(error = %err, "Governance rule could not be applied, passing request through");
                        outcome = GovernanceOutcome::default();
                        Ok(body)
                    }
                }
            }
            None => Err(bad_request()),
        };

        let (head, body, response) = match forward {
            Ok(body) => {
                let forwarded = Request::from_parts(parts, Full::new(body));
                let (mut head, body) = service.call(forwarded).await?.into_parts();
                merge_headers(&mut head, &outcome);
                self.finish_response(head, Box::pin(body), &request).await
            }
            Err(short_circuit) => {
                let (head, body) = short_circuit.into_parts();
                self.finish_response(head, body, &request).await
            }
        };

        if !skip {
            let exchange = CapturedExchange { request, response };
            self.record(&exchange, identity, outcome.blocked_by(), Direction::Incoming);
        } else if debug {
            tracing::info!("Request skipped by the skip hook, no event recorded");
        }

        Ok(Response::from_parts(head, body))
    }

    fn identify(&self, parts: &request::Parts) -> Identity {
        let debug = self.config.debug;
        let hooks = self.config.hooks.as_ref();

        let user_id = isolate("identify_user", debug, || hooks.identify_user(parts))
            .flatten()
            .or_else(|| {
                identity::user_from_authorization(
                    &parts.headers,
                    &self.config.authorization_header_name,
                    &self.config.authorization_user_id_field,
                    debug,
                )
            });

        Identity {
            user_id,
            company_id: isolate("identify_company", debug, || hooks.identify_company(parts)).flatten(),
            session_token: isolate("get_session_token", debug, || hooks.get_session_token(parts)).flatten(),
            metadata: isolate("get_metadata", debug, || hooks.get_metadata(parts)).flatten(),
        }
    }

    /// Inject the transaction id, read the body and seal the capture.
    async fn finish_response<B>(
        &self,
        mut head: response::Parts,
        body: B,
        request: &CapturedRequest,
    ) -> (response::Parts, ReplayBody, CapturedResponse)
    where
        B: Body + Unpin,
        B::Error: Into<BoxError>,
    {
        if let Some(id) = &request.transaction_id {
            if let Ok(value) = HeaderValue::from_str(id) {
                head.headers.insert(TRANSACTION_ID_HEADER_NAME.clone(), value);
            }
        }

        let mut capture = ResponseCapture::start(head.status, &head.headers);
        let body = capture.read_body(body).await;
        (head, body, capture.finish())
    }

    /// Map, sample, mask and enqueue one exchange.
    pub(crate) fn record(
        &self,
        exchange: &CapturedExchange,
        identity: Identity,
        blocked_by: Option<&str>,
        direction: Direction,
    ) -> bool {
        let debug = self.config.debug;
        let mut event = mapper::to_event(
            exchange,
            self.config.log_body,
            self.config.api_version.as_deref(),
            blocked_by,
        );
        event.direction = direction;
        let mut event = mapper::with_identity(event, identity);

        let snapshot = self.cache.snapshot();
        let percentage = snapshot
            .config
            .as_ref()
            .map(|config| {
                config.get_sampling_percentage(&event, event.user_id.as_deref(), event.company_id.as_deref())
            })
            .unwrap_or(DEFAULT_SAMPLE_RATE);

        if !sampling::admit(&mut event, percentage) {
            if debug {
                tracing::info!(percentage, "Skipped event due to sampling percentage");
            }
            return false;
        }

        let event = mapper::mask(self.config.hooks.as_ref(), event, debug);
        self.pipeline.enqueue(event)
    }
}

fn govern(snapshot: &ConfigSnapshot, request: &CapturedRequest, identity: &Identity) -> GovernanceOutcome {
    if snapshot.governance.is_empty() {
        return GovernanceOutcome::default();
    }

    let fields = RequestFields {
        verb: Some(request.method.clone()),
        route: Some(route_of(&request.url)),
        ip_address: request.ip_address.clone(),
        status: None,
        body: request
            .body
            .as_ref()
            .filter(|body| body.transfer_encoding == crate::body::TransferEncoding::Json)
            .map(|body| body.value.clone()),
    };

    governance::evaluate(
        &snapshot.governance,
        snapshot.config.as_deref(),
        &fields,
        Subject {
            user_id: identity.user_id.as_deref(),
            company_id: identity.company_id.as_deref(),
        },
    )
}

/// Answer for a request whose body could not be read.
fn bad_request() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(b"Failed to read request body")));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn merge_headers(head: &mut response::Parts, outcome: &GovernanceOutcome) {
    if outcome.headers.is_empty() {
        return;
    }
    match outcome.header_map() {
        Ok(headers) => {
            for (name, value) in headers {
                if let Some(name) = name {
                    head.headers.insert(name, value);
                }
            }
        }
        Err(err) => tracing::warn!(error = %err, "Ignoring governance headers"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_cache::ConfigState;
    use crate::error::HookResult;
    use crate::hooks::MoesifHooks;
    use crate::test_support::RecordingApi;
    use http_body::Frame;
    use http_body_util::BodyExt;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    const BLOCKING_RULES: &str = r#"[{
        "_id": "no-deletes",
        "type": "regex",
        "block": true,
        "regex_config": [{"conditions": [{"path": "request.verb", "value": "DELETE"}]}],
        "response": {"status": 403, "headers": {"X-Blocked": "yes"}, "body": {"error": "forbidden"}}
    }]"#;

    fn config() -> MoesifConfig {
        MoesifConfig::new("app-id").event_batch_timeout(Duration::from_millis(50))
    }

    async fn until_ready(moesif: &MoesifMiddleware) {
        while moesif.config_snapshot().state != ConfigState::Ready {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn request_to_thing(method: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri("http://example.com/things/1")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[test]
    fn empty_application_id_is_rejected() {
        let err = MoesifMiddleware::with_api(MoesifConfig::new("  "), Arc::new(RecordingApi::default())).unwrap_err();
        assert!(matches!(err, MoesifError::MissingApplicationId));
    }

    #[test]
    fn requires_a_runtime() {
        let err = MoesifMiddleware::with_api(config(), Arc::new(RecordingApi::default())).unwrap_err();
        assert!(matches!(err, MoesifError::RuntimeUnavailable));
    }

    #[tokio::test]
    async fn blocking_rule_short_circuits_the_handler() {
        let api = Arc::new(RecordingApi::default().with_rules(BLOCKING_RULES));
        let moesif = MoesifMiddleware::with_api(config(), api.clone()).unwrap();
        until_ready(&moesif).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = service_fn(move |_req: Request<Full<Bytes>>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"ok")))) }
        });
        let service = ServiceBuilder::new().layer(moesif.layer()).service(handler);

        let blocked = service.clone().oneshot(request_to_thing("DELETE")).await.unwrap();
        assert_eq!(blocked.status(), StatusCode::FORBIDDEN);
        assert_eq!(blocked.headers()["x-blocked"], "yes");
        let body = blocked.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"error":"forbidden"}"#);

        let allowed = service.oneshot(request_to_thing("GET")).await.unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        moesif.shutdown().await;
        let events = api.events();
        assert_eq!(events.len(), 2);
        let blocked_event = events.iter().find(|e| e.request.verb == "DELETE").unwrap();
        assert_eq!(blocked_event.blocked_by.as_deref(), Some("no-deletes"));
        assert_eq!(blocked_event.response.status, 403);
    }

    #[tokio::test]
    async fn unusable_blocking_rule_lets_the_request_through() {
        let rules = r#"[{
            "_id": "no-status",
            "type": "regex",
            "block": true,
            "response": {"headers": {"X-Limited": "yes"}, "body": "limited"}
        }]"#;
        let api = Arc::new(RecordingApi::default().with_rules(rules));
        let moesif = MoesifMiddleware::with_api(config(), api.clone()).unwrap();
        until_ready(&moesif).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = service_fn(move |_req: Request<Full<Bytes>>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"ok")))) }
        });
        let service = ServiceBuilder::new().layer(moesif.layer()).service(handler);

        let response = service.oneshot(request_to_thing("GET")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-limited"));
        assert_eq!(&response.into_body().collect().await.unwrap().to_bytes()[..], b"ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        moesif.shutdown().await;
        let events = api.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].blocked_by, None);
        assert_eq!(events[0].response.status, 200);
    }

    /// Yields one chunk, then fails like a dropped connection.
    struct ResetAfterChunk {
        sent: bool,
    }

    impl Body for ResetAfterChunk {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<std::result::Result<Frame<Bytes>, std::io::Error>>> {
            if self.sent {
                return Poll::Ready(Some(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "client reset",
                ))));
            }
            self.sent = true;
            Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(br#"{"amount":"#)))))
        }
    }

    #[tokio::test]
    async fn truncated_upload_is_rejected_before_the_handler() {
        let api = Arc::new(RecordingApi::default());
        let moesif = MoesifMiddleware::with_api(config(), api.clone()).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = service_fn(move |_req: Request<Full<Bytes>>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"ok")))) }
        });
        let service = ServiceBuilder::new().layer(moesif.layer()).service(handler);

        let upload = Request::post("http://example.com/payments")
            .header("content-type", "application/json")
            .body(ResetAfterChunk { sent: false })
            .unwrap();
        let response = service.oneshot(upload).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        moesif.shutdown().await;
        let events = api.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].request.verb, "POST");
        assert_eq!(events[0].response.status, 400);
    }

    #[tokio::test]
    async fn failing_response_body_reaches_the_caller_as_an_error() {
        let api = Arc::new(RecordingApi::default());
        let moesif = MoesifMiddleware::with_api(config(), api.clone()).unwrap();
        let service = ServiceBuilder::new()
            .layer(moesif.layer())
            .service(service_fn(|_req: Request<Full<Bytes>>| async {
                Ok::<_, Infallible>(Response::new(ResetAfterChunk { sent: false }))
            }));

        let response = service.oneshot(request_to_thing("GET")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let err = response.into_body().collect().await.unwrap_err();
        assert_eq!(err.to_string(), "client reset");

        moesif.shutdown().await;
        let events = api.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].response.status, 200);
    }

    struct SkipHealth;

    impl MoesifHooks for SkipHealth {
        fn skip(&self, req: &request::Parts) -> HookResult<bool> {
            Ok(req.uri.path() == "/health")
        }

        fn identify_user(&self, _req: &request::Parts) -> HookResult<Option<String>> {
            Err("no session".into())
        }
    }

    #[tokio::test]
    async fn skipped_requests_are_served_but_not_recorded() {
        let api = Arc::new(RecordingApi::default());
        let moesif = MoesifMiddleware::with_api(config().hooks(SkipHealth), api.clone()).unwrap();
        let service = ServiceBuilder::new()
            .layer(moesif.layer())
            .service(service_fn(|_req: Request<Full<Bytes>>| async {
                Ok::<_, Infallible>(Response::new(Full::new(Bytes::new())))
            }));

        let health = Request::get("http://example.com/health").body(Full::new(Bytes::new())).unwrap();
        let response = service.clone().oneshot(health).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = service.oneshot(request_to_thing("GET")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        moesif.shutdown().await;
        let events = api.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].request.uri.ends_with("/things/1"));
        assert_eq!(events[0].user_id, None);
    }

    #[tokio::test]
    async fn zero_sample_rate_drops_events() {
        let api = Arc::new(RecordingApi::default().with_config(r#"{"sample_rate": 0}"#));
        let moesif = MoesifMiddleware::with_api(config(), api.clone()).unwrap();
        until_ready(&moesif).await;

        let service = ServiceBuilder::new()
            .layer(moesif.layer())
            .service(service_fn(|_req: Request<Full<Bytes>>| async {
                Ok::<_, Infallible>(Response::new(Full::new(Bytes::new())))
            }));
        service.oneshot(request_to_thing("GET")).await.unwrap();

        moesif.shutdown().await;
        assert!(api.events().is_empty());
        assert_eq!(moesif.stats().requests, 1);
        assert_eq!(moesif.stats().enqueued, 0);
    }

    #[tokio::test]
    async fn outgoing_capture_respects_the_flag() {
        let exchange = CapturedExchange {
            request: CapturedRequest::new(http::Method::GET, "https://partner.example/v1/rates"),
            response: CapturedResponse::new(StatusCode::OK),
        };

        let api = Arc::new(RecordingApi::default());
        let disabled = MoesifMiddleware::with_api(config(), api.clone()).unwrap();
        assert!(!disabled.capture_outgoing(&exchange, Identity::default()));
        disabled.shutdown().await;
        assert!(api.events().is_empty());

        let api = Arc::new(RecordingApi::default());
        let enabled = MoesifMiddleware::with_api(config().capture_outgoing_requests(true), api.clone()).unwrap();
        let identity = Identity {
            user_id: Some("u1".into()),
            ..Default::default()
        };
        assert!(enabled.capture_outgoing(&exchange, identity));
        enabled.shutdown().await;

        let events = api.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].direction, Direction::Outgoing);
        assert_eq!(events[0].user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn profile_updates_are_validated_then_sent() {
        let api = Arc::new(RecordingApi::default());
        let moesif = MoesifMiddleware::with_api(config(), api.clone()).unwrap();

        moesif.update_user(&UserProfile::new("u1").company_id("c1")).await.unwrap();
        moesif
            .update_companies_batch(&[CompanyProfile::new("c1"), CompanyProfile::new("c2")])
            .await
            .unwrap();

        let err = moesif.update_user(&UserProfile::new("")).await.unwrap_err();
        assert!(matches!(err, MoesifError::InvalidProfile(_)));
        let err = moesif.update_users_batch(&[]).await.unwrap_err();
        assert!(matches!(err, MoesifError::InvalidProfile(_)));

        assert_eq!(api.users.lock().unwrap().len(), 1);
        assert_eq!(api.companies.lock().unwrap().len(), 2);
        moesif.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let moesif = MoesifMiddleware::with_api(config(), Arc::new(RecordingApi::default())).unwrap();
        moesif.shutdown().await;
        moesif.shutdown().await;
    }
}
