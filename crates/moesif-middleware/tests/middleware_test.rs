use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use moesif_middleware::{ConfigState, MoesifConfig, MoesifMiddleware, UserProfile, TRANSACTION_ID_HEADER};
use moesif_testing::{MockCollector, MockResponse, RequestMatcher};
use serde_json::json;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::{service_fn, ServiceBuilder, ServiceExt};

async fn hello(_req: Request<Full<Bytes>>) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(Response::new(Full::new(Bytes::from_static(b"hello"))))
}

fn config(server: &MockCollector) -> MoesifConfig {
    MoesifConfig::new("test-app-id")
        .base_uri(server.base_uri())
        .event_batch_timeout(Duration::from_millis(50))
}

async fn until_ready(moesif: &MoesifMiddleware) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while moesif.config_snapshot().state != ConfigState::Ready {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("config never loaded");
}

#[tokio::test]
async fn forwarded_request_is_recorded_with_client_ip() {
    let server = MockCollector::start_with_defaults().await.unwrap();
    let moesif = MoesifMiddleware::new(config(&server)).unwrap();
    let service = ServiceBuilder::new().layer(moesif.layer()).service(service_fn(hello));

    let request = Request::get("http://api.example.com/foo?x=1")
        .header("X-Forwarded-For", "203.0.113.5")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = service.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let txn = response.headers()[TRANSACTION_ID_HEADER].to_str().unwrap().to_string();
    assert_eq!(response.into_body().collect().await.unwrap().to_bytes(), "hello");

    moesif.shutdown().await;

    let events = server.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event["request"]["verb"], "GET");
    assert!(event["request"]["uri"].as_str().unwrap().ends_with("/foo?x=1"));
    assert_eq!(event["request"]["ip_address"], "203.0.113.5");
    assert_eq!(event["request"]["headers"]["x-moesif-transaction-id"], txn.as_str());
    assert!(event.get("user_id").is_none());
    assert_eq!(event["weight"], 1);

    let batch = &server.requests_to("/v1/events/batch")[0];
    assert_eq!(batch.header("x-moesif-application-id"), Some("test-app-id"));
}

#[tokio::test]
async fn bearer_token_identifies_the_user() {
    let server = MockCollector::start_with_defaults().await.unwrap();
    let moesif = MoesifMiddleware::new(config(&server)).unwrap();
    let service = ServiceBuilder::new().layer(moesif.layer()).service(service_fn(hello));

    // {"sub":"user-42"}
    let token = "eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiJ1c2VyLTQyIn0.c2ln";
    let request = Request::get("http://api.example.com/me")
        .header("Authorization", format!("Bearer {token}"))
        .body(Full::new(Bytes::new()))
        .unwrap();
    service.oneshot(request).await.unwrap();

    moesif.shutdown().await;
    assert_eq!(server.events()[0]["user_id"], "user-42");
}

#[tokio::test]
async fn governance_rule_blocks_and_is_reported() {
    let server = MockCollector::start_with_defaults().await.unwrap();
    server
        .expect(RequestMatcher::get("/v1/governance-rules"))
        .respond_with(MockResponse::new().json(json!([{
            "_id": "block-admin",
            "type": "regex",
            "block": true,
            "regex_config": [{"conditions": [{"path": "request.route", "value": "^/admin"}]}],
            "response": {"status": 401, "body": "admin is closed"}
        }])));

    let moesif = MoesifMiddleware::new(config(&server)).unwrap();
    until_ready(&moesif).await;
    let service = ServiceBuilder::new().layer(moesif.layer()).service(service_fn(hello));

    let request = Request::post("http://api.example.com/admin/users")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = service.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.into_body().collect().await.unwrap().to_bytes(), "admin is closed");

    moesif.shutdown().await;
    let events = server.events();
    assert_eq!(events[0]["blocked_by"], "block-admin");
    assert_eq!(events[0]["response"]["status"], 401);
}

#[tokio::test]
async fn batch_etag_change_triggers_config_refresh() {
    let server = MockCollector::start_with_defaults().await.unwrap();
    server
        .expect(RequestMatcher::post("/v1/events/batch"))
        .respond_with(MockResponse::accepted().header("X-Moesif-Config-ETag", "changed"));

    let moesif = MoesifMiddleware::new(config(&server).config_refresh_interval(Duration::ZERO)).unwrap();
    until_ready(&moesif).await;
    let service = ServiceBuilder::new().layer(moesif.layer()).service(service_fn(hello));

    let request = Request::get("http://api.example.com/").body(Full::new(Bytes::new())).unwrap();
    service.oneshot(request).await.unwrap();

    let configs = server.wait_for("/v1/config", 2, Duration::from_secs(5)).await;
    assert!(configs.len() >= 2, "expected a second /config fetch, got {}", configs.len());
    moesif.shutdown().await;
}

#[tokio::test]
async fn collector_outage_never_fails_the_request() {
    let server = MockCollector::start().await.unwrap();
    let moesif = MoesifMiddleware::new(config(&server)).unwrap();
    let service = ServiceBuilder::new().layer(moesif.layer()).service(service_fn(hello));

    let request = Request::get("http://api.example.com/").body(Full::new(Bytes::new())).unwrap();
    let response = service.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    moesif.shutdown().await;
    let stats = moesif.stats();
    assert_eq!(stats.enqueued, 1);
    assert_eq!(stats.send_failures, 1);
}

#[tokio::test]
async fn profile_updates_reach_the_collector() {
    let server = MockCollector::start_with_defaults().await.unwrap();
    let moesif = MoesifMiddleware::new(config(&server)).unwrap();

    let user = UserProfile::new("u1").company_id("c1");
    moesif.update_user(&user).await.unwrap();

    let users = server.requests_to("/v1/users");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].json().unwrap()["user_id"], "u1");
    assert_eq!(users[0].json().unwrap()["company_id"], "c1");
    moesif.shutdown().await;
}

#[tokio::test]
async fn unidentified_company_rule_blocks_without_calling_the_handler() {
    let server = MockCollector::start_with_defaults().await.unwrap();
    server
        .expect(RequestMatcher::get("/v1/governance-rules"))
        .respond_with(MockResponse::new().json(json!([{
            "_id": "company-required",
            "type": "company",
            "block": true,
            "applied_to_unidentified": true,
            "response": {
                "status": 403,
                "headers": {"X-Reason": "no company"},
                "body": {"error": "identify your company"}
            }
        }])));

    let moesif = MoesifMiddleware::new(config(&server)).unwrap();
    until_ready(&moesif).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler = service_fn(move |req: Request<Full<Bytes>>| {
        counter.fetch_add(1, Ordering::SeqCst);
        hello(req)
    });
    let service = ServiceBuilder::new().layer(moesif.layer()).service(handler);

    let request = Request::get("http://api.example.com/orders").body(Full::new(Bytes::new())).unwrap();
    let response = service.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.headers()["x-reason"], "no company");
    assert_eq!(response.headers()["content-type"], "application/json");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(serde_json::from_slice::<serde_json::Value>(&body).unwrap(), json!({"error": "identify your company"}));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    moesif.shutdown().await;
    assert_eq!(server.events()[0]["blocked_by"], "company-required");
}
