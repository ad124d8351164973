use http::StatusCode;
use moesif_testing::{MockCollector, MockResponse, RequestMatcher};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn defaults_answer_the_collector_endpoints() {
    let server = MockCollector::start_with_defaults().await.unwrap();
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/config", server.base_uri()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-moesif-config-etag"], "initial");
    assert_eq!(resp.text().await.unwrap(), "{}");

    let resp = client
        .post(format!("{}/events/batch", server.base_uri()))
        .json(&json!([{"request": {"verb": "GET"}}, {"request": {"verb": "POST"}}]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let batches = server.requests_to("/v1/events/batch");
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].batch_len(), 2);
    assert_eq!(server.events()[1]["request"]["verb"], "POST");
    assert!(server.unmatched_requests().is_empty());
}

#[tokio::test]
async fn later_expectations_override_earlier_ones() {
    let server = MockCollector::start_with_defaults().await.unwrap();
    server
        .expect(RequestMatcher::get("/v1/config").application_id("app-1"))
        .respond_with(MockResponse::config(json!({"sample_rate": 10}), "v2"))
        .once();

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/config", server.base_uri()))
        .header("X-Moesif-Application-Id", "app-1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-moesif-config-etag"], "v2");

    let resp = client
        .get(format!("{}/config", server.base_uri()))
        .header("X-Moesif-Application-Id", "someone-else")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-moesif-config-etag"], "initial");

    server.verify();
}

#[tokio::test]
async fn unmatched_requests_are_recorded() {
    let server = MockCollector::start().await.unwrap();
    let resp = reqwest::Client::new()
        .post(format!("{}/users", server.base_uri()))
        .json(&json!({"user_id": "u1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let unmatched = server.unmatched_requests();
    assert_eq!(unmatched.len(), 1);
    assert_eq!(unmatched[0].path, "/v1/users");
    assert_eq!(unmatched[0].json(), Some(json!({"user_id": "u1"})));
}

#[tokio::test]
async fn wait_for_returns_early_once_enough_requests_arrive() {
    let server = MockCollector::start_with_defaults().await.unwrap();
    let url = format!("{}/users", server.base_uri());
    tokio::spawn(async move {
        reqwest::Client::new().post(url).json(&json!({"user_id": "u1"})).send().await.unwrap();
    });

    let requests = server.wait_for("/v1/users", 1, Duration::from_secs(5)).await;
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
#[should_panic(expected = "Unmet expectations")]
async fn verify_fails_for_missing_calls() {
    let server = MockCollector::start().await.unwrap();
    server
        .expect(RequestMatcher::post("/v1/events/batch"))
        .respond_with(MockResponse::accepted())
        .times(1);

    server.verify();
}
