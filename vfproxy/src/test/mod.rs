//! End-to-end tests: the proxy in front of a wiremock runtime.

use axum::http::{Method, StatusCode};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::proxy::interaction_config;
use crate::test_utils::{create_test_app, create_test_app_with_config, create_test_config};

const CHROME_ON_WINDOWS: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

fn interaction_response() -> Value {
    json!({
        "trace": [
            {"type": "debug", "payload": {"type": "intent", "message": "matched intent **OrderStatus** - confidence interval _91.2%_"}},
            {"type": "debug", "payload": {"type": "api", "message": "API call successfully triggered"}},
            {"type": "debug", "payload": {"type": "generative", "message": "__AI Response__ Model: `gpt-4o` Post-Multiplier Token Consumption: `{total:42,query:30,answer:12}`"}},
            {"type": "text", "payload": {"message": "Your order ships tomorrow."}},
            {"type": "end"}
        ]
    })
}

#[test_log::test(tokio::test)]
async fn test_interaction_is_forwarded_with_config_and_analyzed() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/state/user/u-1/interact"))
        .and(body_partial_json(json!({
            "action": {"type": "text", "payload": "where is my order"},
            "config": {"excludeTypes": ["speak", "flow", "block"], "tts": false}
        })))
        .and(header("versionid", "production"))
        .and(header("authorization", "VF.DM.test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(interaction_response()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (server, mut records) = create_test_app(&mock_server.uri());

    let response = server
        .post("/state/user/u-1/interact")
        .add_header("authorization", "VF.DM.test")
        .add_header("versionid", "production")
        .add_header("sessionid", "session-42")
        .add_header("user-agent", CHROME_ON_WINDOWS)
        .add_header("referer", "https://shop.example.com/orders")
        .json(&json!({
            "action": {"type": "text", "payload": "where is my order"},
            "config": {"tts": true}
        }))
        .await;

    response.assert_status(StatusCode::OK);
    assert_eq!(response.json::<Value>(), interaction_response());

    let record = records.try_recv().expect("an analytics record should have been emitted");
    assert_eq!(record.headers.browser.as_deref(), Some("Chrome 120.0.0.0"));
    assert_eq!(record.headers.os.as_deref(), Some("Windows 10"));
    assert_eq!(record.headers.session.as_deref(), Some("session-42"));
    assert_eq!(record.headers.version.as_deref(), Some("production"));
    assert_eq!(record.headers.referer.as_deref(), Some("https://shop.example.com/orders"));
    assert_eq!(record.action_type.as_deref(), Some("text"));
    assert_eq!(record.action_value, Some(json!("where is my order")));
    assert_eq!(record.matched_intent.as_deref(), Some("OrderStatus"));
    assert_eq!(record.confidence, Some(91.2));
    assert_eq!(record.model.as_deref(), Some("gpt-4o"));
    assert_eq!(record.token_consumption.total, 42.0);
    assert_eq!(record.api_calls.successful, 1);
    assert_eq!(record.text_responses, vec!["Your order ships tomorrow."]);
    assert!(record.end_of_convo);
    assert!(records.try_recv().is_err());
}

#[test_log::test(tokio::test)]
async fn test_host_is_rewritten_and_origin_dropped() {
    let mock_server = MockServer::start().await;
    let upstream_host = format!("127.0.0.1:{}", mock_server.address().port());
    Mock::given(method("POST"))
        .and(path("/state/user/u-1/interact"))
        .and(header("host", upstream_host.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"trace": []})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (server, mut records) = create_test_app(&mock_server.uri());

    let response = server
        .post("/state/user/u-1/interact")
        .add_header("origin", "https://shop.example.com")
        .json(&json!({"action": {"type": "launch"}}))
        .await;

    response.assert_status(StatusCode::OK);

    let received = mock_server.received_requests().await.expect("request recording is enabled");
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get("origin").is_none());

    // The origin header still reaches the record
    let record = records.try_recv().unwrap();
    assert_eq!(record.headers.origin.as_deref(), Some("https://shop.example.com"));
}

#[test_log::test(tokio::test)]
async fn test_empty_interaction_body_is_sent_as_config_only() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/state/user/u-1/interact"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"trace": []})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (server, _records) = create_test_app(&mock_server.uri());

    server.post("/state/user/u-1/interact").await.assert_status(StatusCode::OK);

    let received = mock_server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body, json!({"config": interaction_config()}));
    assert_eq!(received[0].headers.get("content-type").unwrap(), "application/json");
}

#[test_log::test(tokio::test)]
async fn test_other_requests_pass_through_without_analytics() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/state/user/u-1"))
        .and(query_param("verbose", "true"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-runtime-version", "1.2.3")
                .set_body_json(json!({"stack": [], "variables": {"name": "Ada"}})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/state/user/u-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (server, mut records) = create_test_app(&mock_server.uri());

    let response = server.get("/state/user/u-1").add_query_param("verbose", "true").await;
    response.assert_status(StatusCode::OK);
    assert_eq!(response.header("x-runtime-version"), "1.2.3");
    assert_eq!(response.json::<Value>()["variables"]["name"], "Ada");

    server.delete("/state/user/u-1").await.assert_status(StatusCode::NO_CONTENT);

    assert!(records.try_recv().is_err());
}

#[test_log::test(tokio::test)]
async fn test_passthrough_body_is_forwarded_unchanged() {
    let mock_server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/state/user/u-1/variables"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (server, _records) = create_test_app(&mock_server.uri());

    server
        .put("/state/user/u-1/variables")
        .text("not json at all")
        .await
        .assert_status(StatusCode::OK);

    let received = mock_server.received_requests().await.unwrap();
    assert_eq!(received[0].body, b"not json at all");
}

#[test_log::test(tokio::test)]
async fn test_upstream_errors_are_passed_through() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/state/user/u-1/interact"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "invalid API key"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (server, mut records) = create_test_app(&mock_server.uri());

    let response = server
        .post("/state/user/u-1/interact")
        .json(&json!({"action": {"type": "launch"}}))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>(), json!({"message": "invalid API key"}));
    assert!(response.header("content-type").to_str().unwrap().starts_with("application/json"));
    assert!(records.try_recv().is_err());
}

#[test_log::test(tokio::test)]
async fn test_unreachable_upstream_returns_500() {
    // Nothing listens on port 1
    let (server, mut records) = create_test_app("http://127.0.0.1:1");

    let response = server
        .post("/state/user/u-1/interact")
        .json(&json!({"action": {"type": "launch"}}))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.text(), "Error forwarding request");
    assert!(records.try_recv().is_err());
}

#[test_log::test(tokio::test)]
async fn test_non_object_interaction_body_is_rejected() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (server, _records) = create_test_app(&mock_server.uri());

    server
        .post("/state/user/u-1/interact")
        .json(&json!(["launch"]))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .post("/state/user/u-1/interact")
        .text("{broken")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[test_log::test(tokio::test)]
async fn test_oversized_body_is_rejected() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(&mock_server.uri());
    config.max_body_size = 64;
    let (server, _records) = create_test_app_with_config(config);

    let response = server
        .post("/state/user/u-1/interact")
        .json(&json!({"action": {"type": "text", "payload": "x".repeat(256)}}))
        .await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
}

#[test_log::test(tokio::test)]
async fn test_response_without_trace_is_returned_without_analytics() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/state/user/u-1/interact"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": {"stack": []}})))
        .mount(&mock_server)
        .await;

    let (server, mut records) = create_test_app(&mock_server.uri());

    let response = server.post("/state/user/u-1/interact").json(&json!({})).await;

    response.assert_status(StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({"state": {"stack": []}}));
    assert!(records.try_recv().is_err());
}

#[test_log::test(tokio::test)]
async fn test_cors_preflight_is_answered_locally() {
    let mock_server = MockServer::start().await;
    Mock::given(method("OPTIONS"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (server, _records) = create_test_app(&mock_server.uri());

    let response = server
        .method(Method::OPTIONS, "/state/user/u-1/interact")
        .add_header("origin", "https://shop.example.com")
        .add_header("access-control-request-method", "POST")
        .add_header("access-control-request-headers", "versionid,authorization")
        .await;

    response.assert_status(StatusCode::OK);
    assert_eq!(response.header("access-control-allow-origin"), "*");
    assert_eq!(response.header("access-control-allow-methods"), "POST");
}

#[test_log::test(tokio::test)]
async fn test_metrics_endpoint_counts_forwarded_requests() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/state/user/u-1/interact"))
        .respond_with(ResponseTemplate::new(200).set_body_json(interaction_response()))
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(&mock_server.uri());
    config.enable_metrics = true;
    let (server, _records) = create_test_app_with_config(config);

    server
        .post("/state/user/u-1/interact")
        .json(&json!({"action": {"type": "launch"}}))
        .await
        .assert_status(StatusCode::OK);

    let response = server.get("/internal/metrics").await;
    response.assert_status(StatusCode::OK);
    let body = response.text();
    assert!(body.contains("vfproxy_forwarded_requests_total"));
    assert!(body.contains("vfproxy_analytics_records_total"));
}
