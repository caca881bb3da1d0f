use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::post;
use axum::{Json, Router};
use gatewayllm::config::GatewayConfig;
use gatewayllm::policy::{PolicyClient, PolicyContext};
use serde_json::{json, Value};

fn ctx() -> PolicyContext {
    PolicyContext::new("en", "a@b.com", "gpt-4o-mini")
}

async fn spawn_policy_engine(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn configured_client(addr: SocketAddr) -> PolicyClient {
    let cfg = GatewayConfig {
        policy_api_url: Some(format!("http://{}", addr)),
        policy_api_token: Some("test-token".to_string()),
        policy_profile_id: Some("profile-1".to_string()),
        ..GatewayConfig::default()
    };
    PolicyClient::from_config(&cfg)
}

#[tokio::test]
async fn unconfigured_client_passes_through_approved() {
    let client = PolicyClient::unconfigured();
    assert!(!client.is_configured());

    let verdict = client.analyze_prompt("anything at all", &ctx()).await;
    assert!(verdict.approved);
    assert!(verdict.masked_prompt.is_none());
    assert!(verdict.message.is_none());
    // the raw request is still recorded for the checkpoint log
    assert_eq!(
        verdict.raw_request["contents"][0]["prompt"],
        "anything at all"
    );

    let verdict = client
        .analyze_prompt_and_response("q", "r", &ctx())
        .await;
    assert!(verdict.approved);
    assert_eq!(verdict.raw_request["contents"][0]["response"], "r");
}

#[tokio::test]
async fn block_verdict_carries_category_report_and_message() {
    let app = Router::new().route(
        "/v1/scan/sync/request",
        post(|Json(_body): Json<Value>| async move {
            Json(json!({
                "action": "block",
                "category": "dlp",
                "report_id": "rpt-42",
                "message": "Sensitive data detected.",
            }))
        }),
    );
    let addr = spawn_policy_engine(app).await;
    let client = configured_client(addr);

    let verdict = client.analyze_prompt("my SECRET-X please", &ctx()).await;
    assert!(!verdict.approved);
    assert_eq!(verdict.category.as_deref(), Some("dlp"));
    assert_eq!(verdict.report_id.as_deref(), Some("rpt-42"));
    assert_eq!(verdict.message.as_deref(), Some("Sensitive data detected."));
    assert_eq!(verdict.raw_response["action"], "block");
}

#[tokio::test]
async fn masked_payloads_are_surfaced_in_both_shapes() {
    let app = Router::new().route(
        "/v1/scan/sync/request",
        post(|Json(_body): Json<Value>| async move {
            Json(json!({
                "action": "allow",
                "prompt_masked_data": {"data": "my card is ****"},
                "response_masked_data": "the code is ****",
            }))
        }),
    );
    let addr = spawn_policy_engine(app).await;
    let client = configured_client(addr);

    let verdict = client
        .analyze_prompt_and_response("my card is 4111", "the code is 1234", &ctx())
        .await;
    assert!(verdict.approved);
    assert_eq!(verdict.masked_prompt.as_deref(), Some("my card is ****"));
    assert_eq!(verdict.masked_response.as_deref(), Some("the code is ****"));
}

#[tokio::test]
async fn engine_transport_failure_fails_open_with_scan_error_category() {
    // point at a port nothing listens on
    let cfg = GatewayConfig {
        policy_api_url: Some("http://127.0.0.1:1".to_string()),
        ..GatewayConfig::default()
    };
    let client = PolicyClient::from_config(&cfg);

    let verdict = client.analyze_prompt("hello", &ctx()).await;
    assert!(verdict.approved);
    assert_eq!(verdict.category.as_deref(), Some("scan-error"));
}

#[tokio::test]
async fn request_body_carries_profile_and_metadata() {
    let captured: Arc<tokio::sync::Mutex<Option<Value>>> = Arc::new(tokio::sync::Mutex::new(None));
    let captured_clone = captured.clone();
    let app = Router::new().route(
        "/v1/scan/sync/request",
        post(move |Json(body): Json<Value>| {
            let captured = captured_clone.clone();
            async move {
                *captured.lock().await = Some(body);
                Json(json!({"action": "allow"}))
            }
        }),
    );
    let addr = spawn_policy_engine(app).await;
    let client = configured_client(addr);

    let context = ctx();
    client.analyze_prompt("check me", &context).await;

    let body = captured.lock().await.clone().unwrap();
    assert_eq!(body["ai_profile"]["profile_id"], "profile-1");
    assert_eq!(body["metadata"]["app_user"], "a@b.com");
    assert_eq!(body["metadata"]["app_name"], "gatewayllm");
    assert_eq!(body["tr_id"], Value::String(context.tr_id.clone()));
}
