use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use gatewayllm::mcp_session::{
    parse_rpc_body, AgentTransport, McpSessionManager, TransportError,
};
use gatewayllm::registry::{AgentRegistration, AgentRegistry};
use serde_json::{json, Value};

#[derive(Clone, Copy, PartialEq)]
enum BodyMode {
    Json,
    Sse,
    ServerError,
}

#[derive(Clone, Default)]
struct DownstreamLog {
    initializes: Arc<AtomicUsize>,
    read_sessions: Arc<Mutex<Vec<Option<String>>>>,
}

/// A throwaway downstream agent speaking JSON-RPC at /mcp, answering in
/// either framing.
async fn spawn_downstream(mode: BodyMode, log: DownstreamLog) -> SocketAddr {
    let app = Router::new().route(
        "/mcp",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let log = log.clone();
            async move {
                let method = body["method"].as_str().unwrap_or("");
                let id = body["id"].clone();

                if mode == BodyMode::ServerError {
                    return Response::builder()
                        .status(500)
                        .body(Body::from("internal error"))
                        .unwrap();
                }

                let result = match method {
                    "initialize" => {
                        log.initializes.fetch_add(1, Ordering::SeqCst);
                        json!({"sessionId": "sess-123", "protocolVersion": "2025-06-18"})
                    }
                    "resources/read" => {
                        let session = headers
                            .get("mcp-session-id")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        log.read_sessions.lock().unwrap().push(session);
                        let uri = body["params"]["uri"].as_str().unwrap_or("");
                        json!({"contents": [{"uri": uri, "text": "hello from downstream"}]})
                    }
                    "resources/list" => {
                        json!({"resources": [{"uri": "hr://query", "description": "HR queries"}]})
                    }
                    other => json!({"error": format!("unexpected method {}", other)}),
                };

                let rpc = json!({"jsonrpc": "2.0", "id": id, "result": result});
                match mode {
                    BodyMode::Json => Response::builder()
                        .header("content-type", "application/json")
                        .body(Body::from(rpc.to_string()))
                        .unwrap(),
                    BodyMode::Sse => Response::builder()
                        .header("content-type", "text/event-stream")
                        .body(Body::from(format!("event: message\ndata: {}\n\n", rpc)))
                        .unwrap(),
                    BodyMode::ServerError => unreachable!(),
                }
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn setup(addr: SocketAddr) -> (Arc<AgentRegistry>, Arc<McpSessionManager>) {
    let registry = Arc::new(AgentRegistry::new());
    registry
        .register(AgentRegistration {
            agent_id: "hr-1".to_string(),
            name: "HR".to_string(),
            description: "HR agent".to_string(),
            url: format!("http://{}", addr),
            capabilities: vec![],
            llm_providers: vec![],
        })
        .unwrap();
    let sessions = Arc::new(McpSessionManager::new(
        registry.clone(),
        Duration::from_secs(5),
    ));
    (registry, sessions)
}

#[tokio::test]
async fn reads_resource_over_plain_json_body() {
    let log = DownstreamLog::default();
    let addr = spawn_downstream(BodyMode::Json, log.clone()).await;
    let (registry, sessions) = setup(addr);

    let agent = registry.get("hr-1").unwrap();
    let result = sessions
        .read_resource(&agent, "hr://query?q=vacation&provider=openai")
        .await
        .unwrap();

    assert_eq!(result["contents"][0]["text"], "hello from downstream");
    assert!(registry.get("hr-1").unwrap().healthy);
}

#[tokio::test]
async fn reads_resource_over_sse_body() {
    let log = DownstreamLog::default();
    let addr = spawn_downstream(BodyMode::Sse, log.clone()).await;
    let (registry, sessions) = setup(addr);

    let agent = registry.get("hr-1").unwrap();
    let result = sessions
        .read_resource(&agent, "hr://query?q=vacation&provider=openai")
        .await
        .unwrap();

    assert_eq!(result["contents"][0]["text"], "hello from downstream");
}

#[tokio::test]
async fn session_is_initialized_once_and_reused() {
    let log = DownstreamLog::default();
    let addr = spawn_downstream(BodyMode::Json, log.clone()).await;
    let (registry, sessions) = setup(addr);
    let agent = registry.get("hr-1").unwrap();

    sessions
        .read_resource(&agent, "hr://query?q=first&provider=openai")
        .await
        .unwrap();
    sessions
        .read_resource(&agent, "hr://query?q=second&provider=openai")
        .await
        .unwrap();

    assert_eq!(log.initializes.load(Ordering::SeqCst), 1);
    let seen = log.read_sessions.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].as_deref(), Some("sess-123"));
    assert_eq!(seen[1].as_deref(), Some("sess-123"));
}

#[tokio::test]
async fn listing_resources_shares_the_read_session() {
    let log = DownstreamLog::default();
    let addr = spawn_downstream(BodyMode::Json, log.clone()).await;
    let (registry, sessions) = setup(addr);
    let agent = registry.get("hr-1").unwrap();

    let listing = sessions.list_resources(&agent).await.unwrap();
    assert_eq!(listing["resources"][0]["uri"], "hr://query");

    sessions
        .read_resource(&agent, "hr://query?q=x&provider=openai")
        .await
        .unwrap();
    assert_eq!(log.initializes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transport_failure_marks_agent_unhealthy_and_invalidates_session() {
    let log = DownstreamLog::default();
    let addr = spawn_downstream(BodyMode::ServerError, log.clone()).await;
    let (registry, sessions) = setup(addr);
    let agent = registry.get("hr-1").unwrap();

    let err = sessions
        .read_resource(&agent, "hr://query?q=x&provider=openai")
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Http { status: 500, .. }));
    assert!(!registry.get("hr-1").unwrap().healthy);
}

#[tokio::test]
async fn unreachable_agent_is_a_connect_error() {
    let registry = Arc::new(AgentRegistry::new());
    registry
        .register(AgentRegistration {
            agent_id: "ghost".to_string(),
            name: "Ghost".to_string(),
            description: String::new(),
            url: "http://127.0.0.1:1".to_string(),
            capabilities: vec![],
            llm_providers: vec![],
        })
        .unwrap();
    let sessions = Arc::new(McpSessionManager::new(
        registry.clone(),
        Duration::from_secs(5),
    ));

    let agent = registry.get("ghost").unwrap();
    let err = sessions
        .read_resource(&agent, "ghost://query?q=x&provider=openai")
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Connect(_)));
    assert!(!registry.get("ghost").unwrap().healthy);
}

#[tokio::test]
async fn idle_sessions_are_pruned() {
    let log = DownstreamLog::default();
    let addr = spawn_downstream(BodyMode::Json, log.clone()).await;
    let (registry, sessions) = setup(addr);
    let agent = registry.get("hr-1").unwrap();

    sessions
        .read_resource(&agent, "hr://query?q=x&provider=openai")
        .await
        .unwrap();

    // nothing is older than an hour
    assert_eq!(sessions.prune_idle(Duration::from_secs(3600)).await, 0);
    // everything is older than zero seconds
    assert_eq!(sessions.prune_idle(Duration::from_secs(0)).await, 1);

    // next call re-initializes
    sessions
        .read_resource(&agent, "hr://query?q=y&provider=openai")
        .await
        .unwrap();
    assert_eq!(log.initializes.load(Ordering::SeqCst), 2);
}

#[test]
fn parse_rpc_body_accepts_both_framings() {
    let rpc = r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#;

    let plain = parse_rpc_body("application/json", rpc).unwrap();
    assert_eq!(plain.result.unwrap()["ok"], true);

    let sse = format!("event: message\ndata: {}\n\n", rpc);
    let parsed = parse_rpc_body("text/event-stream; charset=utf-8", &sse).unwrap();
    assert_eq!(parsed.result.unwrap()["ok"], true);
}

#[test]
fn parse_rpc_body_accepts_unnamed_sse_events_and_skips_comments() {
    let rpc = r#"{"jsonrpc":"2.0","id":2,"result":{"n":1}}"#;
    let sse = format!(":keepalive\ndata: {}\n\n", rpc);
    let parsed = parse_rpc_body("text/event-stream", &sse).unwrap();
    assert_eq!(parsed.result.unwrap()["n"], 1);
}

#[test]
fn parse_rpc_body_rejects_event_stream_without_message_frame() {
    let sse = "event: ping\ndata: {}\n\n";
    assert!(matches!(
        parse_rpc_body("text/event-stream", sse),
        Err(TransportError::Protocol(_))
    ));
}
