//! The HTTP front door.
//!
//! Routes:
//!
//! - `POST /api/query` — run a user query through the coordinator. With
//!   `streamThinking: true` the response body is line-delimited JSON events
//!   terminated by a literal `[DONE]` line; otherwise the event stream is
//!   collected into a single JSON document.
//! - `POST /api/agents/register`, `POST /api/agents/{id}/unregister`,
//!   `POST /api/agents/{id}/heartbeat` — agent lifecycle.
//! - `GET /api/agents` — registry listing with the capability summary.
//! - `GET /api/llm-providers` — merged provider catalog (503 when empty).
//! - `GET /health` — gateway liveness.
//!
//! Streaming responses disable proxy buffering (`X-Accel-Buffering: no`);
//! the host in front of the gateway re-frames the lines as browser-facing
//! Server-Sent Events. Client disconnect cancels work in both modes: the
//! orchestration task is held by an [`AbortOnDrop`] guard tied to the
//! response body (streaming) or to the collecting handler future
//! (non-streaming), so dropping either aborts the task and with it every
//! in-flight downstream call. Graceful drain aborts whatever is still
//! running via [`InFlightQueries`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_stream::wrappers::ReceiverStream;

use crate::gatewayllm::config::GatewayConfig;
use crate::gatewayllm::coordinator::{Coordinator, QueryRequest};
use crate::gatewayllm::events::{ThinkingEvent, ThinkingSink};
use crate::gatewayllm::llm_adapter::LlmAdapter;
use crate::gatewayllm::mcp_session::McpSessionManager;
use crate::gatewayllm::registry::{AgentRegistration, AgentRegistry, RegistryError};

/// Shared state captured by every handler.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub registry: Arc<AgentRegistry>,
    pub adapter: Arc<LlmAdapter>,
    pub sessions: Arc<McpSessionManager>,
    pub config: Arc<GatewayConfig>,
    /// Set during graceful shutdown; new queries get 503.
    pub draining: Arc<AtomicBool>,
    /// Live orchestrations, aborted when the drain flag is raised.
    pub in_flight: Arc<InFlightQueries>,
}

/// Abort handles of the query orchestrations currently running.
///
/// Graceful drain must abort pending downstream work, not wait for it:
/// `with_graceful_shutdown` only stops accepting connections and lets
/// in-flight handlers finish naturally, so the shutdown path calls
/// [`abort_all`](InFlightQueries::abort_all) to cut the orchestration tasks
/// (and through them every downstream MCP/LLM call) as soon as the signal
/// lands.
pub struct InFlightQueries {
    handles: Mutex<Vec<AbortHandle>>,
}

impl InFlightQueries {
    pub fn new() -> Self {
        InFlightQueries {
            handles: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AbortHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a spawned orchestration. Entries for finished tasks are pruned
    /// on the way in so the vector stays bounded by concurrency, not by
    /// query count.
    pub fn track(&self, handle: &JoinHandle<()>) {
        let mut handles = self.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle.abort_handle());
    }

    /// Abort every live orchestration (the drain path). Aborting an
    /// already-finished task is a no-op.
    pub fn abort_all(&self) {
        for handle in self.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Default for InFlightQueries {
    fn default() -> Self {
        Self::new()
    }
}

/// Aborts the wrapped task when dropped. Tied to the streaming response body
/// so a client disconnect cancels the orchestration transitively.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Build the axum router over the shared state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/query", post(query))
        .route("/api/agents/register", post(register_agent))
        .route("/api/agents/{agent_id}/unregister", post(unregister_agent))
        .route("/api/agents/{agent_id}/heartbeat", post(heartbeat))
        .route("/api/agents", get(list_agents))
        .route("/api/llm-providers", get(llm_providers))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind and serve until the shutdown future resolves.
///
/// `with_graceful_shutdown` only stops accepting new connections; the
/// shutdown future itself is expected to raise the drain flag and call
/// [`InFlightQueries::abort_all`] so pending downstream work is cut rather
/// than drained naturally.
pub async fn run_server(
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = TcpListener::bind(addr).await?;
    log::info!("gateway listening on {}", addr);
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn query(State(state): State<AppState>, Json(request): Json<QueryRequest>) -> Response {
    if state.draining.load(Ordering::SeqCst) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"success": false, "message": "gateway is shutting down", "error": true})),
        )
            .into_response();
    }

    let stream_thinking = request.stream_thinking.unwrap_or(false);
    let (sink, mut rx) = ThinkingSink::channel(64);
    let coordinator = state.coordinator.clone();
    let handle = tokio::spawn(async move {
        coordinator.handle_query(request, sink).await;
    });
    state.in_flight.track(&handle);

    if stream_thinking {
        let guard = AbortOnDrop(handle);
        let body_stream = ReceiverStream::new(rx).map(move |event| {
            // Holding the guard inside the closure keeps the orchestration
            // alive exactly as long as the response body.
            let _ = &guard;
            Ok::<_, Infallible>(Bytes::from(event.to_wire_line()))
        });

        let mut response = Response::new(Body::from_stream(body_stream));
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-ndjson"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
        return response;
    }

    // Non-streaming: collect the event sequence and answer with one document.
    // The guard keeps disconnect-cancellation in force here too: if axum
    // drops this handler mid-await, the orchestration aborts with it.
    let guard = AbortOnDrop(handle);
    let mut terminal = None;
    while let Some(event) = rx.recv().await {
        match event {
            ThinkingEvent::Response(_) | ThinkingEvent::Error { .. } => terminal = Some(event),
            ThinkingEvent::Done => break,
            _ => {}
        }
    }
    // The stream has terminated, so the task is done; aborting a finished
    // task is a no-op.
    drop(guard);

    match terminal {
        Some(ThinkingEvent::Response(response)) => Json(json!({
            "success": response.success,
            "response": response.content,
            "agentUsed": response.agent_used,
            "translatedQuery": response.translated_query,
            "declined": response.declined,
            "blocked": response.blocked,
            "metadata": response.metadata,
        }))
        .into_response(),
        Some(ThinkingEvent::Error { message }) => {
            Json(json!({"success": false, "message": message, "error": true})).into_response()
        }
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "message": "query terminated without a response",
                "error": true,
            })),
        )
            .into_response(),
    }
}

async fn register_agent(
    State(state): State<AppState>,
    Json(registration): Json<AgentRegistration>,
) -> Response {
    let agent_id = registration.agent_id.clone();
    match state.registry.register(registration) {
        Ok(()) => Json(json!({"status": "registered", "agentId": agent_id})).into_response(),
        Err(e @ RegistryError::DuplicateName { .. }) => (
            StatusCode::CONFLICT,
            Json(json!({"success": false, "message": e.to_string()})),
        )
            .into_response(),
    }
}

async fn unregister_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Response {
    if state.registry.unregister(&agent_id) {
        state.sessions.invalidate(&agent_id).await;
        Json(json!({"status": "unregistered", "agentId": agent_id})).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "message": format!("unknown agent '{}'", agent_id)})),
        )
            .into_response()
    }
}

async fn heartbeat(State(state): State<AppState>, Path(agent_id): Path<String>) -> Response {
    if state.registry.heartbeat(&agent_id) {
        Json(json!({"success": true, "message": "heartbeat recorded"})).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "message": format!("unknown agent '{}'", agent_id)})),
        )
            .into_response()
    }
}

async fn list_agents(State(state): State<AppState>) -> Response {
    let agents: Vec<_> = state
        .registry
        .all()
        .into_iter()
        .map(|a| {
            json!({
                "agentId": a.agent_id,
                "name": a.name,
                "description": a.description,
                "url": a.base_url,
                "capabilities": a.capabilities,
                "healthy": a.healthy,
                "lastSeen": a.last_seen,
            })
        })
        .collect();
    Json(json!({
        "success": true,
        "count": agents.len(),
        "agents": agents,
        "capabilities": state.registry.capability_summary(),
    }))
    .into_response()
}

async fn llm_providers(State(state): State<AppState>) -> Response {
    let mut providers = state.adapter.catalog();
    for advertised in state.registry.advertised_providers() {
        providers.push(serde_json::to_value(&advertised).unwrap_or(serde_json::Value::Null));
    }

    if providers.is_empty() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"success": false, "message": "no LLM providers configured"})),
        )
            .into_response();
    }

    let count = providers.len();
    Json(json!({
        "success": true,
        "providers": providers,
        "default_provider": state.adapter.default_provider().map(|p| p.as_tag()),
        "count": count,
        "timestamp": Utc::now(),
    }))
    .into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "server": "gatewayllm",
        "protocol": "mcp",
        "version": env!("CARGO_PKG_VERSION"),
        "registeredServers": state.registry.len(),
    }))
    .into_response()
}
