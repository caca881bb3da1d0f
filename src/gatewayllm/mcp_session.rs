//! JSON-RPC 2.0 client toward downstream agents, with session reuse.
//!
//! Every registered agent exposes an MCP surface at `POST {base_url}/mcp`.
//! The manager lazily runs `initialize` once per agent, caches the returned
//! session id, and stamps it onto subsequent requests via the
//! `mcp-session-id` header. Downstream servers are inconsistent about
//! framing: some answer with plain JSON, others with a Server-Sent-Events
//! body carrying a single `event: message` frame. [`parse_rpc_body`] sniffs
//! the content type and accepts both.
//!
//! Transport failures invalidate the cached session and mark the agent
//! unhealthy; recovery is left to the periodic health probes. Each call runs
//! under a timeout whose expiry drops the in-flight request future, which
//! aborts the client-side connection so the remote is not kept waiting.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::gatewayllm::clients::common::get_shared_http_client;
use crate::gatewayllm::registry::{AgentRecord, AgentRegistry};

/// Protocol version sent in `initialize`.
const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

/// Session id header, both directions.
const SESSION_HEADER: &str = "mcp-session-id";

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response, success or error.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Downstream transport failures.
#[derive(Debug)]
pub enum TransportError {
    /// Non-2xx HTTP status from the agent.
    Http { status: u16, body: String },
    /// The configured per-call deadline elapsed; the connection was aborted.
    Timeout,
    /// Connection-level failure (refused, reset, DNS).
    Connect(String),
    /// The body could not be parsed as JSON-RPC (either framing).
    Protocol(String),
    /// The agent answered with a JSON-RPC error object.
    Rpc(JsonRpcError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Http { status, body } => {
                write!(f, "downstream HTTP {}: {}", status, body)
            }
            TransportError::Timeout => write!(f, "downstream request timed out"),
            TransportError::Connect(msg) => write!(f, "downstream unreachable: {}", msg),
            TransportError::Protocol(msg) => write!(f, "malformed downstream response: {}", msg),
            TransportError::Rpc(err) => {
                write!(f, "downstream JSON-RPC error {}: {}", err.code, err.message)
            }
        }
    }
}

impl Error for TransportError {}

/// The seam the coordinator dispatches through, so orchestration tests can
/// substitute a scripted transport.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Read a resource URI from an agent and return the JSON-RPC `result`.
    async fn read_resource(
        &self,
        agent: &AgentRecord,
        uri: &str,
    ) -> Result<Value, TransportError>;
}

struct SessionEntry {
    session_id: String,
    last_used: DateTime<Utc>,
}

/// Per-downstream session cache and request plumbing.
pub struct McpSessionManager {
    registry: Arc<AgentRegistry>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl McpSessionManager {
    pub fn new(registry: Arc<AgentRegistry>, timeout: Duration) -> Self {
        McpSessionManager {
            registry,
            sessions: RwLock::new(HashMap::new()),
            timeout,
            // id 1 is reserved for initialize
            next_id: AtomicU64::new(2),
        }
    }

    /// Ensure a session exists for the agent, running `initialize` if needed,
    /// and return its id.
    pub async fn initialize_session(&self, agent: &AgentRecord) -> Result<String, TransportError> {
        if let Some(entry) = self.sessions.read().await.get(&agent.agent_id) {
            return Ok(entry.session_id.clone());
        }

        let request = JsonRpcRequest::new(
            1,
            "initialize",
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "gatewayllm",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        );

        let (response, header_session) = self.post(agent, &request, None).await?;

        if let Some(err) = response.error {
            return Err(TransportError::Rpc(err));
        }

        let session_id = response
            .result
            .as_ref()
            .and_then(|r| r.get("sessionId"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or(header_session)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        log::debug!(
            "initialized MCP session {} with agent {}",
            session_id,
            agent.agent_id
        );

        self.sessions.write().await.insert(
            agent.agent_id.clone(),
            SessionEntry {
                session_id: session_id.clone(),
                last_used: Utc::now(),
            },
        );
        Ok(session_id)
    }

    /// Send a request under the agent's session, establishing it first if
    /// needed. Any transport failure invalidates the session and marks the
    /// agent unhealthy before the error is returned.
    pub async fn forward_request(
        &self,
        agent: &AgentRecord,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, TransportError> {
        let result = async {
            let session_id = self.initialize_session(agent).await?;
            let (response, _) = self.post(agent, &request, Some(&session_id)).await?;
            self.touch(&agent.agent_id).await;
            Ok(response)
        }
        .await;

        if let Err(e) = &result {
            if log::log_enabled!(log::Level::Warn) {
                log::warn!(
                    "transport failure toward agent {}: {} — marking unhealthy",
                    agent.agent_id,
                    e
                );
            }
            self.invalidate(&agent.agent_id).await;
            self.registry.update_health(&agent.agent_id, false);
        }
        result
    }

    /// Allocate a fresh request id.
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Drop the cached session for an agent.
    pub async fn invalidate(&self, agent_id: &str) {
        self.sessions.write().await.remove(agent_id);
    }

    /// Drop sessions idle longer than `max_idle`. Returns how many went.
    pub async fn prune_idle(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_idle).unwrap_or_else(|_| chrono::Duration::zero());
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_used >= cutoff);
        before - sessions.len()
    }

    /// Drop every cached session (shutdown path).
    pub async fn clear(&self) {
        self.sessions.write().await.clear();
    }

    async fn touch(&self, agent_id: &str) {
        if let Some(entry) = self.sessions.write().await.get_mut(agent_id) {
            entry.last_used = Utc::now();
        }
    }

    /// POST one JSON-RPC request and parse the response body by content type.
    /// Returns the parsed response plus any `mcp-session-id` response header.
    async fn post(
        &self,
        agent: &AgentRecord,
        request: &JsonRpcRequest,
        session_id: Option<&str>,
    ) -> Result<(JsonRpcResponse, Option<String>), TransportError> {
        let url = format!("{}/mcp", agent.base_url);
        let mut builder = get_shared_http_client()
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .json(request);
        if let Some(id) = session_id {
            builder = builder.header(SESSION_HEADER, id);
        }

        // Timing out drops the send future, which aborts the client side of
        // the connection.
        let response = tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Connect(format!("{}: {}", url, e))
                }
            })?;

        let status = response.status();
        let header_session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = tokio::time::timeout(self.timeout, response.text())
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Connect(format!("{}: reading body: {}", url, e)))?;

        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = parse_rpc_body(&content_type, &body)?;
        Ok((parsed, header_session))
    }
}

impl McpSessionManager {
    /// `resources/list` — enumerate the resource URIs an agent exposes.
    pub async fn list_resources(&self, agent: &AgentRecord) -> Result<Value, TransportError> {
        self.call(agent, "resources/list", json!({})).await
    }

    /// `tools/list` — enumerate an agent's advertised tools. The gateway
    /// never invokes tools, but the listing is useful for diagnostics.
    pub async fn list_tools(&self, agent: &AgentRecord) -> Result<Value, TransportError> {
        self.call(agent, "tools/list", json!({})).await
    }

    async fn call(
        &self,
        agent: &AgentRecord,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        let request = JsonRpcRequest::new(self.next_request_id(), method, params);
        let response = self.forward_request(agent, request).await?;
        if let Some(err) = response.error {
            return Err(TransportError::Rpc(err));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl AgentTransport for McpSessionManager {
    async fn read_resource(
        &self,
        agent: &AgentRecord,
        uri: &str,
    ) -> Result<Value, TransportError> {
        self.call(agent, "resources/read", json!({"uri": uri})).await
    }
}

/// Parse a response body as JSON-RPC, accepting plain JSON or SSE framing
/// depending on the `content-type`.
pub fn parse_rpc_body(content_type: &str, body: &str) -> Result<JsonRpcResponse, TransportError> {
    let payload = if content_type
        .to_ascii_lowercase()
        .contains("text/event-stream")
    {
        extract_sse_message(body).ok_or_else(|| {
            TransportError::Protocol("no message frame in event-stream body".to_string())
        })?
    } else {
        body.to_string()
    };

    serde_json::from_str(&payload)
        .map_err(|e| TransportError::Protocol(format!("invalid JSON-RPC body: {}", e)))
}

/// Pull the data payload out of the first `message` frame of an SSE body.
///
/// Frames without an explicit `event:` line default to `message` per the SSE
/// spec; multi-line `data:` is joined with newlines.
fn extract_sse_message(body: &str) -> Option<String> {
    let mut event_name: Option<String> = None;
    let mut data_lines: Vec<String> = Vec::new();

    let flush = |event_name: &Option<String>, data_lines: &[String]| -> Option<String> {
        if data_lines.is_empty() {
            return None;
        }
        match event_name.as_deref() {
            None | Some("message") => Some(data_lines.join("\n")),
            _ => None,
        }
    };

    for raw_line in body.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() {
            if let Some(payload) = flush(&event_name, &data_lines) {
                return Some(payload);
            }
            event_name = None;
            data_lines.clear();
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event_name = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
        // comment lines (":keepalive") and unknown fields are ignored
    }
    flush(&event_name, &data_lines)
}
