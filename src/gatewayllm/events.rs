//! The per-query thinking stream and the gateway's observability events.
//!
//! A query produces a lazy, finite, non-restartable sequence of
//! [`ThinkingEvent`]s delivered in strict emission order: any number of
//! `thinking` and `checkpoint` events, exactly one `response`, then the
//! terminal `done` sentinel. On the wire each event is one JSON line and
//! `done` is the literal `[DONE]`.
//!
//! Separately, [`GatewayEventHandler`] is a callback-based observability
//! seam for registry lifecycle events. All methods are no-ops by default so
//! handlers only override what they care about.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// Outcome of a single security checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Approved,
    Blocked,
}

/// One executed security checkpoint, preserved verbatim for display.
///
/// `input` and `output` are the raw policy-engine request and response
/// payloads, untouched.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointRecord {
    /// Checkpoint position, 1..=4.
    pub number: u8,
    /// Human label, e.g. `"input"`, `"outbound:hr"`.
    pub label: String,
    pub status: CheckpointStatus,
    pub latency_ms: u64,
    pub input: Value,
    pub output: Value,
}

/// Token accounting and checkpoint log attached to the final response.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub total_tokens: usize,
    pub coordinator_tokens: usize,
    pub agent_tokens: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "securityCheckpoints")]
    pub security_checkpoints: Vec<CheckpointRecord>,
}

/// The final answer of a query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub content: String,
    pub success: bool,
    #[serde(rename = "agentUsed", skip_serializing_if = "Option::is_none")]
    pub agent_used: Option<String>,
    #[serde(rename = "translatedQuery", skip_serializing_if = "Option::is_none")]
    pub translated_query: Option<String>,
    /// True when routing declined to dispatch anywhere.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub declined: bool,
    /// True when a checkpoint blocked the query or response.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub blocked: bool,
    pub metadata: ResponseMetadata,
}

/// A single event on the thinking stream.
#[derive(Debug, Clone)]
pub enum ThinkingEvent {
    /// Human-readable progress note.
    Thinking { text: String },
    /// One executed security checkpoint.
    Checkpoint(CheckpointRecord),
    /// The final answer; always the last event before [`ThinkingEvent::Done`].
    Response(QueryResponse),
    /// A user-visible failure; emitted instead of `Response`, before `Done`.
    Error { message: String },
    /// Terminal sentinel.
    Done,
}

impl ThinkingEvent {
    /// Serialize to the gateway's line-delimited wire format.
    ///
    /// Every line is a complete JSON document except the terminal sentinel,
    /// which is the literal `[DONE]`. The trailing newline is included.
    pub fn to_wire_line(&self) -> String {
        let body = match self {
            ThinkingEvent::Thinking { text } => {
                serde_json::json!({"type": "thinking", "text": text}).to_string()
            }
            ThinkingEvent::Checkpoint(record) => {
                let mut v = serde_json::to_value(record).unwrap_or(Value::Null);
                if let Some(obj) = v.as_object_mut() {
                    obj.insert("type".into(), Value::String("checkpoint".into()));
                }
                v.to_string()
            }
            ThinkingEvent::Response(resp) => {
                let mut v = serde_json::to_value(resp).unwrap_or(Value::Null);
                if let Some(obj) = v.as_object_mut() {
                    obj.insert("type".into(), Value::String("response".into()));
                }
                v.to_string()
            }
            ThinkingEvent::Error { message } => serde_json::json!({
                "type": "error",
                "success": false,
                "message": message,
            })
            .to_string(),
            ThinkingEvent::Done => return "[DONE]\n".to_string(),
        };
        format!("{}\n", body)
    }
}

/// Write half of a query's thinking stream.
///
/// Cloneable so parallel dispatch branches can emit concurrently; the
/// underlying channel preserves FIFO order per sender and total order is the
/// interleaving observed by the single receiver.
#[derive(Clone)]
pub struct ThinkingSink {
    tx: mpsc::Sender<ThinkingEvent>,
}

impl ThinkingSink {
    /// Create a sink/receiver pair. The receiver side is consumed by the
    /// front door (streamed or collected).
    pub fn channel(buffer: usize) -> (ThinkingSink, mpsc::Receiver<ThinkingEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (ThinkingSink { tx }, rx)
    }

    /// Emit one event. Returns `false` when the consumer is gone (client
    /// disconnect) — callers must treat that as a cancellation signal and
    /// stop working.
    pub async fn emit(&self, event: ThinkingEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Shorthand for a `thinking` progress note.
    pub async fn note(&self, text: impl Into<String>) -> bool {
        self.emit(ThinkingEvent::Thinking { text: text.into() }).await
    }
}

/// Registry lifecycle events observable via [`GatewayEventHandler`].
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    AgentRegistered {
        agent_id: String,
        name: String,
        capabilities: Vec<String>,
    },
    AgentUnregistered {
        agent_id: String,
    },
    AgentHealthChanged {
        agent_id: String,
        healthy: bool,
    },
}

/// Callback seam for gateway lifecycle observability.
pub trait GatewayEventHandler: Send + Sync {
    fn on_event(&self, _event: &GatewayEvent) {}
}

/// Handler that mirrors events into the `log` facade. Installed by the
/// server binary.
pub struct LogEventHandler;

impl GatewayEventHandler for LogEventHandler {
    fn on_event(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::AgentRegistered {
                agent_id,
                name,
                capabilities,
            } => {
                log::info!(
                    "agent registered: {} ('{}') capabilities=[{}]",
                    agent_id,
                    name,
                    capabilities.join(", ")
                );
            }
            GatewayEvent::AgentUnregistered { agent_id } => {
                log::info!("agent unregistered: {}", agent_id);
            }
            GatewayEvent::AgentHealthChanged { agent_id, healthy } => {
                log::info!(
                    "agent {} is now {}",
                    agent_id,
                    if *healthy { "healthy" } else { "unhealthy" }
                );
            }
        }
    }
}
