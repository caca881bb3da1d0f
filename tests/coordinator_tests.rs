use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::routing::post;
use axum::{Json, Router};
use gatewayllm::config::GatewayConfig;
use gatewayllm::coordinator::{Coordinator, Phase, QueryRequest, UserContext};
use gatewayllm::events::{CheckpointStatus, QueryResponse, ThinkingEvent, ThinkingSink};
use gatewayllm::llm_adapter::LlmAdapter;
use gatewayllm::mcp_session::{AgentTransport, TransportError};
use gatewayllm::policy::PolicyClient;
use gatewayllm::provider::{
    Generation, GenerationOptions, ProviderClient, ProviderError, ProviderKind,
};
use gatewayllm::registry::{AgentRecord, AgentRegistration, AgentRegistry};
use serde_json::{json, Value};

/// Provider that answers routing / synthesis / validation prompts from a
/// script and records every prompt it sees.
struct ScriptedProvider {
    routing: String,
    synthesis: String,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn generate(
        &self,
        prompt: &str,
        _opts: &GenerationOptions,
    ) -> Result<Generation, ProviderError> {
        self.calls.lock().unwrap().push(prompt.to_string());
        let text = if prompt.contains("routing brain") {
            self.routing.clone()
        } else if prompt.starts_with("Fuse the following") {
            self.synthesis.clone()
        } else if prompt.starts_with("Assess whether") {
            // relevant, nothing to condense: coordinator passes content through
            r#"{"isRelevant": true, "keyInformation": "", "confidence": 0.9, "reasoning": "ok"}"#
                .to_string()
        } else {
            "generic reply".to_string()
        };
        Ok(Generation {
            text,
            prompt_tokens: 20,
            completion_tokens: 10,
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }
}

/// Transport that serves canned texts per agent and can be told to fail.
/// Mirrors the real session manager's contract of marking a failing agent
/// unhealthy.
struct MockTransport {
    registry: Arc<AgentRegistry>,
    responses: HashMap<String, String>,
    fail: HashSet<String>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl AgentTransport for MockTransport {
    async fn read_resource(
        &self,
        agent: &AgentRecord,
        uri: &str,
    ) -> Result<Value, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((agent.agent_id.clone(), uri.to_string()));
        if self.fail.contains(&agent.agent_id) {
            self.registry.update_health(&agent.agent_id, false);
            return Err(TransportError::Http {
                status: 500,
                body: "boom".to_string(),
            });
        }
        let text = self
            .responses
            .get(&agent.agent_id)
            .cloned()
            .unwrap_or_else(|| "ok".to_string());
        Ok(json!({"contents": [{"uri": uri, "text": text}]}))
    }
}

struct Harness {
    registry: Arc<AgentRegistry>,
    coordinator: Arc<Coordinator>,
    transport_calls: Arc<Mutex<Vec<(String, String)>>>,
    provider_calls: Arc<Mutex<Vec<String>>>,
}

fn harness(routing: &str, synthesis: &str, fail: &[&str], policy: PolicyClient) -> Harness {
    harness_with_responses(
        routing,
        synthesis,
        fail,
        policy,
        HashMap::from([
            (
                "hr-1".to_string(),
                "You have 15 vacation days remaining.".to_string(),
            ),
            (
                "it-1".to_string(),
                "Two tickets are awaiting approval.".to_string(),
            ),
        ]),
    )
}

fn harness_with_responses(
    routing: &str,
    synthesis: &str,
    fail: &[&str],
    policy: PolicyClient,
    responses: HashMap<String, String>,
) -> Harness {
    let registry = Arc::new(AgentRegistry::new());
    registry
        .register(AgentRegistration {
            agent_id: "hr-1".to_string(),
            name: "HR".to_string(),
            description: "Human resources specialist".to_string(),
            url: "http://localhost:9".to_string(),
            capabilities: vec!["vacation".to_string(), "payroll".to_string()],
            llm_providers: vec![],
        })
        .unwrap();
    registry
        .register(AgentRegistration {
            agent_id: "it-1".to_string(),
            name: "IT".to_string(),
            description: "IT helpdesk specialist".to_string(),
            url: "http://localhost:9".to_string(),
            capabilities: vec!["tickets".to_string()],
            llm_providers: vec![],
        })
        .unwrap();

    let provider_calls = Arc::new(Mutex::new(Vec::new()));
    let mut adapter = LlmAdapter::new();
    adapter.insert(Arc::new(ScriptedProvider {
        routing: routing.to_string(),
        synthesis: synthesis.to_string(),
        calls: provider_calls.clone(),
    }));

    let transport_calls = Arc::new(Mutex::new(Vec::new()));
    let transport = Arc::new(MockTransport {
        registry: registry.clone(),
        responses,
        fail: fail.iter().map(|s| s.to_string()).collect(),
        calls: transport_calls.clone(),
    });

    let coordinator = Arc::new(Coordinator::new(
        Arc::new(adapter),
        Arc::new(policy),
        registry.clone(),
        transport,
        Arc::new(GatewayConfig::default()),
    ));

    Harness {
        registry,
        coordinator,
        transport_calls,
        provider_calls,
    }
}

const ROUTE_HR: &str =
    r#"{"agents": [{"agent": "HR", "subQuery": "How many vacation days remain?"}], "reasoning": "HR topic"}"#;
const ROUTE_BOTH: &str = r#"{"agents": [{"agent": "HR", "subQuery": "Who is the manager?"},
    {"agent": "IT", "subQuery": "Which tickets need approval?"}], "reasoning": "spans both"}"#;

async fn run(harness: &Harness, request: QueryRequest) -> Vec<ThinkingEvent> {
    let (sink, mut rx) = ThinkingSink::channel(64);
    let coordinator = harness.coordinator.clone();
    let handle = tokio::spawn(async move {
        coordinator.handle_query(request, sink).await;
    });
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    handle.await.unwrap();
    events
}

fn request(query: &str, phase: Option<Phase>, identity: bool) -> QueryRequest {
    QueryRequest {
        query: query.to_string(),
        language: Some("en".to_string()),
        phase,
        user_context: identity.then(|| UserContext {
            email: Some("a@b.com".to_string()),
            ..Default::default()
        }),
        stream_thinking: Some(true),
        llm_provider: None,
    }
}

fn response_of(events: &[ThinkingEvent]) -> &QueryResponse {
    events
        .iter()
        .find_map(|e| match e {
            ThinkingEvent::Response(r) => Some(r),
            _ => None,
        })
        .expect("stream carried no response event")
}

fn checkpoint_numbers(events: &[ThinkingEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            ThinkingEvent::Checkpoint(c) => Some(c.number),
            _ => None,
        })
        .collect()
}

fn thinking_count(events: &[ThinkingEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ThinkingEvent::Thinking { .. }))
        .count()
}

async fn spawn_policy(app: Router) -> PolicyClient {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    PolicyClient::from_config(&GatewayConfig {
        policy_api_url: Some(format!("http://{}", addr)),
        ..GatewayConfig::default()
    })
}

/// Policy engine blocking any prompt containing `SECRET-X`, masking card
/// numbers, and blocking responses containing `TICKET-SECRET`.
async fn scripted_policy() -> PolicyClient {
    let app = Router::new().route(
        "/v1/scan/sync/request",
        post(|Json(body): Json<Value>| async move {
            let prompt = body["contents"][0]["prompt"].as_str().unwrap_or("");
            let response = body["contents"][0]["response"].as_str().unwrap_or("");
            if prompt.contains("SECRET-X") {
                return Json(json!({
                    "action": "block",
                    "category": "dlp",
                    "report_id": "rpt-7",
                    "message": "Blocked: sensitive token detected.",
                }));
            }
            if response.contains("TICKET-SECRET") {
                return Json(json!({
                    "action": "block",
                    "category": "dlp",
                    "message": "Blocked: the agent response contained sensitive data.",
                }));
            }
            if prompt.contains("4111") {
                let masked = prompt.replace("4111", "****");
                return Json(json!({
                    "action": "allow",
                    "prompt_masked_data": {"data": masked},
                }));
            }
            Json(json!({"action": "allow"}))
        }),
    );
    spawn_policy(app).await
}

#[tokio::test]
async fn single_agent_happy_path() {
    let h = harness(ROUTE_HR, "", &[], PolicyClient::unconfigured());
    let events = run(
        &h,
        request(
            "How many vacation days do I have?",
            Some(Phase::Phase2),
            true,
        ),
    )
    .await;

    assert!(thinking_count(&events) >= 2);
    assert!(matches!(events.last(), Some(ThinkingEvent::Done)));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, ThinkingEvent::Response(_)))
            .count(),
        1
    );

    let response = response_of(&events);
    assert!(response.success);
    assert_eq!(response.agent_used.as_deref(), Some("HR"));
    assert_eq!(response.content, "You have 15 vacation days remaining.");
    assert!(response.metadata.agent_tokens > 0);
    assert!(response.metadata.coordinator_tokens > 0);
    assert_eq!(
        response.metadata.total_tokens,
        response.metadata.coordinator_tokens + response.metadata.agent_tokens
    );
    // phase2 runs no checkpoints
    assert!(checkpoint_numbers(&events).is_empty());

    let calls = h.transport_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "hr-1");
    assert!(calls[0].1.starts_with("hr://query?q="));
    assert!(calls[0].1.ends_with("&provider=openai"));
}

#[tokio::test]
async fn parallel_dispatch_synthesizes_both_answers() {
    let fused = "Your manager is Alice, and two tickets are awaiting her approval.";
    let h = harness(ROUTE_BOTH, fused, &[], PolicyClient::unconfigured());
    let events = run(
        &h,
        request(
            "Who is my manager and which tickets require approval?",
            Some(Phase::Phase2),
            true,
        ),
    )
    .await;

    let response = response_of(&events);
    assert_eq!(response.content, fused);
    let used = response.agent_used.clone().unwrap();
    assert!(used.contains("HR") && used.contains("IT"));
    assert_eq!(h.transport_calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn declined_routing_returns_reasoning_without_dispatch() {
    let h = harness(
        r#"{"agents": [], "reasoning": "I cannot help with that topic."}"#,
        "",
        &[],
        PolicyClient::unconfigured(),
    );
    let events = run(&h, request("Write me a poem", Some(Phase::Phase2), true)).await;

    let response = response_of(&events);
    assert!(response.declined);
    assert_eq!(response.content, "I cannot help with that topic.");
    assert!(h.transport_calls.lock().unwrap().is_empty());
    // only the routing call reached the model
    assert_eq!(h.provider_calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn phase3_input_block_short_circuits_before_any_model_call() {
    let policy = scripted_policy().await;
    let h = harness(ROUTE_HR, "", &[], policy);
    let events = run(&h, request("my SECRET-X please", Some(Phase::Phase3), true)).await;

    let numbers = checkpoint_numbers(&events);
    assert_eq!(numbers, vec![1]);
    let blocked = events
        .iter()
        .find_map(|e| match e {
            ThinkingEvent::Checkpoint(c) => Some(c),
            _ => None,
        })
        .unwrap();
    assert_eq!(blocked.status, CheckpointStatus::Blocked);

    let response = response_of(&events);
    assert!(response.blocked);
    assert_eq!(response.content, "Blocked: sensitive token detected.");
    assert_eq!(response.metadata.coordinator_tokens, 0);
    assert!(h.transport_calls.lock().unwrap().is_empty());
    assert!(h.provider_calls.lock().unwrap().is_empty());
    assert!(matches!(events.last(), Some(ThinkingEvent::Done)));
}

#[tokio::test]
async fn phase3_checkpoints_run_in_order_around_the_dispatch() {
    let policy = scripted_policy().await;
    let h = harness(ROUTE_HR, "", &[], policy);
    let events = run(
        &h,
        request("How many vacation days do I have?", Some(Phase::Phase3), true),
    )
    .await;

    assert_eq!(checkpoint_numbers(&events), vec![1, 2, 3, 4]);
    let response = response_of(&events);
    assert!(!response.blocked);
    assert_eq!(response.metadata.security_checkpoints.len(), 4);
}

#[tokio::test]
async fn checkpoint2_masking_replaces_query_but_not_identity_tail() {
    let policy = scripted_policy().await;
    let h = harness(
        r#"{"agents": [{"agent": "HR", "subQuery": "my card is 4111, update my payroll record"}], "reasoning": "hr"}"#,
        "",
        &[],
        policy,
    );
    let events = run(
        &h,
        request(
            "Update payroll with card 4111 for me",
            Some(Phase::Phase3),
            true,
        ),
    )
    .await;
    let _ = response_of(&events);

    let calls = h.transport_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let uri = &calls[0].1;
    let encoded_payload = uri
        .split("q=")
        .nth(1)
        .and_then(|rest| rest.split('&').next())
        .unwrap();
    let payload = urlencoding::decode(encoded_payload).unwrap();
    assert!(!payload.contains("4111"), "card number leaked: {}", payload);
    assert!(payload.contains("****"));
    assert!(payload.contains("[User context: email=a@b.com]"));
}

#[tokio::test]
async fn parallel_branch_failure_degrades_to_surviving_branch() {
    let h = harness(ROUTE_BOTH, "unused synthesis", &["hr-1"], PolicyClient::unconfigured());
    let events = run(
        &h,
        request(
            "Who is my manager and which tickets require approval?",
            Some(Phase::Phase2),
            true,
        ),
    )
    .await;

    let response = response_of(&events);
    assert!(response.success);
    assert_eq!(response.content, "Two tickets are awaiting approval.");
    // both branches were attempted
    assert_eq!(h.transport_calls.lock().unwrap().len(), 2);
    // the failing agent is unhealthy by query end
    assert!(!h.registry.get("hr-1").unwrap().healthy);
    assert!(h.registry.get("it-1").unwrap().healthy);
}

#[tokio::test]
async fn sequential_blocked_branch_is_recorded_and_siblings_continue() {
    let policy = scripted_policy().await;
    let routing = r#"{"agents": [{"agent": "HR", "subQuery": "leak"}, {"agent": "IT", "subQuery": "tickets"}],
        "mode": "sequential", "reasoning": "chained"}"#;
    // HR's answer trips the inbound checkpoint; IT's is clean.
    let h = harness_with_responses(
        routing,
        "unused synthesis",
        &[],
        policy,
        HashMap::from([
            (
                "hr-1".to_string(),
                "The code is TICKET-SECRET.".to_string(),
            ),
            (
                "it-1".to_string(),
                "Two tickets are awaiting approval.".to_string(),
            ),
        ]),
    );

    let events = run(&h, request("chained question", Some(Phase::Phase3), true)).await;

    // 1, then 2/3 for HR (3 blocked), then 2/3 for IT, then 4
    assert_eq!(checkpoint_numbers(&events), vec![1, 2, 3, 2, 3, 4]);
    let response = response_of(&events);
    assert!(!response.blocked);
    assert_eq!(response.content, "Two tickets are awaiting approval.");
    assert_eq!(h.transport_calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn zero_healthy_agents_is_an_error_before_any_routing() {
    let h = harness(ROUTE_HR, "", &[], PolicyClient::unconfigured());
    h.registry.update_health("hr-1", false);
    h.registry.update_health("it-1", false);

    let events = run(&h, request("anything", Some(Phase::Phase2), true)).await;

    let error = events
        .iter()
        .find_map(|e| match e {
            ThinkingEvent::Error { message } => Some(message.clone()),
            _ => None,
        })
        .expect("expected an error event");
    assert!(error.contains("No agents"));
    assert!(matches!(events.last(), Some(ThinkingEvent::Done)));
    assert!(h.provider_calls.lock().unwrap().is_empty());
    assert!(h.transport_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn personal_query_without_identity_short_circuits() {
    let h = harness(ROUTE_HR, "", &[], PolicyClient::unconfigured());
    let events = run(
        &h,
        request("How many vacation days do I have?", Some(Phase::Phase2), false),
    )
    .await;

    let response = response_of(&events);
    assert!(response.content.contains("who you are"));
    assert!(h.provider_calls.lock().unwrap().is_empty());
    assert!(h.transport_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_agent_from_the_model_surfaces_as_an_error() {
    let h = harness(
        r#"{"agents": [{"agent": "Legal", "subQuery": "contracts"}], "reasoning": "legal"}"#,
        "",
        &[],
        PolicyClient::unconfigured(),
    );
    let events = run(&h, request("contract question", Some(Phase::Phase2), true)).await;

    let error = events
        .iter()
        .find_map(|e| match e {
            ThinkingEvent::Error { message } => Some(message.clone()),
            _ => None,
        })
        .expect("expected an error event");
    assert!(error.contains("Legal"));
    assert!(h.transport_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn validation_condenses_when_key_information_is_present() {
    struct CondensingProvider {
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ProviderClient for CondensingProvider {
        async fn generate(
            &self,
            prompt: &str,
            _opts: &GenerationOptions,
        ) -> Result<Generation, ProviderError> {
            self.calls.lock().unwrap().push(prompt.to_string());
            let text = if prompt.contains("routing brain") {
                ROUTE_HR.to_string()
            } else if prompt.starts_with("Assess whether") {
                r#"{"isRelevant": true, "keyInformation": "15 days left.", "confidence": 1.0, "reasoning": "ok"}"#
                    .to_string()
            } else {
                "generic".to_string()
            };
            Ok(Generation {
                text,
                prompt_tokens: 1,
                completion_tokens: 1,
            })
        }

        fn model_name(&self) -> &str {
            "condensing"
        }

        fn provider(&self) -> ProviderKind {
            ProviderKind::OpenAi
        }
    }

    let registry = Arc::new(AgentRegistry::new());
    registry
        .register(AgentRegistration {
            agent_id: "hr-1".to_string(),
            name: "HR".to_string(),
            description: String::new(),
            url: "http://localhost:9".to_string(),
            capabilities: vec![],
            llm_providers: vec![],
        })
        .unwrap();
    let mut adapter = LlmAdapter::new();
    adapter.insert(Arc::new(CondensingProvider {
        calls: Arc::new(Mutex::new(Vec::new())),
    }));
    let transport = Arc::new(MockTransport {
        registry: registry.clone(),
        responses: HashMap::from([(
            "hr-1".to_string(),
            "You have 15 vacation days remaining out of 25.".to_string(),
        )]),
        fail: HashSet::new(),
        calls: Arc::new(Mutex::new(Vec::new())),
    });
    let coordinator = Arc::new(Coordinator::new(
        Arc::new(adapter),
        Arc::new(PolicyClient::unconfigured()),
        registry.clone(),
        transport,
        Arc::new(GatewayConfig::default()),
    ));

    let (sink, mut rx) = ThinkingSink::channel(64);
    let c = coordinator.clone();
    let handle = tokio::spawn(async move {
        c.handle_query(request("vacation days for a@b.com", Some(Phase::Phase2), true), sink)
            .await;
    });
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    handle.await.unwrap();

    assert_eq!(response_of(&events).content, "15 days left.");
}
