//! The per-query orchestration pipeline.
//!
//! One [`Coordinator::handle_query`] call drives a user query end to end:
//!
//! ```text
//! guard → checkpoint 1 → translate → route → dispatch (cp 2/3 per agent)
//!       → synthesize → validate → translate back → checkpoint 4 → respond
//! ```
//!
//! Security checkpoints only run at `phase3`; phases 1 and 2 skip them
//! entirely. All request-scoped state — token counters, the checkpoint log,
//! the thinking stream — lives in a per-call [`QueryState`], never on the
//! coordinator itself, so concurrent queries cannot corrupt each other's
//! metadata.
//!
//! Cancellation: every emission into the [`ThinkingSink`] doubles as a
//! liveness check. When the consumer disappears (client disconnect) the
//! emit fails, the pipeline stops at its next suspension point, and pending
//! downstream futures are dropped — which aborts their connections.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gatewayllm::config::GatewayConfig;
use crate::gatewayllm::events::{
    CheckpointRecord, CheckpointStatus, QueryResponse, ResponseMetadata, ThinkingEvent,
    ThinkingSink,
};
use crate::gatewayllm::json_salvage::parse_loose;
use crate::gatewayllm::llm_adapter::LlmAdapter;
use crate::gatewayllm::mcp_session::AgentTransport;
use crate::gatewayllm::policy::{PolicyClient, PolicyContext, PolicyVerdict};
use crate::gatewayllm::provider::{
    estimate_tokens, Generation, GenerationOptions, ProviderError, ProviderKind,
};
use crate::gatewayllm::registry::AgentRegistry;
use crate::gatewayllm::router::{self, RoutedAgent, RoutingStrategy};

/// One prior conversation turn supplied by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

/// End-user identity and history forwarded by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
}

impl UserContext {
    /// Whether the request carries enough identity to answer personal
    /// ("my …") questions.
    pub fn has_identity(&self) -> bool {
        self.name.is_some() || self.email.is_some() || self.employee_id.is_some()
    }

    /// Render the `[User context: …]` tail appended to downstream payloads.
    /// Returns `None` when no identity field is set.
    pub fn identity_tail(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(v) = &self.name {
            parts.push(format!("name={}", v));
        }
        if let Some(v) = &self.email {
            parts.push(format!("email={}", v));
        }
        if let Some(v) = &self.role {
            parts.push(format!("role={}", v));
        }
        if let Some(v) = &self.department {
            parts.push(format!("department={}", v));
        }
        if let Some(v) = &self.employee_id {
            parts.push(format!("employeeId={}", v));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// Caller-selected policy regime. Checkpoints run only at `phase3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "phase1")]
    Phase1,
    #[serde(rename = "phase2")]
    Phase2,
    #[serde(rename = "phase3")]
    Phase3,
}

/// Body of `POST /api/query`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub user_context: Option<UserContext>,
    #[serde(default)]
    pub stream_thinking: Option<bool>,
    #[serde(default)]
    pub llm_provider: Option<String>,
}

/// Request-scoped accounting, reset at the start of every query.
#[derive(Default)]
struct QueryState {
    coordinator_tokens: usize,
    agent_tokens: usize,
    checkpoints: Vec<CheckpointRecord>,
}

impl QueryState {
    fn metadata(&self) -> ResponseMetadata {
        ResponseMetadata {
            total_tokens: self.coordinator_tokens + self.agent_tokens,
            coordinator_tokens: self.coordinator_tokens,
            agent_tokens: self.agent_tokens,
            timestamp: Utc::now(),
            security_checkpoints: self.checkpoints.clone(),
        }
    }
}

/// Result of one dispatched branch.
struct BranchOutcome {
    agent: String,
    /// The branch's text, or `None` when transport failed (synthesis must
    /// tolerate the null).
    text: Option<String>,
    /// True when a checkpoint withheld the branch; `text` then carries the
    /// policy message.
    blocked: bool,
    checkpoints: Vec<CheckpointRecord>,
    agent_tokens: usize,
}

/// The Intelligent Coordinator: registry + router + transport + policy glued
/// into the per-query pipeline.
pub struct Coordinator {
    adapter: Arc<LlmAdapter>,
    policy: Arc<PolicyClient>,
    registry: Arc<AgentRegistry>,
    transport: Arc<dyn AgentTransport>,
    config: Arc<GatewayConfig>,
}

impl Coordinator {
    pub fn new(
        adapter: Arc<LlmAdapter>,
        policy: Arc<PolicyClient>,
        registry: Arc<AgentRegistry>,
        transport: Arc<dyn AgentTransport>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Coordinator {
            adapter,
            policy,
            registry,
            transport,
            config,
        }
    }

    /// Drive one query to completion, emitting the full event sequence into
    /// `sink`. The stream always terminates with `Done`; before it comes
    /// exactly one `Response` (or one `Error` on a user-visible failure).
    pub async fn handle_query(&self, request: QueryRequest, sink: ThinkingSink) {
        let mut state = QueryState::default();

        let phase3 = matches!(request.phase, Some(Phase::Phase3));
        let language = request
            .language
            .clone()
            .unwrap_or_else(|| "en".to_string());
        let user_ctx = request.user_context.clone().unwrap_or_default();
        let history: Vec<HistoryTurn> = {
            let turns = &user_ctx.history;
            let skip = turns.len().saturating_sub(self.config.history_window);
            turns[skip..].to_vec()
        };
        let provider = self.adapter.resolve(request.llm_provider.as_deref());
        let provider_tag = provider.map(|p| p.as_tag()).unwrap_or("none");
        let policy_ctx = PolicyContext::new(
            &language,
            user_ctx.email.as_deref().unwrap_or("anonymous"),
            self.config
                .coordinator_model
                .as_deref()
                .unwrap_or(provider_tag),
        );

        if !sink.note("Analyzing your request...").await {
            return;
        }

        // Personal-query guard: "my vacation days" without an identity can
        // only produce a hallucinated answer, so short-circuit before any
        // model call.
        if contains_first_person(&request.query) && !user_ctx.has_identity() {
            self.respond(
                &sink,
                &state,
                QueryResponseParts {
                    content: "Your question appears to be about your own records, but I don't \
                              know who you are. Please sign in or include your identity so I \
                              can route this to the right specialist."
                        .to_string(),
                    agent_used: None,
                    translated_query: None,
                    declined: false,
                    blocked: false,
                },
            )
            .await;
            return;
        }

        // Checkpoint 1 — input. The original text never travels further if
        // the engine masks it.
        let mut working_query = request.query.clone();
        if phase3 {
            let (verdict, record) = self
                .checkpoint_prompt(1, "input", &working_query, &policy_ctx)
                .await;
            state.checkpoints.push(record.clone());
            if !sink.emit(ThinkingEvent::Checkpoint(record)).await {
                return;
            }
            if !verdict.approved {
                let message = verdict
                    .message
                    .unwrap_or_else(|| "Your request was blocked by the security policy.".into());
                self.respond(
                    &sink,
                    &state,
                    QueryResponseParts {
                        content: message,
                        agent_used: None,
                        translated_query: None,
                        declined: false,
                        blocked: true,
                    },
                )
                .await;
                return;
            }
            if let Some(masked) = verdict.masked_prompt {
                working_query = masked;
            }
        }

        // Healthy candidates only; the registry's unhealthy fallback is for
        // discovery, never for dispatch.
        let mut candidates = self.registry.find_candidates();
        candidates.retain(|a| a.healthy);
        if candidates.is_empty() {
            self.fail(&sink, "No agents are currently available to handle your request.")
                .await;
            return;
        }

        // Translate to English for routing; failure degrades to the
        // original text.
        let mut translated_query = None;
        if language != "en" {
            if !sink.note("Translating your query to English...").await {
                return;
            }
            match self
                .translate(&working_query, &language, "en", provider)
                .await
            {
                Ok((text, tokens)) => {
                    state.coordinator_tokens += tokens;
                    translated_query = Some(text.clone());
                    working_query = text;
                }
                Err(e) => {
                    log::warn!("query translation failed, using original text: {}", e);
                }
            }
        }

        if !sink
            .note(format!(
                "Selecting the right specialist among {} agents...",
                candidates.len()
            ))
            .await
        {
            return;
        }

        let strategy = match router::route(
            &self.adapter,
            &working_query,
            &candidates,
            &history,
            provider,
        )
        .await
        {
            Ok((strategy, tokens)) => {
                state.coordinator_tokens += tokens;
                strategy
            }
            Err(e) => {
                self.fail(&sink, format!("Routing failed: {}", e)).await;
                return;
            }
        };

        let (content, agent_used, blocked) = match strategy {
            RoutingStrategy::Declined { reason } => {
                self.respond(
                    &sink,
                    &state,
                    QueryResponseParts {
                        content: reason,
                        agent_used: None,
                        translated_query,
                        declined: true,
                        blocked: false,
                    },
                )
                .await;
                return;
            }

            RoutingStrategy::Single(target) => {
                if !sink
                    .note(format!("Routing your query to {}...", target.agent))
                    .await
                {
                    return;
                }
                let outcome = self
                    .dispatch_one(
                        &target,
                        &working_query,
                        &history,
                        &user_ctx,
                        provider_tag,
                        phase3,
                        &policy_ctx,
                        &sink,
                    )
                    .await;
                state.checkpoints.extend(outcome.checkpoints.clone());
                state.agent_tokens += outcome.agent_tokens;
                match outcome.text {
                    Some(text) => (text, Some(outcome.agent), outcome.blocked),
                    None => {
                        self.fail(
                            &sink,
                            format!("Agent '{}' failed to respond.", outcome.agent),
                        )
                        .await;
                        return;
                    }
                }
            }

            RoutingStrategy::Parallel(targets) => {
                let names: Vec<String> = targets.iter().map(|t| t.agent.clone()).collect();
                if !sink
                    .note(format!(
                        "Consulting {} in parallel...",
                        names.join(" and ")
                    ))
                    .await
                {
                    return;
                }
                let outcomes = join_all(targets.iter().map(|target| {
                    self.dispatch_one(
                        target,
                        &working_query,
                        &history,
                        &user_ctx,
                        provider_tag,
                        phase3,
                        &policy_ctx,
                        &sink,
                    )
                }))
                .await;
                match self
                    .fuse_outcomes(&working_query, outcomes, provider, &mut state, &sink)
                    .await
                {
                    Some(fused) => fused,
                    None => return,
                }
            }

            RoutingStrategy::Sequential(targets) => {
                let mut outcomes = Vec::with_capacity(targets.len());
                for target in &targets {
                    if !sink
                        .note(format!("Consulting {}...", target.agent))
                        .await
                    {
                        return;
                    }
                    // A blocked or failed response is recorded and the next
                    // agent still runs.
                    let outcome = self
                        .dispatch_one(
                            target,
                            &working_query,
                            &history,
                            &user_ctx,
                            provider_tag,
                            phase3,
                            &policy_ctx,
                            &sink,
                        )
                        .await;
                    outcomes.push(outcome);
                }
                match self
                    .fuse_outcomes(&working_query, outcomes, provider, &mut state, &sink)
                    .await
                {
                    Some(fused) => fused,
                    None => return,
                }
            }
        };

        // Validate/condense; a policy message from a blocked branch is
        // already final.
        let mut content = if blocked {
            content
        } else {
            self.validate(&working_query, content, provider, &mut state)
                .await
        };

        if language != "en" {
            if !sink.note("Translating the answer back...").await {
                return;
            }
            match self.translate(&content, "en", &language, provider).await {
                Ok((text, tokens)) => {
                    state.coordinator_tokens += tokens;
                    content = text;
                }
                Err(e) => {
                    log::warn!("response translation failed, returning English text: {}", e);
                }
            }
        }

        // Checkpoint 4 — final. Runs against the user's original prompt and
        // the fully processed response.
        let mut blocked = blocked;
        if phase3 {
            let started = Instant::now();
            let verdict = self
                .policy
                .analyze_prompt_and_response(&request.query, &content, &policy_ctx)
                .await;
            let record = make_checkpoint(4, "final", &verdict, started);
            state.checkpoints.push(record.clone());
            if !sink.emit(ThinkingEvent::Checkpoint(record)).await {
                return;
            }
            if !verdict.approved {
                content = verdict
                    .message
                    .unwrap_or_else(|| "The answer was withheld by the security policy.".into());
                blocked = true;
            } else if let Some(masked) = verdict.masked_response {
                content = masked;
            }
        }

        self.respond(
            &sink,
            &state,
            QueryResponseParts {
                content,
                agent_used,
                translated_query,
                declined: false,
                blocked,
            },
        )
        .await;
    }

    /// Dispatch one routed agent: checkpoint 2, the downstream call,
    /// checkpoint 3.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_one(
        &self,
        target: &RoutedAgent,
        working_query: &str,
        history: &[HistoryTurn],
        user_ctx: &UserContext,
        provider_tag: &str,
        phase3: bool,
        policy_ctx: &PolicyContext,
        sink: &ThinkingSink,
    ) -> BranchOutcome {
        let mut outcome = BranchOutcome {
            agent: target.agent.clone(),
            text: None,
            blocked: false,
            checkpoints: Vec::new(),
            agent_tokens: 0,
        };

        let Some(record) = self.registry.find_by_name(&target.agent) else {
            log::error!("dispatch target '{}' vanished from the registry", target.agent);
            return outcome;
        };

        let sub_query = if target.sub_query.trim().is_empty() {
            working_query
        } else {
            target.sub_query.as_str()
        };

        // Query portion: sub-query plus recent history. The identity tail is
        // appended after checkpoint 2 so masking can never clobber it.
        let mut payload = sub_query.to_string();
        if !history.is_empty() {
            payload.push_str("\n\n[Conversation history:\n");
            for turn in history {
                payload.push_str(&format!("{}: {}\n", turn.role, turn.content));
            }
            payload.push(']');
        }

        if phase3 {
            let (verdict, cp_record) = self
                .checkpoint_prompt(
                    2,
                    &format!("outbound:{}", record.name),
                    &payload,
                    policy_ctx,
                )
                .await;
            outcome.checkpoints.push(cp_record.clone());
            if !sink.emit(ThinkingEvent::Checkpoint(cp_record)).await {
                return outcome;
            }
            if !verdict.approved {
                outcome.blocked = true;
                outcome.text = Some(verdict.message.unwrap_or_else(|| {
                    format!(
                        "The request to {} was blocked by the security policy.",
                        record.name
                    )
                }));
                return outcome;
            }
            if let Some(masked) = verdict.masked_prompt {
                payload = masked;
            }
        }

        if let Some(tail) = user_ctx.identity_tail() {
            payload.push_str(&format!("\n[User context: {}]", tail));
        }

        let uri = format!(
            "{}://query?q={}&provider={}",
            uri_scheme(&record.name),
            urlencoding::encode(&payload),
            provider_tag,
        );

        let result = match self.transport.read_resource(&record, &uri).await {
            Ok(result) => result,
            Err(e) => {
                log::error!("downstream call to '{}' failed: {}", record.name, e);
                return outcome;
            }
        };

        let mut text = extract_resource_text(&result);
        outcome.agent_tokens += result_tokens(&result).unwrap_or_else(|| estimate_tokens(&text));

        if phase3 {
            let started = Instant::now();
            let verdict = self
                .policy
                .analyze_prompt_and_response(&payload, &text, policy_ctx)
                .await;
            let cp_record = make_checkpoint(
                3,
                &format!("inbound:{}", record.name),
                &verdict,
                started,
            );
            outcome.checkpoints.push(cp_record.clone());
            if !sink.emit(ThinkingEvent::Checkpoint(cp_record)).await {
                return outcome;
            }
            if !verdict.approved {
                outcome.blocked = true;
                outcome.text = Some(verdict.message.unwrap_or_else(|| {
                    format!(
                        "The response from {} was withheld by the security policy.",
                        record.name
                    )
                }));
                return outcome;
            }
            if let Some(masked) = verdict.masked_response {
                text = masked;
            }
        }

        outcome.text = Some(text);
        outcome
    }

    /// Merge fan-out outcomes into one answer (synthesis or fallback
    /// concatenation). Returns `None` when nothing survived and an error was
    /// already emitted.
    async fn fuse_outcomes(
        &self,
        working_query: &str,
        outcomes: Vec<BranchOutcome>,
        provider: Option<ProviderKind>,
        state: &mut QueryState,
        sink: &ThinkingSink,
    ) -> Option<(String, Option<String>, bool)> {
        for outcome in &outcomes {
            state.checkpoints.extend(outcome.checkpoints.clone());
            state.agent_tokens += outcome.agent_tokens;
        }

        let live: Vec<(&str, &str)> = outcomes
            .iter()
            .filter(|o| !o.blocked)
            .filter_map(|o| o.text.as_deref().map(|t| (o.agent.as_str(), t)))
            .collect();

        let agent_used = Some(
            outcomes
                .iter()
                .map(|o| o.agent.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        );

        if live.is_empty() {
            // Every branch was null or withheld. If at least one was
            // withheld, surface the policy message rather than a hard error.
            if let Some(blocked_text) = outcomes
                .iter()
                .find(|o| o.blocked)
                .and_then(|o| o.text.clone())
            {
                return Some((blocked_text, agent_used, true));
            }
            self.fail(sink, "All selected agents failed to respond.").await;
            return None;
        }

        if live.len() == 1 {
            return Some((live[0].1.to_string(), agent_used, false));
        }

        if !sink.note("Synthesizing the answers...").await {
            return None;
        }
        let content = self.synthesize(working_query, &live, provider, state).await;
        Some((content, agent_used, false))
    }

    /// Fuse several sub-responses with a moderate-temperature LLM call;
    /// degrade to bold-labelled concatenation when the call fails.
    async fn synthesize(
        &self,
        query: &str,
        live: &[(&str, &str)],
        provider: Option<ProviderKind>,
        state: &mut QueryState,
    ) -> String {
        let mut prompt = format!(
            "Fuse the following specialist answers into one coherent response \
             to the user's question. Keep every factual detail; do not mention \
             the specialists or the fusion process.\n\nQuestion: {}\n\n",
            query
        );
        for (agent, text) in live {
            prompt.push_str(&format!("Answer from {}:\n{}\n\n", agent, text));
        }

        let opts = GenerationOptions {
            system: None,
            temperature: 0.3,
            max_tokens: 1024,
            model: None,
        };
        match self.adapter.generate(&prompt, &opts, provider).await {
            Ok(generation) => {
                state.coordinator_tokens += tokens_or_estimate(&generation, &prompt);
                generation.text.trim().to_string()
            }
            Err(e) => {
                log::warn!("synthesis failed, falling back to concatenation: {}", e);
                live.iter()
                    .map(|(agent, text)| format!("**{}**:\n{}", agent, text))
                    .collect::<Vec<_>>()
                    .join("\n\n")
            }
        }
    }

    /// Ask the model to confirm relevance and condense. Tolerant of noisy
    /// output; any failure passes the content through unchanged.
    async fn validate(
        &self,
        query: &str,
        content: String,
        provider: Option<ProviderKind>,
        state: &mut QueryState,
    ) -> String {
        let prompt = format!(
            "Assess whether the response below answers the question, and \
             extract the key information. Respond with ONLY a JSON object:\n\
             {{\"isRelevant\": bool, \"keyInformation\": \"<string>\", \
             \"confidence\": <0..1>, \"reasoning\": \"<string>\"}}\n\n\
             Question: {}\n\nResponse:\n{}",
            query, content
        );
        let opts = GenerationOptions {
            system: Some("You output strictly one JSON object.".to_string()),
            temperature: 0.0,
            max_tokens: 600,
            model: None,
        };
        let generation = match self.adapter.generate(&prompt, &opts, provider).await {
            Ok(g) => g,
            Err(e) => {
                log::warn!("validation call failed, passing response through: {}", e);
                return content;
            }
        };
        state.coordinator_tokens += tokens_or_estimate(&generation, &prompt);

        let Some(parsed) = parse_loose(&generation.text) else {
            return content;
        };
        let relevant = parsed
            .get("isRelevant")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let key_information = parsed
            .get("keyInformation")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if relevant && !key_information.trim().is_empty() {
            key_information.to_string()
        } else {
            content
        }
    }

    /// Translate text between languages. Returns the translation and its
    /// token cost; `from == to` is a no-op that costs nothing.
    async fn translate(
        &self,
        text: &str,
        from: &str,
        to: &str,
        provider: Option<ProviderKind>,
    ) -> Result<(String, usize), ProviderError> {
        if from.eq_ignore_ascii_case(to) {
            return Ok((text.to_string(), 0));
        }
        let opts = GenerationOptions {
            system: Some(format!(
                "Translate the user's text from '{}' to '{}'. Output only the \
                 translation, nothing else.",
                from, to
            )),
            temperature: 0.1,
            max_tokens: (text.len() / 2).clamp(256, 2048),
            model: self.config.translation_model.clone(),
        };
        let generation = self.adapter.generate(text, &opts, provider).await?;
        let tokens = tokens_or_estimate(&generation, text);
        Ok((generation.text.trim().to_string(), tokens))
    }

    /// Run a prompt-only checkpoint and build its record.
    async fn checkpoint_prompt(
        &self,
        number: u8,
        label: &str,
        text: &str,
        ctx: &PolicyContext,
    ) -> (PolicyVerdict, CheckpointRecord) {
        let started = Instant::now();
        let verdict = self.policy.analyze_prompt(text, ctx).await;
        let record = make_checkpoint(number, label, &verdict, started);
        (verdict, record)
    }

    async fn respond(&self, sink: &ThinkingSink, state: &QueryState, parts: QueryResponseParts) {
        let response = QueryResponse {
            content: parts.content,
            success: true,
            agent_used: parts.agent_used,
            translated_query: parts.translated_query,
            declined: parts.declined,
            blocked: parts.blocked,
            metadata: state.metadata(),
        };
        if sink.emit(ThinkingEvent::Response(response)).await {
            sink.emit(ThinkingEvent::Done).await;
        }
    }

    async fn fail(&self, sink: &ThinkingSink, message: impl Into<String>) {
        if sink
            .emit(ThinkingEvent::Error {
                message: message.into(),
            })
            .await
        {
            sink.emit(ThinkingEvent::Done).await;
        }
    }
}

struct QueryResponseParts {
    content: String,
    agent_used: Option<String>,
    translated_query: Option<String>,
    declined: bool,
    blocked: bool,
}

fn make_checkpoint(
    number: u8,
    label: &str,
    verdict: &PolicyVerdict,
    started: Instant,
) -> CheckpointRecord {
    CheckpointRecord {
        number,
        label: label.to_string(),
        status: if verdict.approved {
            CheckpointStatus::Approved
        } else {
            CheckpointStatus::Blocked
        },
        latency_ms: started.elapsed().as_millis() as u64,
        input: verdict.raw_request.clone(),
        output: verdict.raw_response.clone(),
    }
}

/// First-person pronoun check used by the personal-query guard.
pub fn contains_first_person(query: &str) -> bool {
    const PRONOUNS: [&str; 9] = [
        "i", "me", "my", "mine", "myself", "i'm", "i've", "i'd", "i'll",
    ];
    query
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .any(|word| PRONOUNS.contains(&word))
}

/// Resource-URI scheme for an agent: lowercased name with whitespace
/// collapsed to dashes.
fn uri_scheme(agent_name: &str) -> String {
    agent_name
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Pull the display text out of a `resources/read` result.
///
/// The MCP shape is `{"contents": [{"uri": …, "text": …}]}`; some agents
/// flatten to `{"text": …}` or return a bare string.
pub fn extract_resource_text(result: &Value) -> String {
    if let Some(text) = result
        .get("contents")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("text"))
        .and_then(|v| v.as_str())
    {
        return text.to_string();
    }
    if let Some(text) = result.get("text").and_then(|v| v.as_str()) {
        return text.to_string();
    }
    if let Some(text) = result.as_str() {
        return text.to_string();
    }
    result.to_string()
}

/// Token usage a downstream agent may attach to its result metadata.
fn result_tokens(result: &Value) -> Option<usize> {
    result
        .get("metadata")
        .and_then(|m| m.get("tokensUsed"))
        .or_else(|| result.get("tokensUsed"))
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
}

fn tokens_or_estimate(generation: &Generation, prompt: &str) -> usize {
    let reported = generation.total_tokens();
    if reported > 0 {
        reported
    } else {
        estimate_tokens(prompt) + estimate_tokens(&generation.text)
    }
}
