//! LLM-driven routing across the healthy agent pool.
//!
//! The router builds a structured profile of every candidate agent, asks the
//! coordinator model to pick one or more of them (emitting *only* JSON), and
//! turns the reply into a [`RoutingStrategy`]. Parsing is defensive —
//! code fences, stray prose, and `thinking`-field payloads are all
//! tolerated — but an output that still fails to parse, or that names an
//! agent the registry does not know, is a hard error. The router never
//! silently substitutes its own choice for the model's.

use std::error::Error;
use std::fmt;

use crate::gatewayllm::coordinator::HistoryTurn;
use crate::gatewayllm::json_salvage::parse_loose;
use crate::gatewayllm::llm_adapter::LlmAdapter;
use crate::gatewayllm::provider::{
    estimate_tokens, GenerationOptions, ProviderError, ProviderKind,
};
use crate::gatewayllm::registry::AgentRecord;

/// Completion budget for the routing call; the expected JSON is tiny.
const ROUTING_MAX_TOKENS: usize = 200;

/// One agent picked by the model, with the sub-query it should answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedAgent {
    /// Display name, as registered (canonical casing restored after
    /// validation).
    pub agent: String,
    /// The portion of the user's query this agent should handle.
    pub sub_query: String,
}

/// How the coordinator should fan out a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingStrategy {
    /// One agent answers the whole query.
    Single(RoutedAgent),
    /// Independent sub-queries dispatched concurrently.
    Parallel(Vec<RoutedAgent>),
    /// Dependent sub-queries dispatched in order.
    Sequential(Vec<RoutedAgent>),
    /// The model found no applicable agent; `reason` goes to the user.
    Declined { reason: String },
}

/// Routing failures. None of these are retried.
#[derive(Debug)]
pub enum RoutingError {
    /// The routing LLM call itself failed.
    Provider(ProviderError),
    /// The model's output could not be coerced into the JSON contract.
    Unparseable { raw: String },
    /// The model named an agent outside the candidate set (unknown, or
    /// known but unhealthy).
    UnknownAgent { name: String, known: Vec<String> },
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingError::Provider(e) => write!(f, "routing model call failed: {}", e),
            RoutingError::Unparseable { raw } => {
                write!(f, "routing model returned unparseable output: {:.200}", raw)
            }
            RoutingError::UnknownAgent { name, known } => write!(
                f,
                "routing model selected unknown agent '{}' (registered: {})",
                name,
                known.join(", ")
            ),
        }
    }
}

impl Error for RoutingError {}

/// Render the candidate pool as the profile block fed to the model.
pub fn build_agent_profiles(candidates: &[AgentRecord]) -> String {
    let mut out = String::new();
    for agent in candidates {
        out.push_str(&format!("### {}\n", agent.name));
        if !agent.description.is_empty() {
            out.push_str(&format!("{}\n", agent.description));
        }
        for capability in &agent.capabilities {
            out.push_str(&format!("- {}\n", capability));
        }
        out.push('\n');
    }
    out
}

fn build_routing_prompt(
    query: &str,
    candidates: &[AgentRecord],
    history: &[HistoryTurn],
) -> String {
    let mut prompt = String::from(
        "You are the routing brain of a multi-agent gateway. Decide which of \
         the following specialist agents should handle the user's query, and \
         what sub-query each should receive.\n\n## Agents\n\n",
    );
    prompt.push_str(&build_agent_profiles(candidates));

    if !history.is_empty() {
        prompt.push_str("## Recent conversation\n\n");
        for turn in history {
            prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("## User query\n\n{}\n\n", query));
    prompt.push_str(
        "## Output\n\
         Respond with ONLY a JSON object, no prose, no code fences:\n\
         {\"agents\": [{\"agent\": \"<name>\", \"subQuery\": \"<text>\"}], \
         \"mode\": \"parallel\"|\"sequential\", \"reasoning\": \"<why>\"}\n\
         Use an empty agents array if no agent is applicable. Use mode \
         \"sequential\" only when a later sub-query depends on an earlier \
         answer.",
    );
    prompt
}

/// Pick a routing strategy for `query` across `candidates`.
///
/// `candidates` must already be the healthy pool — validation rejects any
/// model-selected name that is not in it. The second element of the result
/// is the token cost of the routing call (provider-reported, or a text
/// estimate when unreported), charged to the coordinator's counters.
pub async fn route(
    adapter: &LlmAdapter,
    query: &str,
    candidates: &[AgentRecord],
    history: &[HistoryTurn],
    provider: Option<ProviderKind>,
) -> Result<(RoutingStrategy, usize), RoutingError> {
    let prompt = build_routing_prompt(query, candidates, history);
    let opts = GenerationOptions {
        system: Some(
            "You output strictly one JSON object and nothing else. Never add \
             commentary, markdown, or code fences."
                .to_string(),
        ),
        temperature: 0.0,
        max_tokens: ROUTING_MAX_TOKENS,
        model: None,
    };

    let generation = adapter
        .generate(&prompt, &opts, provider)
        .await
        .map_err(RoutingError::Provider)?;

    let tokens = if generation.total_tokens() > 0 {
        generation.total_tokens()
    } else {
        estimate_tokens(&prompt) + estimate_tokens(&generation.text)
    };

    let strategy = parse_strategy(&generation.text, candidates)?;
    Ok((strategy, tokens))
}

/// Turn the model's raw reply into a validated [`RoutingStrategy`].
pub fn parse_strategy(
    raw: &str,
    candidates: &[AgentRecord],
) -> Result<RoutingStrategy, RoutingError> {
    let parsed = parse_loose(raw).ok_or_else(|| RoutingError::Unparseable {
        raw: raw.to_string(),
    })?;

    let reasoning = parsed
        .get("reasoning")
        .and_then(|v| v.as_str())
        .unwrap_or("No applicable agent for this query.")
        .to_string();

    let agents_value = parsed.get("agents").and_then(|v| v.as_array());
    let Some(agents_value) = agents_value else {
        return Err(RoutingError::Unparseable {
            raw: raw.to_string(),
        });
    };

    if agents_value.is_empty() {
        return Ok(RoutingStrategy::Declined { reason: reasoning });
    }

    let mut routed = Vec::with_capacity(agents_value.len());
    for entry in agents_value {
        let name = entry
            .get("agent")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RoutingError::Unparseable {
                raw: raw.to_string(),
            })?;

        // Validate against the healthy candidate pool; restore canonical
        // casing from the registry record.
        let record = candidates
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                let known: Vec<String> = candidates.iter().map(|a| a.name.clone()).collect();
                log::error!(
                    "routing model selected '{}' but registered agents are [{}]",
                    name,
                    known.join(", ")
                );
                RoutingError::UnknownAgent {
                    name: name.to_string(),
                    known,
                }
            })?;

        let sub_query = entry
            .get("subQuery")
            .or_else(|| entry.get("sub_query"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        routed.push(RoutedAgent {
            agent: record.name.clone(),
            sub_query,
        });
    }

    if routed.len() == 1 {
        let only = routed.remove(0);
        return Ok(RoutingStrategy::Single(only));
    }

    let sequential = parsed
        .get("mode")
        .and_then(|v| v.as_str())
        .map(|m| m.eq_ignore_ascii_case("sequential"))
        .unwrap_or(false);

    if sequential {
        Ok(RoutingStrategy::Sequential(routed))
    } else {
        Ok(RoutingStrategy::Parallel(routed))
    }
}
