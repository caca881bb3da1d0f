//! In-memory registry of downstream specialist agents.
//!
//! The registry is deliberately dumb about semantics: it tracks identity,
//! capabilities, health, and advertised LLM providers, and answers cheap
//! lookups. All semantic matching between a user query and an agent is the
//! Routing Engine's job — [`find_candidates`](AgentRegistry::find_candidates)
//! returns every healthy agent and lets the LLM choose.
//!
//! Reads dominate writes by orders of magnitude (every query iterates the
//! agent set; registrations are rare), so the whole state sits behind one
//! `std::sync::RwLock` with no async in the critical sections.
//!
//! # Example
//!
//! ```rust
//! use gatewayllm::registry::{AgentRegistration, AgentRegistry};
//!
//! let registry = AgentRegistry::new();
//! registry
//!     .register(AgentRegistration {
//!         agent_id: "hr-agent".to_string(),
//!         name: "HR".to_string(),
//!         description: "Vacation, payroll, and benefits".to_string(),
//!         url: "http://hr-agent:8080".to_string(),
//!         capabilities: vec!["vacation".to_string(), "payroll".to_string()],
//!         llm_providers: vec![],
//!     })
//!     .unwrap();
//!
//! assert_eq!(registry.find_candidates().len(), 1);
//! assert!(registry.find_by_name("hr").is_some());
//!
//! registry.update_health("hr-agent", false);
//! // unhealthy agents stay discoverable but are filtered before dispatch
//! assert!(registry.get("hr-agent").is_some());
//! ```

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gatewayllm::events::{GatewayEvent, GatewayEventHandler};

/// Provider metadata an agent advertises at registration.
///
/// Only `id` and `name` are interpreted; everything else the agent sends
/// (model lists, endpoints, …) is carried opaquely for the catalog endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Registration payload accepted from `POST /api/agents/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegistration {
    pub agent_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(rename = "LLMProviders", default)]
    pub llm_providers: Vec<LlmProviderInfo>,
}

/// A registered agent as tracked by the gateway.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    /// Opaque unique id, chosen by the agent.
    pub agent_id: String,
    /// Display name; unique across the registry (case-insensitive) because
    /// the router selects agents by name.
    pub name: String,
    pub description: String,
    /// Base URL; the JSON-RPC surface hangs at `{base_url}/mcp`.
    pub base_url: String,
    /// Ordered capability tags as declared.
    pub capabilities: Vec<String>,
    pub llm_providers: Vec<LlmProviderInfo>,
    /// Probe-maintained health flag. Unhealthy agents stay discoverable but
    /// are never dispatch targets.
    pub healthy: bool,
    pub last_seen: DateTime<Utc>,
}

/// Registry mutation failures.
#[derive(Debug, Clone)]
pub enum RegistryError {
    /// Another agent already owns this display name.
    DuplicateName { name: String, existing_id: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateName { name, existing_id } => write!(
                f,
                "display name '{}' is already registered by agent '{}'",
                name, existing_id
            ),
        }
    }
}

impl Error for RegistryError {}

#[derive(Default)]
struct Inner {
    /// Primary map, keyed by agent id.
    agents: HashMap<String, AgentRecord>,
    /// Registration order; drives candidate ordering and the first-registered
    /// fallback.
    order: Vec<String>,
    /// capability tag → ids of agents declaring it. Kept as the exact inverse
    /// of the per-agent capability lists across every mutation.
    capability_index: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn remove_from_index(&mut self, record: &AgentRecord) {
        for capability in &record.capabilities {
            if let Some(ids) = self.capability_index.get_mut(capability) {
                ids.remove(&record.agent_id);
                if ids.is_empty() {
                    self.capability_index.remove(capability);
                }
            }
        }
    }

    fn add_to_index(&mut self, record: &AgentRecord) {
        for capability in &record.capabilities {
            self.capability_index
                .entry(capability.clone())
                .or_default()
                .insert(record.agent_id.clone());
        }
    }
}

/// Thread-safe agent registry.
pub struct AgentRegistry {
    inner: RwLock<Inner>,
    handler: Option<Arc<dyn GatewayEventHandler>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        AgentRegistry {
            inner: RwLock::new(Inner::default()),
            handler: None,
        }
    }

    /// Attach a lifecycle event handler (builder pattern).
    pub fn with_event_handler(mut self, handler: Arc<dyn GatewayEventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: GatewayEvent) {
        if let Some(handler) = &self.handler {
            handler.on_event(&event);
        }
    }

    /// Insert or replace an agent.
    ///
    /// Re-registering an existing `agent_id` replaces the record wholesale
    /// and rebuilds its slice of the capability index. A display name held by
    /// a *different* agent is rejected — name-based routing would otherwise
    /// be ambiguous.
    pub fn register(&self, registration: AgentRegistration) -> Result<(), RegistryError> {
        let record = AgentRecord {
            agent_id: registration.agent_id,
            name: registration.name,
            description: registration.description,
            base_url: registration.url.trim_end_matches('/').to_string(),
            capabilities: registration.capabilities,
            llm_providers: registration.llm_providers,
            healthy: true,
            last_seen: Utc::now(),
        };

        {
            let mut inner = self.write();

            if let Some(existing) = inner.agents.values().find(|a| {
                a.name.eq_ignore_ascii_case(&record.name) && a.agent_id != record.agent_id
            }) {
                return Err(RegistryError::DuplicateName {
                    name: record.name.clone(),
                    existing_id: existing.agent_id.clone(),
                });
            }

            if let Some(previous) = inner.agents.remove(&record.agent_id) {
                inner.remove_from_index(&previous);
            } else {
                inner.order.push(record.agent_id.clone());
            }
            inner.add_to_index(&record);
            inner.agents.insert(record.agent_id.clone(), record.clone());
        }

        self.emit(GatewayEvent::AgentRegistered {
            agent_id: record.agent_id,
            name: record.name,
            capabilities: record.capabilities,
        });
        Ok(())
    }

    /// Remove an agent from the primary map and every capability set.
    /// Returns `false` when the id was unknown.
    pub fn unregister(&self, agent_id: &str) -> bool {
        let removed = {
            let mut inner = self.write();
            match inner.agents.remove(agent_id) {
                Some(record) => {
                    inner.remove_from_index(&record);
                    inner.order.retain(|id| id != agent_id);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.emit(GatewayEvent::AgentUnregistered {
                agent_id: agent_id.to_string(),
            });
        }
        removed
    }

    /// Mutate an agent's health flag and refresh its last-seen timestamp.
    /// Returns `false` for unknown ids.
    pub fn update_health(&self, agent_id: &str, healthy: bool) -> bool {
        let changed = {
            let mut inner = self.write();
            match inner.agents.get_mut(agent_id) {
                Some(record) => {
                    let transition = record.healthy != healthy;
                    record.healthy = healthy;
                    record.last_seen = Utc::now();
                    transition
                }
                None => return false,
            }
        };
        if changed {
            self.emit(GatewayEvent::AgentHealthChanged {
                agent_id: agent_id.to_string(),
                healthy,
            });
        }
        true
    }

    /// Record a heartbeat: marks the agent healthy and seen now.
    pub fn heartbeat(&self, agent_id: &str) -> bool {
        self.update_health(agent_id, true)
    }

    /// Candidates for routing: every healthy agent, in registration order.
    ///
    /// When none are healthy, the documented default applies: an agent named
    /// `general` if present, else the first registered agent, else nothing.
    /// Callers that require live targets must still filter on `healthy`.
    pub fn find_candidates(&self) -> Vec<AgentRecord> {
        let inner = self.read();
        let healthy: Vec<AgentRecord> = inner
            .order
            .iter()
            .filter_map(|id| inner.agents.get(id))
            .filter(|a| a.healthy)
            .cloned()
            .collect();
        if !healthy.is_empty() {
            return healthy;
        }

        let fallback = inner
            .agents
            .values()
            .find(|a| a.name.eq_ignore_ascii_case("general"))
            .or_else(|| inner.order.first().and_then(|id| inner.agents.get(id)));
        fallback.cloned().into_iter().collect()
    }

    /// Case-insensitive exact match on display name.
    pub fn find_by_name(&self, name: &str) -> Option<AgentRecord> {
        let inner = self.read();
        inner
            .agents
            .values()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Lookup by id; unhealthy agents are still returned.
    pub fn get(&self, agent_id: &str) -> Option<AgentRecord> {
        self.read().agents.get(agent_id).cloned()
    }

    /// Agents declaring a capability tag, in registration order.
    pub fn find_by_capability(&self, capability: &str) -> Vec<AgentRecord> {
        let inner = self.read();
        let Some(ids) = inner.capability_index.get(capability) else {
            return Vec::new();
        };
        inner
            .order
            .iter()
            .filter(|id| ids.contains(*id))
            .filter_map(|id| inner.agents.get(id))
            .cloned()
            .collect()
    }

    /// Union of provider metadata across all agents, deduplicated by
    /// provider id; the first registration wins.
    pub fn advertised_providers(&self) -> Vec<LlmProviderInfo> {
        let inner = self.read();
        let mut seen: HashSet<String> = HashSet::new();
        let mut providers = Vec::new();
        for id in &inner.order {
            let Some(record) = inner.agents.get(id) else {
                continue;
            };
            for provider in &record.llm_providers {
                if seen.insert(provider.id.clone()) {
                    providers.push(provider.clone());
                }
            }
        }
        providers
    }

    /// Every record, in registration order.
    pub fn all(&self) -> Vec<AgentRecord> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.agents.get(id))
            .cloned()
            .collect()
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.read().agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().agents.is_empty()
    }

    /// Capability tag → declaring-agent count, for the agents listing.
    pub fn capability_summary(&self) -> HashMap<String, usize> {
        let inner = self.read();
        inner
            .capability_index
            .iter()
            .map(|(tag, ids)| (tag.clone(), ids.len()))
            .collect()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
