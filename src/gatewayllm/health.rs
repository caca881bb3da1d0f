//! Background lifecycle tasks: agent health probes and session pruning.
//!
//! A periodic sweep issues `GET /health` against every registered agent with
//! a small timeout and mutates the health flag accordingly; a second task
//! prunes downstream sessions that have sat idle past the configured
//! maximum. Both run until their join handles are aborted at shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::gatewayllm::clients::common::get_shared_http_client;
use crate::gatewayllm::config::GatewayConfig;
use crate::gatewayllm::mcp_session::McpSessionManager;
use crate::gatewayllm::registry::AgentRegistry;

/// Spawn the probe and prune loops. Abort the returned handles to stop them.
pub fn spawn_background_tasks(
    registry: Arc<AgentRegistry>,
    sessions: Arc<McpSessionManager>,
    config: Arc<GatewayConfig>,
) -> Vec<JoinHandle<()>> {
    let probe = {
        let registry = registry.clone();
        let config = config.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.health_probe_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                sweep(&registry, config.health_probe_timeout).await;
            }
        })
    };

    let prune = tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.session_prune_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let pruned = sessions.prune_idle(config.session_idle_max).await;
            if pruned > 0 {
                log::info!("pruned {} idle downstream sessions", pruned);
            }
        }
    });

    vec![probe, prune]
}

/// Probe every registered agent once and update its health flag.
pub async fn sweep(registry: &AgentRegistry, probe_timeout: Duration) {
    for agent in registry.all() {
        let healthy = probe_agent(&agent.base_url, probe_timeout).await;
        registry.update_health(&agent.agent_id, healthy);
        if !healthy {
            log::debug!("health probe failed for agent {}", agent.agent_id);
        }
    }
}

/// One `GET {base_url}/health` round-trip under a deadline.
async fn probe_agent(base_url: &str, probe_timeout: Duration) -> bool {
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    let request = get_shared_http_client().get(&url).send();
    match tokio::time::timeout(probe_timeout, request).await {
        Ok(Ok(response)) => response.status().is_success(),
        _ => false,
    }
}
