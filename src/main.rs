//! The `gateway-server` binary: wire the pieces together and serve.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gatewayllm::config::GatewayConfig;
use gatewayllm::coordinator::Coordinator;
use gatewayllm::events::LogEventHandler;
use gatewayllm::health::spawn_background_tasks;
use gatewayllm::llm_adapter::LlmAdapter;
use gatewayllm::mcp_session::McpSessionManager;
use gatewayllm::policy::PolicyClient;
use gatewayllm::registry::AgentRegistry;
use gatewayllm::server::{run_server, AppState, InFlightQueries};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("LOG_LEVEL", "info"))
        .init();

    let config = Arc::new(GatewayConfig::from_env());

    let adapter = Arc::new(LlmAdapter::discover_from_env(&config));
    if adapter.is_empty() {
        log::error!(
            "no LLM providers configured — set LITELLM_BASE_URL or a per-provider key \
             (OPENAI_API_KEY, ANTHROPIC_API_KEY, ...)"
        );
        std::process::exit(1);
    }

    let policy = Arc::new(PolicyClient::from_config(&config));
    if policy.is_configured() {
        log::info!("content-security policy engine configured; phase3 checkpoints active");
    } else {
        log::warn!("policy engine not configured; phase3 checkpoints will pass through");
    }

    let registry = Arc::new(AgentRegistry::new().with_event_handler(Arc::new(LogEventHandler)));
    let sessions = Arc::new(McpSessionManager::new(
        registry.clone(),
        config.downstream_timeout,
    ));
    let coordinator = Arc::new(Coordinator::new(
        adapter.clone(),
        policy,
        registry.clone(),
        sessions.clone(),
        config.clone(),
    ));

    let background = spawn_background_tasks(registry.clone(), sessions.clone(), config.clone());

    let draining = Arc::new(AtomicBool::new(false));
    let in_flight = Arc::new(InFlightQueries::new());
    let state = AppState {
        coordinator,
        registry,
        adapter,
        sessions: sessions.clone(),
        config,
        draining: draining.clone(),
        in_flight: in_flight.clone(),
    };

    let shutdown = async move {
        shutdown_signal().await;
        log::info!("shutdown signal received, draining");
        draining.store(true, Ordering::SeqCst);
        // Cut pending orchestrations (and their downstream calls) now;
        // graceful shutdown alone would let them run to completion.
        in_flight.abort_all();
    };

    run_server(state, shutdown).await?;

    for task in background {
        task.abort();
    }
    sessions.clear().await;
    log::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
