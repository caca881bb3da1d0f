//! Environment-driven configuration for the gateway.
//!
//! All tunables are read once at startup into a [`GatewayConfig`] and shared
//! behind an `Arc`. There is no config-file parsing on purpose — deployment
//! environments (docker-compose, k8s) inject everything through the process
//! environment, and keeping the struct explicit makes the knobs greppable.
//!
//! # Provider credentials
//!
//! The LLM adapter discovers providers from two env families:
//!
//! - `LITELLM_BASE_URL` / `LITELLM_API_KEY` — a LiteLLM front that exposes
//!   every provider behind one OpenAI-compatible endpoint; when set, all six
//!   provider tags route through it.
//! - Per-provider keys (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`,
//!   `AZURE_API_KEY` + `AZURE_RESOURCE_NAME`, `AWS_REGION` + `BEDROCK_MODEL`,
//!   `GOOGLE_APPLICATION_CREDENTIALS`, `OLLAMA_SERVER_URL`).
//!
//! # Example
//!
//! ```rust
//! use gatewayllm::config::GatewayConfig;
//!
//! let cfg = GatewayConfig::from_env();
//! println!("listening on port {}", cfg.port);
//! ```

use std::env;
use std::time::Duration;

/// How many conversation turns are threaded into routing and dispatch.
const DEFAULT_HISTORY_WINDOW: usize = 6;

/// Default downstream request timeout. Downstream agents are themselves
/// LLM-backed and can legitimately take many minutes to answer.
const DEFAULT_DOWNSTREAM_TIMEOUT_SECS: u64 = 1200;

/// Runtime configuration assembled from the process environment.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// TCP port the front door binds to (`MCP_GATEWAY_PORT`, default 3001).
    pub port: u16,

    /// LiteLLM front base URL; when present all provider tags route here.
    pub litellm_base_url: Option<String>,
    /// API key for the LiteLLM front.
    pub litellm_api_key: Option<String>,

    /// `OPENAI_API_KEY`.
    pub openai_api_key: Option<String>,
    /// `ANTHROPIC_API_KEY`.
    pub anthropic_api_key: Option<String>,
    /// `AZURE_API_KEY`; only usable together with `azure_resource_name`.
    pub azure_api_key: Option<String>,
    /// `AZURE_RESOURCE_NAME`, e.g. `my-corp-openai`.
    pub azure_resource_name: Option<String>,
    /// `AWS_REGION` for the Bedrock runtime endpoint.
    pub aws_region: Option<String>,
    /// `BEDROCK_MODEL`, e.g. `anthropic.claude-3-5-sonnet-20241022-v2:0`.
    pub bedrock_model: Option<String>,
    /// `AWS_BEARER_TOKEN_BEDROCK` — Bedrock API-key style bearer auth.
    pub bedrock_api_token: Option<String>,
    /// `GOOGLE_APPLICATION_CREDENTIALS` path; marks the `gcp` tag as present.
    pub google_credentials: Option<String>,
    /// `OLLAMA_SERVER_URL`, e.g. `http://localhost:11434`.
    pub ollama_server_url: Option<String>,

    /// Model used for routing, synthesis, and validation (`COORDINATOR_MODEL`).
    pub coordinator_model: Option<String>,
    /// Model used for query/response translation (`TRANSLATION_MODEL`).
    pub translation_model: Option<String>,

    /// Policy engine base URL (`PRISMA_AIRS_API_URL`). Unset disables the
    /// security checkpoints (they short-circuit to approval).
    pub policy_api_url: Option<String>,
    /// Policy engine token (`PRISMA_AIRS_API_TOKEN`).
    pub policy_api_token: Option<String>,
    /// Policy profile id (`PRISMA_AIRS_PROFILE_ID`).
    pub policy_profile_id: Option<String>,

    /// Per-call timeout for downstream JSON-RPC requests
    /// (`MCP_REQUEST_TIMEOUT_SECS`, default 20 minutes).
    pub downstream_timeout: Duration,
    /// Interval between agent health sweeps (default 30 s).
    pub health_probe_interval: Duration,
    /// Timeout of a single `GET /health` probe (default 5 s).
    pub health_probe_timeout: Duration,
    /// Downstream sessions idle longer than this are pruned (default 30 min).
    pub session_idle_max: Duration,
    /// Interval of the idle-session pruning task (default 5 min).
    pub session_prune_interval: Duration,

    /// Number of recent conversation turns carried into prompts.
    pub history_window: usize,
}

impl GatewayConfig {
    /// Read every documented variable from the process environment.
    ///
    /// Malformed numeric values fall back to their defaults rather than
    /// aborting; a missing provider family is only fatal once the LLM
    /// adapter finds no usable provider at all.
    pub fn from_env() -> Self {
        GatewayConfig {
            port: env_parse("MCP_GATEWAY_PORT", 3001),
            litellm_base_url: env_nonempty("LITELLM_BASE_URL"),
            litellm_api_key: env_nonempty("LITELLM_API_KEY"),
            openai_api_key: env_nonempty("OPENAI_API_KEY"),
            anthropic_api_key: env_nonempty("ANTHROPIC_API_KEY"),
            azure_api_key: env_nonempty("AZURE_API_KEY"),
            azure_resource_name: env_nonempty("AZURE_RESOURCE_NAME"),
            aws_region: env_nonempty("AWS_REGION"),
            bedrock_model: env_nonempty("BEDROCK_MODEL"),
            bedrock_api_token: env_nonempty("AWS_BEARER_TOKEN_BEDROCK"),
            google_credentials: env_nonempty("GOOGLE_APPLICATION_CREDENTIALS"),
            ollama_server_url: env_nonempty("OLLAMA_SERVER_URL"),
            coordinator_model: env_nonempty("COORDINATOR_MODEL"),
            translation_model: env_nonempty("TRANSLATION_MODEL"),
            policy_api_url: env_nonempty("PRISMA_AIRS_API_URL"),
            policy_api_token: env_nonempty("PRISMA_AIRS_API_TOKEN"),
            policy_profile_id: env_nonempty("PRISMA_AIRS_PROFILE_ID"),
            downstream_timeout: Duration::from_secs(env_parse(
                "MCP_REQUEST_TIMEOUT_SECS",
                DEFAULT_DOWNSTREAM_TIMEOUT_SECS,
            )),
            health_probe_interval: Duration::from_secs(env_parse(
                "HEALTH_PROBE_INTERVAL_SECS",
                30,
            )),
            health_probe_timeout: Duration::from_secs(env_parse("HEALTH_PROBE_TIMEOUT_SECS", 5)),
            session_idle_max: Duration::from_secs(env_parse("SESSION_IDLE_MAX_SECS", 1800)),
            session_prune_interval: Duration::from_secs(env_parse(
                "SESSION_PRUNE_INTERVAL_SECS",
                300,
            )),
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

impl Default for GatewayConfig {
    /// A config with every credential unset and the documented default
    /// timings. Useful in tests that wire mock seams directly.
    fn default() -> Self {
        GatewayConfig {
            port: 3001,
            litellm_base_url: None,
            litellm_api_key: None,
            openai_api_key: None,
            anthropic_api_key: None,
            azure_api_key: None,
            azure_resource_name: None,
            aws_region: None,
            bedrock_model: None,
            bedrock_api_token: None,
            google_credentials: None,
            ollama_server_url: None,
            coordinator_model: None,
            translation_model: None,
            policy_api_url: None,
            policy_api_token: None,
            policy_profile_id: None,
            downstream_timeout: Duration::from_secs(DEFAULT_DOWNSTREAM_TIMEOUT_SECS),
            health_probe_interval: Duration::from_secs(30),
            health_probe_timeout: Duration::from_secs(5),
            session_idle_max: Duration::from_secs(1800),
            session_prune_interval: Duration::from_secs(300),
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

/// Read an env var, treating empty strings as unset.
fn env_nonempty(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Read and parse an env var, falling back to `default` when absent or malformed.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}
