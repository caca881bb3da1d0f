//! The uniform LLM surface consumed by the coordinator.
//!
//! An [`LlmAdapter`] owns one [`ProviderClient`](crate::provider::ProviderClient)
//! per discovered provider tag and exposes a single
//! [`generate`](LlmAdapter::generate) that picks the requested provider or
//! falls back to the first configured one.
//!
//! # Discovery
//!
//! [`LlmAdapter::discover_from_env`] inspects the [`GatewayConfig`] once at
//! startup:
//!
//! - When `LITELLM_BASE_URL` is set, all six tags are registered against the
//!   LiteLLM front (one OpenAI-compatible endpoint fronting every vendor).
//! - Otherwise each per-provider credential family yields a native client.
//!
//! No retries happen at this layer; failures surface as
//! [`ProviderError`](crate::provider::ProviderError) and callers degrade to
//! their documented fallbacks.
//!
//! # Example
//!
//! ```rust,no_run
//! use gatewayllm::config::GatewayConfig;
//! use gatewayllm::llm_adapter::LlmAdapter;
//! use gatewayllm::provider::GenerationOptions;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::from_env();
//! let adapter = LlmAdapter::discover_from_env(&config);
//!
//! let generation = adapter
//!     .generate(
//!         "Summarize the ticket backlog.",
//!         &GenerationOptions::default(),
//!         adapter.resolve(Some("anthropic")),
//!     )
//!     .await?;
//! println!("{}", generation.text);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::gatewayllm::clients::anthropic::AnthropicClient;
use crate::gatewayllm::clients::azure::AzureOpenAiClient;
use crate::gatewayllm::clients::bedrock::BedrockClient;
use crate::gatewayllm::clients::ollama::OllamaClient;
use crate::gatewayllm::clients::openai::OpenAiChatClient;
use crate::gatewayllm::clients::vertex::VertexClient;
use crate::gatewayllm::config::GatewayConfig;
use crate::gatewayllm::provider::{
    Generation, GenerationOptions, ProviderClient, ProviderError, ProviderKind,
};

/// Default coordinator-side model per provider, used when `COORDINATOR_MODEL`
/// is unset.
fn default_model(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAi => "gpt-4o-mini",
        ProviderKind::Anthropic => "claude-sonnet-4-0",
        ProviderKind::Azure => "gpt-4o-mini",
        ProviderKind::Gcp => "gemini-2.0-flash",
        ProviderKind::Aws => "anthropic.claude-3-5-sonnet-20241022-v2:0",
        ProviderKind::Ollama => "llama3.1",
    }
}

/// Registry of provider clients plus the default-provider order.
pub struct LlmAdapter {
    clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
    /// Insertion order; the first entry is the default provider.
    order: Vec<ProviderKind>,
}

impl LlmAdapter {
    /// An adapter with no providers. Register clients with
    /// [`insert`](LlmAdapter::insert); mainly useful in tests.
    pub fn new() -> Self {
        LlmAdapter {
            clients: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a client under its own provider tag. Re-inserting a tag
    /// replaces the client but keeps its position in the default order.
    pub fn insert(&mut self, client: Arc<dyn ProviderClient>) {
        let kind = client.provider();
        if self.clients.insert(kind, client).is_none() {
            self.order.push(kind);
        }
    }

    /// Build the adapter from the startup configuration.
    pub fn discover_from_env(cfg: &GatewayConfig) -> Self {
        let mut adapter = LlmAdapter::new();
        let model_for = |kind: ProviderKind| -> String {
            cfg.coordinator_model
                .clone()
                .unwrap_or_else(|| default_model(kind).to_string())
        };

        if let Some(base_url) = &cfg.litellm_base_url {
            let key = cfg.litellm_api_key.as_deref().unwrap_or("");
            for kind in ProviderKind::ALL {
                adapter.insert(Arc::new(
                    OpenAiChatClient::new_with_base_url(key, &model_for(kind), base_url)
                        .with_provider_tag(kind),
                ));
            }
            log::info!(
                "LLM adapter: routing all providers through LiteLLM at {}",
                base_url
            );
            return adapter;
        }

        if let Some(key) = &cfg.openai_api_key {
            adapter.insert(Arc::new(OpenAiChatClient::new(
                key,
                &model_for(ProviderKind::OpenAi),
            )));
        }
        if let Some(key) = &cfg.anthropic_api_key {
            adapter.insert(Arc::new(AnthropicClient::new(
                key,
                &model_for(ProviderKind::Anthropic),
            )));
        }
        if let (Some(key), Some(resource)) = (&cfg.azure_api_key, &cfg.azure_resource_name) {
            adapter.insert(Arc::new(AzureOpenAiClient::new(
                key,
                resource,
                &model_for(ProviderKind::Azure),
            )));
        }
        if cfg.google_credentials.is_some() {
            adapter.insert(Arc::new(VertexClient::new(&model_for(ProviderKind::Gcp))));
        }
        if let (Some(region), Some(model)) = (&cfg.aws_region, &cfg.bedrock_model) {
            adapter.insert(Arc::new(BedrockClient::new(
                region,
                model,
                cfg.bedrock_api_token.as_deref(),
            )));
        }
        if let Some(url) = &cfg.ollama_server_url {
            adapter.insert(Arc::new(OllamaClient::new(
                url,
                &model_for(ProviderKind::Ollama),
            )));
        }

        log::info!(
            "LLM adapter: discovered providers [{}]",
            adapter
                .order
                .iter()
                .map(|k| k.as_tag())
                .collect::<Vec<_>>()
                .join(", ")
        );
        adapter
    }

    /// True when no provider at all was discovered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// The provider used when a request names none: the first configured one.
    pub fn default_provider(&self) -> Option<ProviderKind> {
        self.order.first().copied()
    }

    /// Configured provider tags in default-selection order.
    pub fn providers(&self) -> Vec<ProviderKind> {
        self.order.clone()
    }

    /// Resolve the provider to use for a request-supplied tag.
    ///
    /// Unknown or unconfigured tags fall back to the default provider with a
    /// warning rather than failing the query.
    pub fn resolve(&self, requested: Option<&str>) -> Option<ProviderKind> {
        if let Some(tag) = requested {
            match ProviderKind::from_tag(tag) {
                Some(kind) if self.clients.contains_key(&kind) => return Some(kind),
                Some(kind) => {
                    log::warn!(
                        "requested provider '{}' is not configured; using default",
                        kind.as_tag()
                    );
                }
                None => {
                    log::warn!("unknown provider tag '{}'; using default", tag);
                }
            }
        }
        self.default_provider()
    }

    /// Catalog entries for the `/api/llm-providers` endpoint.
    pub fn catalog(&self) -> Vec<Value> {
        self.order
            .iter()
            .filter_map(|kind| self.clients.get(kind).map(|c| (kind, c)))
            .map(|(kind, client)| {
                json!({
                    "id": kind.as_tag(),
                    "name": kind.as_tag(),
                    "model": client.model_name(),
                    "source": "gateway",
                })
            })
            .collect()
    }

    /// Run one generation against the requested (or default) provider.
    pub async fn generate(
        &self,
        prompt: &str,
        opts: &GenerationOptions,
        provider: Option<ProviderKind>,
    ) -> Result<Generation, ProviderError> {
        let kind = provider
            .or_else(|| self.default_provider())
            .ok_or_else(|| ProviderError::unsupported("no LLM providers configured"))?;
        let client = self
            .clients
            .get(&kind)
            .ok_or_else(|| {
                ProviderError::unsupported(format!("provider '{}' not configured", kind.as_tag()))
            })?;
        client.generate(prompt, opts).await
    }
}

impl Default for LlmAdapter {
    fn default() -> Self {
        Self::new()
    }
}
