//! OpenAI Chat Completions client.
//!
//! This is both the native `openai` provider and the delegate transport that
//! every other OpenAI-compatible surface (Anthropic, Azure, Bedrock, Ollama,
//! LiteLLM fronts) reuses with a different base URL.
//!
//! # Example
//!
//! ```rust,no_run
//! use gatewayllm::clients::openai::OpenAiChatClient;
//! use gatewayllm::provider::{GenerationOptions, ProviderClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPENAI_API_KEY")?;
//!     let client = OpenAiChatClient::new(&key, "gpt-4o-mini");
//!     let out = client
//!         .generate("One-line summary of JSON-RPC.", &GenerationOptions::default())
//!         .await?;
//!     println!("{}", out.text);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;

use crate::gatewayllm::clients::common::{get_shared_http_client, send_chat};
use crate::gatewayllm::provider::{
    Generation, GenerationOptions, ProviderClient, ProviderError, ProviderKind,
};

/// Client for any OpenAI-compatible Chat Completions endpoint.
pub struct OpenAiChatClient {
    /// Bearer credential injected into each request.
    api_key: String,
    /// Model identifier used when the call carries no override.
    model: String,
    /// Endpoint base, without trailing slash (e.g. `https://api.openai.com/v1`).
    base_url: String,
    /// Tag reported to the adapter; overridden for delegate usage.
    kind: ProviderKind,
}

impl OpenAiChatClient {
    /// Construct a client against the public OpenAI endpoint.
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::new_with_base_url(api_key, model, "https://api.openai.com/v1")
    }

    /// Construct a client against a custom OpenAI-compatible base URL.
    ///
    /// The most general constructor; used for self-hosted deployments,
    /// compatibility surfaces, and LiteLLM fronts. A trailing slash on
    /// `base_url` is tolerated.
    pub fn new_with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        OpenAiChatClient {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            kind: ProviderKind::OpenAi,
        }
    }

    /// Report a different provider tag from this transport.
    ///
    /// Delegating wrappers and LiteLLM-backed instances use this so the
    /// adapter's catalog shows the logical provider rather than `openai`.
    pub fn with_provider_tag(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }
}

#[async_trait]
impl ProviderClient for OpenAiChatClient {
    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerationOptions,
    ) -> Result<Generation, ProviderError> {
        send_chat(
            get_shared_http_client(),
            &self.base_url,
            &self.api_key,
            &self.model,
            prompt,
            opts,
        )
        .await
        .map_err(|e| {
            if log::log_enabled!(log::Level::Error) {
                log::error!(
                    "OpenAiChatClient::generate({}): {}",
                    self.kind.as_tag(),
                    e
                );
            }
            e
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> ProviderKind {
        self.kind
    }
}
