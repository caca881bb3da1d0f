//! Anthropic Claude client built on the OpenAI-compatible transport.
//!
//! Anthropic exposes a Chat Completions compatibility surface at
//! `https://api.anthropic.com/v1`, so this wrapper only supplies the base URL
//! and the provider tag; all HTTP concerns are delegated to
//! [`OpenAiChatClient`].

use async_trait::async_trait;

use crate::gatewayllm::clients::openai::OpenAiChatClient;
use crate::gatewayllm::provider::{
    Generation, GenerationOptions, ProviderClient, ProviderError, ProviderKind,
};

/// Client wrapper for Anthropic's Claude API.
pub struct AnthropicClient {
    delegate: OpenAiChatClient,
    model: String,
}

impl AnthropicClient {
    /// Create a client from an `ANTHROPIC_API_KEY` and a model name such as
    /// `claude-sonnet-4-0`.
    pub fn new(api_key: &str, model: &str) -> Self {
        AnthropicClient {
            delegate: OpenAiChatClient::new_with_base_url(
                api_key,
                model,
                "https://api.anthropic.com/v1",
            )
            .with_provider_tag(ProviderKind::Anthropic),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerationOptions,
    ) -> Result<Generation, ProviderError> {
        self.delegate.generate(prompt, opts).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }
}
