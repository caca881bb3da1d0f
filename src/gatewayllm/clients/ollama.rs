//! Ollama client for locally hosted models.
//!
//! Ollama ships an OpenAI-compatible surface under `{server}/v1`; no real
//! credential is needed, so a placeholder key is sent.

use async_trait::async_trait;

use crate::gatewayllm::clients::openai::OpenAiChatClient;
use crate::gatewayllm::provider::{
    Generation, GenerationOptions, ProviderClient, ProviderError, ProviderKind,
};

/// Client wrapper for a local Ollama server.
pub struct OllamaClient {
    delegate: OpenAiChatClient,
    model: String,
}

impl OllamaClient {
    /// Create a client from `OLLAMA_SERVER_URL` (e.g. `http://localhost:11434`)
    /// and a pulled model name.
    pub fn new(server_url: &str, model: &str) -> Self {
        let base_url = format!("{}/v1", server_url.trim_end_matches('/'));
        OllamaClient {
            delegate: OpenAiChatClient::new_with_base_url("ollama", model, &base_url)
                .with_provider_tag(ProviderKind::Ollama),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ProviderClient for OllamaClient {
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
        ProviderKind::Ollama
    }
}
