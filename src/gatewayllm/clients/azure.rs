//! Azure OpenAI client.
//!
//! Targets the unified `v1` surface exposed per resource at
//! `https://{resource}.openai.azure.com/openai/v1`, which accepts standard
//! bearer authentication and the Chat Completions request shape.

use async_trait::async_trait;

use crate::gatewayllm::clients::openai::OpenAiChatClient;
use crate::gatewayllm::provider::{
    Generation, GenerationOptions, ProviderClient, ProviderError, ProviderKind,
};

/// Client wrapper for an Azure OpenAI resource.
pub struct AzureOpenAiClient {
    delegate: OpenAiChatClient,
    model: String,
}

impl AzureOpenAiClient {
    /// Create a client from `AZURE_API_KEY`, `AZURE_RESOURCE_NAME`, and the
    /// deployment (model) name.
    pub fn new(api_key: &str, resource_name: &str, model: &str) -> Self {
        let base_url = format!("https://{}.openai.azure.com/openai/v1", resource_name);
        AzureOpenAiClient {
            delegate: OpenAiChatClient::new_with_base_url(api_key, model, &base_url)
                .with_provider_tag(ProviderKind::Azure),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ProviderClient for AzureOpenAiClient {
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
        ProviderKind::Azure
    }
}
