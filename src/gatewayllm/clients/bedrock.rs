//! AWS Bedrock client.
//!
//! Bedrock's runtime exposes an OpenAI-compatible surface at
//! `https://bedrock-runtime.{region}.amazonaws.com/openai/v1` authenticated
//! with an API-key style bearer token. SigV4 request signing is deliberately
//! not implemented here; deployments without a bearer token route Bedrock
//! through a LiteLLM front instead, and a direct call reports
//! [`ProviderError::unsupported`].

use async_trait::async_trait;

use crate::gatewayllm::clients::openai::OpenAiChatClient;
use crate::gatewayllm::provider::{
    Generation, GenerationOptions, ProviderClient, ProviderError, ProviderKind,
};

/// Client wrapper for the AWS Bedrock runtime.
pub struct BedrockClient {
    delegate: Option<OpenAiChatClient>,
    model: String,
}

impl BedrockClient {
    /// Create a client from `AWS_REGION`, `BEDROCK_MODEL`, and an optional
    /// `AWS_BEARER_TOKEN_BEDROCK`.
    ///
    /// Without the bearer token the client still registers (so the provider
    /// catalog reflects the configured region/model) but every generation
    /// attempt fails with kind `Unsupported`.
    pub fn new(region: &str, model: &str, bearer_token: Option<&str>) -> Self {
        let delegate = bearer_token.map(|token| {
            let base_url = format!("https://bedrock-runtime.{}.amazonaws.com/openai/v1", region);
            OpenAiChatClient::new_with_base_url(token, model, &base_url)
                .with_provider_tag(ProviderKind::Aws)
        });
        BedrockClient {
            delegate,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ProviderClient for BedrockClient {
    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerationOptions,
    ) -> Result<Generation, ProviderError> {
        match &self.delegate {
            Some(delegate) => delegate.generate(prompt, opts).await,
            None => Err(ProviderError::unsupported(
                "bedrock requires AWS_BEARER_TOKEN_BEDROCK or a LiteLLM front (LITELLM_BASE_URL)",
            )),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Aws
    }
}
