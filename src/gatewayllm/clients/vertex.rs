//! Google Vertex AI tag.
//!
//! Vertex has no key-only authentication path — calls need OAuth tokens
//! minted from the service-account credentials that
//! `GOOGLE_APPLICATION_CREDENTIALS` points at. The gateway therefore
//! registers the `gcp` tag for catalog visibility when the credentials are
//! present, but direct generation reports `Unsupported` until a LiteLLM
//! front is configured to carry the traffic.

use async_trait::async_trait;

use crate::gatewayllm::provider::{
    Generation, GenerationOptions, ProviderClient, ProviderError, ProviderKind,
};

/// Catalog-visible placeholder client for Google Vertex AI.
pub struct VertexClient {
    model: String,
}

impl VertexClient {
    pub fn new(model: &str) -> Self {
        VertexClient {
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ProviderClient for VertexClient {
    async fn generate(
        &self,
        _prompt: &str,
        _opts: &GenerationOptions,
    ) -> Result<Generation, ProviderError> {
        Err(ProviderError::unsupported(
            "vertex requires a LiteLLM front (LITELLM_BASE_URL) to carry OAuth-authenticated traffic",
        ))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Gcp
    }
}
