//! Shared primitives for provider-agnostic LLM generation.
//!
//! The gateway talks to every LLM backend through the [`ProviderClient`]
//! trait and the lightweight data types in this module. The trait abstracts
//! over concrete vendor transports while [`Generation`] carries the text and
//! token accounting back to the coordinator.
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
//!
//!     let generation = client
//!         .generate("Say hello in one word.", &GenerationOptions::default())
//!         .await?;
//!
//!     println!("{} ({} tokens)", generation.text, generation.total_tokens());
//!     Ok(())
//! }
//! ```

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The fixed set of provider tags the gateway understands.
///
/// The wire representation is the lowercase tag (`"openai"`, `"aws"`, …) used
/// in query requests, resource URIs, and the provider catalog endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI Chat Completions.
    OpenAi,
    /// Anthropic Claude via its OpenAI-compatible surface.
    Anthropic,
    /// Azure OpenAI (resource-scoped endpoint).
    Azure,
    /// Google Vertex AI.
    Gcp,
    /// AWS Bedrock runtime.
    Aws,
    /// A local Ollama server.
    Ollama,
}

impl ProviderKind {
    /// Every tag, in the order used for default-provider selection.
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Azure,
        ProviderKind::Gcp,
        ProviderKind::Aws,
        ProviderKind::Ollama,
    ];

    /// The lowercase wire tag.
    pub fn as_tag(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Azure => "azure",
            ProviderKind::Gcp => "gcp",
            ProviderKind::Aws => "aws",
            ProviderKind::Ollama => "ollama",
        }
    }

    /// Parse a wire tag, case-insensitively. Unknown tags return `None`.
    pub fn from_tag(tag: &str) -> Option<ProviderKind> {
        match tag.trim().to_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "anthropic" => Some(ProviderKind::Anthropic),
            "azure" => Some(ProviderKind::Azure),
            "gcp" | "vertex" => Some(ProviderKind::Gcp),
            "aws" | "bedrock" => Some(ProviderKind::Aws),
            "ollama" => Some(ProviderKind::Ollama),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Per-call generation knobs.
///
/// `model` overrides the client's configured model for this call only; the
/// coordinator uses it to route translation traffic to `TRANSLATION_MODEL`
/// while keeping routing/synthesis on `COORDINATOR_MODEL`.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// Optional system message sent ahead of the prompt.
    pub system: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Hard cap on completion tokens.
    pub max_tokens: usize,
    /// Per-call model override.
    pub model: Option<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        GenerationOptions {
            system: None,
            temperature: 0.2,
            max_tokens: 1024,
            model: None,
        }
    }
}

/// The uniform result of a generation call.
///
/// Token counts are the provider-reported values when available and zero
/// otherwise; callers that need an always-positive figure should fall back to
/// a text-volume estimate.
#[derive(Debug, Clone)]
pub struct Generation {
    /// The assistant text, already rescued from `thinking`-style fields when
    /// the primary content slot came back empty.
    pub text: String,
    /// Prompt tokens billed by the provider (0 when unreported).
    pub prompt_tokens: usize,
    /// Completion tokens billed by the provider (0 when unreported).
    pub completion_tokens: usize,
}

impl Generation {
    /// Convenience sum of prompt and completion tokens.
    pub fn total_tokens(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Broad failure categories surfaced by provider transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Rejected credentials (HTTP 401/403).
    Auth,
    /// Rate limited (HTTP 429).
    Rate,
    /// The call or connection timed out.
    Timeout,
    /// The provider tag is known but has no usable transport configured.
    Unsupported,
    /// Anything else: malformed payloads, 5xx, connection resets.
    Other,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderErrorKind::Auth => "auth",
            ProviderErrorKind::Rate => "rate",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Unsupported => "unsupported",
            ProviderErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// A generation failure. There are no retries at this layer; callers degrade
/// to their documented fallbacks instead.
#[derive(Debug, Clone)]
pub struct ProviderError {
    /// Failure category.
    pub kind: ProviderErrorKind,
    /// Human-readable detail, safe to log.
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        ProviderError {
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unsupported, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Other, message)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider error ({}): {}", self.kind, self.message)
    }
}

impl Error for ProviderError {}

/// Trait-driven abstraction over a concrete LLM backend.
///
/// Implementations translate the uniform request into the vendor wire format
/// and must be thread-safe (`Send + Sync`) so a single instance can serve
/// concurrent queries.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Run one request/response generation.
    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerationOptions,
    ) -> Result<Generation, ProviderError>;

    /// The model identifier used when no per-call override is given.
    fn model_name(&self) -> &str;

    /// Which provider tag this client serves.
    fn provider(&self) -> ProviderKind;
}

/// Rough token estimate for text whose provider reported no usage.
///
/// Four characters per token is the usual order-of-magnitude heuristic; the
/// counters this feeds are documented as additive approximations.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}
