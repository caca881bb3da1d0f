//! Shared transport utilities used across provider client implementations.
//!
//! Every OpenAI-compatible backend (OpenAI itself, Anthropic's and Azure's
//! compatibility surfaces, Bedrock's runtime endpoint, Ollama, and any
//! LiteLLM front) goes through [`send_chat`], which owns request shaping,
//! error-kind mapping, usage capture, and the `thinking`-field rescue for
//! reasoning models that return their answer outside the primary content
//! slot.

use std::time::Duration;

use lazy_static::lazy_static;
use serde_json::{json, Value};

use crate::gatewayllm::provider::{
    Generation, GenerationOptions, ProviderError, ProviderErrorKind,
};

lazy_static! {
    /// Shared HTTP client with persistent connection pooling.
    ///
    /// One client instance keeps TLS sessions and DNS lookups warm across
    /// every provider and policy call the gateway makes.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// POST a chat completion to an OpenAI-compatible endpoint and normalise the
/// response into a [`Generation`].
///
/// `base_url` must not carry a trailing slash; the helper appends
/// `/chat/completions`. HTTP status codes are mapped onto
/// [`ProviderErrorKind`]: 401/403 → `Auth`, 429 → `Rate`, 408/504 →
/// `Timeout`, everything else non-2xx → `Other`.
pub async fn send_chat(
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    prompt: &str,
    opts: &GenerationOptions,
) -> Result<Generation, ProviderError> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = &opts.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt}));

    let effective_model = opts.model.as_deref().unwrap_or(model);
    let body = json!({
        "model": effective_model,
        "messages": messages,
        "temperature": opts.temperature,
        "max_tokens": opts.max_tokens,
    });

    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

    let response = http
        .post(&url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ProviderError::timeout(format!("{}: {}", url, e))
            } else {
                ProviderError::other(format!("{}: {}", url, e))
            }
        })?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ProviderError::other(format!("{}: reading body: {}", url, e)))?;

    if !status.is_success() {
        let kind = match status.as_u16() {
            401 | 403 => ProviderErrorKind::Auth,
            429 => ProviderErrorKind::Rate,
            408 | 504 => ProviderErrorKind::Timeout,
            _ => ProviderErrorKind::Other,
        };
        if log::log_enabled!(log::Level::Error) {
            log::error!("send_chat: HTTP {} from {}: {}", status, url, text);
        }
        return Err(ProviderError::new(
            kind,
            format!("HTTP {} from {}", status, url),
        ));
    }

    let parsed: Value = serde_json::from_str(&text)
        .map_err(|e| ProviderError::other(format!("{}: invalid JSON: {}", url, e)))?;

    extract_generation(&parsed)
}

/// Pull the assistant text and usage counters out of a Chat Completions
/// response payload.
///
/// Reasoning-model deployments sometimes return an empty `content` and place
/// the actual answer under `message.thinking` (or `reasoning_content`); the
/// rescue path inspects those before giving up.
pub fn extract_generation(payload: &Value) -> Result<Generation, ProviderError> {
    let message = payload
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ProviderError::other("no choices in provider response"))?;

    let mut text = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    if text.trim().is_empty() {
        // Rescue reasoning-model output that bypassed the content slot.
        for field in ["thinking", "reasoning_content"] {
            if let Some(alt) = message.get(field).and_then(|v| v.as_str()) {
                if !alt.trim().is_empty() {
                    text = alt.to_string();
                    break;
                }
            }
        }
    }

    let usage = payload.get("usage");
    let prompt_tokens = usage
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    let completion_tokens = usage
        .and_then(|u| u.get("completion_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;

    Ok(Generation {
        text,
        prompt_tokens,
        completion_tokens,
    })
}
