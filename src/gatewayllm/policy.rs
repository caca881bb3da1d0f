//! Client for the content-security Policy Engine.
//!
//! The gateway runs up to four checkpoints around every LLM hop; each
//! checkpoint is exactly one call into this module — [`analyze_prompt`] for
//! prompt-only positions (1 and 2) and [`analyze_prompt_and_response`] for
//! the positions that see a model answer (3 and 4).
//!
//! Two contract points matter to callers:
//!
//! - **Unconfigured means approved.** Without `PRISMA_AIRS_API_URL` the
//!   client short-circuits to an approval verdict with the input passed
//!   through unchanged, so the orchestration pipeline is identical with and
//!   without a policy backend.
//! - **Raw payloads are surfaced untouched.** The exact request and response
//!   JSON exchanged with the engine ride along on every verdict; they feed
//!   the per-query checkpoint log shown to operators.
//!
//! [`analyze_prompt`]: PolicyClient::analyze_prompt
//! [`analyze_prompt_and_response`]: PolicyClient::analyze_prompt_and_response

use std::error::Error;
use std::fmt;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::gatewayllm::clients::common::get_shared_http_client;
use crate::gatewayllm::config::GatewayConfig;

/// Per-call context forwarded to the engine for attribution.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    /// BCP-47-ish language tag of the end user ("en", "ko", …).
    pub language: String,
    /// Application name shown in policy reports.
    pub app_name: String,
    /// End-user identity (email when known, else "anonymous").
    pub app_user: String,
    /// Model the guarded hop will use.
    pub ai_model: String,
    /// Transaction id correlating the four checkpoints of one query.
    pub tr_id: String,
}

impl PolicyContext {
    /// Context for one query; `tr_id` is freshly generated.
    pub fn new(language: &str, app_user: &str, ai_model: &str) -> Self {
        PolicyContext {
            language: language.to_string(),
            app_name: "gatewayllm".to_string(),
            app_user: app_user.to_string(),
            ai_model: ai_model.to_string(),
            tr_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Verdict of one policy evaluation.
#[derive(Debug, Clone)]
pub struct PolicyVerdict {
    pub approved: bool,
    /// Violation category when blocked (e.g. `"dlp"`, `"injection"`).
    pub category: Option<String>,
    /// Engine-side report id for audit lookup.
    pub report_id: Option<String>,
    /// User-displayable explanation when blocked.
    pub message: Option<String>,
    /// Masked rendition of the prompt, when the engine redacted it.
    pub masked_prompt: Option<String>,
    /// Masked rendition of the response, when the engine redacted it.
    pub masked_response: Option<String>,
    /// Individual detection records, verbatim.
    pub detections: Vec<Value>,
    /// Exact request payload sent to the engine.
    pub raw_request: Value,
    /// Exact response payload received from the engine.
    pub raw_response: Value,
}

impl PolicyVerdict {
    /// The pass-through verdict used when no engine is configured.
    fn pass_through(raw_request: Value) -> Self {
        PolicyVerdict {
            approved: true,
            category: None,
            report_id: None,
            message: None,
            masked_prompt: None,
            masked_response: None,
            detections: Vec::new(),
            raw_request,
            raw_response: json!({"action": "allow", "note": "policy engine not configured"}),
        }
    }
}

/// Failure talking to the policy engine.
///
/// Transport failures are not propagated as blocks: the caller receives an
/// approval verdict tagged `scan-error` and the incident is logged. A
/// security demo that hard-fails on engine flakiness teaches the wrong
/// lesson about availability; the category makes the degraded scan visible.
#[derive(Debug, Clone)]
pub struct PolicyError {
    pub message: String,
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "policy engine error: {}", self.message)
    }
}

impl Error for PolicyError {}

/// HTTP client for the policy engine's synchronous scan API.
pub struct PolicyClient {
    base_url: Option<String>,
    api_token: Option<String>,
    profile_id: Option<String>,
}

impl PolicyClient {
    pub fn from_config(cfg: &GatewayConfig) -> Self {
        PolicyClient {
            base_url: cfg.policy_api_url.clone(),
            api_token: cfg.policy_api_token.clone(),
            profile_id: cfg.policy_profile_id.clone(),
        }
    }

    /// A client with no backend; every call passes through approved.
    pub fn unconfigured() -> Self {
        PolicyClient {
            base_url: None,
            api_token: None,
            profile_id: None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    /// Evaluate a prompt-only checkpoint (positions 1 and 2).
    pub async fn analyze_prompt(&self, text: &str, ctx: &PolicyContext) -> PolicyVerdict {
        self.scan(json!({"prompt": text}), ctx).await
    }

    /// Evaluate a prompt+response checkpoint (positions 3 and 4).
    pub async fn analyze_prompt_and_response(
        &self,
        prompt: &str,
        response: &str,
        ctx: &PolicyContext,
    ) -> PolicyVerdict {
        self.scan(json!({"prompt": prompt, "response": response}), ctx)
            .await
    }

    async fn scan(&self, contents: Value, ctx: &PolicyContext) -> PolicyVerdict {
        let request_body = json!({
            "tr_id": ctx.tr_id,
            "ai_profile": {"profile_id": self.profile_id},
            "metadata": {
                "app_name": ctx.app_name,
                "app_user": ctx.app_user,
                "ai_model": ctx.ai_model,
                "language": ctx.language,
            },
            "contents": [contents],
        });

        let Some(base_url) = &self.base_url else {
            return PolicyVerdict::pass_through(request_body);
        };

        match self.post_scan(base_url, &request_body).await {
            Ok(raw_response) => parse_verdict(request_body, raw_response),
            Err(e) => {
                if log::log_enabled!(log::Level::Error) {
                    log::error!("policy scan failed, approving unscanned: {}", e);
                }
                let mut verdict = PolicyVerdict::pass_through(request_body);
                verdict.category = Some("scan-error".to_string());
                verdict.raw_response = json!({"error": e.message});
                verdict
            }
        }
    }

    async fn post_scan(&self, base_url: &str, body: &Value) -> Result<Value, PolicyError> {
        let url = format!("{}/v1/scan/sync/request", base_url.trim_end_matches('/'));
        let mut request = get_shared_http_client()
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(token) = &self.api_token {
            request = request.header("x-pan-token", token);
        }
        let response = request
            .json(body)
            .send()
            .await
            .map_err(|e| PolicyError {
                message: format!("{}: {}", url, e),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| PolicyError {
            message: format!("{}: reading body: {}", url, e),
        })?;
        if !status.is_success() {
            return Err(PolicyError {
                message: format!("HTTP {} from {}: {}", status, url, text),
            });
        }
        serde_json::from_str(&text).map_err(|e| PolicyError {
            message: format!("{}: invalid JSON: {}", url, e),
        })
    }
}

/// Interpret an engine response, tolerating the field variations the scan
/// API has shipped over time.
fn parse_verdict(raw_request: Value, raw_response: Value) -> PolicyVerdict {
    let action = raw_response
        .get("action")
        .and_then(|v| v.as_str())
        .unwrap_or("allow");
    let approved = !action.eq_ignore_ascii_case("block");

    let category = raw_response
        .get("category")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let report_id = raw_response
        .get("report_id")
        .or_else(|| raw_response.get("scan_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let message = raw_response
        .get("message")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| {
            (!approved).then(|| {
                "This request was blocked by the content security policy.".to_string()
            })
        });

    let masked_prompt = masked_data(&raw_response, "prompt_masked_data");
    let masked_response = masked_data(&raw_response, "response_masked_data");

    let detections = raw_response
        .get("detections")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    PolicyVerdict {
        approved,
        category,
        report_id,
        message,
        masked_prompt,
        masked_response,
        detections,
        raw_request,
        raw_response,
    }
}

/// Masked payloads arrive either as `{"data": "…"}` or as a bare string.
fn masked_data(response: &Value, key: &str) -> Option<String> {
    let node = response.get(key)?;
    node.get("data")
        .and_then(|v| v.as_str())
        .or_else(|| node.as_str())
        .map(str::to_string)
}
