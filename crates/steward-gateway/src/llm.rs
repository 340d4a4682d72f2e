//! LLM collaborator client
//!
//! The model itself is an external tool-calling peer; the gateway only
//! needs a `complete` contract that accepts conversation history plus
//! tool specs and returns text and/or tool calls. Transient upstream
//! failures (rate limiting, gateway errors, timeouts) are retried with
//! doubling backoff up to a small fixed budget; everything else fails
//! permanently.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use steward_core::ToolDescriptor;

use crate::config::{LlmSettings, RetrySettings};
use crate::error::{GatewayError, Result};

/// One message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user`, `assistant` or `tool`
    pub role: String,
    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// A user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// An assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    /// A tool-result message
    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call id echoed back with the result
    pub id: String,
    /// Registered tool name
    pub name: String,
    /// JSON arguments
    pub arguments: serde_json::Value,
}

/// A completion request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Conversation history, oldest first
    pub messages: Vec<ChatMessage>,
    /// Tools the model may call
    pub tools: Vec<ToolDescriptor>,
    /// Token ceiling
    pub max_tokens: u32,
}

/// A completion response
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    /// Assistant text, possibly empty when only tools were called
    pub content: String,
    /// Requested tool invocations
    pub tool_calls: Vec<ToolCall>,
    /// Tokens consumed by this exchange
    pub tokens_used: u32,
}

/// The external LLM collaborator
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One completion turn
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Model identifier, for the status surface
    fn model_name(&self) -> &str;
}

// ─────────────────────────────────────────────────────────────────────────
// HTTP client (OpenAI-compatible chat completions)
// ─────────────────────────────────────────────────────────────────────────

/// Reqwest-backed client for an OpenAI-compatible endpoint
pub struct HttpLlmClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpLlmClient {
    /// Build from settings
    pub fn new(settings: &LlmSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        }
    }

    fn tool_spec(tool: &ToolDescriptor) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": {
                    "type": "object",
                    "properties": {
                        "entity_id": { "type": "string" },
                        "detail": { "type": "string" }
                    }
                }
            }
        })
    }
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    total_tokens: u32,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "tools": request.tools.iter().map(Self::tool_spec).collect::<Vec<_>>(),
        });

        let mut http = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| GatewayError::Llm(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GatewayError::Llm(format!("{status}: {detail}")));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Llm(e.to_string()))?;
        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Llm("empty choices".to_string()))?;

        let mut tool_calls = Vec::new();
        for call in choice.message.tool_calls {
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or(serde_json::Value::Null);
            tool_calls.push(ToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            });
        }

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            tokens_used: wire.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Retry wrapper
// ─────────────────────────────────────────────────────────────────────────

/// Wraps any client with bounded exponential-backoff retry on transient
/// failures only
pub struct RetryingClient<T: LlmClient> {
    inner: T,
    config: RetrySettings,
}

impl<T: LlmClient> RetryingClient<T> {
    /// Wrap a client
    pub fn new(inner: T, config: RetrySettings) -> Self {
        Self { inner, config }
    }

    fn is_retryable(error_msg: &str) -> bool {
        let lower = error_msg.to_lowercase();
        lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("504")
            || lower.contains("bad gateway")
            || lower.contains("service unavailable")
            || lower.contains("gateway timeout")
            || lower.contains("timed out")
            || lower.contains("operation timed out")
    }

    fn compute_delay(&self, attempt: u32) -> u64 {
        let base = self.config.initial_delay_ms.saturating_mul(1u64 << attempt.min(16));
        let jitter = (base / 10) * u64::from(attempt.wrapping_mul(2654435761) % 10) / 10;
        base.saturating_add(jitter).min(self.config.max_delay_ms)
    }
}

#[async_trait]
impl<T: LlmClient> LlmClient for RetryingClient<T> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let error_msg = e.to_string();

                    if attempt == self.config.max_retries || !Self::is_retryable(&error_msg) {
                        return Err(e);
                    }

                    let delay = self.compute_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay,
                        error = %error_msg,
                        "retrying LLM request"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| GatewayError::Llm("retry budget exhausted".to_string())))
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retryable_classes() {
        type R = RetryingClient<FlakyClient>;
        assert!(R::is_retryable("LLM collaborator error: 429 Too Many Requests"));
        assert!(R::is_retryable("502 Bad Gateway"));
        assert!(R::is_retryable("upstream gateway timeout"));
        assert!(!R::is_retryable("401 Unauthorized"));
        assert!(!R::is_retryable("Invalid request: missing model"));
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let client = RetryingClient::new(
            FlakyClient::new(0, "x"),
            RetrySettings {
                max_retries: 5,
                initial_delay_ms: 500,
                max_delay_ms: 2_000,
            },
        );

        assert!(client.compute_delay(0) >= 500);
        assert!(client.compute_delay(1) >= 1_000);
        assert!(client.compute_delay(5) <= 2_000);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let client = RetryingClient::new(
            FlakyClient::new(2, "503 Service Unavailable"),
            RetrySettings {
                max_retries: 3,
                initial_delay_ms: 1,
                max_delay_ms: 5,
            },
        );

        let response = client.complete(empty_request()).await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_fast() {
        let client = RetryingClient::new(
            FlakyClient::new(10, "401 Unauthorized"),
            RetrySettings {
                max_retries: 3,
                initial_delay_ms: 1,
                max_delay_ms: 5,
            },
        );

        assert!(client.complete(empty_request()).await.is_err());
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_is_bounded() {
        let client = RetryingClient::new(
            FlakyClient::new(100, "502 Bad Gateway"),
            RetrySettings {
                max_retries: 2,
                initial_delay_ms: 1,
                max_delay_ms: 5,
            },
        );

        assert!(client.complete(empty_request()).await.is_err());
        // First call plus two retries
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    fn empty_request() -> LlmRequest {
        LlmRequest {
            messages: vec![ChatMessage::user("hello")],
            tools: Vec::new(),
            max_tokens: 16,
        }
    }

    struct FlakyClient {
        failures: u32,
        error: &'static str,
        calls: AtomicU32,
    }

    impl FlakyClient {
        fn new(failures: u32, error: &'static str) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(GatewayError::Llm(self.error.to_string()))
            } else {
                Ok(LlmResponse {
                    content: "ok".to_string(),
                    tool_calls: Vec::new(),
                    tokens_used: 1,
                })
            }
        }

        fn model_name(&self) -> &str {
            "flaky"
        }
    }
}
