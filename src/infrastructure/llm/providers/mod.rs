//! # LLM Providers
//!
//! Contains implementations for specific LLM providers (Anthropic, OpenAI).
//! Each provider exposes the same `chat` / `chat_stream` pair so the client can route to it.

mod anthropic;
mod openai;

use bytes::BytesMut;

use crate::domain::config::LlmConfig;
use crate::infrastructure::llm::{Context, Error, Provider, Response};

/// Configuration for a provider
#[derive(Clone)]
pub struct ProviderConfig {
    /// API key
    pub api_key: String,
    /// Base URL (for non-default endpoints)
    pub base_url: Option<String>,
    /// Default model
    pub default_model: String,
    /// Timeout in seconds
    pub timeout: Option<u64>,
}

impl ProviderConfig {
    pub fn from_llm_config(config: &LlmConfig, provider: Provider) -> Result<Self, Error> {
        let api_key = if let Some(key) = &config.api_key {
            key.clone()
        } else {
            let env_var = config
                .api_key_env
                .clone()
                .unwrap_or_else(|| provider.default_key_env().to_string());
            std::env::var(&env_var).map_err(|e| {
                Error::new(
                    provider.as_str(),
                    format!("API key env var {} not set: {}", env_var, e),
                )
            })?
        };

        Ok(Self {
            api_key,
            base_url: config.endpoint.clone(),
            default_model: config.model.clone(),
            timeout: config.timeout,
        })
    }
}

/// Execute a chat request with the specified provider
pub async fn chat(
    provider: Provider,
    config: ProviderConfig,
    context: Context,
) -> Result<Response, Error> {
    match provider {
        Provider::Anthropic => anthropic::chat(config, context).await,
        Provider::OpenAI => openai::chat(config, context).await,
    }
}

/// Execute a streaming chat request, handing every text delta to `on_chunk`
pub async fn chat_stream(
    provider: Provider,
    config: ProviderConfig,
    context: Context,
    on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
) -> Result<Response, Error> {
    match provider {
        Provider::Anthropic => anthropic::chat_stream(config, context, on_chunk).await,
        Provider::OpenAI => openai::chat_stream(config, context, on_chunk).await,
    }
}

/// Splits a server-sent-events byte stream into `data:` payloads.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    // Raw bytes, so multi-byte characters split across chunks survive.
    pending: BytesMut,
}

impl SseBuffer {
    /// Appends raw bytes and returns every complete `data:` payload.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let raw = self.pending.split_to(newline + 1);
            let line = String::from_utf8_lossy(&raw).trim().to_string();

            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if data != "[DONE]" {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }
}

/// Extracts a readable message from an error body, falling back to the raw text.
pub(crate) fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(body)
        && let Some(error) = error_json.get("error")
    {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or_default();
        return match error.get("type").and_then(|t| t.as_str()) {
            Some(kind) => format!("{}: {}", kind, message),
            None => message.to_string(),
        };
    }
    format!("HTTP {}: {}", status, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_buffer_splits_across_chunks() {
        let mut sse = SseBuffer::default();
        assert!(sse.push(b"event: delta\ndata: {\"a\"").is_empty());
        let payloads = sse.push(b":1}\n\ndata: [DONE]\n");
        assert_eq!(payloads, vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn test_sse_buffer_ignores_comments() {
        let mut sse = SseBuffer::default();
        let payloads = sse.push(b": ping\ndata: x\n");
        assert_eq!(payloads, vec!["x".to_string()]);
    }

    #[test]
    fn test_error_message_prefers_json() {
        let body = r#"{"error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert_eq!(
            error_message(reqwest::StatusCode::SERVICE_UNAVAILABLE, body),
            "overloaded_error: Overloaded"
        );
        assert_eq!(
            error_message(reqwest::StatusCode::BAD_GATEWAY, "nope"),
            "HTTP 502 Bad Gateway: nope"
        );
    }
}
