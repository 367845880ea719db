//! Anthropic (Claude) provider
//!
//! Supports plain and streamed Messages API requests, including image blocks
//! for vision prompts.

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ProviderConfig, SseBuffer, error_message};
use crate::infrastructure::llm::{Context, Error, Message, MessageRole, Response, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const API_VERSION: &str = "2023-06-01";

/// HTTP client reused across requests
fn http_client() -> Result<&'static Client, Error> {
    use std::sync::OnceLock;
    static CLIENT: OnceLock<Client> = OnceLock::new();
    if let Some(client) = CLIENT.get() {
        return Ok(client);
    }
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .map_err(|e| Error::new("anthropic", format!("Failed to create HTTP client: {}", e)))?;
    Ok(CLIENT.get_or_init(|| client))
}

/// Anthropic API request format
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

/// Anthropic message format
#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContentBlock>,
}

/// Anthropic content block
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum AnthropicContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

/// Anthropic API response format
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<AnthropicResponseContent>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

/// Anthropic response content
#[derive(Debug, Deserialize)]
struct AnthropicResponseContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

/// Anthropic usage information
#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

fn build_request(config: &ProviderConfig, context: Context, stream: bool) -> AnthropicRequest {
    let model = context.model.unwrap_or_else(|| {
        if config.default_model.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            config.default_model.clone()
        }
    });

    // Extract system messages and convert user/assistant messages
    let mut system = None;
    let mut messages = Vec::new();
    for msg in context.messages {
        if msg.role == MessageRole::System {
            system = Some(msg.content);
            continue;
        }
        messages.push(convert_message(msg));
    }

    AnthropicRequest {
        model,
        max_tokens: context.max_tokens.unwrap_or(4096),
        messages,
        system,
        temperature: context.temperature,
        stream,
    }
}

fn convert_message(msg: Message) -> AnthropicMessage {
    let mut content = Vec::new();
    if let Some(image) = msg.image {
        content.push(AnthropicContentBlock::Image {
            source: ImageSource {
                source_type: "base64".to_string(),
                media_type: image.media_type,
                data: image.data,
            },
        });
    }
    content.push(AnthropicContentBlock::Text { text: msg.content });

    AnthropicMessage {
        role: msg.role.as_str().to_string(),
        content,
    }
}

async fn send(config: &ProviderConfig, request: &AnthropicRequest) -> Result<reqwest::Response, Error> {
    let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let url = format!("{}/v1/messages", base_url);

    let mut request_builder = http_client()?
        .post(&url)
        .header("x-api-key", &config.api_key)
        .header("anthropic-version", API_VERSION)
        .header("Content-Type", "application/json")
        .json(request);

    if let Some(timeout_secs) = config.timeout {
        request_builder = request_builder.timeout(std::time::Duration::from_secs(timeout_secs));
    }

    let response = request_builder
        .send()
        .await
        .map_err(|e| Error::new("anthropic", format!("HTTP request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());
        return Err(Error::new("anthropic", error_message(status, &error_text)));
    }

    Ok(response)
}

/// Execute a chat request using Anthropic's API
pub async fn chat(config: ProviderConfig, context: Context) -> Result<Response, Error> {
    let request = build_request(&config, context, false);
    let response = send(&config, &request).await?;

    let anthropic_response: AnthropicResponse = response
        .json()
        .await
        .map_err(|e| Error::new("anthropic", format!("Failed to parse response: {}", e)))?;

    // Extract text from content blocks
    let content: String = anthropic_response
        .content
        .into_iter()
        .filter(|block| block.content_type == "text")
        .map(|block| block.text)
        .collect();

    let usage = &anthropic_response.usage;
    Ok(Response {
        content,
        model: anthropic_response.model,
        usage: TokenUsage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
        },
        truncated: anthropic_response.stop_reason.as_deref() == Some("max_tokens"),
    })
}

/// Execute a streamed chat request, forwarding `text_delta` events
pub async fn chat_stream(
    config: ProviderConfig,
    context: Context,
    on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
) -> Result<Response, Error> {
    let request = build_request(&config, context, true);
    let mut result = Response {
        model: request.model.clone(),
        ..Default::default()
    };

    let response = send(&config, &request).await?;
    let mut bytes = response.bytes_stream();
    let mut sse = SseBuffer::default();

    while let Some(chunk) = bytes.next().await {
        let chunk =
            chunk.map_err(|e| Error::new("anthropic", format!("Stream interrupted: {}", e)))?;

        for payload in sse.push(&chunk) {
            let Ok(event) = serde_json::from_str::<serde_json::Value>(&payload) else {
                tracing::debug!("Skipping unparseable stream event: {}", payload);
                continue;
            };
            match event.get("type").and_then(|t| t.as_str()).unwrap_or_default() {
                "message_start" => {
                    if let Some(tokens) = event
                        .pointer("/message/usage/input_tokens")
                        .and_then(|v| v.as_u64())
                    {
                        result.usage.prompt_tokens = tokens as u32;
                    }
                }
                "content_block_delta" => {
                    if let Some(text) = event.pointer("/delta/text").and_then(|t| t.as_str()) {
                        on_chunk(text);
                        result.content.push_str(text);
                    }
                }
                "message_delta" => {
                    if let Some(reason) = event.pointer("/delta/stop_reason").and_then(|r| r.as_str()) {
                        result.truncated = reason == "max_tokens";
                    }
                    if let Some(tokens) = event
                        .pointer("/usage/output_tokens")
                        .and_then(|v| v.as_u64())
                    {
                        result.usage.completion_tokens = tokens as u32;
                    }
                }
                "error" => {
                    let message = event
                        .pointer("/error/message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("unknown stream error");
                    return Err(Error::new("anthropic", message));
                }
                _ => {}
            }
        }
    }

    result.usage.total_tokens = result.usage.prompt_tokens + result.usage.completion_tokens;
    Ok(result)
}
