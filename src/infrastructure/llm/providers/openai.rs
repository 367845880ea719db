//! OpenAI-compatible API provider
//!
//! Supports OpenAI and any endpoint speaking the chat completions protocol.

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ProviderConfig, SseBuffer, error_message};
use crate::infrastructure::llm::{Context, Error, Message, Response, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

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
        .map_err(|e| Error::new("openai", format!("Failed to create HTTP client: {}", e)))?;
    Ok(CLIENT.get_or_init(|| client))
}

/// OpenAI API request format
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: OpenAIContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAIPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

/// OpenAI API response format
#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

fn convert_message(msg: Message) -> OpenAIMessage {
    let content = match msg.image {
        Some(image) => OpenAIContent::Parts(vec![
            OpenAIPart::Text { text: msg.content },
            OpenAIPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{};base64,{}", image.media_type, image.data),
                },
            },
        ]),
        None => OpenAIContent::Text(msg.content),
    };
    OpenAIMessage {
        role: msg.role.as_str().to_string(),
        content,
    }
}

fn build_request(config: &ProviderConfig, context: Context, stream: bool) -> OpenAIRequest {
    let model = context.model.unwrap_or_else(|| {
        if config.default_model.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            config.default_model.clone()
        }
    });

    OpenAIRequest {
        model,
        messages: context.messages.into_iter().map(convert_message).collect(),
        temperature: context.temperature,
        max_tokens: context.max_tokens,
        stream,
    }
}

async fn send(config: &ProviderConfig, request: &OpenAIRequest) -> Result<reqwest::Response, Error> {
    let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
    let url = format!("{}/chat/completions", base_url);

    let mut request_builder = http_client()?
        .post(&url)
        .header("Authorization", format!("Bearer {}", config.api_key))
        .header("Content-Type", "application/json")
        .json(request);

    if let Some(timeout_secs) = config.timeout {
        request_builder = request_builder.timeout(std::time::Duration::from_secs(timeout_secs));
    }

    let response = request_builder
        .send()
        .await
        .map_err(|e| Error::new("openai", format!("HTTP request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());
        return Err(Error::new("openai", error_message(status, &error_text)));
    }

    Ok(response)
}

/// Execute a chat request using OpenAI-compatible API
pub async fn chat(config: ProviderConfig, context: Context) -> Result<Response, Error> {
    let request = build_request(&config, context, false);
    let response = send(&config, &request).await?;

    let openai_response: OpenAIResponse = response
        .json()
        .await
        .map_err(|e| Error::new("openai", format!("Failed to parse response: {}", e)))?;

    let Some(choice) = openai_response.choices.into_iter().next() else {
        return Err(Error::new("openai", "No choices in response"));
    };

    let usage = openai_response
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    Ok(Response {
        content: choice.message.content.unwrap_or_default(),
        model: openai_response.model,
        usage,
        truncated: choice.finish_reason.as_deref() == Some("length"),
    })
}

/// Execute a streamed chat request, forwarding `delta.content` fragments
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
        let chunk = chunk.map_err(|e| Error::new("openai", format!("Stream interrupted: {}", e)))?;

        for payload in sse.push(&chunk) {
            let Ok(event) = serde_json::from_str::<serde_json::Value>(&payload) else {
                tracing::debug!("Skipping unparseable stream event: {}", payload);
                continue;
            };
            if let Some(text) = event
                .pointer("/choices/0/delta/content")
                .and_then(|t| t.as_str())
            {
                on_chunk(text);
                result.content.push_str(text);
            }
            if let Some(reason) = event
                .pointer("/choices/0/finish_reason")
                .and_then(|r| r.as_str())
            {
                result.truncated = reason == "length";
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::llm::ImageData;

    #[test]
    fn test_plain_message_is_string_content() {
        let json = serde_json::to_value(convert_message(Message::user("hello"))).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn test_image_message_uses_data_url() {
        let msg = Message::user("describe").with_image(ImageData {
            media_type: "image/jpeg".into(),
            data: "Zm9v".into(),
        });
        let json = serde_json::to_value(convert_message(msg)).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/jpeg;base64,Zm9v");
    }
}
