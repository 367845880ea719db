//! # LLM Client
//!
//! Provides the `Client` struct, which acts as the main entry point for LLM interactions.
//! It routes requests to the configured provider and stitches together responses
//! that were cut off by the token limit.

use async_trait::async_trait;
use std::path::Path;

use crate::domain::config::LlmConfig;
use crate::domain::traits::LlmProvider;
use crate::infrastructure::llm::providers;
use crate::infrastructure::llm::{Context, Error, ImageData, Message, Provider, Response};

const CONTINUE_PROMPT: &str =
    "Your previous answer was cut off. Continue exactly where you stopped, without repeating anything.";

/// Simple LLM client
pub struct Client {
    config: LlmConfig,
    provider: Provider,
}

impl Client {
    /// Create a new client from the `llm` configuration section
    pub fn new(config: LlmConfig) -> Result<Self, Error> {
        let provider = Provider::from_str(&config.provider)
            .ok_or_else(|| Error::new(&config.provider, "Unknown provider"))?;
        Ok(Self { config, provider })
    }

    fn context_for(&self, message: Message) -> Context {
        Context::new()
            .add_message(message)
            .with_max_tokens(self.config.max_tokens)
    }

    /// Sends `context`, asking for continuations while the provider reports truncation.
    async fn complete(
        &self,
        mut context: Context,
        mut on_chunk: Option<&mut (dyn for<'a> FnMut(&'a str) + Send)>,
    ) -> Result<String, Error> {
        let provider_config = providers::ProviderConfig::from_llm_config(&self.config, self.provider)?;
        let mut full = String::new();
        let mut continuations = 0;

        loop {
            let response: Response = match on_chunk.as_deref_mut() {
                Some(callback) => {
                    providers::chat_stream(self.provider, provider_config.clone(), context.clone(), callback)
                        .await?
                }
                None => providers::chat(self.provider, provider_config.clone(), context.clone()).await?,
            };

            tracing::debug!(
                model = %response.model,
                prompt_tokens = response.usage.prompt_tokens,
                completion_tokens = response.usage.completion_tokens,
                truncated = response.truncated,
                "LLM response received"
            );
            full.push_str(&response.content);

            if !response.truncated || continuations >= self.config.max_continuations {
                if response.truncated {
                    tracing::warn!(
                        "Response still truncated after {} continuations",
                        continuations
                    );
                }
                return Ok(full);
            }

            continuations += 1;
            tracing::info!("Response truncated, requesting continuation {}", continuations);
            context = context
                .add_assistant_message(response.content)
                .add_user_message(CONTINUE_PROMPT);
        }
    }
}

#[async_trait]
impl LlmProvider for Client {
    async fn call(&self, prompt: &str) -> Result<String, Error> {
        self.complete(self.context_for(Message::user(prompt)), None).await
    }

    async fn stream(
        &self,
        prompt: &str,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, Error> {
        self.complete(self.context_for(Message::user(prompt)), Some(on_chunk))
            .await
    }

    async fn call_vision(&self, prompt: &str, image_path: &Path) -> Result<String, Error> {
        let image = ImageData::from_file(image_path).map_err(|e| {
            Error::new(
                self.provider.as_str(),
                format!("Failed to read image {}: {}", image_path.display(), e),
            )
        })?;
        self.complete(
            self.context_for(Message::user(prompt).with_image(image)),
            None,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!(Provider::from_str("anthropic"), Some(Provider::Anthropic));
        assert_eq!(Provider::from_str("Claude"), Some(Provider::Anthropic));
        assert_eq!(Provider::from_str("openai"), Some(Provider::OpenAI));
        assert_eq!(Provider::from_str("unknown"), None);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = LlmConfig {
            provider: "nope".into(),
            ..Default::default()
        };
        assert!(Client::new(config).is_err());
    }

    #[tokio::test]
    async fn test_missing_key_is_api_error() {
        let config = LlmConfig {
            api_key_env: Some("DEVPILOT_TEST_KEY_THAT_IS_NOT_SET".into()),
            ..Default::default()
        };
        let client = Client::new(config).unwrap();
        let err = client.call("hi").await.unwrap_err();
        assert!(err.message.contains("DEVPILOT_TEST_KEY_THAT_IS_NOT_SET"));
    }
}
