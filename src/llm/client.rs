use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use std::time::Duration;

use crate::config::Config;
use crate::error::LlmError;

const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that summarizes Discord channel conversations.";

/// Client for the OpenAI-compatible summarization backend.
pub struct LlmClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_base(&config.llm_url);

        if let Some(key) = &config.llm_api_key {
            openai_config = openai_config.with_api_key(key);
        } else {
            openai_config = openai_config.with_api_key("unused");
        }

        Self {
            client: Client::with_config(openai_config),
            model: config.llm_model.clone(),
            timeout: Duration::from_secs(config.llm_timeout_secs),
        }
    }

    /// One summarization call: prompt in, digest text out. Exceeding the
    /// configured timeout is a backend failure, not a hang; the caller owns
    /// any retry policy.
    pub async fn summarize(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_tokens(max_tokens)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(SYSTEM_PROMPT)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(LlmError::classify)?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::Malformed("empty completion".to_string()));
        }

        Ok(content)
    }
}
