//! Text completion capability and its OpenAI-compatible chat adapter.

use crate::config::Config;
use crate::error::ServiceError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, ServiceError>;
}

pub struct OpenAiChatModel {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChatModel {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.base_url.as_str(),
            config.api_key.as_str(),
            config.completion_model.as_str(),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, ServiceError> {
        tracing::debug!(
            model = %self.model,
            prompt_chars = prompt.len(),
            temperature,
            "requesting completion"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": prompt }],
                "temperature": temperature,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::BackendResponse {
                backend: "chat-completions".to_string(),
                details: format!("{status}: {body}"),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ServiceError::BackendResponse {
                backend: "chat-completions".to_string(),
                details: "response had no message content".to_string(),
            })
    }
}
