use crate::error::ChatError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, ChatError>;
}

#[derive(Debug, Clone)]
pub struct OllamaSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub temperature: Option<f32>,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            temperature: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Ollama `/api/generate`, non-streaming.
pub struct OllamaChat {
    client: Client,
    endpoint: Url,
    model: String,
    temperature: Option<f32>,
}

impl OllamaChat {
    pub fn new(settings: &OllamaSettings, model: impl Into<String>) -> Result<Self, ChatError> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(ChatError::Init("model name is empty".to_string()));
        }

        let endpoint = Url::parse(&settings.base_url)
            .and_then(|base| base.join("api/generate"))
            .map_err(|error| {
                ChatError::Init(format!("invalid ollama url {:?}: {error}", settings.base_url))
            })?;

        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|error| ChatError::Init(format!("cannot build http client: {error}")))?;

        debug!(model = %model, endpoint = %endpoint, "initialized ollama chat model");

        Ok(Self {
            client,
            endpoint,
            model,
            temperature: settings.temperature,
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, ChatError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: self
                .temperature
                .map(|temperature| GenerateOptions { temperature }),
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let details = response.text().await.unwrap_or_default();
            return Err(ChatError::BackendResponse {
                backend: "ollama".to_string(),
                details: format!("{status}: {details}"),
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_model_name_fails_to_initialize() {
        let result = OllamaChat::new(&OllamaSettings::default(), "  ");
        assert!(matches!(result, Err(ChatError::Init(_))));
    }

    #[test]
    fn invalid_url_fails_to_initialize() {
        let settings = OllamaSettings {
            base_url: "not a url".to_string(),
            ..OllamaSettings::default()
        };
        let result = OllamaChat::new(&settings, "llama3.2");
        assert!(matches!(result, Err(ChatError::Init(message)) if message.contains("not a url")));
    }

    #[test]
    fn generate_endpoint_is_derived_from_base_url() -> Result<(), ChatError> {
        let chat = OllamaChat::new(&OllamaSettings::default(), "qwen2.5:7b")?;
        assert_eq!(chat.endpoint.as_str(), "http://localhost:11434/api/generate");
        assert_eq!(chat.model_name(), "qwen2.5:7b");
        Ok(())
    }

    #[test]
    fn temperature_is_only_sent_when_set() -> Result<(), serde_json::Error> {
        let without = serde_json::to_value(GenerateRequest {
            model: "llama3.2",
            prompt: "hi",
            stream: false,
            options: None,
        })?;
        assert!(without.get("options").is_none());

        let with = serde_json::to_value(GenerateRequest {
            model: "llama3.2",
            prompt: "hi",
            stream: false,
            options: Some(GenerateOptions { temperature: 0.0 }),
        })?;
        assert_eq!(with["options"]["temperature"], 0.0);
        Ok(())
    }
}
