//! Ollama chat provider.
//!
//! Structured output uses the chat API's `format` field, which takes a
//! JSON schema the server constrains decoding against. Vision prompts
//! attach base64 page images to the user message.

use crate::llm::{strip_code_fences, LlmProvider, ProviderError, ProviderOptions};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Client for a local or remote Ollama server.
pub struct OllamaProvider {
    http: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    timeout_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OllamaProvider {
    pub fn new(options: &ProviderOptions) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            model: options.model.clone(),
            temperature: options.temperature,
            timeout_seconds: options.timeout_seconds,
        })
    }

    fn error(&self, message: String) -> ProviderError {
        ProviderError {
            provider: "ollama".to_string(),
            model: self.model.clone(),
            message,
        }
    }

    fn map_request_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            self.error(format!("request timed out after {}s", self.timeout_seconds))
        } else if e.is_connect() {
            self.error(format!(
                "cannot connect to Ollama at {}. Is Ollama running?",
                self.base_url
            ))
        } else {
            self.error(format!("request failed: {}", e))
        }
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        debug!("Ollama chat request to {} (model {})", url, self.model);

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.error(format!("API error {}: {}", status, body)));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| self.error(format!("failed to parse response: {}", e)))?;

        Ok(chat_response.message.content)
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_structured(
        &self,
        prompt: &str,
        schema: &Value,
    ) -> Result<Value, ProviderError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
                images: None,
            }],
            stream: false,
            format: Some(schema.clone()),
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        let content = self.chat(&request).await?;
        serde_json::from_str(strip_code_fences(&content))
            .map_err(|e| self.error(format!("response is not valid JSON: {}", e)))
    }

    async fn complete_vision(
        &self,
        prompt: &str,
        image: &[u8],
        _mime_type: &str,
    ) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
                images: Some(vec![BASE64.encode(image)]),
            }],
            stream: false,
            format: None,
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        self.chat(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderKind;

    fn options() -> ProviderOptions {
        ProviderOptions {
            kind: ProviderKind::Ollama,
            model: "llama3.2:latest".to_string(),
            base_url: "http://localhost:11434/".to_string(),
            api_key: None,
            temperature: 0.1,
            timeout_seconds: 300,
        }
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let provider = OllamaProvider::new(&options()).unwrap();
        assert_eq!(provider.base_url, "http://localhost:11434");
        assert_eq!(provider.provider_name(), "ollama");
        assert_eq!(provider.model_name(), "llama3.2:latest");
    }

    #[test]
    fn test_request_serialization_skips_absent_fields() {
        let request = ChatRequest {
            model: "llama3.2:latest".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "hello".to_string(),
                images: None,
            }],
            stream: false,
            format: None,
            options: ChatOptions { temperature: 0.1 },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("format").is_none());
        assert!(json["messages"][0].get("images").is_none());
    }
}
