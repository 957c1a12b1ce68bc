//! OpenAI-compatible chat completions provider.
//!
//! Works against api.openai.com or any server speaking the same
//! protocol. Structured output uses JSON mode with the schema inlined
//! into the prompt; vision prompts send the image as a data URL part.

use crate::llm::{strip_code_fences, LlmProvider, ProviderError, ProviderOptions};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub struct OpenAiProvider {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    timeout_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    /// Either a plain string or an array of content parts.
    content: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(options: &ProviderOptions) -> anyhow::Result<Self> {
        let api_key = options
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("openai provider requires an API key"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            model: options.model.clone(),
            api_key,
            temperature: options.temperature,
            timeout_seconds: options.timeout_seconds,
        })
    }

    fn error(&self, message: String) -> ProviderError {
        ProviderError {
            provider: "openai".to_string(),
            model: self.model.clone(),
            message,
        }
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!("OpenAI chat request to {} (model {})", url, self.model);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    self.error(format!("request timed out after {}s", self.timeout_seconds))
                } else if e.is_connect() {
                    self.error(format!("cannot connect to {}", self.base_url))
                } else {
                    self.error(format!("request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.error(format!("API error {}: {}", status, body)));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| self.error(format!("failed to parse response: {}", e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| self.error("response contained no choices".to_string()))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_structured(
        &self,
        prompt: &str,
        schema: &Value,
    ) -> Result<Value, ProviderError> {
        // JSON mode guarantees syntax; the schema rides in the prompt
        // so the model knows the expected shape.
        let full_prompt = format!(
            "{}\n\nRespond with a single JSON object conforming to this JSON schema:\n{}",
            prompt, schema
        );

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Value::String(full_prompt),
            }],
            temperature: self.temperature,
            response_format: Some(json!({"type": "json_object"})),
        };

        let content = self.chat(&request).await?;
        serde_json::from_str(strip_code_fences(&content))
            .map_err(|e| self.error(format!("response is not valid JSON: {}", e)))
    }

    async fn complete_vision(
        &self,
        prompt: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, ProviderError> {
        let data_url = format!("data:{};base64,{}", mime_type, BASE64.encode(image));

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: json!([
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": data_url}},
                ]),
            }],
            temperature: self.temperature,
            response_format: None,
        };

        self.chat(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderKind;

    fn options(api_key: Option<&str>) -> ProviderOptions {
        ProviderOptions {
            kind: ProviderKind::Openai,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: api_key.map(String::from),
            temperature: 0.1,
            timeout_seconds: 120,
        }
    }

    #[test]
    fn test_requires_api_key() {
        assert!(OpenAiProvider::new(&options(None)).is_err());
        assert!(OpenAiProvider::new(&options(Some("sk-test"))).is_ok());
    }

    #[test]
    fn test_vision_message_shape() {
        let data_url = format!("data:image/jpeg;base64,{}", BASE64.encode(b"fakejpeg"));
        let content = json!([
            {"type": "text", "text": "extract"},
            {"type": "image_url", "image_url": {"url": data_url}},
        ]);
        assert_eq!(content[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"), true);
    }
}
