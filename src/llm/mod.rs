//! Text-completion providers.
//!
//! The pipeline talks to one [`LlmProvider`] chosen once at startup.
//! Providers expose two operations: schema-constrained structured
//! completion for the analysis aspects, and vision completion for
//! image-based text extraction.

pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Failure from a text-generation provider, naming the offender.
#[derive(Debug, Error)]
#[error("provider error [{provider}/{model}]: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub model: String,
    pub message: String,
}

/// Which provider implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local Ollama server.
    #[default]
    Ollama,
    /// OpenAI-compatible chat completions endpoint.
    Openai,
}

/// Settings shared by all provider implementations.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub kind: ProviderKind,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

/// A text-generation capability.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    /// Complete a prompt into a JSON value conforming to `schema`.
    async fn complete_structured(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Complete a prompt over an image into plain text.
    async fn complete_vision(
        &self,
        prompt: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, ProviderError>;
}

/// Run a structured completion and deserialize into `T`.
pub async fn complete_typed<T>(provider: &dyn LlmProvider, prompt: &str) -> Result<T, ProviderError>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = serde_json::to_value(schemars::schema_for!(T)).map_err(|e| ProviderError {
        provider: provider.provider_name().to_string(),
        model: provider.model_name().to_string(),
        message: format!("failed to build output schema: {}", e),
    })?;

    let value = provider.complete_structured(prompt, &schema).await?;

    serde_json::from_value(value).map_err(|e| ProviderError {
        provider: provider.provider_name().to_string(),
        model: provider.model_name().to_string(),
        message: format!("structured output did not match schema: {}", e),
    })
}

/// Construct the configured provider. Called once at startup; the
/// pipeline only ever sees the trait object.
pub fn create_provider(options: &ProviderOptions) -> anyhow::Result<Arc<dyn LlmProvider>> {
    match options.kind {
        ProviderKind::Ollama => Ok(Arc::new(OllamaProvider::new(options)?)),
        ProviderKind::Openai => Ok(Arc::new(OpenAiProvider::new(options)?)),
    }
}

/// Strip a Markdown code fence if a model wrapped its JSON in one.
pub(crate) fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences(r#"{"a": 1}"#), r#"{"a": 1}"#);
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {} "), "{}");
    }

    #[test]
    fn test_provider_error_names_provider_and_model() {
        let err = ProviderError {
            provider: "ollama".to_string(),
            model: "llama3.2:latest".to_string(),
            message: "connection refused".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("ollama"));
        assert!(text.contains("llama3.2:latest"));
        assert!(text.contains("connection refused"));
    }
}
