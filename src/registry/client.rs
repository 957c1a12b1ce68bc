//! EDINET registry API client.
//!
//! Fetches per-date filing lists and document binaries over HTTP.
//! The registry sometimes reports errors inside an HTTP 200 body, so
//! responses are checked twice: once for the HTTP status and once for
//! the internal status embedded in the JSON payload.

use crate::models::{DownloadKind, Filing};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Retry attempts for transient server errors.
const MAX_ATTEMPTS: u32 = 3;
/// Initial backoff delay; doubles per attempt, capped at 60s.
const BASE_DELAY_SECS: u64 = 4;

/// Errors produced by registry calls.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Invalid or missing API key. Fatal, never retried.
    #[error("registry authentication failed [{status}] at {endpoint}: {message}")]
    Authentication {
        status: u16,
        message: String,
        endpoint: String,
    },

    /// The requested date or document does not exist.
    #[error("registry resource not found [{status}] at {endpoint}: {message}")]
    NotFound {
        status: u16,
        message: String,
        endpoint: String,
    },

    /// Server-side failure. Transient; the client retries these.
    #[error("registry server error [{status}] at {endpoint}: {message}")]
    Server {
        status: u16,
        message: String,
        endpoint: String,
    },

    /// Any other non-success status reported by the registry.
    #[error("registry API error [{status}] at {endpoint}: {message}")]
    Api {
        status: u16,
        message: String,
        endpoint: String,
    },

    /// Transport-level failure (connect, timeout, decode).
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl RegistryError {
    /// Maps a status code to the error taxonomy.
    fn from_status(status: u16, message: String, endpoint: &str) -> Self {
        let endpoint = endpoint.to_string();
        match status {
            401 => RegistryError::Authentication {
                status,
                message,
                endpoint,
            },
            404 => RegistryError::NotFound {
                status,
                message,
                endpoint,
            },
            s if s >= 500 => RegistryError::Server {
                status,
                message,
                endpoint,
            },
            _ => RegistryError::Api {
                status,
                message,
                endpoint,
            },
        }
    }

    /// True when a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::Server { .. })
    }
}

/// Capability seam: list filings submitted on one date.
#[async_trait]
pub trait FilingLister: Send + Sync {
    async fn filings_for_date(&self, date: NaiveDate) -> Result<Vec<Filing>, RegistryError>;
}

/// Capability seam: fetch one document's binary content.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, doc_id: &str, kind: DownloadKind) -> Result<Vec<u8>, RegistryError>;
}

/// Settings needed to construct an [`EdinetClient`].
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub base_url: String,
    pub api_key: String,
    pub timeout_seconds: u64,
}

/// HTTP client for the EDINET document API.
pub struct EdinetClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    results: Option<Vec<Filing>>,
}

impl EdinetClient {
    /// Create a client with the given registry settings.
    pub fn new(options: RegistryOptions) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            api_key: options.api_key,
        })
    }

    /// Fetch the full filing list for one submission date.
    pub async fn list_filings(&self, date: NaiveDate) -> Result<Vec<Filing>, RegistryError> {
        let endpoint = "/documents.json";
        let body = self
            .get_with_retry(endpoint, &[
                ("date", date.format("%Y-%m-%d").to_string()),
                ("type", "2".to_string()),
            ])
            .await?;

        let value: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
            RegistryError::Api {
                status: 0,
                message: format!("invalid JSON in list response: {}", e),
                endpoint: endpoint.to_string(),
            }
        })?;
        check_internal_status(&value, endpoint)?;

        let response: ListResponse =
            serde_json::from_value(value).map_err(|e| RegistryError::Api {
                status: 0,
                message: format!("unexpected list response shape: {}", e),
                endpoint: endpoint.to_string(),
            })?;

        let filings = response.results.unwrap_or_default();
        debug!("Listed {} filings for {}", filings.len(), date);
        Ok(filings)
    }

    /// Download one document in the requested format.
    pub async fn fetch_document(
        &self,
        doc_id: &str,
        kind: DownloadKind,
    ) -> Result<Vec<u8>, RegistryError> {
        let endpoint = format!("/documents/{}", doc_id);
        let body = self
            .get_with_retry(&endpoint, &[("type", kind.code().to_string())])
            .await?;

        // The registry signals per-document errors as a JSON body even
        // under HTTP 200. Binary payloads never start with '{'.
        if body.first() == Some(&b'{') {
            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&body) {
                check_internal_status(&value, &endpoint)?;
                return Err(RegistryError::Api {
                    status: 0,
                    message: "unexpected JSON response for document download".to_string(),
                    endpoint,
                });
            }
        }

        debug!("Fetched {} ({} bytes)", doc_id, body.len());
        Ok(body)
    }

    /// GET with bounded retry on transient server errors.
    async fn get_with_retry(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<u8>, RegistryError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.get_once(endpoint, query).await {
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    let delay = (BASE_DELAY_SECS << (attempt - 1)).min(60);
                    warn!(
                        "Transient registry error on {} (attempt {}): {}. Retrying in {}s",
                        endpoint, attempt, e, delay
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                }
                other => return other,
            }
        }
    }

    async fn get_once(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<u8>, RegistryError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .http
            .get(&url)
            .query(query)
            .query(&[("Subscription-Key", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(RegistryError::from_status(status.as_u16(), message, endpoint));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl FilingLister for EdinetClient {
    async fn filings_for_date(&self, date: NaiveDate) -> Result<Vec<Filing>, RegistryError> {
        self.list_filings(date).await
    }
}

#[async_trait]
impl DocumentFetcher for EdinetClient {
    async fn fetch(&self, doc_id: &str, kind: DownloadKind) -> Result<Vec<u8>, RegistryError> {
        self.fetch_document(doc_id, kind).await
    }
}

/// Check the internal status the registry embeds in 200-OK JSON bodies.
///
/// Two formats exist: a top-level `statusCode` integer, and a nested
/// `metadata.status` string.
fn check_internal_status(value: &serde_json::Value, endpoint: &str) -> Result<(), RegistryError> {
    if let Some(code) = value.get("statusCode").and_then(|c| c.as_u64()) {
        if code != 200 {
            let message = value
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error")
                .to_string();
            return Err(RegistryError::from_status(code as u16, message, endpoint));
        }
    }

    if let Some(metadata) = value.get("metadata") {
        let status = metadata.get("status").and_then(|s| s.as_str()).unwrap_or("200");
        if status != "200" {
            let code: u16 = status.parse().unwrap_or(0);
            let message = metadata
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error")
                .to_string();
            return Err(RegistryError::from_status(code, message, endpoint));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_taxonomy_from_status() {
        let auth = RegistryError::from_status(401, "bad key".into(), "/documents.json");
        assert!(matches!(auth, RegistryError::Authentication { .. }));
        assert!(!auth.is_transient());

        let not_found = RegistryError::from_status(404, "no data".into(), "/documents.json");
        assert!(matches!(not_found, RegistryError::NotFound { .. }));

        let server = RegistryError::from_status(503, "busy".into(), "/documents.json");
        assert!(matches!(server, RegistryError::Server { .. }));
        assert!(server.is_transient());

        let other = RegistryError::from_status(429, "slow down".into(), "/documents.json");
        assert!(matches!(other, RegistryError::Api { .. }));
        assert!(!other.is_transient());
    }

    #[test]
    fn test_internal_status_top_level() {
        let value: serde_json::Value =
            serde_json::from_str(r#"{"statusCode": 401, "message": "invalid key"}"#).unwrap();
        let err = check_internal_status(&value, "/documents.json").unwrap_err();
        assert!(matches!(err, RegistryError::Authentication { .. }));
    }

    #[test]
    fn test_internal_status_nested_metadata() {
        let value: serde_json::Value =
            serde_json::from_str(r#"{"metadata": {"status": "404", "message": "no documents"}}"#)
                .unwrap();
        let err = check_internal_status(&value, "/documents.json").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[test]
    fn test_internal_status_ok() {
        let value: serde_json::Value = serde_json::from_str(
            r#"{"metadata": {"status": "200", "message": "OK"}, "results": []}"#,
        )
        .unwrap();
        assert!(check_internal_status(&value, "/documents.json").is_ok());
    }

    #[test]
    fn test_error_message_names_endpoint() {
        let err = RegistryError::from_status(500, "boom".into(), "/documents/S100ABCD");
        let text = err.to_string();
        assert!(text.contains("/documents/S100ABCD"));
        assert!(text.contains("500"));
    }
}
