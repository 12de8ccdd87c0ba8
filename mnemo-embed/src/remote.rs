//! Remote HTTP embedding backend

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use crate::provider::EmbeddingProvider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedding backend over an OpenAI-compatible embeddings API.
///
/// Holds no model state; each `embed_text` is one synchronous HTTP round
/// trip from the worker's point of view. Network failures, non-2xx statuses
/// and malformed payloads all normalize to [`EmbedError`] values so callers
/// see a single failure mode.
#[derive(Debug)]
pub struct RemoteProvider {
    config: EmbedConfig,
    client: reqwest::Client,
    initialized: bool,
}

impl RemoteProvider {
    /// Creates a new uninitialized provider for a remote backend config.
    pub fn new(config: EmbedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            config,
            client,
            initialized: false,
        })
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(EmbedError::MissingCredential)
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteProvider {
    async fn initialize(&mut self) -> Result<()> {
        // No session to build; just confirm a credential is present.
        self.api_key()?;
        self.initialized = true;
        tracing::debug!(
            model = %self.config.remote_model,
            url = %self.config.api_url,
            "remote embedding backend ready"
        );
        Ok(())
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        if !self.initialized {
            return Err(EmbedError::invalid_config(
                "backend not initialized, call initialize() first",
            ));
        }
        let key = self.api_key()?;

        let request = EmbeddingRequest {
            model: &self.config.remote_model,
            input: text,
        };
        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(status = status.as_u16(), "embedding API request failed");
            return Err(EmbedError::RemoteStatus {
                status: status.as_u16(),
                body,
            });
        }

        let payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|_| EmbedError::malformed_response("body is not an embeddings payload"))?;
        extract_embedding(payload)
    }

    fn dimension(&self) -> usize {
        self.config.backend.dimension()
    }

    fn provider_name(&self) -> &str {
        "remote"
    }

    fn shutdown(&mut self) {
        self.initialized = false;
    }
}

fn extract_embedding(payload: EmbeddingResponse) -> Result<Vec<f32>> {
    let embedding = payload
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| EmbedError::malformed_response("response contained no embeddings"))?;
    if embedding.is_empty() {
        return Err(EmbedError::malformed_response(
            "response contained an empty embedding",
        ));
    }
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = EmbeddingRequest {
            model: "text-embedding-ada-002",
            input: "buy milk",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "text-embedding-ada-002");
        assert_eq!(json["input"], "buy milk");
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"data":[{"embedding":[0.1,0.2,0.3]}],"model":"text-embedding-ada-002"}"#;
        let payload: EmbeddingResponse = serde_json::from_str(body).unwrap();
        let embedding = extract_embedding(payload).unwrap();
        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_empty_response_is_malformed() {
        let payload: EmbeddingResponse = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert!(matches!(
            extract_embedding(payload),
            Err(EmbedError::MalformedResponse { .. })
        ));

        let payload: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[]}]}"#).unwrap();
        assert!(matches!(
            extract_embedding(payload),
            Err(EmbedError::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_initialize_requires_credential() {
        let config = EmbedConfig::builder()
            .backend(crate::config::EmbedBackend::Remote)
            .build()
            .unwrap();
        let mut provider = RemoteProvider::new(config).unwrap();
        assert!(matches!(
            provider.initialize().await,
            Err(EmbedError::MissingCredential)
        ));

        let mut provider = RemoteProvider::new(EmbedConfig::remote("sk-test")).unwrap();
        provider.initialize().await.unwrap();
        assert_eq!(provider.dimension(), 1536);
    }
}
