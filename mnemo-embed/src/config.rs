//! Configuration for embedding backends

use crate::error::{EmbedError, Result};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_REMOTE_MODEL: &str = "text-embedding-ada-002";

/// The embedding backend to run.
///
/// Each variant declares a fixed output dimension. Switching variants at
/// runtime changes the dimension, which the retrieval engine detects and
/// repairs lazily by regenerating stored vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbedBackend {
    /// all-MiniLM-L6-v2, in-process ONNX inference, 384 dimensions
    MiniLm,
    /// bge-base-en-v1.5, in-process ONNX inference, 768 dimensions
    BgeBase,
    /// OpenAI-compatible embeddings API, 1536 dimensions
    Remote,
}

impl EmbedBackend {
    /// Declared output dimension of this backend.
    pub fn dimension(&self) -> usize {
        match self {
            EmbedBackend::MiniLm => 384,
            EmbedBackend::BgeBase => 768,
            EmbedBackend::Remote => 1536,
        }
    }

    /// Short identifier used in logs and status output.
    pub fn name(&self) -> &'static str {
        match self {
            EmbedBackend::MiniLm => "mini-lm",
            EmbedBackend::BgeBase => "bge-base",
            EmbedBackend::Remote => "remote",
        }
    }

    /// Whether this backend runs in-process.
    pub fn is_local(&self) -> bool {
        !matches!(self, EmbedBackend::Remote)
    }
}

/// Configuration for an embedding backend.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct EmbedConfig {
    /// Which backend to run
    pub backend: EmbedBackend,
    /// API key for the remote backend
    #[builder(default)]
    pub api_key: Option<String>,
    /// Endpoint for the remote backend
    #[builder(default = r#"DEFAULT_API_URL.to_string()"#)]
    pub api_url: String,
    /// Model name sent in remote embedding requests
    #[builder(default = r#"DEFAULT_REMOTE_MODEL.to_string()"#)]
    pub remote_model: String,
    /// Whether to L2-normalize local embeddings
    #[builder(default = "true")]
    pub normalize: bool,
    /// Cache directory for local model artifacts (backend default when unset)
    #[builder(default)]
    pub cache_dir: Option<PathBuf>,
}

impl EmbedConfig {
    /// Create a new embedding configuration using the builder.
    pub fn builder() -> EmbedConfigBuilder {
        EmbedConfigBuilder::default()
    }

    /// Configuration for the all-MiniLM-L6-v2 local backend.
    pub fn mini_lm() -> Self {
        EmbedConfigBuilder::default()
            .backend(EmbedBackend::MiniLm)
            .build()
            .expect("MiniLm config should always build")
    }

    /// Configuration for the bge-base-en-v1.5 local backend.
    pub fn bge_base() -> Self {
        EmbedConfigBuilder::default()
            .backend(EmbedBackend::BgeBase)
            .build()
            .expect("BgeBase config should always build")
    }

    /// Configuration for the remote backend with the given API key.
    pub fn remote(api_key: impl Into<String>) -> Self {
        EmbedConfigBuilder::default()
            .backend(EmbedBackend::Remote)
            .api_key(Some(api_key.into()))
            .build()
            .expect("remote config should always build")
    }

    /// Set the local model cache directory (builder style).
    pub fn with_cache_dir(self, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: Some(cache_dir.into()),
            ..self
        }
    }

    /// Set the remote endpoint (builder style).
    pub fn with_api_url(self, api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..self
        }
    }

    /// Declared output dimension for the configured backend.
    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    /// Validate that the configuration is complete for its backend.
    pub fn validate(&self) -> Result<()> {
        if self.backend == EmbedBackend::Remote {
            match self.api_key.as_deref() {
                Some(key) if !key.is_empty() => {}
                _ => return Err(EmbedError::MissingCredential),
            }
            if self.api_url.is_empty() {
                return Err(EmbedError::invalid_config("remote API URL is empty"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_dimensions() {
        assert_eq!(EmbedBackend::MiniLm.dimension(), 384);
        assert_eq!(EmbedBackend::BgeBase.dimension(), 768);
        assert_eq!(EmbedBackend::Remote.dimension(), 1536);
    }

    #[test]
    fn test_local_config_defaults() {
        let config = EmbedConfig::mini_lm();
        assert_eq!(config.backend, EmbedBackend::MiniLm);
        assert!(config.backend.is_local());
        assert!(config.normalize);
        assert!(config.api_key.is_none());
        assert!(config.cache_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_remote_config_requires_key() {
        let config = EmbedConfig::builder()
            .backend(EmbedBackend::Remote)
            .build()
            .unwrap();
        assert!(matches!(
            config.validate(),
            Err(EmbedError::MissingCredential)
        ));

        let config = EmbedConfig::remote("");
        assert!(matches!(
            config.validate(),
            Err(EmbedError::MissingCredential)
        ));

        let config = EmbedConfig::remote("sk-test");
        assert!(config.validate().is_ok());
        assert_eq!(config.remote_model, DEFAULT_REMOTE_MODEL);
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_builder_overrides() {
        let config = EmbedConfig::remote("sk-test")
            .with_api_url("http://localhost:8080/v1/embeddings")
            .with_cache_dir("/tmp/mnemo-models");

        assert_eq!(config.api_url, "http://localhost:8080/v1/embeddings");
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/mnemo-models")));
    }
}
