//! Embedding provider trait and the local in-process backends

use crate::config::{EmbedBackend, EmbedConfig};
use crate::error::{EmbedError, Result};
use crate::remote::RemoteProvider;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

/// A backend that turns text into fixed-length vectors.
///
/// Implementations are not required to tolerate concurrent `embed_text`
/// calls; the retrieval engine serializes every call through its worker.
/// `initialize` must be called before the first embed and is idempotent.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Load whatever the backend needs before the first embed call.
    async fn initialize(&mut self) -> Result<()>;

    /// Generate an embedding for a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Output dimension of this backend.
    fn dimension(&self) -> usize;

    /// Short identifier for logs and status output.
    fn provider_name(&self) -> &str;

    /// Release backend resources. The provider cannot embed afterwards.
    fn shutdown(&mut self) {}
}

/// Build the provider for a configuration.
///
/// The returned provider is not yet initialized; callers decide where the
/// (potentially slow) model load runs.
pub fn create_provider(config: EmbedConfig) -> Result<Box<dyn EmbeddingProvider>> {
    config.validate()?;
    match config.backend {
        EmbedBackend::MiniLm | EmbedBackend::BgeBase => Ok(Box::new(LocalProvider::new(config))),
        EmbedBackend::Remote => Ok(Box::new(RemoteProvider::new(config)?)),
    }
}

/// In-process embedding backend over a fastembed ONNX model.
///
/// The model is loaded once on `initialize` and held behind a mutex because
/// fastembed's `embed` takes `&mut self`. Inference is blocking, so it runs
/// under `spawn_blocking` to keep the async runtime responsive.
pub struct LocalProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: usize,
}

impl std::fmt::Debug for LocalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProvider")
            .field("backend", &self.config.backend)
            .field("model", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl LocalProvider {
    /// Creates a new uninitialized provider for a local backend config.
    pub fn new(config: EmbedConfig) -> Self {
        let dimension = config.backend.dimension();
        Self {
            config,
            model: None,
            dimension,
        }
    }

    fn fastembed_model(&self) -> Result<EmbeddingModel> {
        match self.config.backend {
            EmbedBackend::MiniLm => Ok(EmbeddingModel::AllMiniLML6V2),
            EmbedBackend::BgeBase => Ok(EmbeddingModel::BGEBaseENV15),
            EmbedBackend::Remote => Err(EmbedError::invalid_config(
                "remote backend cannot run in-process",
            )),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    async fn initialize(&mut self) -> Result<()> {
        if self.model.is_some() {
            return Ok(());
        }

        tracing::info!(
            backend = self.config.backend.name(),
            "loading local embedding model"
        );

        let model_enum = self.fastembed_model()?;
        let cache_dir = self.config.cache_dir.clone();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                let mut options =
                    InitOptions::new(model_enum).with_show_download_progress(false);
                if let Some(dir) = cache_dir {
                    options = options.with_cache_dir(dir);
                }

                let mut model = TextEmbedding::try_new(options)
                    .map_err(|e| EmbedError::ProviderInit { source: e.into() })?;

                // Probe the real output dimension with a test embedding.
                let probe = model
                    .embed(vec!["dimension probe"], None)
                    .map_err(|e| EmbedError::ProviderInit { source: e.into() })?;
                let dimension = probe
                    .first()
                    .map(|e| e.len())
                    .ok_or_else(|| EmbedError::provider_init("model produced no probe embedding"))?;

                Ok((model, dimension))
            })
            .await??;

        if dimension != self.dimension {
            tracing::warn!(
                declared = self.dimension,
                probed = dimension,
                "model dimension differs from declared dimension, adopting probed value"
            );
        }
        self.dimension = dimension;
        self.model = Some(Arc::new(Mutex::new(model)));

        tracing::info!(
            backend = self.config.backend.name(),
            dimension = self.dimension,
            "local embedding model loaded"
        );
        Ok(())
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.model.as_ref().ok_or_else(|| {
            EmbedError::invalid_config("model not initialized, call initialize() first")
        })?;

        let model = Arc::clone(model);
        let text = text.to_string();
        let mut embedding = tokio::task::spawn_blocking(move || -> Result<Vec<f32>> {
            let mut guard = model
                .lock()
                .map_err(|_| EmbedError::embedding("model mutex poisoned"))?;
            let mut embeddings = guard
                .embed(vec![text], None)
                .map_err(|e| EmbedError::Embedding { source: e.into() })?;
            embeddings
                .pop()
                .ok_or_else(|| EmbedError::embedding("model returned no embedding"))
        })
        .await??;

        if self.config.normalize {
            l2_normalize(&mut embedding);
        }
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        self.config.backend.name()
    }

    fn shutdown(&mut self) {
        if self.model.take().is_some() {
            tracing::debug!(
                backend = self.config.backend.name(),
                "released local embedding model"
            );
        }
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_provider_creation() {
        let provider = LocalProvider::new(EmbedConfig::mini_lm());
        assert_eq!(provider.provider_name(), "mini-lm");
        assert_eq!(provider.dimension(), 384);

        let provider = LocalProvider::new(EmbedConfig::bge_base());
        assert_eq!(provider.provider_name(), "bge-base");
        assert_eq!(provider.dimension(), 768);
    }

    #[tokio::test]
    async fn test_embed_before_initialize_fails() {
        let provider = LocalProvider::new(EmbedConfig::mini_lm());
        let result = provider.embed_text("hello").await;
        assert!(matches!(result, Err(EmbedError::InvalidConfig { .. })));
    }

    #[test]
    fn test_factory_rejects_remote_without_key() {
        let config = EmbedConfig::builder()
            .backend(EmbedBackend::Remote)
            .build()
            .unwrap();
        assert!(matches!(
            create_provider(config),
            Err(EmbedError::MissingCredential)
        ));
    }

    #[test]
    fn test_factory_builds_each_backend() {
        let local = create_provider(EmbedConfig::mini_lm()).unwrap();
        assert_eq!(local.provider_name(), "mini-lm");

        let remote = create_provider(EmbedConfig::remote("sk-test")).unwrap();
        assert_eq!(remote.provider_name(), "remote");
        assert_eq!(remote.dimension(), 1536);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        // Zero vectors are left untouched.
        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[tokio::test]
    #[ignore = "requires model download"]
    async fn test_minilm_download_and_embedding() -> Result<()> {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();

        let temp_dir = tempfile::tempdir().map_err(|e| EmbedError::Io { source: e })?;
        let config = EmbedConfig::mini_lm().with_cache_dir(temp_dir.path());

        let mut provider = LocalProvider::new(config);
        provider.initialize().await?;
        assert_eq!(provider.dimension(), 384);

        let embedding = provider.embed_text("semantic retrieval over notes").await?;
        assert_eq!(embedding.len(), 384);
        assert!(embedding.iter().any(|&x| x != 0.0));
        assert!(embedding.iter().all(|&x| x.is_finite()));

        // Normalized output: unit L2 norm.
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);

        Ok(())
    }
}
