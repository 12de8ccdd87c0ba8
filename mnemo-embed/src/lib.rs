//! # mnemo-embed
//!
//! Interchangeable text-embedding backends for the mnemo retrieval engine.
//! Two backends run in-process over ONNX models via fastembed, one calls an
//! OpenAI-compatible embeddings API. All three sit behind one async trait so
//! the engine can swap them at runtime.
//!
//! ## Quick Start
//!
//! ```no_run
//! use mnemo_embed::{EmbedConfig, create_provider};
//!
//! # async fn example() -> mnemo_embed::Result<()> {
//! let mut provider = create_provider(EmbedConfig::mini_lm())?;
//! provider.initialize().await?;
//!
//! let embedding = provider.embed_text("buy milk on the way home").await?;
//! println!("{} dimensions", embedding.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! - **MiniLm**: all-MiniLM-L6-v2, 384 dimensions, local inference
//! - **BgeBase**: bge-base-en-v1.5, 768 dimensions, local inference
//! - **Remote**: OpenAI-compatible API, 1536 dimensions, needs an API key
//!
//! ## Concurrency
//!
//! Providers are not safe for concurrent `embed_text` calls: the local
//! backends hold a single mutable model, and the remote backend is subject
//! to per-key rate limits. Callers are expected to serialize access; the
//! mnemo retrieval engine does this with a dedicated worker task.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] over [`EmbedError`], separating
//! initialization failures (non-fatal, retry with another backend) from
//! per-text embedding failures (skippable during bulk processing).

pub mod config;
pub mod error;
pub mod provider;
pub mod remote;

// Re-export main types for easy access
pub use config::{EmbedBackend, EmbedConfig};
pub use error::{EmbedError, Result};
pub use provider::{EmbeddingProvider, LocalProvider, create_provider};
pub use remote::RemoteProvider;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = EmbedConfig::mini_lm();
        assert_eq!(config.backend, EmbedBackend::MiniLm);
        assert_eq!(config.dimension(), 384);

        let remote = EmbedConfig::remote("sk-test");
        assert_eq!(remote.backend, EmbedBackend::Remote);
        assert!(!remote.backend.is_local());
    }
}
