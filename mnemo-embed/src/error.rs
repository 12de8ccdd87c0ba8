//! Error types for the embedding backends

/// Result type for embedding operations.
///
/// Convenience alias using [`EmbedError`] as the error type, used throughout
/// the crate for operations that can fail.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type covering all embedding backend failures.
///
/// Failures fall into two broad groups: initialization problems (a model that
/// cannot be loaded, a remote backend without a credential) and per-text
/// embedding problems (inference errors, network errors, bad payloads). The
/// retrieval engine treats the first group as non-fatal binding failures and
/// the second as skippable during backfill.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Backend configuration is invalid or incomplete
    #[error("invalid backend configuration: {message}")]
    InvalidConfig { message: String },

    /// Remote backend selected without a usable API key
    #[error("remote backend requires an API key")]
    MissingCredential,

    /// Error while loading or preparing a backend
    #[error("provider initialization failed: {source}")]
    ProviderInit {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error while generating an embedding for a text
    #[error("embedding generation failed: {source}")]
    Embedding {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Remote backend answered with a non-success status
    #[error("embedding API returned status {status}: {body}")]
    RemoteStatus { status: u16, body: String },

    /// Remote backend answered successfully but the payload was unusable
    #[error("malformed embedding response: {message}")]
    MalformedResponse { message: String },

    /// HTTP transport errors from the remote backend
    #[error("embedding request failed: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    /// IO errors when touching the model cache
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Async task join errors
    #[error("async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Generic errors from other libraries
    #[error("external error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Wrap any error as a provider initialization failure.
    pub fn provider_init(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::ProviderInit {
            source: source.into(),
        }
    }

    /// Wrap any error as an embedding generation failure.
    pub fn embedding(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Embedding {
            source: source.into(),
        }
    }

    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a malformed-response error with a custom message.
    pub fn malformed_response<S: Into<String>>(message: S) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }
}
