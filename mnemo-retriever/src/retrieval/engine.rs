//! The retrieval engine: serialized worker, lazy backfill, two-tier search.
//!
//! ## Concurrency model
//!
//! One dedicated worker task owns the embedding provider and the note store
//! for the lifetime of the engine. Every public operation is a command sent
//! over an unbounded channel and answered through a oneshot, so operations
//! execute strictly in FIFO order and at most one call is ever in flight
//! against the provider. Local model backends hold mutable inference state
//! and the remote backend is rate-limited per key, so callers must never
//! reach the provider directly while the engine is live.
//!
//! ## Search pipeline
//!
//! ```text
//! search(query, k)
//!   → backfill missing embeddings
//!   → embed query
//!   → load pinned + unpinned candidate sets
//!   → regenerate once if stored dimensions are stale
//!   → score, rank, merge (pinned group first)
//! ```

use crate::retrieval::note_index::{Note, NoteIndex};
use crate::retrieval::vector;
use mnemo_embed::{EmbedConfig, EmbedError, EmbeddingProvider, create_provider};
use std::cmp::Ordering;
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Errors surfaced by the retrieval engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No embedding backend is currently bound
    #[error("no embedding backend is bound")]
    NotBound,

    /// The backend could not be initialized; the engine stays unbound
    #[error("backend initialization failed: {0}")]
    ProviderInit(#[source] EmbedError),

    /// The query text could not be embedded; fatal for this search only
    #[error("failed to embed query: {0}")]
    QueryEmbedding(#[source] EmbedError),

    /// `search` was called with k = 0
    #[error("top-k must be at least 1 (got {0})")]
    InvalidTopK(usize),

    /// The note store failed; the operation was aborted
    #[error("note store error: {0}")]
    Store(#[from] anyhow::Error),

    /// The worker task is no longer running
    #[error("retrieval worker has shut down")]
    WorkerGone,
}

/// Lifecycle of the engine's provider binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    /// No backend bound yet, or the last initialization failed
    Unbound,
    /// A backend is loading its resources
    Initializing,
    /// The bound backend is ready to embed
    Ready,
    /// The previous backend is being torn down for a replacement
    Switching,
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderState::Unbound => "unbound",
            ProviderState::Initializing => "initializing",
            ProviderState::Ready => "ready",
            ProviderState::Switching => "switching",
        };
        f.write_str(name)
    }
}

/// A scored note. Ephemeral, never persisted.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub note: Note,
    /// Cosine similarity in the provider's semantics. Pinned notes are
    /// floored at 0.5 (with an embedding) or fixed at 1.0 (without one).
    pub score: f32,
}

/// Snapshot of engine and store state for diagnostics.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub state: ProviderState,
    pub provider: Option<String>,
    pub dimension: Option<usize>,
    pub total_notes: i64,
    pub embedded_notes: i64,
    pub pinned_notes: i64,
}

enum EngineCommand {
    SetProvider {
        provider: Box<dyn EmbeddingProvider>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Backfill {
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    RegenerateAll {
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    Search {
        query: String,
        k: usize,
        reply: oneshot::Sender<Result<Vec<SearchResult>, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<EngineStatus, EngineError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the serialized retrieval worker.
///
/// Dropping the handle closes the command channel and lets the worker exit;
/// [`shutdown`](Self::shutdown) does the same but waits for it.
pub struct RetrievalEngine {
    commands: mpsc::UnboundedSender<EngineCommand>,
    worker: tokio::task::JoinHandle<()>,
}

impl RetrievalEngine {
    /// Spawn the engine worker over the given store. The engine starts with
    /// no backend bound.
    pub fn new(store: NoteIndex) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(EngineWorker::new(store).run(receiver));
        Self { commands, worker }
    }

    /// Build and bind the provider for `config`, replacing any current one.
    ///
    /// On failure the engine is left unbound; the caller may retry with
    /// another configuration.
    pub async fn set_backend(&self, config: EmbedConfig) -> Result<(), EngineError> {
        let provider = create_provider(config).map_err(EngineError::ProviderInit)?;
        self.set_provider(provider).await
    }

    /// Bind an already-constructed provider. Initialization still happens on
    /// the worker so it never races an in-flight operation.
    pub async fn set_provider(
        &self,
        provider: Box<dyn EmbeddingProvider>,
    ) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::SetProvider { provider, reply })
            .await?
    }

    /// Embed every note that is missing a vector. Returns how many notes
    /// gained an embedding; per-note failures are logged and skipped.
    pub async fn backfill_embeddings(&self) -> Result<usize, EngineError> {
        self.request(|reply| EngineCommand::Backfill { reply }).await?
    }

    /// Recompute every note's vector with the bound backend. Used after a
    /// backend switch.
    pub async fn regenerate_all(&self) -> Result<usize, EngineError> {
        self.request(|reply| EngineCommand::RegenerateAll { reply })
            .await?
    }

    /// Top-k search over unpinned notes, with every pinned note prepended.
    ///
    /// The result holds at most `k` unpinned notes plus all pinned notes,
    /// pinned group first, each group sorted by descending score.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>, EngineError> {
        if k == 0 {
            return Err(EngineError::InvalidTopK(k));
        }
        let query = query.to_string();
        self.request(|reply| EngineCommand::Search { query, k, reply })
            .await?
    }

    /// Snapshot of provider state and store counts.
    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineCommand::Status { reply }).await?
    }

    /// Release the backend and wait for the worker to exit.
    pub async fn shutdown(self) -> Result<(), EngineError> {
        // A worker that already exited is fine; join it either way.
        let _ = self.request(|reply| EngineCommand::Shutdown { reply }).await;
        self.worker.await.map_err(|_| EngineError::WorkerGone)?;
        Ok(())
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| EngineError::WorkerGone)?;
        receiver.await.map_err(|_| EngineError::WorkerGone)
    }
}

struct EngineWorker {
    store: NoteIndex,
    provider: Option<Box<dyn EmbeddingProvider>>,
    state: ProviderState,
}

impl EngineWorker {
    fn new(store: NoteIndex) -> Self {
        Self {
            store,
            provider: None,
            state: ProviderState::Unbound,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<EngineCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                EngineCommand::SetProvider { provider, reply } => {
                    let _ = reply.send(self.bind_provider(provider).await);
                }
                EngineCommand::Backfill { reply } => {
                    let _ = reply.send(self.embed_notes(false).await);
                }
                EngineCommand::RegenerateAll { reply } => {
                    let _ = reply.send(self.embed_notes(true).await);
                }
                EngineCommand::Search { query, k, reply } => {
                    let _ = reply.send(self.search(&query, k).await);
                }
                EngineCommand::Status { reply } => {
                    let _ = reply.send(self.status().await);
                }
                EngineCommand::Shutdown { reply } => {
                    if let Some(provider) = self.provider.as_mut() {
                        provider.shutdown();
                    }
                    self.provider = None;
                    self.state = ProviderState::Unbound;
                    let _ = reply.send(());
                    break;
                }
            }
        }
        debug!("retrieval worker exited");
    }

    async fn bind_provider(
        &mut self,
        mut provider: Box<dyn EmbeddingProvider>,
    ) -> Result<(), EngineError> {
        if let Some(mut previous) = self.provider.take() {
            self.state = ProviderState::Switching;
            info!(
                from = previous.provider_name(),
                to = provider.provider_name(),
                "switching embedding backend"
            );
            previous.shutdown();
        }

        self.state = ProviderState::Initializing;
        match provider.initialize().await {
            Ok(()) => {
                info!(
                    backend = provider.provider_name(),
                    dimension = provider.dimension(),
                    "embedding backend ready"
                );
                self.provider = Some(provider);
                self.state = ProviderState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!(
                    backend = provider.provider_name(),
                    error = %e,
                    "embedding backend failed to initialize"
                );
                self.state = ProviderState::Unbound;
                Err(EngineError::ProviderInit(e))
            }
        }
    }

    fn provider(&self) -> Result<&dyn EmbeddingProvider, EngineError> {
        match self.provider.as_deref() {
            Some(provider) if self.state == ProviderState::Ready => Ok(provider),
            _ => Err(EngineError::NotBound),
        }
    }

    /// Embed notes and write the vectors back. With `recompute_existing`
    /// this is a full regeneration; without it, only notes missing a vector
    /// are touched. A failure on one note must not abort the rest.
    async fn embed_notes(&self, recompute_existing: bool) -> Result<usize, EngineError> {
        let provider = self.provider()?;
        let notes = self.store.all_notes().await?;

        let mut embedded = 0usize;
        for note in notes {
            if !recompute_existing && note.embedding.is_some() {
                continue;
            }
            if note.text.is_empty() {
                continue;
            }
            match provider.embed_text(&note.text).await {
                Ok(embedding) => {
                    self.store.update_embedding(note.id, Some(&embedding)).await?;
                    embedded += 1;
                }
                Err(e) => {
                    warn!(note = note.id, error = %e, "skipping note, embedding failed");
                }
            }
        }

        if recompute_existing {
            info!(count = embedded, "regenerated embeddings");
        } else if embedded > 0 {
            debug!(count = embedded, "backfilled embeddings");
        }
        Ok(embedded)
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>, EngineError> {
        let mut regenerated = false;
        loop {
            // Maximal coverage before scoring.
            self.embed_notes(false).await?;

            let provider = self.provider()?;
            let query_vector = provider
                .embed_text(query)
                .await
                .map_err(EngineError::QueryEmbedding)?;

            let pinned = self.store.pinned_notes().await?;
            let unpinned = self.store.unpinned_notes_with_embeddings().await?;

            // Vectors from a previous backend force one full regeneration,
            // after which the whole search restarts. Bounded to a single
            // retry per call so an inconsistent backend cannot loop us.
            let stale = unpinned.iter().any(|note| {
                note.embedding
                    .as_ref()
                    .is_some_and(|e| e.len() != query_vector.len())
            });
            if stale && !regenerated {
                warn!(
                    query_dimension = query_vector.len(),
                    "stored embeddings have stale dimensions, regenerating"
                );
                self.embed_notes(true).await?;
                regenerated = true;
                continue;
            }

            let mut unpinned_results: Vec<SearchResult> = unpinned
                .into_iter()
                .filter_map(|note| {
                    let score = note
                        .embedding
                        .as_deref()
                        .map(|e| vector::cosine_similarity(e, &query_vector))?;
                    Some(SearchResult { note, score })
                })
                .collect();
            // Stable sort keeps store order (newest first) among equal scores.
            unpinned_results.sort_by(|a, b| {
                b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal)
            });
            unpinned_results.truncate(k);

            let mut results: Vec<SearchResult> = pinned
                .into_iter()
                .map(|note| {
                    let score = match note.embedding.as_deref() {
                        // Floored at 0.5 so a pinned note never reads like a
                        // weak unpinned match.
                        Some(e) => vector::cosine_similarity(e, &query_vector).max(0.5),
                        None => 1.0,
                    };
                    SearchResult { note, score }
                })
                .collect();
            results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

            // Pinned results precede unpinned regardless of score.
            results.append(&mut unpinned_results);

            debug!(
                results = results.len(),
                regenerated, "search complete"
            );
            return Ok(results);
        }
    }

    async fn status(&self) -> Result<EngineStatus, EngineError> {
        Ok(EngineStatus {
            state: self.state,
            provider: self
                .provider
                .as_ref()
                .map(|p| p.provider_name().to_string()),
            dimension: self.provider.as_ref().map(|p| p.dimension()),
            total_notes: self.store.note_count().await?,
            embedded_notes: self.store.embedded_count().await?,
            pinned_notes: self.store.pinned_count().await?,
        })
    }
}

/// Render results as a numbered, human-readable list. Pinned notes get a pin
/// marker and no score; unpinned notes get a two-decimal score suffix.
pub fn format_search_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No matching notes found.\n".to_string();
    }

    let mut out = String::new();
    for (i, result) in results.iter().enumerate() {
        if result.note.pinned {
            out.push_str(&format!("{}. [pinned] {}\n", i + 1, result.note.text));
        } else {
            out.push_str(&format!(
                "{}. {} (score: {:.2})\n",
                i + 1,
                result.note.text,
                result.score
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: i64, text: &str, pinned: bool) -> Note {
        Note {
            id,
            text: text.to_string(),
            created_at: 0,
            embedding: None,
            pinned,
        }
    }

    #[test]
    fn test_format_empty_results() {
        assert_eq!(format_search_results(&[]), "No matching notes found.\n");
    }

    #[test]
    fn test_format_mixed_results() {
        let results = vec![
            SearchResult {
                note: note(1, "call the bank", true),
                score: 1.0,
            },
            SearchResult {
                note: note(2, "buy milk", false),
                score: 0.873,
            },
        ];

        let rendered = format_search_results(&results);
        assert_eq!(
            rendered,
            "1. [pinned] call the bank\n2. buy milk (score: 0.87)\n"
        );
    }

    #[test]
    fn test_provider_state_display() {
        assert_eq!(ProviderState::Unbound.to_string(), "unbound");
        assert_eq!(ProviderState::Ready.to_string(), "ready");
    }
}
