//! mnemo-retriever: semantic retrieval over a local note store
//!
//! This crate stores short text notes in SQLite, computes vector embeddings
//! for them through the backends in `mnemo-embed`, and answers top-k
//! nearest-neighbor queries with a pinned-note override. The corpus is
//! small, so scoring is a deliberate linear scan rather than an ANN index.
//!
//! ## Key Modules
//!
//! - **[`retrieval::note_index`]**: the `Note` entity and its SQLite store
//! - **[`retrieval::engine`]**: the serialized retrieval engine (backfill,
//!   regeneration, search, backend switching)
//! - **[`retrieval::vector`]**: cosine similarity and norm
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mnemo_embed::EmbedConfig;
//! use mnemo_retriever::retrieval::{engine::RetrievalEngine, note_index::NoteIndex};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = NoteIndex::open(std::path::Path::new(".")).await?;
//! store.insert("buy milk on the way home", false).await?;
//!
//! let engine = RetrievalEngine::new(store);
//! engine.set_backend(EmbedConfig::mini_lm()).await?;
//!
//! for result in engine.search("groceries", 3).await? {
//!     println!("{:.2}  {}", result.score, result.note.text);
//! }
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! caller → RetrievalEngine handle → command channel → worker task
//!                                                       ├─ EmbeddingProvider
//!                                                       └─ NoteIndex (SQLite)
//! ```

pub mod retrieval;

pub use retrieval::engine::{
    EngineError, EngineStatus, ProviderState, RetrievalEngine, SearchResult,
};
pub use retrieval::note_index::{Note, NoteIndex};
