use clap::{Parser, Subcommand};
use mnemo_embed::EmbedConfig;
use mnemo_retriever::retrieval::{
    engine::{RetrievalEngine, format_search_results},
    note_index::{Note, NoteIndex},
};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

/// A CLI over the mnemo note store and retrieval engine.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base directory containing the .mnemo.db database file
    #[arg(short, long, default_value = ".")]
    base_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a note
    Add {
        text: String,
        /// Pin the note so it is always surfaced by search
        #[arg(long)]
        pin: bool,
    },
    /// List notes, newest first
    List {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Pin a note
    Pin { id: i64 },
    /// Unpin a note
    Unpin { id: i64 },
    /// Delete a note
    Rm { id: i64 },
    /// Edit a note's text (clears its embedding)
    Edit { id: i64, text: String },
    /// Compute embeddings for notes that lack one
    Backfill {
        #[command(flatten)]
        backend: BackendArgs,
    },
    /// Recompute embeddings for every note with the chosen backend
    Regenerate {
        #[command(flatten)]
        backend: BackendArgs,
    },
    /// Search notes semantically
    Search {
        query: String,
        /// Number of unpinned results to return
        #[arg(short, long, default_value_t = 3)]
        k: usize,
        #[command(flatten)]
        backend: BackendArgs,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show store statistics and engine state
    Status,
}

#[derive(clap::Args, Debug)]
struct BackendArgs {
    /// Embedding backend: mini-lm, bge-base, or remote
    #[arg(long, default_value = "mini-lm")]
    backend: Backend,
    /// API key for the remote backend (falls back to $MNEMO_API_KEY)
    #[arg(long)]
    api_key: Option<String>,
}

impl BackendArgs {
    fn to_config(&self) -> EmbedConfig {
        match self.backend {
            Backend::MiniLm => EmbedConfig::mini_lm(),
            Backend::BgeBase => EmbedConfig::bge_base(),
            Backend::Remote => {
                let key = self
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("MNEMO_API_KEY").ok())
                    .unwrap_or_default();
                EmbedConfig::remote(key)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Backend {
    MiniLm,
    BgeBase,
    Remote,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mini-lm" | "minilm" => Ok(Backend::MiniLm),
            "bge-base" | "bge" => Ok(Backend::BgeBase),
            "remote" => Ok(Backend::Remote),
            _ => Err(format!("Invalid backend: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct NoteOutput {
    id: i64,
    text: String,
    created_at: String,
    pinned: bool,
    has_embedding: bool,
}

impl NoteOutput {
    fn from_note(note: &Note) -> Self {
        Self {
            id: note.id,
            text: note.text.clone(),
            created_at: format_timestamp(note.created_at),
            pinned: note.pinned,
            has_embedding: note.embedding.is_some(),
        }
    }
}

#[derive(Serialize)]
struct SearchOutput {
    text: String,
    pinned: bool,
    score: f32,
}

fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let store = NoteIndex::open(&args.base_dir).await?;

    match args.command {
        Commands::Add { text, pin } => {
            let note = store.insert(&text, pin).await?;
            println!("Added note {}", note.id);
        }
        Commands::List { format } => {
            let notes = store.all_notes().await?;
            match format {
                OutputFormat::Summary => {
                    for note in &notes {
                        let pin = if note.pinned { "[pinned] " } else { "" };
                        println!(
                            "{:>4}  {}  {}{}",
                            note.id,
                            format_timestamp(note.created_at),
                            pin,
                            note.text
                        );
                    }
                    println!("{} notes", notes.len());
                }
                OutputFormat::Json => {
                    let output: Vec<NoteOutput> =
                        notes.iter().map(NoteOutput::from_note).collect();
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
            }
        }
        Commands::Pin { id } => {
            store.set_pinned(id, true).await?;
            println!("Pinned note {id}");
        }
        Commands::Unpin { id } => {
            store.set_pinned(id, false).await?;
            println!("Unpinned note {id}");
        }
        Commands::Rm { id } => {
            if store.delete(id).await? {
                println!("Deleted note {id}");
            } else {
                println!("No note with id {id}");
            }
        }
        Commands::Edit { id, text } => {
            store.update_text(id, &text).await?;
            println!("Updated note {id}");
        }
        Commands::Backfill { backend } => {
            let engine = RetrievalEngine::new(store);
            engine.set_backend(backend.to_config()).await?;
            let count = engine.backfill_embeddings().await?;
            println!("Embedded {count} notes");
            engine.shutdown().await?;
        }
        Commands::Regenerate { backend } => {
            let engine = RetrievalEngine::new(store);
            engine.set_backend(backend.to_config()).await?;
            let count = engine.regenerate_all().await?;
            println!("Regenerated embeddings for {count} notes");
            engine.shutdown().await?;
        }
        Commands::Search {
            query,
            k,
            backend,
            format,
        } => {
            let engine = RetrievalEngine::new(store);
            engine.set_backend(backend.to_config()).await?;
            let results = engine.search(&query, k).await?;
            match format {
                OutputFormat::Summary => {
                    println!("TOP RETRIEVAL RESULTS:");
                    print!("{}", format_search_results(&results));
                }
                OutputFormat::Json => {
                    let output: Vec<SearchOutput> = results
                        .iter()
                        .map(|r| SearchOutput {
                            text: r.note.text.clone(),
                            pinned: r.note.pinned,
                            score: r.score,
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
            }
            engine.shutdown().await?;
        }
        Commands::Status => {
            let engine = RetrievalEngine::new(store);
            let status = engine.status().await?;
            let provider = status.provider.as_deref().unwrap_or("none");
            println!("Backend:  {} ({provider})", status.state);
            if let Some(dimension) = status.dimension {
                println!("Dimension: {dimension}");
            }
            println!("Notes:    {}", status.total_notes);
            println!("Embedded: {}", status.embedded_notes);
            println!("Pinned:   {}", status.pinned_notes);
            engine.shutdown().await?;
        }
    }

    Ok(())
}
