//! # studykit CLI (`study`)
//!
//! The `study` binary drives the full toolkit: database setup, topic
//! management, document ingestion, Q&A, and flashcard review.
//!
//! ## Usage
//!
//! ```bash
//! study --config ./config/study.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `study init` | Create the SQLite database and run schema migrations |
//! | `study topics add "<title>"` | Create a topic |
//! | `study topics list` | List topics |
//! | `study topics rm <id>` | Delete a topic and everything under it |
//! | `study ingest <topic-id> <file>` | Upload and process a document |
//! | `study status <topic-id>` | Show documents and their processing state |
//! | `study reprocess <document-id>` | Re-chunk and re-embed from stored text |
//! | `study docs rm <document-id>` | Delete a document and its chunks |
//! | `study ask <topic-id> "<question>"` | Ask a question against a topic |
//! | `study history show <topic-id>` | Show past Q&A exchanges |
//! | `study cards generate <topic-id>` | Generate flashcards from material |
//! | `study cards due <topic-id>` | List cards due for review |
//! | `study cards review <card-id> <grade>` | Grade a recall (0-5) |

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use studykit::cards::CardService;
use studykit::config::{self, Config};
use studykit::db;
use studykit::embedding::{Embedder, EmbeddingClient};
use studykit::ingest::Ingestor;
use studykit::llm::{Generator, LlmClient};
use studykit::migrate;
use studykit::qa::QaService;
use studykit::sqlite_store::SqliteStore;

use studykit_core::chunk::ChunkerConfig;
use studykit_core::models::Topic;
use studykit_core::store::Store;

/// studykit CLI — a local-first study toolkit with document Q&A and
/// spaced-repetition flashcards.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/study.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "study",
    about = "studykit — topic-scoped document Q&A and spaced-repetition flashcards",
    version,
    long_about = "studykit ingests course material (text, Markdown, PDF, DOCX) into topics, \
    answers questions against it with retrieval-augmented generation, and schedules \
    flashcard review with SM-2."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/study.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent.
    Init,

    /// Manage topics.
    Topics {
        #[command(subcommand)]
        action: TopicsAction,
    },

    /// Upload a document into a topic and process it.
    ///
    /// Runs the full pipeline: extraction, chunking, embedding, storage.
    /// Requires an embedding provider to be configured.
    Ingest {
        /// Topic UUID.
        topic_id: String,

        /// Path to the document (txt, md, pdf, docx).
        file: PathBuf,

        /// Override the content type inferred from the file extension.
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Show a topic's documents and their processing state.
    Status {
        /// Topic UUID.
        topic_id: String,
    },

    /// Re-chunk and re-embed a document from its stored text.
    ///
    /// Useful after changing chunking settings or the embedding model.
    Reprocess {
        /// Document UUID.
        document_id: String,
    },

    /// Manage documents.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Ask a question against a topic's material.
    ///
    /// Retrieves the most similar chunks, prompts the language model with
    /// them, and stores the exchange. Requires both an embedding and an
    /// llm provider.
    Ask {
        /// Topic UUID.
        topic_id: String,

        /// The question.
        question: String,
    },

    /// Inspect and prune Q&A history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Manage flashcards.
    Cards {
        #[command(subcommand)]
        action: CardsAction,
    },
}

#[derive(Subcommand)]
enum TopicsAction {
    /// Create a topic.
    Add {
        /// Topic title.
        title: String,
    },
    /// List all topics.
    List,
    /// Delete a topic and its documents, chunks, exchanges, and cards.
    Rm {
        /// Topic UUID.
        id: String,
    },
}

#[derive(Subcommand)]
enum DocsAction {
    /// Delete a document and its chunks.
    Rm {
        /// Document UUID.
        id: String,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Show a topic's exchanges, newest first.
    Show {
        /// Topic UUID.
        topic_id: String,
    },
    /// Delete one exchange.
    Rm {
        /// Exchange UUID.
        id: String,
    },
    /// Delete all of a topic's exchanges.
    Clear {
        /// Topic UUID.
        topic_id: String,
    },
}

#[derive(Subcommand)]
enum CardsAction {
    /// Create a card by hand.
    Add {
        /// Topic UUID.
        topic_id: String,
        /// Front of the card (question or term).
        front: String,
        /// Back of the card (answer or definition).
        back: String,
    },
    /// Generate cards from the topic's processed material.
    ///
    /// Requires an llm provider to be configured.
    Generate {
        /// Topic UUID.
        topic_id: String,
        /// How many cards to request.
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
    /// List all of a topic's cards.
    List {
        /// Topic UUID.
        topic_id: String,
    },
    /// List cards due for review, soonest first.
    Due {
        /// Topic UUID.
        topic_id: String,
        /// Maximum number of cards to show.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Grade a recall and reschedule the card.
    Review {
        /// Card UUID.
        card_id: String,
        /// Recall quality, 0 (blackout) to 5 (perfect).
        grade: u8,
    },
    /// Delete a card.
    Rm {
        /// Card UUID.
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let pool = db::connect(&cfg.db.path).await?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool.clone()));

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Topics { action } => match action {
            TopicsAction::Add { title } => {
                let topic = Topic::new(title, chrono::Utc::now());
                store.insert_topic(&topic).await?;
                println!("{}  {}", topic.id, topic.title);
            }
            TopicsAction::List => {
                let topics = store.list_topics().await?;
                for topic in &topics {
                    println!("{}  {}", topic.id, topic.title);
                }
                println!("{} topic(s)", topics.len());
            }
            TopicsAction::Rm { id } => {
                store.delete_topic(&id).await?;
                println!("deleted topic {id}");
            }
        },
        Commands::Ingest {
            topic_id,
            file,
            content_type,
        } => {
            let ingestor = build_ingestor(&cfg, store.clone())?;
            let bytes = std::fs::read(&file)?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());

            let doc = ingestor
                .upload(&topic_id, &filename, content_type.as_deref())
                .await?;
            ingestor.process(&doc.id, &bytes).await?;

            let chunks = store.chunks_for_document(&doc.id).await?;
            println!("ingested {filename}");
            println!("  document: {}", doc.id);
            println!("  chunks: {}", chunks.len());
        }
        Commands::Status { topic_id } => {
            let documents = store.list_documents(&topic_id).await?;
            for doc in &documents {
                let detail = match &doc.error {
                    Some(err) => format!("  ({err})"),
                    None => String::new(),
                };
                println!(
                    "{}  {:<10}  attempts={}  {}{}",
                    doc.id, doc.status, doc.attempts, doc.filename, detail
                );
            }
            println!("{} document(s)", documents.len());
        }
        Commands::Reprocess { document_id } => {
            let ingestor = build_ingestor(&cfg, store.clone())?;
            ingestor.reprocess(&document_id).await?;
            let chunks = store.chunks_for_document(&document_id).await?;
            println!("reprocessed {document_id}");
            println!("  chunks: {}", chunks.len());
        }
        Commands::Docs { action } => match action {
            DocsAction::Rm { id } => {
                store.delete_document(&id).await?;
                println!("deleted document {id}");
            }
        },
        Commands::Ask { topic_id, question } => {
            let qa = build_qa(&cfg, store.clone())?;
            let exchange = qa.ask(&topic_id, &question).await?;
            println!("{}", exchange.answer);
            println!();
            match exchange.confidence {
                Some(confidence) => println!(
                    "confidence: {:.2}  sources: {}",
                    confidence,
                    exchange.source_chunk_ids.len()
                ),
                None => println!("confidence: n/a (no matching material)"),
            }
        }
        // History needs no embedding or llm provider, so it talks to the
        // store directly instead of building a QaService.
        Commands::History { action } => match action {
            HistoryAction::Show { topic_id } => {
                let exchanges = store.list_exchanges(&topic_id).await?;
                for ex in &exchanges {
                    println!("[{}] {}", ex.created_at.format("%Y-%m-%d %H:%M"), ex.id);
                    println!("  Q: {}", ex.question);
                    println!("  A: {}", ex.answer);
                }
                println!("{} exchange(s)", exchanges.len());
            }
            HistoryAction::Rm { id } => {
                if store.delete_exchange(&id).await? {
                    println!("deleted exchange {id}");
                } else {
                    println!("no such exchange: {id}");
                }
            }
            HistoryAction::Clear { topic_id } => {
                let removed = store.clear_exchanges(&topic_id).await?;
                println!("deleted {removed} exchange(s)");
            }
        },
        Commands::Cards { action } => match action {
            CardsAction::Add {
                topic_id,
                front,
                back,
            } => {
                let cards = CardService::new(store.clone(), None);
                let card = cards.create(&topic_id, &front, &back).await?;
                println!("{}  {}", card.id, card.front);
            }
            CardsAction::Generate { topic_id, count } => {
                let generator: Arc<dyn Generator> = Arc::new(LlmClient::new(&cfg.llm)?);
                let cards = CardService::new(store.clone(), Some(generator));
                let generated = cards.generate(&topic_id, count).await?;
                for card in &generated {
                    println!("{}  {}", card.id, card.front);
                }
                println!("{} card(s) generated", generated.len());
            }
            CardsAction::List { topic_id } => {
                let cards = CardService::new(store.clone(), None);
                let all = cards.list(&topic_id).await?;
                for card in &all {
                    println!(
                        "{}  due {}  reps={}  {}",
                        card.id,
                        card.state.due.format("%Y-%m-%d"),
                        card.state.repetitions,
                        card.front
                    );
                }
                println!("{} card(s)", all.len());
            }
            CardsAction::Due { topic_id, limit } => {
                let cards = CardService::new(store.clone(), None);
                let due = cards.due(&topic_id, limit).await?;
                for card in &due {
                    println!("{}  {}", card.id, card.front);
                }
                println!("{} card(s) due", due.len());
            }
            CardsAction::Review { card_id, grade } => {
                let cards = CardService::new(store.clone(), None);
                let card = cards.review(&card_id, grade).await?;
                println!(
                    "next review {}  interval {}d  ease {:.2}",
                    card.state.due.format("%Y-%m-%d"),
                    card.state.interval_days,
                    card.state.ease_factor
                );
            }
            CardsAction::Rm { id } => {
                let cards = CardService::new(store.clone(), None);
                if cards.delete(&id).await? {
                    println!("deleted card {id}");
                } else {
                    println!("no such card: {id}");
                }
            }
        },
    }

    pool.close().await;
    Ok(())
}

fn build_ingestor(cfg: &Config, store: Arc<dyn Store>) -> anyhow::Result<Ingestor> {
    let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::new(&cfg.embedding)?);
    let chunker = ChunkerConfig {
        max_chunk_chars: cfg.chunking.max_chunk_chars,
        overlap_chars: cfg.chunking.overlap_chars,
    };
    Ok(Ingestor::new(
        store,
        embedder,
        chunker,
        cfg.ingest.max_attempts,
    ))
}

fn build_qa(cfg: &Config, store: Arc<dyn Store>) -> anyhow::Result<QaService> {
    let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::new(&cfg.embedding)?);
    let generator: Arc<dyn Generator> = Arc::new(LlmClient::new(&cfg.llm)?);
    Ok(QaService::new(
        store,
        embedder,
        generator,
        cfg.retrieval.clone(),
    ))
}

