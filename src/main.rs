use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// Import from our modular crates
use docrag_cli::{
    ChatCommand, ChatSession, display_banner, format_chunks, format_indexing, format_result,
    handle_input_with_history, print_help,
};
use docrag_core::{
    DocumentIndexer, EngineKind, ExpertiseLevel, ProcessedDocument, RagConfig, UserContext,
    VectorBackend,
};
use docrag_mistral::MistralClient;
use docrag_rag::{
    Chunker, InMemoryVectorBackend, QdrantVectorBackend, QueryOptions, RagSystem, StructureProfile,
};

#[derive(Parser)]
#[command(name = "docrag")]
#[command(about = "Questions answered from your procurement documents", long_about = None)]
struct Cli {
    /// Local vector store file, used when QDRANT_URL is not set
    #[arg(long, global = true, default_value = "docrag_store.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the chunk plan of a file without calling the provider
    Chunk {
        file: PathBuf,
        /// fixed_size, semantic, structural or hybrid
        #[arg(short, long)]
        strategy: Option<String>,
    },
    /// Index text files
    Index {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Re-index documents that are already indexed
        #[arg(short, long)]
        force: bool,
    },
    /// Ask one question
    Ask {
        query: String,
        /// novice, intermediate or expert
        #[arg(short, long, default_value = "intermediate")]
        expertise: String,
        /// Bypass routing: simple or subquestion
        #[arg(long)]
        engine: Option<String>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive question answering over the given files
    Chat {
        files: Vec<PathBuf>,
        /// Save and restore the conversation in this file
        #[arg(long)]
        session: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    let cli = Cli::parse();
    let config = RagConfig::from_env()?;

    match cli.command {
        Commands::Chunk { file, strategy } => run_chunk(&config, &file, strategy.as_deref()),
        Commands::Index { files, force } => {
            let system = build_system(config, &cli.store).await?;
            let results = index_files(&system, &files, force).await?;
            println!("{}", format_indexing(&results));
            Ok(())
        }
        Commands::Ask {
            query,
            expertise,
            engine,
            json,
        } => {
            let system = build_system(config, &cli.store).await?;
            let result = match engine {
                Some(name) => {
                    let engine = EngineKind::parse(&name)
                        .with_context(|| format!("unknown engine '{}'", name))?;
                    system
                        .router()
                        .query(&query, &QueryOptions::default(), Some(engine))
                        .await
                }
                None => {
                    let user = UserContext {
                        expertise: parse_expertise(&expertise)?,
                        user_id: None,
                    };
                    system.ask_as(&query, &user, &[]).await
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", format_result(&result));
            }
            Ok(())
        }
        Commands::Chat { files, session } => {
            let system = build_system(config, &cli.store).await?;
            if !files.is_empty() {
                let results = index_files(&system, &files, false).await?;
                println!("{}", format_indexing(&results));
            }
            run_chat(&system, session.as_deref()).await
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("DOCRAG_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn parse_expertise(name: &str) -> Result<ExpertiseLevel> {
    ExpertiseLevel::parse(name).with_context(|| format!("unknown expertise level '{}'", name))
}

async fn build_system(config: RagConfig, store: &Path) -> Result<RagSystem> {
    let provider = Arc::new(MistralClient::from_env()?);
    let dimension = config.embedding.dimension;

    let vectors: Arc<dyn VectorBackend> = match std::env::var("QDRANT_URL") {
        Ok(url) => {
            let collection = std::env::var("QDRANT_COLLECTION").unwrap_or_else(|_| "docrag".to_string());
            let api_key = std::env::var("QDRANT_API_KEY").ok();
            Arc::new(QdrantVectorBackend::connect(&url, api_key, collection, dimension).await?)
        }
        Err(_) => Arc::new(InMemoryVectorBackend::open(store)?),
    };

    Ok(RagSystem::new(config, provider, vectors)?)
}

/// Read a `.txt` or `.md` file; form feeds separate pages
fn load_document(path: &Path) -> Result<(String, ProcessedDocument)> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if extension != "txt" && extension != "md" {
        bail!("unsupported file type: {} (expected .txt or .md)", path.display());
    }

    let document_id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.trim().is_empty())
        .with_context(|| format!("cannot derive a document id from {}", path.display()))?
        .to_string();
    let text = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;

    Ok((document_id, ProcessedDocument::from_paged_text(&text)))
}

async fn index_files(
    system: &RagSystem,
    files: &[PathBuf],
    force: bool,
) -> Result<Vec<docrag_core::IndexingResult>> {
    let documents = files
        .iter()
        .map(|path| load_document(path))
        .collect::<Result<Vec<_>>>()?;
    println!("{} Indexing {} document(s)...", "📚".blue(), documents.len());
    Ok(system.indexer().index_documents(documents, force).await?)
}

fn run_chunk(config: &RagConfig, file: &Path, strategy: Option<&str>) -> Result<()> {
    let (document_id, document) = load_document(file)?;
    let chunker = Chunker::new(config.chunking.clone(), StructureProfile::default());
    let name = strategy.unwrap_or(config.chunking.strategy.as_str());
    let outcome = chunker.chunk_by_name(&document_id, &document, name)?;

    for warning in &outcome.warnings {
        println!("{} {}", "⚠️".yellow(), warning);
    }
    println!(
        "{} {} chunks ({})",
        document_id.bold(),
        outcome.chunks.len(),
        outcome.strategy.as_str()
    );
    println!("{}", format_chunks(&outcome.chunks));
    Ok(())
}

async fn run_chat(system: &RagSystem, session_file: Option<&Path>) -> Result<()> {
    let mut session = match session_file {
        Some(path) => ChatSession::load(path, UserContext::default()).await,
        None => ChatSession::default(),
    };

    display_banner();
    let mut input_history = Vec::new();

    loop {
        let input = handle_input_with_history(&mut input_history).await?;

        match ChatCommand::parse(&input) {
            ChatCommand::Empty => continue,
            ChatCommand::Exit => {
                println!("{}", "👋 Au revoir !".green());
                break;
            }
            ChatCommand::Help => print_help(),
            ChatCommand::Clear => {
                session.clear();
                println!("{} Historique effacé", "🧹".cyan());
            }
            ChatCommand::Expertise(level) => {
                session.set_expertise(level);
                println!("{} Niveau: {:?}", "🎓".cyan(), level);
            }
            ChatCommand::Feedback(feedback_type) => match session.feedback(system, feedback_type) {
                Some(_) => println!("{} Merci pour votre retour", "✅".green()),
                None => println!("{} Aucune réponse à évaluer", "⚠️".yellow()),
            },
            ChatCommand::Stats => {
                let stats = system.store().index_stats().await?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
                println!("{}", serde_json::to_string_pretty(&system.provider().usage())?);
            }
            ChatCommand::Unknown(text) => {
                println!("{} Commande inconnue: {}", "❓".yellow(), text);
            }
            ChatCommand::Ask(question) => {
                println!("{} Recherche...", "🔎".blue());
                let result = session.ask(system, &question).await;
                println!("{}\n", format_result(&result));
            }
        }
    }

    if let Some(path) = session_file {
        session.save(path).await?;
    }
    Ok(())
}
