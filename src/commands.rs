use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use console::style;
use tracing::{info, warn};

use crate::chat::{ChatSession, ChatTurn, RagChain};
use crate::config::Config;
use crate::database::{VectorStore, open_store};
use crate::embeddings::{ChatModel, Embedder, OllamaClient, RecursiveSplitter};
use crate::indexer::{Indexer, IndexingReport, wait_for_service};
use crate::logging::interaction_sink;
use crate::{RagError, Result};

const EXIT_COMMANDS: [&str; 3] = ["/sair", "/exit", "/quit"];

async fn open_components(config: &Config) -> Result<(Arc<dyn VectorStore>, Arc<OllamaClient>)> {
    let store: Arc<dyn VectorStore> = Arc::from(
        open_store(config)
            .await
            .map_err(|e| RagError::VectorStore(format!("{e:#}")))?,
    );
    let ollama = OllamaClient::new(&config.ollama)
        .map_err(|e| RagError::Config(format!("Failed to initialize Ollama client: {e:#}")))?;
    Ok((store, Arc::new(ollama)))
}

fn build_session(
    config: &Config,
    store: Arc<dyn VectorStore>,
    ollama: &Arc<OllamaClient>,
) -> Result<ChatSession> {
    let embedder: Arc<dyn Embedder> = Arc::<OllamaClient>::clone(ollama);
    let model: Arc<dyn ChatModel> = Arc::<OllamaClient>::clone(ollama);
    let chain = RagChain::new(store, embedder, model, config.chat.top_k);
    Ok(ChatSession::new(chain, interaction_sink(&config.interaction_log)?))
}

fn print_sources(turn: &ChatTurn) {
    if turn.sources.is_empty() {
        return;
    }
    eprintln!("{}", style("Fontes:").dim());
    for source in &turn.sources {
        eprintln!("  {}", style(source).dim());
    }
}

/// Wait for dependencies, then index new documents
#[inline]
pub async fn run_index(
    config: &Config,
    docs_dir: Option<PathBuf>,
    wait: bool,
) -> Result<IndexingReport> {
    let (store, ollama) = open_components(config).await?;

    if wait {
        let delay = Duration::from_secs(config.indexer.retry_delay_secs);
        wait_for_service(store.backend_name(), delay, || store.ping()).await;
        wait_for_service("Ollama", delay, || async { ollama.ping() }).await;
    }

    let splitter = RecursiveSplitter::new(&config.chunking)
        .map_err(|e| RagError::Config(format!("{e:#}")))?;
    let embedder: Arc<dyn Embedder> = ollama;
    let indexer = Indexer::new(
        store,
        embedder,
        splitter,
        config.indexer.clone(),
        config.ollama.batch_size as usize,
    );

    let docs_dir = docs_dir.unwrap_or_else(|| config.indexer.docs_dir.clone());
    let report = indexer.run(&docs_dir).await?;

    info!("Indexing finished: {:?}", report);
    Ok(report)
}

/// Interactive question loop on stdin
#[inline]
pub async fn run_chat(config: &Config) -> Result<()> {
    let (store, ollama) = open_components(config).await?;
    if let Err(e) = ollama.health_check() {
        warn!("Ollama is not healthy yet: {:#}", e);
    }
    let session = build_session(config, store, &ollama)?;

    eprintln!("{}", style("🤖 RAG Chat").bold().cyan());
    eprintln!(
        "{}",
        style(format!("Digite sua pergunta ({} para sair).", EXIT_COMMANDS[0])).dim()
    );

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut line = String::new();

    loop {
        eprint!("{} ", style("Como posso ajudar?").bold().green());
        std::io::stderr().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if EXIT_COMMANDS.contains(&question) {
            break;
        }

        let turn = session.respond(question, &mut stdout).await;
        print_sources(&turn);
        eprintln!();
    }

    Ok(())
}

/// Answer a single question and exit
#[inline]
pub async fn ask(config: &Config, question: &str) -> Result<ChatTurn> {
    let (store, ollama) = open_components(config).await?;
    let session = build_session(config, store, &ollama)?;

    let turn = session.respond(question, &mut std::io::stdout()).await;
    print_sources(&turn);
    Ok(turn)
}

/// Report connectivity and index contents
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 RAG Chat Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🔍 Vector Store Status:");
    match open_store(config).await {
        Ok(store) => match store.ping().await {
            Ok(()) => {
                println!("   ✅ {}: Connected", store.backend_name());
                println!("   📇 Index: {}", config.index_name());
                match store.count_records().await {
                    Ok(count) => println!("   🧩 Chunks: {}", count),
                    Err(e) => println!("   ⚠️  Chunks: unknown - {:#}", e),
                }
                match store.distinct_sources(config.indexer.source_cap).await {
                    Ok(found) if found.truncated => println!(
                        "   📄 Documents: more than {}",
                        config.indexer.source_cap
                    ),
                    Ok(found) => println!("   📄 Documents: {}", found.sources.len()),
                    Err(e) => println!("   ⚠️  Documents: unknown - {:#}", e),
                }
            }
            Err(e) => println!("   ❌ {}: Unreachable - {:#}", store.backend_name(), e),
        },
        Err(e) => println!("   ❌ Failed to open vector store - {:#}", e),
    }

    println!();
    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => match client.health_check() {
            Ok(()) => {
                println!(
                    "   ✅ Ollama: Connected ({}:{})",
                    config.ollama.host, config.ollama.port
                );
                println!("   📋 Embedding Model: {}", config.ollama.embedding_model);
                println!("   💬 Chat Model: {}", config.ollama.chat_model);
            }
            Err(e) => println!("   ⚠️  Ollama: Unhealthy - {:#}", e),
        },
        Err(e) => println!("   ❌ Ollama: Failed to connect - {:#}", e),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unusable_store_is_a_vector_store_error() {
        let mut config = Config::default();
        config.vector_store.elasticsearch_url = "not a url".to_string();

        let error = ask(&config, "Olá?")
            .await
            .expect_err("store cannot be opened");

        assert!(
            matches!(error, RagError::VectorStore(ref message) if message.contains("Elasticsearch URL"))
        );
    }

    #[tokio::test]
    async fn invalid_chunking_is_a_config_error() {
        let temp_dir = tempfile::TempDir::new().expect("should create temp dir");
        let mut config = Config {
            base_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };
        config.vector_store.backend = crate::config::StoreBackend::Lancedb;
        config.chunking.chunk_overlap = config.chunking.chunk_size;

        let error = run_index(&config, Some(temp_dir.path().join("docs")), false)
            .await
            .expect_err("overlap equal to size is rejected");

        assert!(matches!(error, RagError::Config(_)));
    }
}
