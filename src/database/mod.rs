// Vector store abstraction shared by the indexer and the chat service
// Elasticsearch is the default backend, LanceDB runs embedded


pub mod elasticsearch;
pub mod lancedb;

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{Config, StoreBackend};

pub use self::elasticsearch::ElasticsearchStore;
pub use self::lancedb::LanceStore;

/// Metadata stored alongside every chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Identifier of the source document
    pub source: String,
    /// Position of the chunk within its document
    pub chunk_index: u32,
    /// RFC 3339 timestamp of the indexing run
    pub indexed_at: String,
}

/// Persisted unit of the vector store
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A record returned by similarity search, best match first
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Higher is more similar
    pub score: f32,
}

/// Distinct source identifiers present in the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistinctSources {
    pub sources: BTreeSet<String>,
    /// The store holds more distinct values than were returned
    pub truncated: bool,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name for logs and status output
    fn backend_name(&self) -> &'static str;

    /// Succeeds once the store is reachable
    async fn ping(&self) -> Result<()>;

    async fn index_exists(&self) -> Result<bool>;

    /// At most `cap` distinct values of the `source` metadata field
    async fn distinct_sources(&self, cap: usize) -> Result<DistinctSources>;

    /// Append records, creating the index when it does not exist yet
    async fn add_records(&self, records: Vec<IndexRecord>) -> Result<()>;

    /// The `k` records closest to `vector`, best match first
    async fn similarity_search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    async fn count_records(&self) -> Result<u64>;
}

/// Open the backend selected in the configuration
#[inline]
pub async fn open_store(config: &Config) -> Result<Box<dyn VectorStore>> {
    let index_name = config.index_name();

    let store: Box<dyn VectorStore> = match config.vector_store.backend {
        StoreBackend::Elasticsearch => {
            let url = config
                .elasticsearch_url()
                .context("Invalid Elasticsearch URL")?;
            Box::new(ElasticsearchStore::new(url, index_name)?)
        }
        StoreBackend::Lancedb => Box::new(
            LanceStore::open(&config.vector_database_path(), index_name)
                .await
                .context("Failed to open LanceDB vector store")?,
        ),
    };

    info!(
        "Using {} vector store with index '{}'",
        store.backend_name(),
        config.index_name()
    );
    Ok(store)
}
