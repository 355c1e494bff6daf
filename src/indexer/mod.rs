// Indexer module
// Incremental indexing of a documents directory into the vector store


pub mod readiness;
pub mod scanner;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::IndexerConfig;
use crate::database::{ChunkMetadata, IndexRecord, VectorStore};
use crate::embeddings::{Document, Embedder, RecursiveSplitter, TextChunk};

pub use readiness::wait_for_service;
pub use scanner::{document_id, scan_documents};

static NO_SOURCES: BTreeSet<String> = BTreeSet::new();

/// What the store reported about already indexed documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexedSet {
    /// The index does not exist yet
    NotFound,
    /// Every distinct source fit under the cap
    Complete(BTreeSet<String>),
    /// More sources exist than the cap allowed to return
    Truncated(BTreeSet<String>),
    /// The lookup failed; treated as empty so documents get re-indexed
    Failed { error: String },
}

impl IndexedSet {
    /// Sources the diff should treat as already indexed
    #[inline]
    pub fn sources(&self) -> &BTreeSet<String> {
        match self {
            Self::Complete(sources) | Self::Truncated(sources) => sources,
            Self::NotFound | Self::Failed { .. } => &NO_SOURCES,
        }
    }
}

/// Summary of one indexing run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexingReport {
    pub documents_found: usize,
    pub documents_pending: usize,
    pub documents_indexed: usize,
    pub documents_skipped: usize,
    pub chunks_stored: usize,
    pub truncated_lookup: bool,
    pub failed_lookup: bool,
}

/// Ask the store which sources are already indexed
///
/// Never fails: lookup errors are logged and reported as [`IndexedSet::Failed`].
#[inline]
pub async fn resolve_indexed_set(store: &dyn VectorStore, cap: usize) -> IndexedSet {
    match store.index_exists().await {
        Ok(false) => {
            info!("Index does not exist yet, every document will be indexed");
            return IndexedSet::NotFound;
        }
        Ok(true) => {}
        Err(e) => {
            error!("Failed to check whether the index exists: {:#}", e);
            return IndexedSet::Failed {
                error: format!("{e:#}"),
            };
        }
    }

    match store.distinct_sources(cap).await {
        Ok(found) if found.truncated => {
            warn!(
                "Store holds more than {} distinct sources; documents beyond the cap will be re-indexed",
                cap
            );
            IndexedSet::Truncated(found.sources)
        }
        Ok(found) => {
            info!("{} documents already indexed", found.sources.len());
            IndexedSet::Complete(found.sources)
        }
        Err(e) => {
            error!("Failed to list indexed sources: {:#}", e);
            IndexedSet::Failed {
                error: format!("{e:#}"),
            }
        }
    }
}

/// Local documents whose identifier is not in `indexed`, in scan order
#[inline]
pub fn files_to_index(local: &[PathBuf], indexed: &BTreeSet<String>) -> Vec<PathBuf> {
    local
        .iter()
        .filter(|path| !indexed.contains(&document_id(path)))
        .cloned()
        .collect()
}

/// Read a document as UTF-8 text
#[inline]
pub async fn load_document(path: &Path) -> Result<Document> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read document: {}", path.display()))?;

    Ok(Document {
        source: document_id(path),
        text,
    })
}

/// Incremental indexer: scan, diff, split, embed, store
pub struct Indexer {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    splitter: RecursiveSplitter,
    settings: IndexerConfig,
    batch_size: usize,
    show_progress: bool,
}

impl Indexer {
    #[inline]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        splitter: RecursiveSplitter,
        settings: IndexerConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            splitter,
            settings,
            batch_size: batch_size.max(1),
            show_progress: console::user_attended_stderr(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Index every document under `docs_dir` that the store does not know yet
    ///
    /// Unreadable documents are skipped. Embedding and storage failures abort
    /// the run.
    #[inline]
    pub async fn run(&self, docs_dir: &Path) -> Result<IndexingReport> {
        info!("Scanning {} for *.{} documents", docs_dir.display(), self.settings.extension);

        let local = scan_documents(docs_dir, &self.settings.extension);
        let indexed = resolve_indexed_set(self.store.as_ref(), self.settings.source_cap).await;
        let pending = files_to_index(&local, indexed.sources());

        let mut report = IndexingReport {
            documents_found: local.len(),
            documents_pending: pending.len(),
            truncated_lookup: matches!(indexed, IndexedSet::Truncated(_)),
            failed_lookup: matches!(indexed, IndexedSet::Failed { .. }),
            ..IndexingReport::default()
        };

        if pending.is_empty() {
            info!("All {} documents already indexed", local.len());
            return Ok(report);
        }

        info!(
            "{} of {} documents need indexing",
            pending.len(),
            local.len()
        );

        let mut chunks = Vec::new();
        for path in &pending {
            match load_document(path).await {
                Ok(document) => {
                    chunks.extend(self.splitter.split_document(&document));
                    report.documents_indexed += 1;
                }
                Err(e) => {
                    error!("Skipping {}: {:#}", path.display(), e);
                    report.documents_skipped += 1;
                }
            }
        }

        if chunks.is_empty() {
            info!("No content to index");
            return Ok(report);
        }

        let vectors = self.embed_chunks(&chunks)?;
        let records = build_records(chunks, vectors)?;
        report.chunks_stored = records.len();

        self.store
            .add_records(records)
            .await
            .context("Failed to store records")?;

        info!(
            "Indexed {} documents ({} chunks, {} skipped)",
            report.documents_indexed, report.chunks_stored, report.documents_skipped
        );
        Ok(report)
    }

    fn embed_chunks(&self, chunks: &[TextChunk]) -> Result<Vec<Vec<f32>>> {
        let bar = if self.show_progress {
            ProgressBar::new(chunks.len() as u64).with_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] Embedding chunks {msg}")
                    .expect("style template is valid"),
            )
        } else {
            ProgressBar::hidden()
        };

        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embedded = self
                .embedder
                .embed_documents(&texts)
                .context("Failed to generate embeddings")?;
            vectors.extend(embedded);
            bar.inc(batch.len() as u64);
        }
        bar.finish_and_clear();

        debug!("Generated {} embeddings", vectors.len());
        Ok(vectors)
    }
}

fn build_records(chunks: Vec<TextChunk>, vectors: Vec<Vec<f32>>) -> Result<Vec<IndexRecord>> {
    anyhow::ensure!(
        chunks.len() == vectors.len(),
        "Got {} embeddings for {} chunks",
        vectors.len(),
        chunks.len()
    );

    let indexed_at = Utc::now().to_rfc3339();

    chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| {
            Ok(IndexRecord {
                id: Uuid::new_v4().to_string(),
                text: chunk.content,
                vector,
                metadata: ChunkMetadata {
                    source: chunk.source,
                    chunk_index: u32::try_from(chunk.chunk_index)
                        .context("Chunk index out of range")?,
                    indexed_at: indexed_at.clone(),
                },
            })
        })
        .collect()
}
