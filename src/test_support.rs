// In-memory doubles for the store, the model server and the interaction sink

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::database::{DistinctSources, IndexRecord, SearchHit, VectorStore};
use crate::embeddings::{ChatMessage, ChatModel, ChatStream, Embedder};
use crate::logging::InteractionSink;

/// Vector store keeping records in memory, with switchable failures
#[derive(Debug, Default)]
pub struct FakeStore {
    pub records: Mutex<Vec<IndexRecord>>,
    pub index_created: AtomicBool,
    pub preset_sources: Option<DistinctSources>,
    pub fail_exists: bool,
    pub fail_sources: bool,
    pub fail_add: bool,
    pub fail_search: bool,
}

impl FakeStore {
    pub fn with_records(records: Vec<IndexRecord>) -> Self {
        let store = Self::default();
        store.records.lock().expect("lock").extend(records);
        store.index_created.store(true, Ordering::SeqCst);
        store
    }

    pub fn records(&self) -> Vec<IndexRecord> {
        self.records.lock().expect("lock").clone()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for FakeStore {
    fn backend_name(&self) -> &'static str {
        "fake"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn index_exists(&self) -> Result<bool> {
        if self.fail_exists {
            bail!("connection reset");
        }
        Ok(self.index_created.load(Ordering::SeqCst))
    }

    async fn distinct_sources(&self, cap: usize) -> Result<DistinctSources> {
        if self.fail_sources {
            bail!("aggregation timed out");
        }
        if let Some(preset) = &self.preset_sources {
            return Ok(preset.clone());
        }

        let all: std::collections::BTreeSet<String> = self
            .records
            .lock()
            .expect("lock")
            .iter()
            .map(|r| r.metadata.source.clone())
            .collect();
        Ok(DistinctSources {
            truncated: all.len() > cap,
            sources: all.into_iter().take(cap).collect(),
        })
    }

    async fn add_records(&self, records: Vec<IndexRecord>) -> Result<()> {
        if self.fail_add {
            bail!("bulk rejected");
        }
        self.index_created.store(true, Ordering::SeqCst);
        self.records.lock().expect("lock").extend(records);
        Ok(())
    }

    async fn similarity_search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if self.fail_search {
            bail!("search failed");
        }
        let mut hits: Vec<SearchHit> = self
            .records
            .lock()
            .expect("lock")
            .iter()
            .map(|r| SearchHit {
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                score: cosine(&r.vector, vector),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn count_records(&self) -> Result<u64> {
        Ok(self.records.lock().expect("lock").len() as u64)
    }
}

/// Deterministic embedder: letter frequencies folded into four dimensions
#[derive(Debug, Default)]
pub struct FakeEmbedder {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl FakeEmbedder {
    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; 4];
        for c in text.chars().filter(|c| c.is_alphabetic()) {
            vector[(c as usize) % 4] += 1.0;
        }
        vector
    }
}

impl Embedder for FakeEmbedder {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("model server unavailable");
        }
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("model server unavailable");
        }
        Ok(Self::vector_for(text))
    }
}

/// Chat model replaying scripted fragments; `Err` entries fail mid-stream
#[derive(Debug, Default)]
pub struct FakeChatModel {
    pub fragments: Vec<Result<String, String>>,
    pub fail_start: bool,
    pub received: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeChatModel {
    pub fn answering(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| Ok((*f).to_string())).collect(),
            ..Self::default()
        }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.received
            .lock()
            .expect("lock")
            .last()
            .and_then(|messages| messages.first())
            .map(|message| message.content.clone())
    }
}

impl ChatModel for FakeChatModel {
    fn stream_chat(&self, messages: &[ChatMessage]) -> Result<ChatStream> {
        self.received.lock().expect("lock").push(messages.to_vec());
        if self.fail_start {
            bail!("connection refused");
        }
        let fragments: Vec<Result<String>> = self
            .fragments
            .iter()
            .map(|f| f.clone().map_err(anyhow::Error::msg))
            .collect();
        Ok(ChatStream::from_fragments(fragments))
    }
}

/// Interaction sink remembering every record
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub records: std::sync::Arc<Mutex<Vec<(String, String)>>>,
}

impl InteractionSink for RecordingSink {
    fn record(&self, prompt: &str, response: &str) {
        self.records
            .lock()
            .expect("lock")
            .push((prompt.to_string(), response.to_string()));
    }
}
