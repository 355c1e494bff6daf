// Chat service: retrieval, prompt assembly and streamed generation


pub mod prompt;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use itertools::Itertools;
use tracing::{debug, error, info};

use crate::database::{SearchHit, VectorStore};
use crate::embeddings::{ChatMessage, ChatModel, ChatStream, Embedder};
use crate::logging::InteractionSink;

pub use prompt::{format_docs, render_prompt};

/// Shown instead of an answer whenever a turn fails
pub const APOLOGY: &str = "Desculpe, não consegui me conectar ao modelo.";

/// A started answer: what was retrieved, what was asked, and the token stream
pub struct Answer {
    pub hits: Vec<SearchHit>,
    pub prompt: String,
    pub stream: ChatStream,
}

impl std::fmt::Debug for Answer {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Answer")
            .field("hits", &self.hits.len())
            .field("prompt", &self.prompt)
            .finish_non_exhaustive()
    }
}

/// Retrieval followed by generation over the retrieved context
pub struct RagChain {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn ChatModel>,
    top_k: usize,
}

impl RagChain {
    #[inline]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ChatModel>,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            model,
            top_k,
        }
    }

    /// The `top_k` chunks most similar to `question`; empty means no context
    #[inline]
    pub async fn retrieve(&self, question: &str) -> Result<Vec<SearchHit>> {
        let vector = self
            .embedder
            .embed_query(question)
            .context("Failed to embed question")?;

        let hits = self
            .store
            .similarity_search(&vector, self.top_k)
            .await
            .context("Similarity search failed")?;

        debug!("Retrieved {} chunks for question", hits.len());
        Ok(hits)
    }

    /// Retrieve context and start streaming the model's answer
    #[inline]
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let hits = self.retrieve(question).await?;
        let prompt = render_prompt(&format_docs(&hits), question);

        let stream = self
            .model
            .stream_chat(&[ChatMessage::user(prompt.clone())])
            .context("Failed to start generation")?;

        Ok(Answer {
            hits,
            prompt,
            stream,
        })
    }
}

/// Outcome of one chat turn as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    /// Full answer text, or the apology when the turn failed
    pub response: String,
    /// Distinct sources of the retrieved chunks, in retrieval order
    pub sources: Vec<String>,
    pub succeeded: bool,
}

/// Runs chat turns, printing answers as they stream in
pub struct ChatSession {
    chain: RagChain,
    sink: Box<dyn InteractionSink>,
}

impl ChatSession {
    #[inline]
    pub fn new(chain: RagChain, sink: Box<dyn InteractionSink>) -> Self {
        Self { chain, sink }
    }

    /// Answer `question`, writing fragments to `out` as they arrive
    ///
    /// Never fails: any retrieval or generation error is logged and replaced
    /// by [`APOLOGY`]. Only successful turns reach the interaction sink.
    #[inline]
    pub async fn respond<W: Write + Send>(&self, question: &str, out: &mut W) -> ChatTurn {
        match self.stream_answer(question, out).await {
            Ok(turn) => {
                self.sink.record(question, &turn.response);
                turn
            }
            Err(e) => {
                error!("Chat turn failed: {:#}", e);
                if let Err(write_error) = writeln!(out, "\n{APOLOGY}") {
                    error!("Failed to write apology: {}", write_error);
                }
                ChatTurn {
                    response: APOLOGY.to_string(),
                    sources: Vec::new(),
                    succeeded: false,
                }
            }
        }
    }

    async fn stream_answer<W: Write + Send>(&self, question: &str, out: &mut W) -> Result<ChatTurn> {
        let answer = self.chain.answer(question).await?;

        let mut response = String::new();
        for fragment in answer.stream {
            let fragment = fragment.context("Generation stream failed")?;
            out.write_all(fragment.as_bytes())
                .context("Failed to write answer")?;
            out.flush().context("Failed to flush answer")?;
            response.push_str(&fragment);
        }
        writeln!(out).context("Failed to write answer")?;

        let sources: Vec<String> = answer
            .hits
            .into_iter()
            .map(|hit| hit.metadata.source)
            .unique()
            .collect();

        info!(
            "Answered question with {} chars from {} sources",
            response.chars().count(),
            sources.len()
        );

        Ok(ChatTurn {
            response,
            sources,
            succeeded: true,
        })
    }
}
