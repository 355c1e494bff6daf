pub mod chunking;
pub mod ollama;

use anyhow::Result;

pub use chunking::{ChunkingConfig, Document, RecursiveSplitter, TextChunk};
pub use ollama::{ChatMessage, ChatStream, OllamaClient};

/// Turns text into vectors; documents and queries must share one model
pub trait Embedder: Send + Sync {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

impl Embedder for OllamaClient {
    #[inline]
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_texts(texts)
    }

    #[inline]
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_text(text)
    }
}

/// Produces a streamed answer for a conversation
pub trait ChatModel: Send + Sync {
    fn stream_chat(&self, messages: &[ChatMessage]) -> Result<ChatStream>;
}

impl ChatModel for OllamaClient {
    #[inline]
    fn stream_chat(&self, messages: &[ChatMessage]) -> Result<ChatStream> {
        self.chat_stream(messages)
    }
}
