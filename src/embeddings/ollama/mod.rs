#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::OllamaConfig;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
/// Generation can pause for a long time between tokens on slow hardware
const STREAM_RECV_TIMEOUT_SECONDS: u64 = 300;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    embedding_model: String,
    chat_model: String,
    batch_size: u32,
    agent: ureq::Agent,
    stream_agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatStreamLine {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

/// Lazily produced answer fragments.
///
/// Single consumption: once the iterator returns `None` or an error it is
/// finished and yields nothing more.
pub struct ChatStream {
    inner: Box<dyn Iterator<Item = Result<String>> + Send>,
}

impl std::fmt::Debug for ChatStream {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream").finish_non_exhaustive()
    }
}

impl ChatStream {
    /// Parse Ollama's newline-delimited JSON chat stream
    #[inline]
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            inner: Box::new(NdjsonChatLines {
                lines: Box::new(BufReader::new(reader).lines()),
                finished: false,
            }),
        }
    }

    /// Wrap already produced fragments
    #[inline]
    pub fn from_fragments<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = Result<String>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            inner: Box::new(fragments.into_iter()),
        }
    }
}

impl Iterator for ChatStream {
    type Item = Result<String>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

struct NdjsonChatLines {
    lines: Box<dyn Iterator<Item = std::io::Result<String>> + Send>,
    finished: bool,
}

impl NdjsonChatLines {
    fn fail(&mut self, error: anyhow::Error) -> Option<Result<String>> {
        self.finished = true;
        Some(Err(error))
    }
}

impl Iterator for NdjsonChatLines {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    return self.fail(anyhow::Error::new(e).context("Failed to read chat stream"));
                }
                None => {
                    return self.fail(anyhow::anyhow!(
                        "Chat stream ended before the model finished"
                    ));
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let parsed: ChatStreamLine = match serde_json::from_str(&line) {
                Ok(parsed) => parsed,
                Err(e) => {
                    return self.fail(
                        anyhow::Error::new(e).context("Failed to parse chat stream line"),
                    );
                }
            };

            if let Some(message) = parsed.error {
                return self.fail(anyhow::anyhow!("Ollama returned an error: {}", message));
            }

            let content = parsed.message.map(|m| m.content).unwrap_or_default();

            if parsed.done {
                self.finished = true;
                return (!content.is_empty()).then_some(Ok(content));
            }

            if !content.is_empty() {
                return Some(Ok(content));
            }
        }
    }
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        let stream_agent = ureq::Agent::config_builder()
            .timeout_connect(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .timeout_recv_response(Some(Duration::from_secs(STREAM_RECV_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self {
            base_url,
            embedding_model: config.embedding_model.clone(),
            chat_model: config.chat_model.clone(),
            batch_size: config.batch_size.max(1),
            agent,
            stream_agent,
        })
    }

    /// Test connection to Ollama server and verify both models are available
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models().context("Server ping failed")?;

        for model in [&self.embedding_model, &self.chat_model] {
            if !is_model_available(&models, model) {
                let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
                warn!(
                    "Model {} not found. Available models: {:?}",
                    model, available
                );
                return Err(anyhow::anyhow!(
                    "Model '{}' is not available. Available models: {:?}",
                    model,
                    available
                ));
            }
        }

        info!(
            "Health check passed for Ollama server at {} with models {} / {}",
            self.base_url, self.embedding_model, self.chat_model
        );
        Ok(())
    }

    /// Ping the Ollama server to check if it's responsive
    #[inline]
    pub fn ping(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build ping URL")?;

        debug!("Pinging Ollama server at {}", url);

        self.agent
            .get(url.as_str())
            .call()
            .context("Failed to ping Ollama server")?;

        debug!("Server ping successful");
        Ok(())
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .send_request(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Generate embeddings for multiple texts, batching requests
    #[inline]
    pub fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size as usize) {
            let batch_results = self
                .embed_single_batch(batch)
                .with_context(|| format!("Failed to process batch of {} texts", batch.len()))?;

            results.extend(batch_results);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    /// Generate the embedding of a single query text
    #[inline]
    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let input = [text.to_string()];
        self.embed_single_batch(&input)?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Ollama returned no embedding for query"))
    }

    /// Start a streamed chat completion
    ///
    /// Connection and HTTP status errors surface here; errors after the first
    /// byte surface from the returned stream.
    #[inline]
    pub fn chat_stream(&self, messages: &[ChatMessage]) -> Result<ChatStream> {
        let url = self
            .base_url
            .join("/api/chat")
            .context("Failed to build chat URL")?;

        let request = ChatRequest {
            model: &self.chat_model,
            messages,
            stream: true,
        };
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize chat request")?;

        debug!(
            "Starting chat stream with model {} ({} messages)",
            self.chat_model,
            messages.len()
        );

        let response = self
            .stream_agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(&request_json)
            .context("Failed to start chat stream")?;

        Ok(ChatStream::from_reader(response.into_body().into_reader()))
    }

    fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.embedding_model,
            input: texts,
        };

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = self
            .send_request(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embeddings")?;

        let embed_response: EmbedResponse = serde_json::from_str(&response_text)
            .context("Failed to parse embedding response")?;

        if embed_response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                embed_response.embeddings.len()
            ));
        }

        Ok(embed_response.embeddings)
    }

    /// Issue one request; HTTP status errors become readable messages
    fn send_request<F>(&self, request_fn: F) -> Result<String>
    where
        F: FnOnce() -> Result<String, ureq::Error>,
    {
        request_fn().map_err(|error| match error {
            ureq::Error::StatusCode(status) if status >= 500 => {
                warn!("Server error (status {}) from {}", status, self.base_url);
                anyhow::anyhow!("Server error: HTTP {}", status)
            }
            ureq::Error::StatusCode(status) => {
                warn!("Client error (status {}) from {}", status, self.base_url);
                anyhow::anyhow!("Client error: HTTP {}", status)
            }
            other => {
                error!("Request to {} failed: {}", self.base_url, other);
                anyhow::Error::new(other).context("Request to Ollama failed")
            }
        })
    }
}

/// Ollama lists untagged models with an implicit `:latest` tag
fn is_model_available(models: &[ModelInfo], model: &str) -> bool {
    models.iter().any(|m| {
        m.name == model || (!model.contains(':') && m.name == format!("{model}:latest"))
    })
}
