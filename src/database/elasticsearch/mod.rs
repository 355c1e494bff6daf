
use std::fmt::Write as _;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use ureq::Body;
use ureq::http::Response;
use url::Url;

use super::{ChunkMetadata, DistinctSources, IndexRecord, SearchHit, VectorStore};

const REQUEST_TIMEOUT_SECONDS: u64 = 30;
/// Records per `_bulk` request
const BULK_BATCH_SIZE: usize = 500;
const SOURCES_AGGREGATION: &str = "distinct_sources";
const SOURCE_FIELD: &str = "metadata.source";
const MIN_NUM_CANDIDATES: usize = 100;

/// Vector store backed by an Elasticsearch index over its REST API
#[derive(Debug, Clone)]
pub struct ElasticsearchStore {
    base_url: Url,
    index: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredChunk {
    text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    vector: Vec<f32>,
    metadata: ChunkMetadata,
}

#[derive(Debug, Deserialize)]
struct AggregationResponse {
    aggregations: Aggregations,
}

#[derive(Debug, Deserialize)]
struct Aggregations {
    distinct_sources: TermsAggregation,
}

#[derive(Debug, Deserialize)]
struct TermsAggregation {
    #[serde(default)]
    sum_other_doc_count: u64,
    buckets: Vec<TermsBucket>,
}

#[derive(Debug, Deserialize)]
struct TermsBucket {
    key: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_score", default)]
    score: Option<f32>,
    #[serde(rename = "_source")]
    source: StoredChunk,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

impl ElasticsearchStore {
    #[inline]
    pub fn new(mut base_url: Url, index: String) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            bail!("Elasticsearch URL cannot be used as a base: {}", base_url);
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(REQUEST_TIMEOUT_SECONDS)))
            .http_status_as_error(false)
            .build()
            .into();

        Ok(Self {
            base_url,
            index,
            agent,
        })
    }

    #[inline]
    pub fn index_name(&self) -> &str {
        &self.index
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Failed to build Elasticsearch URL for '{path}'"))
    }

    fn index_endpoint(&self, suffix: &str) -> Result<Url> {
        self.endpoint(&format!("{}{}", self.index, suffix))
    }

    fn post_json(&self, url: &Url, body: &serde_json::Value) -> Result<Response<Body>> {
        let payload = serde_json::to_string(body).context("Failed to serialize request body")?;
        self.agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(&payload)
            .with_context(|| format!("Request to {url} failed"))
    }

    /// Create the index with an explicit mapping sized for `dimensions`
    fn create_index(&self, dimensions: usize) -> Result<()> {
        let url = self.index_endpoint("")?;
        let mapping = json!({
            "mappings": {
                "properties": {
                    "text": { "type": "text" },
                    "vector": {
                        "type": "dense_vector",
                        "dims": dimensions,
                        "index": true,
                        "similarity": "cosine"
                    },
                    "metadata": {
                        "properties": {
                            "source": { "type": "keyword" },
                            "chunk_index": { "type": "integer" },
                            "indexed_at": { "type": "date" }
                        }
                    }
                }
            }
        });
        let payload =
            serde_json::to_string(&mapping).context("Failed to serialize index mapping")?;

        info!(
            "Creating index '{}' with {} dimensional vectors",
            self.index, dimensions
        );

        let response = self
            .agent
            .put(url.as_str())
            .header("Content-Type", "application/json")
            .send(&payload)
            .with_context(|| format!("Failed to create index '{}'", self.index))?;

        let status = response.status().as_u16();
        let body = read_body(response)?;
        if status == 400 && body.contains("resource_already_exists_exception") {
            debug!("Index '{}' was created concurrently", self.index);
            return Ok(());
        }
        ensure_success(status, &body, "Index creation")
    }

    fn bulk_index(&self, records: &[IndexRecord]) -> Result<()> {
        let url = self.endpoint("_bulk?refresh=true")?;

        let mut payload = String::new();
        for record in records {
            let action = json!({ "index": { "_index": self.index, "_id": record.id } });
            let document = StoredChunk {
                text: record.text.clone(),
                vector: record.vector.clone(),
                metadata: record.metadata.clone(),
            };
            let document =
                serde_json::to_string(&document).context("Failed to serialize bulk document")?;
            writeln!(payload, "{action}\n{document}").context("Failed to build bulk body")?;
        }

        debug!("Sending bulk request with {} records", records.len());

        let response = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/x-ndjson")
            .send(&payload)
            .context("Bulk request failed")?;

        let status = response.status().as_u16();
        let body = read_body(response)?;
        ensure_success(status, &body, "Bulk indexing")?;

        let bulk: BulkResponse =
            serde_json::from_str(&body).context("Failed to parse bulk response")?;
        if bulk.errors {
            let first_error = bulk
                .items
                .iter()
                .filter_map(|item| item.get("index").and_then(|op| op.get("error")))
                .next()
                .map_or_else(|| "unknown error".to_string(), ToString::to_string);
            bail!(
                "Bulk indexing rejected documents in '{}': {}",
                self.index,
                first_error
            );
        }

        Ok(())
    }
}

#[async_trait]
impl VectorStore for ElasticsearchStore {
    #[inline]
    fn backend_name(&self) -> &'static str {
        "elasticsearch"
    }

    #[inline]
    async fn ping(&self) -> Result<()> {
        debug!("Pinging Elasticsearch at {}", self.base_url);

        let response = self
            .agent
            .get(self.base_url.as_str())
            .call()
            .context("Failed to reach Elasticsearch")?;

        let status = response.status().as_u16();
        let body = read_body(response)?;
        ensure_success(status, &body, "Elasticsearch ping")
    }

    #[inline]
    async fn index_exists(&self) -> Result<bool> {
        let url = self.index_endpoint("")?;
        let response = self
            .agent
            .head(url.as_str())
            .call()
            .context("Failed to check index existence")?;

        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => bail!("Index existence check failed with HTTP {status}"),
        }
    }

    #[inline]
    async fn distinct_sources(&self, cap: usize) -> Result<DistinctSources> {
        let url = self.index_endpoint("/_search")?;
        let query = json!({
            "size": 0,
            "aggs": {
                SOURCES_AGGREGATION: {
                    "terms": { "field": SOURCE_FIELD, "size": cap }
                }
            }
        });

        let response = self.post_json(&url, &query)?;
        let status = response.status().as_u16();
        let body = read_body(response)?;
        ensure_success(status, &body, "Source aggregation")?;

        let parsed: AggregationResponse =
            serde_json::from_str(&body).context("Failed to parse aggregation response")?;
        let terms = parsed.aggregations.distinct_sources;

        Ok(DistinctSources {
            truncated: terms.sum_other_doc_count > 0,
            sources: terms.buckets.into_iter().map(|bucket| bucket.key).collect(),
        })
    }

    #[inline]
    async fn add_records(&self, records: Vec<IndexRecord>) -> Result<()> {
        let Some(first) = records.first() else {
            debug!("No records to store");
            return Ok(());
        };

        if !self.index_exists().await? {
            self.create_index(first.vector.len())?;
        }

        for batch in records.chunks(BULK_BATCH_SIZE) {
            self.bulk_index(batch)?;
        }

        info!(
            "Stored {} records in index '{}'",
            records.len(),
            self.index
        );
        Ok(())
    }

    #[inline]
    async fn similarity_search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let url = self.index_endpoint("/_search")?;
        let query = json!({
            "size": k,
            "_source": ["text", "metadata"],
            "knn": {
                "field": "vector",
                "query_vector": vector,
                "k": k,
                "num_candidates": (k * 10).max(MIN_NUM_CANDIDATES)
            }
        });

        let response = self.post_json(&url, &query)?;
        let status = response.status().as_u16();
        let body = read_body(response)?;

        if status == 404 {
            warn!("Index '{}' does not exist yet, no context found", self.index);
            return Ok(Vec::new());
        }
        ensure_success(status, &body, "Similarity search")?;

        let parsed: SearchResponse =
            serde_json::from_str(&body).context("Failed to parse search response")?;

        let hits: Vec<SearchHit> = parsed
            .hits
            .hits
            .into_iter()
            .map(|hit| SearchHit {
                text: hit.source.text,
                metadata: hit.source.metadata,
                score: hit.score.unwrap_or_default(),
            })
            .collect();

        debug!("Similarity search returned {} hits", hits.len());
        Ok(hits)
    }

    #[inline]
    async fn count_records(&self) -> Result<u64> {
        let url = self.index_endpoint("/_count")?;
        let response = self
            .agent
            .get(url.as_str())
            .call()
            .context("Failed to count records")?;

        let status = response.status().as_u16();
        let body = read_body(response)?;
        if status == 404 {
            return Ok(0);
        }
        ensure_success(status, &body, "Record count")?;

        let parsed: CountResponse =
            serde_json::from_str(&body).context("Failed to parse count response")?;
        Ok(parsed.count)
    }
}

fn read_body(mut response: Response<Body>) -> Result<String> {
    response
        .body_mut()
        .read_to_string()
        .context("Failed to read Elasticsearch response body")
}

fn ensure_success(status: u16, body: &str, action: &str) -> Result<()> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    let detail: String = body.chars().take(500).collect();
    bail!("{action} failed with HTTP {status}: {detail}")
}
