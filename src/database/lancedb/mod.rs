// Embedded LanceDB backend
// One table per versioned index name under `<base_dir>/vectors`


use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use tracing::{debug, info};

use super::{ChunkMetadata, DistinctSources, IndexRecord, SearchHit, VectorStore};

/// Vector store using an embedded LanceDB database
pub struct LanceStore {
    connection: Connection,
    table_name: String,
}

impl std::fmt::Debug for LanceStore {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceStore")
            .field("table_name", &self.table_name)
            .finish_non_exhaustive()
    }
}

impl LanceStore {
    /// Open (or create) the database directory at `db_path`
    #[inline]
    pub async fn open(db_path: &Path, table_name: String) -> Result<Self> {
        debug!("Initializing LanceDB at path: {}", db_path.display());

        std::fs::create_dir_all(db_path).with_context(|| {
            format!(
                "Failed to create vector database directory: {}",
                db_path.display()
            )
        })?;

        let uri = db_path.display().to_string();
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self {
            connection,
            table_name,
        })
    }

    async fn open_table(&self) -> Result<Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .with_context(|| format!("Failed to open table '{}'", self.table_name))
    }

    async fn table_if_exists(&self) -> Result<Option<Table>> {
        if self.index_exists().await? {
            self.open_table().await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Open the table, creating it with a schema sized for `dimensions`
    async fn ensure_table(&self, dimensions: usize) -> Result<Table> {
        if let Some(table) = self.table_if_exists().await? {
            let existing = vector_dimension(&table).await?;
            if existing != dimensions {
                bail!(
                    "Table '{}' stores {} dimensional vectors, got {}; bump the index version to re-index",
                    self.table_name,
                    existing,
                    dimensions
                );
            }
            return Ok(table);
        }

        info!(
            "Creating table '{}' with {} dimensional vectors",
            self.table_name, dimensions
        );

        self.connection
            .create_empty_table(&self.table_name, create_schema(dimensions)?)
            .execute()
            .await
            .with_context(|| format!("Failed to create table '{}'", self.table_name))
    }
}

#[async_trait]
impl VectorStore for LanceStore {
    #[inline]
    fn backend_name(&self) -> &'static str {
        "lancedb"
    }

    #[inline]
    async fn ping(&self) -> Result<()> {
        self.connection
            .table_names()
            .execute()
            .await
            .context("Failed to list LanceDB tables")?;
        Ok(())
    }

    #[inline]
    async fn index_exists(&self) -> Result<bool> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;
        Ok(table_names.contains(&self.table_name))
    }

    #[inline]
    async fn distinct_sources(&self, cap: usize) -> Result<DistinctSources> {
        let Some(table) = self.table_if_exists().await? else {
            return Ok(DistinctSources::default());
        };

        let rows = table.count_rows(None).await.context("Failed to count rows")?;
        if rows == 0 {
            return Ok(DistinctSources::default());
        }

        let mut stream = table
            .query()
            .select(Select::columns(&["source"]))
            .limit(rows)
            .execute()
            .await
            .context("Failed to query sources")?;

        let mut all_sources = BTreeSet::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .context("Failed to read source stream")?
        {
            let sources = string_column(&batch, "source")?;
            for row in 0..batch.num_rows() {
                all_sources.insert(sources.value(row).to_string());
            }
        }

        let truncated = all_sources.len() > cap;
        let sources = all_sources.into_iter().take(cap).collect();

        Ok(DistinctSources { sources, truncated })
    }

    #[inline]
    async fn add_records(&self, records: Vec<IndexRecord>) -> Result<()> {
        let Some(first) = records.first() else {
            debug!("No records to store");
            return Ok(());
        };

        let dimensions = first.vector.len();
        let table = self.ensure_table(dimensions).await?;
        let record_batch = create_record_batch(&records, dimensions)?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .context("Failed to insert records")?;

        info!(
            "Stored {} records in table '{}'",
            records.len(),
            self.table_name
        );
        Ok(())
    }

    #[inline]
    async fn similarity_search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let Some(table) = self.table_if_exists().await? else {
            debug!("Table '{}' does not exist yet", self.table_name);
            return Ok(Vec::new());
        };

        let mut stream = table
            .vector_search(vector)
            .context("Failed to create vector search")?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .context("Failed to execute search")?;

        let mut hits = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .context("Failed to read result stream")?
        {
            hits.extend(parse_search_batch(&batch)?);
        }

        debug!("Similarity search returned {} hits", hits.len());
        Ok(hits)
    }

    #[inline]
    async fn count_records(&self) -> Result<u64> {
        let Some(table) = self.table_if_exists().await? else {
            return Ok(0);
        };
        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count as u64)
    }
}

fn create_schema(dimensions: usize) -> Result<Arc<Schema>> {
    let dimensions = i32::try_from(dimensions).context("Vector dimension too large")?;
    Ok(Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                dimensions,
            ),
            false,
        ),
        Field::new("text", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("chunk_index", DataType::UInt32, false),
        Field::new("indexed_at", DataType::Utf8, false),
    ])))
}

async fn vector_dimension(table: &Table) -> Result<usize> {
    let schema = table.schema().await.context("Failed to get table schema")?;

    schema
        .fields()
        .iter()
        .find(|field| field.name() == "vector")
        .and_then(|field| match field.data_type() {
            DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
            _ => None,
        })
        .ok_or_else(|| anyhow!("Could not find vector column or determine dimension"))
}

fn create_record_batch(records: &[IndexRecord], dimensions: usize) -> Result<RecordBatch> {
    let mut flat_values = Vec::with_capacity(records.len() * dimensions);
    for record in records {
        if record.vector.len() != dimensions {
            bail!(
                "Record '{}' has {} dimensions, expected {}",
                record.id,
                record.vector.len(),
                dimensions
            );
        }
        flat_values.extend_from_slice(&record.vector);
    }

    let schema = create_schema(dimensions)?;
    let field = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_array = FixedSizeListArray::try_new(
        field,
        i32::try_from(dimensions).context("Vector dimension too large")?,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .context("Failed to create vector array")?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.id.as_str()),
        )),
        Arc::new(vector_array),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.text.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.metadata.source.as_str()),
        )),
        Arc::new(UInt32Array::from_iter_values(
            records.iter().map(|r| r.metadata.chunk_index),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.metadata.indexed_at.as_str()),
        )),
    ];

    RecordBatch::try_new(schema, arrays).context("Failed to create record batch")
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("Missing {name} column"))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| anyhow!("Invalid {name} column type"))
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchHit>> {
    let texts = string_column(batch, "text")?;
    let sources = string_column(batch, "source")?;
    let indexed_ats = string_column(batch, "indexed_at")?;
    let chunk_indices = batch
        .column_by_name("chunk_index")
        .ok_or_else(|| anyhow!("Missing chunk_index column"))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| anyhow!("Invalid chunk_index column type"))?;

    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    let hits = (0..batch.num_rows())
        .map(|row| {
            let distance = distances
                .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            SearchHit {
                text: texts.value(row).to_string(),
                metadata: ChunkMetadata {
                    source: sources.value(row).to_string(),
                    chunk_index: chunk_indices.value(row),
                    indexed_at: indexed_ats.value(row).to_string(),
                },
                score: 1.0 - distance,
            }
        })
        .collect();

    Ok(hits)
}
