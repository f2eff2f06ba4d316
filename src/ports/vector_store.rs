//! C2 — Vector Store Port, backed by `lancedb`. Each file gets its own table
//! (partition), named via [`crate::models::FileRecord::partition_name`].
//! Grounded on `the-snesler-spacebot`'s and `DevsHero-NeuroSiphon/core`'s
//! `lancedb` usage (connect → create_table from a `RecordBatchReader` →
//! `vector_search().column(...).limit(...).execute()`).

use super::VectorStorePort;
use crate::error::CoreError;
use crate::models::{VectorHit, VectorPoint};
use arrow_array::{Array, ArrayRef, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, Table};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

fn schema(dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("vector_id", DataType::Utf8, false),
        Field::new("level_index", DataType::Int64, false),
        Field::new("content", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, false)), dim),
            false,
        ),
    ]))
}

fn points_to_batch(points: &[VectorPoint]) -> Result<RecordBatch, CoreError> {
    let dim = points[0].embedding.len() as i32;
    let mut flat = Vec::with_capacity(points.len() * dim as usize);
    for p in points {
        if p.embedding.len() as i32 != dim {
            return Err(CoreError::IndexFailed("embedding dimension mismatch within batch".into()));
        }
        flat.extend_from_slice(&p.embedding);
    }

    let id_arr: ArrayRef = Arc::new(StringArray::from(
        points.iter().map(|p| p.vector_id.clone()).collect::<Vec<_>>(),
    ));
    let level_arr: ArrayRef = Arc::new(Int64Array::from(
        points.iter().map(|p| p.level_index).collect::<Vec<_>>(),
    ));
    let content_arr: ArrayRef = Arc::new(StringArray::from(
        points.iter().map(|p| p.content.clone()).collect::<Vec<_>>(),
    ));
    let values: ArrayRef = Arc::new(Float32Array::from(flat));
    let item_field = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_arr: ArrayRef = Arc::new(
        FixedSizeListArray::try_new(item_field, dim, values, None)
            .map_err(|e| CoreError::IndexFailed(e.to_string()))?,
    );

    RecordBatch::try_new(schema(dim), vec![id_arr, level_arr, content_arr, vector_arr])
        .map_err(|e| CoreError::IndexFailed(e.to_string()))
}

pub struct LanceVectorStore {
    connection: Connection,
    /// `create_table` requires exclusive access to avoid racing two writers
    /// on the same not-yet-existing table; a single mutex over the
    /// connection is simplest and contention here is rare (ingest-time only).
    write_lock: Mutex<()>,
}

impl LanceVectorStore {
    pub async fn connect(uri: &str) -> anyhow::Result<Self> {
        let connection = lancedb::connect(uri).execute().await?;
        Ok(Self {
            connection,
            write_lock: Mutex::new(()),
        })
    }

    async fn open(&self, partition: &str) -> Option<Table> {
        self.connection.open_table(partition).execute().await.ok()
    }
}

#[async_trait]
impl VectorStorePort for LanceVectorStore {
    async fn ensure_partition(&self, partition: &str) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        if self.open(partition).await.is_some() {
            return Ok(());
        }
        // An empty table can't be created without a schema-bearing batch;
        // callers create the partition implicitly via the first `insert`.
        Ok(())
    }

    async fn insert(&self, partition: &str, points: Vec<VectorPoint>) -> Result<(), CoreError> {
        if points.is_empty() {
            return Ok(());
        }
        let batch = points_to_batch(&points)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema.clone());

        let _guard = self.write_lock.lock().await;
        match self.open(partition).await {
            Some(table) => {
                table
                    .add(reader)
                    .execute()
                    .await
                    .map_err(|e| CoreError::IndexFailed(e.to_string()))?;
            }
            None => {
                self.connection
                    .create_table(partition, reader)
                    .execute()
                    .await
                    .map_err(|e| CoreError::IndexFailed(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        partitions: &[String],
        query_vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<VectorHit>, CoreError> {
        let mut hits = Vec::new();
        for partition in partitions {
            let Some(table) = self.open(partition).await else {
                continue;
            };
            let file_id = partition.strip_prefix("file_").unwrap_or(partition).to_string();

            let mut stream = match table
                .vector_search(query_vector.clone())
                .map_err(|e| CoreError::IndexFailed(e.to_string()))?
                .column("vector")
                .limit(k)
                .select(Select::columns(&["level_index", "content"]))
                .execute()
                .await
            {
                Ok(s) => s,
                Err(e) => {
                    warn!("vector search failed for partition {partition}: {e}");
                    continue;
                }
            };

            while let Some(batch) = stream
                .try_next()
                .await
                .map_err(|e| CoreError::IndexFailed(e.to_string()))?
            {
                let schema = batch.schema();
                let level_idx = schema.index_of("level_index").ok();
                let content_idx = schema.index_of("content").ok();
                let distance_idx = schema.index_of("_distance").ok();

                let Some(content_col) = content_idx.and_then(|i| {
                    batch.column(i).as_any().downcast_ref::<StringArray>().cloned()
                }) else {
                    continue;
                };
                let level_col = level_idx.and_then(|i| {
                    batch.column(i).as_any().downcast_ref::<Int64Array>().cloned()
                });
                let distance_col = distance_idx.and_then(|i| {
                    batch.column(i).as_any().downcast_ref::<Float32Array>().cloned()
                });

                for row in 0..batch.num_rows() {
                    if !content_col.is_valid(row) {
                        continue;
                    }
                    hits.push(VectorHit {
                        file_id: file_id.clone(),
                        level_index: level_col.as_ref().map(|c| c.value(row)).unwrap_or(0),
                        content: content_col.value(row).to_string(),
                        score: distance_col.as_ref().map(|c| c.value(row) as f64).unwrap_or(0.0),
                    });
                }
            }
        }
        Ok(hits)
    }

    async fn drop_partition(&self, partition: &str) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        match self.connection.drop_table(partition).await {
            Ok(()) => Ok(()),
            Err(lancedb::Error::TableNotFound { .. }) => Ok(()),
            Err(e) => Err(CoreError::PersistenceFailed(e.to_string())),
        }
    }
}
