use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray, UInt32Array,
};
use arrow_schema::{DataType, Field, Schema};
use lancedb::query::{ExecutableQuery, QueryBase};
use std::sync::Arc;
use uuid::Uuid;

use crate::embeddings::Embedder;
use crate::types::ChunkRecord;

/// Fixed collection for the admin-curated knowledge base. Everything else
/// is per-session.
pub const KNOWLEDGE_COLLECTION: &str = "knowledge_base";

/// The one place session ids become collection names. Every retrieval and
/// ingestion path goes through this, so cross-session isolation reduces to
/// this function being injective.
pub fn collection_name_for_session(sid: Uuid) -> String {
    format!("session_{}", sid)
}

/// One retrieval hit from a vector collection, provenance included.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub id: String,
    pub text: String,
    pub source: String,
    pub chunk_index: u32,
    pub file_path: String,
    pub file_type: String,
    pub session_id: String,
    pub score: f32,
}

/// LanceDB store with one table per conversation session plus the shared
/// knowledge collection. Embedding happens here so callers deal in text.
pub struct SessionVectorIndex {
    db: lancedb::Connection,
    embedder: Arc<dyn Embedder>,
}

impl SessionVectorIndex {
    pub async fn new(path: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
        std::fs::create_dir_all(path).ok();
        let db = lancedb::connect(path)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;
        Ok(Self { db, embedder })
    }

    fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("file_path", DataType::Utf8, false),
            Field::new("file_type", DataType::Utf8, false),
            Field::new("session_id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension() as i32,
                ),
                true,
            ),
            Field::new("created_at", DataType::Int64, false),
        ]))
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        let names = self.db.table_names().execute().await?;
        Ok(names.iter().any(|n| n == collection))
    }

    /// Create an empty collection if it does not exist yet. Lance tables
    /// need a schema-bearing batch, so we seed one row and delete it.
    pub async fn ensure_collection(&self, collection: &str) -> Result<()> {
        if self.collection_exists(collection).await? {
            return Ok(());
        }

        let schema = self.schema();
        let seed_vec = vec![0.0f32; self.dimension()];
        let values = Float32Array::from(seed_vec);
        let vector_field = Field::new("item", DataType::Float32, true);
        let vector_array = FixedSizeListArray::new(
            Arc::new(vector_field),
            self.dimension() as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        );

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["__seed__"])) as Arc<dyn Array>,
                Arc::new(StringArray::from(vec![""])),
                Arc::new(UInt32Array::from(vec![0u32])),
                Arc::new(StringArray::from(vec![""])),
                Arc::new(StringArray::from(vec![""])),
                Arc::new(StringArray::from(vec![""])),
                Arc::new(StringArray::from(vec![""])),
                Arc::new(vector_array) as Arc<dyn Array>,
                Arc::new(Int64Array::from(vec![0i64])),
            ],
        )
        .context("Failed to create seed RecordBatch")?;

        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.db
            .create_table(collection, Box::new(batches))
            .execute()
            .await
            .with_context(|| format!("Failed to create collection {}", collection))?;

        let table = self.db.open_table(collection).execute().await?;
        table.delete("id = '__seed__'").await.ok();

        tracing::info!(collection = %collection, "Created vector collection");
        Ok(())
    }

    /// Embed chunk texts and insert them into the collection in one batch.
    /// Texts must not be pre-embedded; `ChunkRecord.vector` is filled here.
    pub async fn add_chunks(
        &self,
        collection: &str,
        mut chunks: Vec<ChunkRecord>,
    ) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        self.ensure_collection(collection).await?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.vector = vector;
        }

        let table = self
            .db
            .open_table(collection)
            .execute()
            .await
            .with_context(|| format!("Failed to open collection {}", collection))?;

        let len = chunks.len();
        let schema = self.schema();

        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let sources: Vec<&str> = chunks.iter().map(|c| c.source.as_str()).collect();
        let chunk_indices: Vec<u32> = chunks.iter().map(|c| c.chunk_index).collect();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let file_paths: Vec<&str> = chunks.iter().map(|c| c.file_path.as_str()).collect();
        let file_types: Vec<&str> = chunks.iter().map(|c| c.file_type.as_str()).collect();
        let session_ids: Vec<&str> = chunks.iter().map(|c| c.session_id.as_str()).collect();
        let created_ats: Vec<i64> = chunks.iter().map(|c| c.created_at).collect();

        let flat_vectors: Vec<f32> = chunks
            .iter()
            .flat_map(|c| c.vector.iter().copied())
            .collect();
        let values = Float32Array::from(flat_vectors);
        let vector_field = Field::new("item", DataType::Float32, true);
        let vector_array = FixedSizeListArray::new(
            Arc::new(vector_field),
            self.dimension() as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        );

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(ids)) as Arc<dyn Array>,
                Arc::new(StringArray::from(sources)),
                Arc::new(UInt32Array::from(chunk_indices)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(file_paths)),
                Arc::new(StringArray::from(file_types)),
                Arc::new(StringArray::from(session_ids)),
                Arc::new(vector_array) as Arc<dyn Array>,
                Arc::new(Int64Array::from(created_ats)),
            ],
        )
        .context("Failed to create RecordBatch")?;

        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(reader))
            .execute()
            .await
            .context("Failed to insert chunks")?;

        tracing::debug!(collection = %collection, inserted = len, "Inserted chunks");
        Ok(len)
    }

    /// Nearest-neighbor search by query text. A missing collection is not
    /// an error: it is created empty and the search returns no hits, so a
    /// session that never uploaded anything degrades gracefully.
    pub async fn search(&self, collection: &str, query: &str, k: usize) -> Result<Vec<ChunkHit>> {
        if !self.collection_exists(collection).await? {
            self.ensure_collection(collection).await?;
            return Ok(Vec::new());
        }

        let query_vec = self
            .embedder
            .embed(std::slice::from_ref(&query.to_string()))
            .await?
            .into_iter()
            .next()
            .context("Embedder returned no vector for query")?;

        let table = self.db.open_table(collection).execute().await?;
        let results = table
            .query()
            .nearest_to(query_vec.as_slice())?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .context("Vector search failed")?;

        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        Ok(extract_hits_from_batches(&batches))
    }

    /// Fetch a single chunk by id, if present.
    pub async fn get_chunk(&self, collection: &str, id: &str) -> Result<Option<ChunkHit>> {
        if !self.collection_exists(collection).await? {
            return Ok(None);
        }
        let table = self.db.open_table(collection).execute().await?;
        let predicate = format!("id = '{}'", id.replace('\'', "''"));
        let results = table
            .query()
            .only_if(predicate)
            .limit(1)
            .execute()
            .await
            .context("Chunk lookup failed")?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        Ok(extract_hits_from_batches(&batches).into_iter().next())
    }

    /// Replace a chunk's text in place (delete + re-embed + insert under the
    /// same id). Returns false when the id is unknown.
    pub async fn update_chunk(&self, collection: &str, id: &str, text: &str) -> Result<bool> {
        let Some(existing) = self.get_chunk(collection, id).await? else {
            return Ok(false);
        };

        let table = self.db.open_table(collection).execute().await?;
        let predicate = format!("id = '{}'", id.replace('\'', "''"));
        table.delete(&predicate).await?;

        let record = ChunkRecord {
            id: existing.id,
            source: existing.source,
            chunk_index: existing.chunk_index,
            text: text.to_string(),
            file_path: existing.file_path,
            file_type: existing.file_type,
            session_id: existing.session_id,
            vector: Vec::new(),
            created_at: chrono::Utc::now().timestamp(),
        };
        self.add_chunks(collection, vec![record]).await?;
        Ok(true)
    }

    /// Delete all chunks that came from one source document.
    pub async fn delete_by_source(&self, collection: &str, source: &str) -> Result<usize> {
        if !self.collection_exists(collection).await? {
            return Ok(0);
        }
        let table = self.db.open_table(collection).execute().await?;
        let count_before = table.count_rows(None).await.unwrap_or(0);
        let predicate = format!("source = '{}'", source.replace('\'', "''"));
        table.delete(&predicate).await?;
        let count_after = table.count_rows(None).await.unwrap_or(0);
        Ok(count_before - count_after)
    }

    /// Drop a session's collection entirely. Missing collections are fine.
    pub async fn delete_collection(&self, collection: &str) -> Result<()> {
        if self.collection_exists(collection).await? {
            self.db.drop_table(collection, &[]).await?;
            tracing::info!(collection = %collection, "Dropped vector collection");
        }
        Ok(())
    }

    pub async fn count(&self, collection: &str) -> Result<usize> {
        if !self.collection_exists(collection).await? {
            return Ok(0);
        }
        let table = self.db.open_table(collection).execute().await?;
        Ok(table.count_rows(None).await?)
    }
}

fn extract_hits_from_batches(batches: &[RecordBatch]) -> Vec<ChunkHit> {
    let mut hits = Vec::new();
    for batch in batches {
        let ids = batch
            .column_by_name("id")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let texts = batch
            .column_by_name("text")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let sources = batch
            .column_by_name("source")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let chunk_indices = batch
            .column_by_name("chunk_index")
            .and_then(|c| c.as_any().downcast_ref::<UInt32Array>());
        let file_paths = batch
            .column_by_name("file_path")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let file_types = batch
            .column_by_name("file_type")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let session_ids = batch
            .column_by_name("session_id")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

        let (Some(ids), Some(texts), Some(sources)) = (ids, texts, sources) else {
            continue;
        };

        for i in 0..batch.num_rows() {
            let score = distances
                .map(|d| (1.0 - d.value(i)).max(0.0))
                .unwrap_or(0.0);
            hits.push(ChunkHit {
                id: ids.value(i).to_string(),
                text: texts.value(i).to_string(),
                source: sources.value(i).to_string(),
                chunk_index: chunk_indices.map(|c| c.value(i)).unwrap_or(0),
                file_path: file_paths.map(|c| c.value(i).to_string()).unwrap_or_default(),
                file_type: file_types.map(|c| c.value(i).to_string()).unwrap_or_default(),
                session_id: session_ids.map(|c| c.value(i).to_string()).unwrap_or_default(),
                score,
            });
        }
    }
    hits
}
