//! Admin-curated shared knowledge base. Entries move through a review
//! workflow (pending, pending_review, approved, rejected, deleted) while
//! their chunks live in one fixed vector collection.

use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::processing::{self, TextChunker};
use crate::storage::database::Database;
use crate::storage::vector_index::{ChunkHit, SessionVectorIndex, KNOWLEDGE_COLLECTION};
use crate::types::{now_timestamp, ChunkRecord};

#[derive(Debug, Clone)]
pub struct KnowledgeStatistics {
    pub by_status: Vec<(String, usize)>,
    pub chunk_count: usize,
}

pub struct KnowledgeBase {
    db: Arc<Database>,
    index: Arc<SessionVectorIndex>,
    chunker: TextChunker,
}

impl KnowledgeBase {
    pub fn new(db: Arc<Database>, index: Arc<SessionVectorIndex>, chunking: &ChunkingConfig) -> Self {
        Self {
            db,
            index,
            chunker: TextChunker::new(
                chunking.chunk_size,
                chunking.chunk_overlap,
                chunking.min_chunk_size,
            ),
        }
    }

    /// Load, chunk and index a document into the shared collection. The new
    /// entry starts in `pending` and stays invisible to review queues until
    /// submitted.
    pub async fn add_document(
        &self,
        path: &Path,
        title: &str,
        uploaded_by: &str,
    ) -> Result<i64> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .ok_or_else(|| anyhow!("Document {} has no extension", path.display()))?;

        let path_owned = path.to_path_buf();
        let ext = extension.clone();
        let blocks = tokio::task::spawn_blocking(move || {
            processing::load_document(&path_owned, &ext)
        })
        .await??;

        let text = blocks.join("\n\n");
        let chunks = self.chunker.chunk(&text);
        if chunks.is_empty() {
            return Err(anyhow!("Document {} contained no usable text", path.display()));
        }

        let source = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let created_at = chrono::Utc::now().timestamp();
        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .map(|c| ChunkRecord {
                id: Uuid::new_v4().to_string(),
                source: source.clone(),
                chunk_index: c.index as u32,
                text: c.text,
                file_path: path.display().to_string(),
                file_type: extension.clone(),
                session_id: String::new(),
                vector: Vec::new(),
                created_at,
            })
            .collect();
        let chunk_count = records.len();

        self.index.add_chunks(KNOWLEDGE_COLLECTION, records).await?;
        let entry_id = self
            .db
            .insert_knowledge_entry(title, &source, uploaded_by, &now_timestamp())?;

        tracing::info!(entry_id, chunks = chunk_count, source = %source, "Added knowledge document");
        Ok(entry_id)
    }

    pub fn submit_for_review(&self, entry_id: i64) -> Result<bool> {
        self.db
            .set_knowledge_status(entry_id, "pending_review", None, None, &now_timestamp())
    }

    pub fn review(
        &self,
        entry_id: i64,
        reviewer: &str,
        approved: bool,
        comments: Option<&str>,
    ) -> Result<bool> {
        let status = if approved { "approved" } else { "rejected" };
        self.db.set_knowledge_status(
            entry_id,
            status,
            Some(reviewer),
            comments,
            &now_timestamp(),
        )
    }

    /// Mark the entry deleted and drop its chunks from the collection.
    pub async fn delete_document(&self, entry_id: i64, source: &str) -> Result<usize> {
        self.db
            .set_knowledge_status(entry_id, "deleted", None, None, &now_timestamp())?;
        let removed = self
            .index
            .delete_by_source(KNOWLEDGE_COLLECTION, source)
            .await?;
        tracing::info!(entry_id, removed, "Deleted knowledge document");
        Ok(removed)
    }

    pub async fn query(&self, question: &str, top_k: usize) -> Result<Vec<ChunkHit>> {
        self.index
            .search(KNOWLEDGE_COLLECTION, question, top_k)
            .await
    }

    pub async fn update_chunk(&self, chunk_id: &str, content: &str) -> Result<bool> {
        self.index
            .update_chunk(KNOWLEDGE_COLLECTION, chunk_id, content)
            .await
    }

    pub async fn statistics(&self) -> Result<KnowledgeStatistics> {
        Ok(KnowledgeStatistics {
            by_status: self.db.knowledge_statistics()?,
            chunk_count: self.index.count(KNOWLEDGE_COLLECTION).await?,
        })
    }
}
