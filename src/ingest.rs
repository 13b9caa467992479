//! File intake and the ingestion pipeline: validate, store, load, chunk,
//! embed, upsert. Progress is reported into the session transcript as
//! system-role messages so the student can follow along.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::chat::SessionManager;
use crate::config::{ChunkingConfig, IngestConfig};
use crate::processing::{self, LoadError, TextChunker};
use crate::storage::database::Database;
use crate::storage::vector_index::{collection_name_for_session, SessionVectorIndex};
use crate::types::{now_timestamp, ChunkRecord, FileRecord, MessageRole};

/// Replace anything shell- or path-hostile in a client-supplied filename.
/// Path separators can never survive this, so uploads cannot escape their
/// directory.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(['.', '_']).to_string();
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Stores uploads on disk and records them in the files table.
pub struct DocumentStore {
    root: PathBuf,
    db: Arc<Database>,
}

impl DocumentStore {
    pub fn new(root: PathBuf, db: Arc<Database>) -> Self {
        Self { root, db }
    }

    /// Persist an upload. The extension is validated before anything is
    /// written; a rejected upload leaves no file and no row behind.
    pub fn save_upload(
        &self,
        user: &str,
        sid: Uuid,
        bytes: &[u8],
        original_name: &str,
    ) -> Result<FileRecord> {
        let extension = extension_of(original_name)
            .ok_or_else(|| anyhow!("Filename '{}' has no extension", original_name))?;
        if !processing::is_supported_extension(&extension) {
            return Err(LoadError::UnsupportedFormat {
                extension,
                supported: processing::supported_extensions_list(),
            }
            .into());
        }

        let safe_name = sanitize_filename(original_name);
        let dir = self.root.join(sanitize_filename(user)).join(sid.to_string());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create upload dir {}", dir.display()))?;

        let stored_name = format!("{}_{}", Uuid::new_v4(), safe_name);
        let path = dir.join(&stored_name);
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write upload {}", path.display()))?;

        let uploaded_at = now_timestamp();
        let path_str = path.display().to_string();
        let id = self
            .db
            .insert_file(sid, &path_str, &safe_name, &extension, &uploaded_at)?;

        tracing::info!(session_id = %sid, file = %safe_name, "Stored upload");
        Ok(FileRecord {
            id,
            session_id: sid,
            file_path: path_str,
            file_name: safe_name,
            file_type: extension,
            uploaded_at,
            processed: false,
        })
    }
}

/// Summary of a session's upload queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStatus {
    pub total: usize,
    pub processed: usize,
    pub unprocessed: usize,
}

/// Turns stored uploads into vector collections, batch by batch.
pub struct Ingestor {
    db: Arc<Database>,
    index: Arc<SessionVectorIndex>,
    sessions: Arc<SessionManager>,
    chunker: TextChunker,
    load_timeout: Duration,
    batch_size: usize,
    progress_threshold: usize,
}

impl Ingestor {
    pub fn new(
        db: Arc<Database>,
        index: Arc<SessionVectorIndex>,
        sessions: Arc<SessionManager>,
        chunking: &ChunkingConfig,
        ingest: &IngestConfig,
    ) -> Self {
        Self {
            db,
            index,
            sessions,
            chunker: TextChunker::new(
                chunking.chunk_size,
                chunking.chunk_overlap,
                chunking.min_chunk_size,
            ),
            load_timeout: Duration::from_secs(ingest.load_timeout_secs),
            batch_size: ingest.batch_size,
            progress_threshold: ingest.progress_threshold,
        }
    }

    async fn notify(&self, sid: Uuid, content: String) {
        // A lost progress message must not fail the pipeline.
        if !self
            .sessions
            .append_message(sid, MessageRole::System, &content)
            .await
        {
            tracing::warn!(session_id = %sid, "Failed to post progress message");
        }
    }

    /// Ingest one stored file into the session's collection. Every outcome
    /// is reported into the transcript; the return value says whether the
    /// file can be marked processed.
    pub async fn process_file(&self, sid: Uuid, file: &FileRecord) -> bool {
        self.notify(sid, format!("Processing {}...", file.file_name))
            .await;

        let path = PathBuf::from(&file.file_path);
        let extension = file.file_type.clone();
        let load = tokio::task::spawn_blocking(move || processing::load_document(&path, &extension));

        let blocks = match tokio::time::timeout(self.load_timeout, load).await {
            Err(_) => {
                tracing::error!(session_id = %sid, file = %file.file_name, "Document load timed out");
                self.notify(
                    sid,
                    format!(
                        "Could not process {}: reading the document took too long.",
                        file.file_name
                    ),
                )
                .await;
                return false;
            }
            Ok(Err(join_err)) => {
                tracing::error!(session_id = %sid, error = %join_err, "Loader task failed");
                self.notify(sid, format!("Could not process {}.", file.file_name))
                    .await;
                return false;
            }
            Ok(Ok(Err(load_err))) => {
                tracing::error!(session_id = %sid, file = %file.file_name, error = %load_err, "Document load failed");
                self.notify(
                    sid,
                    format!("Could not process {}: {}", file.file_name, load_err),
                )
                .await;
                return false;
            }
            Ok(Ok(Ok(blocks))) => blocks,
        };

        let text = blocks.join("\n\n");
        let chunks = self.chunker.chunk(&text);
        if chunks.is_empty() {
            self.notify(
                sid,
                format!("{} contained no usable text.", file.file_name),
            )
            .await;
            return false;
        }

        let total = chunks.len();
        let created_at = chrono::Utc::now().timestamp();
        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .map(|c| ChunkRecord {
                id: c.id.to_string(),
                source: file.file_name.clone(),
                chunk_index: c.index as u32,
                text: c.text,
                file_path: file.file_path.clone(),
                file_type: file.file_type.clone(),
                session_id: sid.to_string(),
                vector: Vec::new(),
                created_at,
            })
            .collect();

        let collection = collection_name_for_session(sid);
        let mut done = 0usize;
        for batch in records.chunks(self.batch_size) {
            if let Err(e) = self.index.add_chunks(&collection, batch.to_vec()).await {
                tracing::error!(session_id = %sid, file = %file.file_name, error = %e, "Chunk upsert failed");
                self.notify(
                    sid,
                    format!(
                        "Processing {} failed after {} of {} chunks.",
                        file.file_name, done, total
                    ),
                )
                .await;
                return false;
            }
            done += batch.len();
            if total > self.progress_threshold && done < total {
                self.notify(
                    sid,
                    format!("Processing {}: {}/{} chunks done.", file.file_name, done, total),
                )
                .await;
            }
        }

        self.notify(
            sid,
            format!(
                "✅ {} is ready: {} chunks indexed. Ask away!",
                file.file_name, total
            ),
        )
        .await;
        tracing::info!(session_id = %sid, file = %file.file_name, chunks = total, "File ingested");
        true
    }

    /// Ingest every unprocessed file for the session. One file failing
    /// never stops its siblings; only successes get their processed flag.
    /// Returns the number of files that succeeded.
    pub async fn process_pending(&self, sid: Uuid) -> usize {
        let files = match self.db.unprocessed_files(sid) {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(session_id = %sid, error = %e, "Could not list pending files");
                return 0;
            }
        };

        let mut succeeded = 0;
        for file in &files {
            if self.process_file(sid, file).await {
                if let Err(e) = self.db.mark_file_processed(file.id) {
                    tracing::error!(file_id = file.id, error = %e, "Failed to set processed flag");
                } else {
                    succeeded += 1;
                }
            }
        }
        succeeded
    }

    pub fn session_file_status(&self, sid: Uuid) -> FileStatus {
        let (total, processed) = self.db.file_status(sid).unwrap_or((0, 0));
        FileStatus {
            total,
            processed,
            unprocessed: total - processed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::embeddings::testing::HashEmbedder;
    use crate::llm::testing::FakeLlm;

    struct Fixture {
        db: Arc<Database>,
        index: Arc<SessionVectorIndex>,
        sessions: Arc<SessionManager>,
        store: DocumentStore,
        ingestor: Ingestor,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let index = Arc::new(
            SessionVectorIndex::new(
                dir.path().join("vectors").to_str().unwrap(),
                Arc::new(HashEmbedder::new(16)),
            )
            .await
            .unwrap(),
        );
        let sessions = Arc::new(SessionManager::new(
            db.clone(),
            index.clone(),
            Arc::new(FakeLlm::always("Title")),
        ));
        let config = AppConfig::default();
        let store = DocumentStore::new(dir.path().join("uploads"), db.clone());
        let ingestor = Ingestor::new(
            db.clone(),
            index.clone(),
            sessions.clone(),
            &config.chunking,
            &config.ingest,
        );
        Fixture {
            db,
            index,
            sessions,
            store,
            ingestor,
            _dir: dir,
        }
    }

    #[test]
    fn sanitize_strips_separators_and_shell_characters() {
        assert_eq!(sanitize_filename("notes.txt"), "notes.txt");
        assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_filename("a b;c$(x).pdf"), "a_b_c__x_.pdf");
        assert_eq!(sanitize_filename("数据结构.pdf"), "数据结构.pdf");
        assert_eq!(sanitize_filename("..."), "file");
    }

    #[tokio::test]
    async fn unsupported_upload_leaves_nothing_behind() {
        let f = fixture().await;
        let sid = Uuid::new_v4();
        let err = f
            .store
            .save_upload("u", sid, b"MZ\x90", "malware.exe")
            .unwrap_err();
        assert!(err.to_string().contains("exe"));
        assert!(err.to_string().contains("pdf"));

        assert_eq!(f.db.file_status(sid).unwrap(), (0, 0));
        // The per-session upload directory was never created.
        assert!(!f.store.root.join("u").join(sid.to_string()).exists());
    }

    #[tokio::test]
    async fn upload_then_ingest_makes_chunks_searchable() {
        let f = fixture().await;
        let session = f.sessions.create_session("u", None).await.unwrap();
        let sid = session.sid;

        let body = "Dijkstra's algorithm finds shortest paths using a priority queue. "
            .repeat(40);
        let file = f
            .store
            .save_upload("u", sid, body.as_bytes(), "graphs.txt")
            .unwrap();

        assert!(f.ingestor.process_file(sid, &file).await);

        let collection = collection_name_for_session(sid);
        let count = f.index.count(&collection).await.unwrap();
        assert!(count > 1);

        let hits = f.index.search(&collection, "priority queue", 5).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].source, "graphs.txt");

        // Transcript got a start notice and a terminal success notice.
        let messages = f.sessions.messages(sid);
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();
        assert!(system.first().unwrap().contains("Processing graphs.txt"));
        assert!(system.last().unwrap().contains("ready"));
    }

    #[tokio::test]
    async fn one_bad_file_does_not_stop_the_batch() {
        let f = fixture().await;
        let session = f.sessions.create_session("u", None).await.unwrap();
        let sid = session.sid;

        let good = "Stacks and queues are linear structures with distinct access orders. "
            .repeat(20);
        f.store
            .save_upload("u", sid, good.as_bytes(), "good.txt")
            .unwrap();
        // Claims to be a PDF, is not one: the loader will fail on it.
        f.store
            .save_upload("u", sid, b"not a pdf at all", "broken.pdf")
            .unwrap();
        let more = "Hash tables trade memory for constant-time lookups on average. "
            .repeat(20);
        f.store
            .save_upload("u", sid, more.as_bytes(), "more.txt")
            .unwrap();

        let succeeded = f.ingestor.process_pending(sid).await;
        assert_eq!(succeeded, 2);

        let status = f.ingestor.session_file_status(sid);
        assert_eq!(
            status,
            FileStatus {
                total: 3,
                processed: 2,
                unprocessed: 1
            }
        );
        // The failure was reported into the transcript.
        let messages = f.sessions.messages(sid);
        assert!(messages
            .iter()
            .any(|m| m.role == MessageRole::System && m.content.contains("broken.pdf")));
    }

    #[tokio::test]
    async fn empty_document_is_a_failure() {
        let f = fixture().await;
        let session = f.sessions.create_session("u", None).await.unwrap();
        let sid = session.sid;

        let file = f
            .store
            .save_upload("u", sid, b"  \n ", "blank.txt")
            .unwrap();
        assert!(!f.ingestor.process_file(sid, &file).await);
        assert_eq!(f.ingestor.process_pending(sid).await, 0);
        assert_eq!(f.ingestor.session_file_status(sid).processed, 0);
    }
}
