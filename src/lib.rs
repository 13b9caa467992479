//! Course-assistant chat engine.
//!
//! The crate wires an intent classifier, an intent router, session-scoped
//! retrieval over LanceDB, document ingestion, and SQLite-backed chat
//! persistence into one pipeline. All services are plain structs handed
//! their dependencies at construction; startup order is database, vector
//! index, generation client, then the managers on top.

pub mod chat;
pub mod config;
pub mod daily;
pub mod embeddings;
pub mod ingest;
pub mod intent;
pub mod knowledge;
pub mod llm;
pub mod maintenance;
pub mod processing;
pub mod professional;
pub mod rag;
pub mod router;
pub mod search;
pub mod storage;
pub mod types;
pub mod users;

pub use chat::{ChatEngine, SessionManager};
pub use config::AppConfig;
pub use embeddings::{ApiEmbedder, Embedder};
pub use ingest::{DocumentStore, Ingestor};
pub use intent::{Intent, IntentClassifier};
pub use llm::{GenerationConfig, LlmProvider, OpenAiClient};
pub use rag::RagEngine;
pub use router::IntentRouter;
pub use search::{RetryPolicy, SearchProvider, WebSearchSummarizer};
pub use storage::database::Database;
pub use storage::vector_index::SessionVectorIndex;
pub use types::{MessageRecord, MessageRole, SessionRecord};
