use std::sync::Arc;
use uuid::Uuid;

use crate::llm::{GenerationConfig, LlmProvider};
use crate::storage::vector_index::{collection_name_for_session, SessionVectorIndex};

/// Shown in the prompt when retrieval produced nothing.
pub const NO_CONTEXT_PLACEHOLDER: &str =
    "(no relevant material was found in this session's uploads)";

/// Returned to the user when answer generation itself fails.
pub const GENERATION_APOLOGY: &str =
    "I'm sorry, something went wrong while generating the answer. Please try again.";

const ANSWER_PROMPT: &str = "\
You are a course assistant answering from the student's own uploaded \
material. Use only the context below. If the context does not contain \
enough information to answer, say so plainly instead of guessing.

Context:
{context}

Question: {question}

Answer:";

/// Retrieval-augmented answering over a session's private collection.
pub struct RagEngine {
    index: Arc<SessionVectorIndex>,
    llm: Arc<dyn LlmProvider>,
    top_k: usize,
}

impl RagEngine {
    pub fn new(index: Arc<SessionVectorIndex>, llm: Arc<dyn LlmProvider>, top_k: usize) -> Self {
        Self { index, llm, top_k }
    }

    /// Top-k retrieval scoped to the session. A retrieval failure is logged
    /// and degrades to an empty context; it never aborts the turn.
    pub async fn retrieve(&self, sid: Uuid, question: &str) -> Vec<String> {
        let collection = collection_name_for_session(sid);
        match self.index.search(&collection, question, self.top_k).await {
            Ok(hits) => hits.into_iter().map(|h| h.text).collect(),
            Err(e) => {
                tracing::error!(session_id = %sid, error = %e, "Retrieval failed, degrading to empty context");
                Vec::new()
            }
        }
    }

    /// Retrieve, ground, generate. Exactly one generation call; a provider
    /// failure becomes the fixed apology.
    pub async fn answer(&self, sid: Uuid, question: &str) -> String {
        let chunks = self.retrieve(sid, question).await;

        let context = if chunks.is_empty() {
            NO_CONTEXT_PLACEHOLDER.to_string()
        } else {
            chunks.join("\n\n---\n\n")
        };

        let prompt = ANSWER_PROMPT
            .replace("{context}", &context)
            .replace("{question}", question);

        match self.llm.complete(&prompt, &GenerationConfig::default()).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!(session_id = %sid, error = %e, "Answer generation failed");
                GENERATION_APOLOGY.to_string()
            }
        }
    }
}
