use std::sync::Arc;
use uuid::Uuid;

use crate::daily::DailyChat;
use crate::intent::Intent;
use crate::professional::ProfessionalQa;
use crate::rag::RagEngine;
use crate::search::WebSearchSummarizer;
use crate::types::MessageRecord;

/// Reply for intents that have no handling strategy.
pub const CLARIFICATION_MESSAGE: &str =
    "I'm not sure what you're asking for. Could you rephrase the question, \
     or add a bit more detail about what you need?";

/// Dispatches a classified turn to its answering strategy. The mapping is a
/// compile-time exhaustive match; an unmapped intent falls back to a static
/// clarification, and `route` never fails.
pub struct IntentRouter {
    rag: Arc<RagEngine>,
    daily: Arc<DailyChat>,
    web: Arc<WebSearchSummarizer>,
    professional: Arc<ProfessionalQa>,
}

impl IntentRouter {
    pub fn new(
        rag: Arc<RagEngine>,
        daily: Arc<DailyChat>,
        web: Arc<WebSearchSummarizer>,
        professional: Arc<ProfessionalQa>,
    ) -> Self {
        Self {
            rag,
            daily,
            web,
            professional,
        }
    }

    pub async fn route(
        &self,
        intent: Intent,
        input: &str,
        sid: Uuid,
        history: &[MessageRecord],
    ) -> String {
        tracing::info!(intent = intent.code(), session_id = %sid, "Routing turn");
        match intent {
            // Course material questions answer from the session's uploads.
            Intent::Course | Intent::FileRelated => self.rag.answer(sid, input).await,
            Intent::DailyChat => self.daily.reply(input, history).await,
            Intent::Definition | Intent::Method | Intent::OtherAcademic => {
                self.web.summarize(input).await
            }
            Intent::Comparison => self.professional.answer_comparison(input).await,
            Intent::Evaluation => self.professional.answer_evaluation(input).await,
            // Domain knowledge has no dedicated strategy yet; both it and
            // unrecognized input ask the student to clarify.
            Intent::DomainKnowledge | Intent::Unrecognized => CLARIFICATION_MESSAGE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::testing::HashEmbedder;
    use crate::llm::testing::FakeLlm;
    use crate::search::RetryPolicy;
    use crate::storage::vector_index::SessionVectorIndex;
    use std::time::Duration;

    async fn router_with(llm: Arc<FakeLlm>) -> (IntentRouter, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(
            SessionVectorIndex::new(
                dir.path().to_str().unwrap(),
                Arc::new(HashEmbedder::new(16)),
            )
            .await
            .unwrap(),
        );
        let web = Arc::new(WebSearchSummarizer::new(
            None,
            llm.clone(),
            RetryPolicy::new(0, Duration::from_millis(1), Duration::ZERO),
            5,
        ));
        let router = IntentRouter::new(
            Arc::new(RagEngine::new(index, llm.clone(), 5)),
            Arc::new(DailyChat::new(llm.clone(), web.clone())),
            web,
            Arc::new(ProfessionalQa::new(llm)),
        );
        (router, dir)
    }

    #[tokio::test]
    async fn unmapped_intents_get_the_clarification() {
        let llm = Arc::new(FakeLlm::always("should not be used"));
        let (router, _dir) = router_with(llm.clone()).await;
        let sid = Uuid::new_v4();

        for intent in [Intent::DomainKnowledge, Intent::Unrecognized] {
            let reply = router.route(intent, "??", sid, &[]).await;
            assert_eq!(reply, CLARIFICATION_MESSAGE);
        }
        assert!(llm.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn every_intent_yields_a_reply_even_when_everything_fails() {
        // Provider that always errors; search disabled. Nothing may panic
        // or propagate an error out of route().
        let llm = Arc::new(FakeLlm::new(vec![]));
        let (router, _dir) = router_with(llm).await;
        let sid = Uuid::new_v4();

        for intent in [
            Intent::Course,
            Intent::DomainKnowledge,
            Intent::DailyChat,
            Intent::Unrecognized,
            Intent::Definition,
            Intent::Method,
            Intent::Comparison,
            Intent::Evaluation,
            Intent::OtherAcademic,
            Intent::FileRelated,
        ] {
            let reply = router.route(intent, "question", sid, &[]).await;
            assert!(!reply.is_empty(), "empty reply for {:?}", intent);
        }
    }

    #[tokio::test]
    async fn comparison_and_evaluation_dispatch_to_the_advisor() {
        let llm = Arc::new(FakeLlm::always("advised"));
        let (router, _dir) = router_with(llm.clone()).await;
        let sid = Uuid::new_v4();

        assert_eq!(router.route(Intent::Comparison, "a vs b", sid, &[]).await, "advised");
        assert_eq!(router.route(Intent::Evaluation, "rate this", sid, &[]).await, "advised");
        let prompts = llm.prompts.lock();
        assert!(prompts[0].contains("comparison"));
        assert!(prompts[1].contains("assessment"));
    }
}
