use anyhow::{anyhow, Result};
use std::sync::Arc;
use uuid::Uuid;

use super::SessionManager;
use crate::intent::IntentClassifier;
use crate::llm::{GenerationConfig, LlmProvider};
use crate::router::IntentRouter;
use crate::types::{MessageRecord, MessageRole};

const NEXT_QUESTIONS_PROMPT: &str = "\
A student just asked a course assistant the question below. Based on the
question and the recent conversation, suggest up to {n} natural follow-up
questions the student might ask next. One question per line, no numbering.

Recent conversation:
{history}

Question: {input}

Follow-up questions:";

/// Result of one processed turn.
#[derive(Debug, Clone)]
pub struct TurnReply {
    /// Session the turn actually landed in. Differs from the requested id
    /// when that id was invalid and a fresh session was created.
    pub session_id: Uuid,
    pub reply: String,
    pub next_questions: Vec<String>,
}

/// Orchestrates one conversation turn: resolve the session, persist the
/// user message, classify, route, persist the reply, then predict
/// follow-ups. The user turn is durable before classification starts.
pub struct ChatEngine {
    sessions: Arc<SessionManager>,
    classifier: IntentClassifier,
    router: IntentRouter,
    llm: Arc<dyn LlmProvider>,
    max_next_questions: usize,
}

impl ChatEngine {
    pub fn new(
        sessions: Arc<SessionManager>,
        classifier: IntentClassifier,
        router: IntentRouter,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            sessions,
            classifier,
            router,
            llm,
            max_next_questions: 3,
        }
    }

    /// A malformed or unknown session id is not the student's problem: they
    /// get a fresh session instead of an error.
    async fn resolve_session(&self, user: &str, requested: &str) -> Result<Uuid> {
        if let Ok(sid) = Uuid::parse_str(requested.trim()) {
            if self.sessions.session_exists(sid) {
                return Ok(sid);
            }
        }
        tracing::warn!(user = %user, requested = %requested, "Invalid session id, creating a fresh session");
        self.sessions
            .create_session(user, None)
            .await
            .map(|s| s.sid)
            .ok_or_else(|| anyhow!("Failed to create replacement session"))
    }

    pub async fn process_message(
        &self,
        user: &str,
        requested_session: &str,
        input: &str,
    ) -> Result<TurnReply> {
        let sid = self.resolve_session(user, requested_session).await?;

        // History as it stood before this turn, for context-sensitive
        // strategies and follow-up prediction.
        let history = self.sessions.messages(sid);

        if !self
            .sessions
            .append_message(sid, MessageRole::User, input)
            .await
        {
            return Err(anyhow!("Failed to persist user message; aborting turn"));
        }

        let intent = self.classifier.classify(input).await;
        let reply = self.router.route(intent, input, sid, &history).await;

        if !self
            .sessions
            .append_message(sid, MessageRole::Assistant, &reply)
            .await
        {
            // A transcript missing its assistant side is a failed turn, not
            // a degraded one.
            return Err(anyhow!("Failed to persist assistant reply"));
        }

        let next_questions = self.predict_next_questions(input, &history).await;

        Ok(TurnReply {
            session_id: sid,
            reply,
            next_questions,
        })
    }

    /// Best effort; an empty list is a perfectly fine outcome.
    pub async fn predict_next_questions(
        &self,
        input: &str,
        history: &[MessageRecord],
    ) -> Vec<String> {
        let recent: Vec<String> = history
            .iter()
            .rev()
            .take(20)
            .rev()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect();

        let prompt = NEXT_QUESTIONS_PROMPT
            .replace("{n}", &self.max_next_questions.to_string())
            .replace("{history}", &recent.join("\n"))
            .replace("{input}", input);

        match self
            .llm
            .complete(&prompt, &GenerationConfig::new(200, 0.5))
            .await
        {
            Ok(raw) => raw
                .lines()
                .map(|l| l.trim().trim_start_matches(['-', '*', '•']).trim())
                .map(|l| l.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')').trim())
                .filter(|l| !l.is_empty())
                .take(self.max_next_questions)
                .map(|l| l.to_string())
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, "Follow-up prediction failed");
                Vec::new()
            }
        }
    }
}
