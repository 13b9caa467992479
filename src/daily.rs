use std::sync::Arc;

use crate::llm::{GenerationConfig, LlmProvider};
use crate::search::{WebSearchSummarizer, SEARCH_UNAVAILABLE};
use crate::types::MessageRecord;

pub const DAILY_FALLBACK: &str = "I'm here and listening. Tell me more!";

/// Phrases that signal the student wants current information rather than
/// conversation.
const REALTIME_KEYWORDS: &[&str] = &[
    "today",
    "yesterday",
    "tonight",
    "right now",
    "currently",
    "latest",
    "this week",
    "recent",
    "news",
    "weather",
];

const SMALL_TALK_PROMPT: &str = "\
You are a friendly campus companion chatting with a student. Reply warmly
and briefly, in the tone of a peer. Recent conversation:
{history}

Student: {input}
You:";

const NO_REALTIME_PROMPT: &str = "\
A student asked about something current, but web search is not available
right now. Let them know kindly that you cannot look up live information at
the moment, and offer to help with anything that does not need it.

Student: {input}";

/// Everyday small talk. Questions that need fresh information go through the
/// web summarizer; everything else is a short friendly reply grounded in the
/// last few turns.
pub struct DailyChat {
    llm: Arc<dyn LlmProvider>,
    web: Arc<WebSearchSummarizer>,
}

impl DailyChat {
    pub fn new(llm: Arc<dyn LlmProvider>, web: Arc<WebSearchSummarizer>) -> Self {
        Self { llm, web }
    }

    fn needs_realtime(input: &str) -> bool {
        let lowered = input.to_lowercase();
        REALTIME_KEYWORDS.iter().any(|k| lowered.contains(k))
    }

    pub async fn reply(&self, input: &str, history: &[MessageRecord]) -> String {
        if Self::needs_realtime(input) {
            let answer = self.web.summarize(input).await;
            if answer != SEARCH_UNAVAILABLE {
                return answer;
            }
            // Search is down; explain that conversationally instead of
            // pasting the marker into a chat.
            let prompt = NO_REALTIME_PROMPT.replace("{input}", input);
            return match self.llm.complete(&prompt, &GenerationConfig::default()).await {
                Ok(reply) => reply,
                Err(_) => DAILY_FALLBACK.to_string(),
            };
        }

        let recent: Vec<String> = history
            .iter()
            .rev()
            .take(5)
            .rev()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect();

        let prompt = SMALL_TALK_PROMPT
            .replace("{history}", &recent.join("\n"))
            .replace("{input}", input);

        match self.llm.complete(&prompt, &GenerationConfig::default()).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "Small talk generation failed");
                DAILY_FALLBACK.to_string()
            }
        }
    }
}
