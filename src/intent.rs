use std::sync::Arc;

use crate::llm::{GenerationConfig, LlmProvider};

/// The closed set of question categories the router dispatches on. Adding a
/// variant forces every `match` in the router to be revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    /// A — course-specific question, answerable from uploaded material
    Course,
    /// B — broader domain knowledge question
    DomainKnowledge,
    /// C — small talk, greetings, everyday chat
    DailyChat,
    /// D — unclassifiable input
    Unrecognized,
    /// E — asks what a term or concept means
    Definition,
    /// F — asks how to do something
    Method,
    /// G — asks to compare alternatives
    Comparison,
    /// H — asks for an assessment or judgement
    Evaluation,
    /// J — academic question outside the above shapes
    OtherAcademic,
    /// K — refers to an uploaded file's content
    FileRelated,
}

impl Intent {
    pub fn code(&self) -> &'static str {
        match self {
            Intent::Course => "A",
            Intent::DomainKnowledge => "B",
            Intent::DailyChat => "C",
            Intent::Unrecognized => "D",
            Intent::Definition => "E",
            Intent::Method => "F",
            Intent::Comparison => "G",
            Intent::Evaluation => "H",
            Intent::OtherAcademic => "J",
            Intent::FileRelated => "K",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "A" => Some(Intent::Course),
            "B" => Some(Intent::DomainKnowledge),
            "C" => Some(Intent::DailyChat),
            "D" => Some(Intent::Unrecognized),
            "E" => Some(Intent::Definition),
            "F" => Some(Intent::Method),
            "G" => Some(Intent::Comparison),
            "H" => Some(Intent::Evaluation),
            "J" => Some(Intent::OtherAcademic),
            "K" => Some(Intent::FileRelated),
            _ => None,
        }
    }
}

const CLASSIFY_PROMPT: &str = "\
You are an intent classifier for a campus course assistant. Read the \
student's message and answer with exactly one capital letter from the \
taxonomy below. Output the letter only, nothing else.

A - question about course content the student has uploaded material for
B - broader domain or subject knowledge question
C - greeting, small talk or everyday chat
D - cannot be classified
E - asks for the definition or meaning of a concept
F - asks how to do or achieve something
G - asks to compare two or more things
H - asks for an evaluation, judgement or assessment
J - academic question that fits none of the shapes above
K - question about the content of an uploaded file

Student message:
{input}

Letter:";

/// LLM-backed classifier. Total by construction: anything that is not a
/// clean single-letter answer from the taxonomy maps to `Unrecognized`, and
/// provider failures do too. Exactly one provider call per input.
pub struct IntentClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub async fn classify(&self, input: &str) -> Intent {
        let prompt = CLASSIFY_PROMPT.replace("{input}", input);
        let config = GenerationConfig::new(2, 0.1);

        match self.llm.complete(&prompt, &config).await {
            Ok(raw) => {
                let code = raw.trim().to_uppercase();
                match Intent::from_code(&code) {
                    Some(intent) => {
                        tracing::debug!(code = %code, "Classified intent");
                        intent
                    }
                    None => {
                        tracing::warn!(raw = %raw, "Classifier returned unknown code");
                        Intent::Unrecognized
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Intent classification failed");
                Intent::Unrecognized
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::FakeLlm;

    #[tokio::test]
    async fn valid_codes_map_to_intents() {
        for (code, expected) in [
            ("A", Intent::Course),
            ("C", Intent::DailyChat),
            ("K", Intent::FileRelated),
        ] {
            let llm = Arc::new(FakeLlm::new(vec![Ok(code.to_string())]));
            let classifier = IntentClassifier::new(llm);
            assert_eq!(classifier.classify("question").await, expected);
        }
    }

    #[tokio::test]
    async fn answer_is_trimmed_and_uppercased() {
        let llm = Arc::new(FakeLlm::new(vec![Ok("  e\n".to_string())]));
        let classifier = IntentClassifier::new(llm);
        assert_eq!(classifier.classify("what is a monad").await, Intent::Definition);
    }

    #[tokio::test]
    async fn garbage_and_errors_become_unrecognized() {
        let llm = Arc::new(FakeLlm::new(vec![
            Ok("Z".to_string()),
            Ok("the intent is A".to_string()),
            Err("provider down".to_string()),
        ]));
        let classifier = IntentClassifier::new(llm);
        assert_eq!(classifier.classify("x").await, Intent::Unrecognized);
        assert_eq!(classifier.classify("x").await, Intent::Unrecognized);
        assert_eq!(classifier.classify("x").await, Intent::Unrecognized);
    }

    #[tokio::test]
    async fn exactly_one_provider_call_per_input() {
        let llm = Arc::new(FakeLlm::new(vec![Err("down".to_string())]));
        let classifier = IntentClassifier::new(llm.clone());
        classifier.classify("hello").await;
        assert_eq!(llm.prompts.lock().len(), 1);
    }

    #[test]
    fn codes_round_trip() {
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
            assert_eq!(Intent::from_code(intent.code()), Some(intent));
        }
        assert_eq!(Intent::from_code("I"), None);
    }
}
