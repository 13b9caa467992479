use std::sync::Arc;

use crate::llm::{GenerationConfig, LlmProvider};

pub const PROFESSIONAL_APOLOGY: &str =
    "I'm sorry, I could not put together that answer just now. Please try again.";

const COMPARISON_PROMPT: &str = "\
You are an experienced academic advisor. The student wants a comparison.
Compare the options in their question along the dimensions that actually
matter for a student (difficulty, prerequisites, career relevance, typical
workloads), finish with a short recommendation, and stay neutral where the
choice is genuinely personal.

Question: {input}";

const EVALUATION_PROMPT: &str = "\
You are an experienced academic advisor. The student wants an assessment.
Give a balanced evaluation of the subject of their question: strengths,
weaknesses, and who it suits. Be concrete and avoid empty praise.

Question: {input}";

/// Comparison and evaluation answers with advisor-style prompts. Provider
/// failures collapse to a fixed apology.
pub struct ProfessionalQa {
    llm: Arc<dyn LlmProvider>,
}

impl ProfessionalQa {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub async fn answer_comparison(&self, input: &str) -> String {
        self.answer_with(COMPARISON_PROMPT, input).await
    }

    pub async fn answer_evaluation(&self, input: &str) -> String {
        self.answer_with(EVALUATION_PROMPT, input).await
    }

    async fn answer_with(&self, template: &str, input: &str) -> String {
        let prompt = template.replace("{input}", input);
        match self.llm.complete(&prompt, &GenerationConfig::default()).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!(error = %e, "Professional answer generation failed");
                PROFESSIONAL_APOLOGY.to_string()
            }
        }
    }
}
