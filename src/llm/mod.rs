//! Text generation boundary. Everything that talks to a language model
//! goes through [`LlmProvider`]; callers decide what a failure means
//! (usually a fixed fallback string, never a crash of the turn).

mod openai;

pub use openai::OpenAiClient;

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

impl GenerationConfig {
    pub fn new(max_tokens: usize, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Single-prompt completion. Implementations must propagate transport
    /// and API errors as `Err` so call sites can apply their own fallback.
    async fn complete(&self, prompt: &str, config: &GenerationConfig) -> Result<String>;
}

#[cfg(test)]
pub mod testing {
    use super::{GenerationConfig, LlmProvider};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Scripted provider: pops responses in order, records every prompt.
    /// An `Err` script entry simulates a provider failure for that call.
    pub struct FakeLlm {
        responses: Mutex<Vec<Result<String, String>>>,
        fallback: Option<String>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl FakeLlm {
        pub fn new(responses: Vec<Result<String, String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                fallback: None,
                prompts: Mutex::new(Vec::new()),
            }
        }

        /// Provider that answers every call with the same text.
        pub fn always(text: &str) -> Self {
            Self {
                responses: Mutex::new(Vec::new()),
                fallback: Some(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for FakeLlm {
        async fn complete(&self, prompt: &str, _config: &GenerationConfig) -> Result<String> {
            self.prompts.lock().push(prompt.to_string());
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                if let Some(text) = &self.fallback {
                    return Ok(text.clone());
                }
                return Err(anyhow!("FakeLlm script exhausted"));
            }
            responses.remove(0).map_err(|e| anyhow!(e))
        }
    }
}
