//! Web search with bounded retry. The summarizer never surfaces an error to
//! the conversation: when the provider is missing or every attempt fails it
//! returns [`SEARCH_UNAVAILABLE`] and the turn carries on.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::WebSearchConfig;
use crate::llm::{GenerationConfig, LlmProvider};

/// Fixed marker returned when search cannot be performed. Callers and tests
/// compare against this exact string.
pub const SEARCH_UNAVAILABLE: &str =
    "Web search is currently unavailable, so I could not look this up. Please try again later.";

/// One search result, already reduced to display text.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, num_results: usize) -> Result<Vec<SearchResult>>;
}

/// Bounded retry with jittered delay, reusable over any fallible async op.
/// `max_retries` is the number of retries after the first attempt, so the op
/// runs at most `max_retries + 1` times.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, base_delay: Duration, max_jitter: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_jitter,
        }
    }

    pub fn from_config(config: &WebSearchConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
            Duration::from_millis(config.retry_jitter_ms),
        )
    }

    fn jittered_delay(&self) -> Duration {
        let jitter_ms = if self.max_jitter.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.max_jitter.as_millis() as u64)
        };
        self.base_delay + Duration::from_millis(jitter_ms)
    }

    /// Run `op` until it succeeds or the attempt budget is spent, sleeping a
    /// jittered delay between attempts. Returns the last error on exhaustion.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_retries + 1;
        let mut last_err = anyhow!("retry budget was zero");
        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(attempt, max = attempts, error = %e, "Attempt failed");
                    last_err = e;
                    if attempt < attempts {
                        tokio::time::sleep(self.jittered_delay()).await;
                    }
                }
            }
        }
        Err(last_err)
    }
}

/// SerpAPI-backed provider (Bing engine). Construction returns `None` when
/// no API key is configured; the summarizer then short-circuits.
pub struct SerpApiClient {
    api_key: String,
    client: Client,
}

impl SerpApiClient {
    pub fn from_config(config: &WebSearchConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone().filter(|k| !k.is_empty()) else {
            tracing::warn!("No search API key configured; web search disabled");
            return Ok(None);
        };
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Some(Self { api_key, client }))
    }
}

#[derive(Deserialize)]
struct SerpResponse {
    #[serde(default)]
    organic_results: Vec<SerpResult>,
}

#[derive(Deserialize)]
struct SerpResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

#[async_trait]
impl SearchProvider for SerpApiClient {
    async fn search(&self, query: &str, num_results: usize) -> Result<Vec<SearchResult>> {
        let count = num_results.to_string();
        let response = self
            .client
            .get("https://serpapi.com/search")
            .query(&[
                ("engine", "bing"),
                ("q", query),
                ("count", count.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| anyhow!("Search request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Search API error ({}): {}", status, body));
        }

        let parsed: SerpResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse search response: {}", e))?;

        Ok(parsed
            .organic_results
            .into_iter()
            .take(num_results)
            .map(|r| SearchResult {
                title: r.title,
                snippet: r.snippet,
            })
            .collect())
    }
}

const SUMMARIZE_PROMPT: &str = "\
You are a campus study assistant. Using only the web search results below, \
write a concise, well-organized answer to the student's question. Cite which \
result a claim comes from as [n]. If the results do not answer the question, \
say so.

Question: {query}

Search results:
{results}

Answer:";

/// Searches the web and condenses the results through the LLM.
pub struct WebSearchSummarizer {
    provider: Option<Arc<dyn SearchProvider>>,
    llm: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
    num_results: usize,
}

impl WebSearchSummarizer {
    pub fn new(
        provider: Option<Arc<dyn SearchProvider>>,
        llm: Arc<dyn LlmProvider>,
        policy: RetryPolicy,
        num_results: usize,
    ) -> Self {
        Self {
            provider,
            llm,
            policy,
            num_results,
        }
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    /// Search with retry, then summarize. Never returns an error: the
    /// unavailable marker stands in for a missing provider, exhausted
    /// retries, or an empty result set.
    pub async fn summarize(&self, query: &str) -> String {
        let Some(provider) = &self.provider else {
            return SEARCH_UNAVAILABLE.to_string();
        };

        let results = match self
            .policy
            .run(|| provider.search(query, self.num_results))
            .await
        {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(error = %e, query = %query, "Web search exhausted retries");
                return SEARCH_UNAVAILABLE.to_string();
            }
        };

        if results.is_empty() {
            return SEARCH_UNAVAILABLE.to_string();
        }

        let formatted: Vec<String> = results
            .iter()
            .enumerate()
            .map(|(i, r)| format!("[{}] {}\n{}", i + 1, r.title, r.snippet))
            .collect();
        let formatted = formatted.join("\n\n");

        let prompt = SUMMARIZE_PROMPT
            .replace("{query}", query)
            .replace("{results}", &formatted);

        match self.llm.complete(&prompt, &GenerationConfig::default()).await {
            Ok(summary) => summary,
            Err(e) => {
                // Degrade to the raw snippets rather than dropping the turn.
                tracing::error!(error = %e, "Search summarization failed");
                formatted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::FakeLlm;
    use parking_lot::Mutex;

    /// Provider scripted with a list of outcomes, one per call.
    struct FakeSearch {
        outcomes: Mutex<Vec<Result<Vec<SearchResult>, String>>>,
        calls: Mutex<usize>,
    }

    impl FakeSearch {
        fn new(outcomes: Vec<Result<Vec<SearchResult>, String>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl SearchProvider for FakeSearch {
        async fn search(&self, _query: &str, _n: usize) -> Result<Vec<SearchResult>> {
            *self.calls.lock() += 1;
            let mut outcomes = self.outcomes.lock();
            if outcomes.is_empty() {
                return Err(anyhow!("script exhausted"));
            }
            outcomes.remove(0).map_err(|e| anyhow!(e))
        }
    }

    fn hit(title: &str, snippet: &str) -> SearchResult {
        SearchResult {
            title: title.into(),
            snippet: snippet.into(),
        }
    }

    fn quick_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::ZERO)
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_after_budget_and_sleeps_between_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5), Duration::from_secs(2));
        let calls = Mutex::new(0usize);
        let started = tokio::time::Instant::now();

        let result: Result<()> = policy
            .run(|| {
                *calls.lock() += 1;
                async { Err(anyhow!("timeout")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*calls.lock(), 4);
        // Three inter-attempt delays of at least the 5s base.
        assert!(started.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let policy = quick_policy(3);
        let calls = Mutex::new(0usize);
        let result = policy
            .run(|| {
                let n = {
                    let mut c = calls.lock();
                    *c += 1;
                    *c
                };
                async move {
                    if n < 3 {
                        Err(anyhow!("flaky"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 3);
        assert_eq!(*calls.lock(), 3);
    }

    #[tokio::test]
    async fn three_failures_then_success_still_summarizes() {
        let provider = Arc::new(FakeSearch::new(vec![
            Err("timeout".into()),
            Err("timeout".into()),
            Err("timeout".into()),
            Ok(vec![hit("Rust book", "Ownership explained")]),
        ]));
        let llm = Arc::new(FakeLlm::always("Ownership means every value has one owner."));
        let summarizer =
            WebSearchSummarizer::new(Some(provider.clone()), llm, quick_policy(3), 5);

        let answer = summarizer.summarize("what is ownership").await;
        assert_eq!(answer, "Ownership means every value has one owner.");
        assert_eq!(*provider.calls.lock(), 4);
    }

    #[tokio::test]
    async fn exhausted_retries_return_the_unavailable_marker() {
        let provider = Arc::new(FakeSearch::new(vec![
            Err("timeout".into()),
            Err("timeout".into()),
            Err("timeout".into()),
            Err("timeout".into()),
        ]));
        let llm = Arc::new(FakeLlm::always("should not be called"));
        let summarizer =
            WebSearchSummarizer::new(Some(provider.clone()), llm.clone(), quick_policy(3), 5);

        let answer = summarizer.summarize("anything").await;
        assert_eq!(answer, SEARCH_UNAVAILABLE);
        assert_eq!(*provider.calls.lock(), 4);
        assert!(llm.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_provider_short_circuits() {
        let llm = Arc::new(FakeLlm::always("x"));
        let summarizer = WebSearchSummarizer::new(None, llm.clone(), quick_policy(3), 5);
        assert!(!summarizer.is_available());
        assert_eq!(summarizer.summarize("q").await, SEARCH_UNAVAILABLE);
        assert!(llm.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn empty_results_return_the_marker() {
        let provider = Arc::new(FakeSearch::new(vec![Ok(vec![])]));
        let llm = Arc::new(FakeLlm::always("x"));
        let summarizer = WebSearchSummarizer::new(Some(provider), llm, quick_policy(0), 5);
        assert_eq!(summarizer.summarize("q").await, SEARCH_UNAVAILABLE);
    }

    #[tokio::test]
    async fn summarizer_degrades_to_snippets_when_llm_fails() {
        let provider = Arc::new(FakeSearch::new(vec![Ok(vec![hit(
            "BFS vs DFS",
            "Breadth-first explores levels.",
        )])]));
        let llm = Arc::new(FakeLlm::new(vec![Err("down".into())]));
        let summarizer = WebSearchSummarizer::new(Some(provider), llm, quick_policy(0), 5);
        let answer = summarizer.summarize("bfs").await;
        assert!(answer.contains("BFS vs DFS"));
        assert!(answer.contains("Breadth-first explores levels."));
    }
}
