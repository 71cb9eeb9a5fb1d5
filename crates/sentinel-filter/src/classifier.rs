//! Relevance/category classification over raw event content, backed by
//! the workspace's shared LLM completion capability (§4.6).

use async_trait::async_trait;
use sentinel_core::{error::SentinelResult, llm::LlmCompletion};

/// Decides whether an event's content is worth keeping.
#[async_trait]
pub trait RelevanceClassifier: Send + Sync {
    /// `true` iff the content is relevant enough to persist and rank.
    async fn is_relevant(&self, content: &str) -> SentinelResult<bool>;
}

/// Assigns zero or more category labels to an event's content.
#[async_trait]
pub trait CategoryClassifier: Send + Sync {
    /// Trimmed, non-empty category labels, in classifier order.
    async fn categorize(&self, content: &str) -> SentinelResult<Vec<String>>;
}

/// Classifies via an [`LlmCompletion`] backend, parsing its response
/// exactly as the original filter service did: a response containing
/// "RELEVANT" or "POTENTIALLY_RELEVANT" (case-insensitive) marks the
/// event relevant; categories are the response's comma-separated,
/// trimmed, non-empty segments.
pub struct LlmClassifier<L: LlmCompletion> {
    llm: L,
}

impl<L: LlmCompletion> LlmClassifier<L> {
    /// Builds a classifier over `llm`.
    pub fn new(llm: L) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl<L: LlmCompletion> RelevanceClassifier for LlmClassifier<L> {
    async fn is_relevant(&self, content: &str) -> SentinelResult<bool> {
        let prompt = format!("RELEVANCE_CHECK:\n{content}");
        let response = self.llm.complete(&prompt).await?;
        let upper = response.to_uppercase();
        Ok(upper.contains("RELEVANT"))
    }
}

#[async_trait]
impl<L: LlmCompletion> CategoryClassifier for LlmClassifier<L> {
    async fn categorize(&self, content: &str) -> SentinelResult<Vec<String>> {
        let prompt = format!("CATEGORY_CHECK:\n{content}");
        let response = self.llm.complete(&prompt).await?;
        Ok(response
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect())
    }
}
