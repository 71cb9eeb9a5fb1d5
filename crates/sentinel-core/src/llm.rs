//! Pluggable LLM completion capability, shared by the filter worker's
//! relevance/category classification (§4.6) and the inspector's
//! `llm_anomaly_detector` (§4.8). The call itself — prompt engineering,
//! provider wire formats — is explicitly out of scope (§1); what's
//! shared is the shape every caller agrees on: hand a prompt to
//! [`LlmCompletion::complete`], get a string back, parse it the way the
//! original service did (substring match on `"RELEVANT"`, comma-split
//! on category lists, `"ANOMALY"` substring match).

use async_trait::async_trait;

use crate::error::SentinelResult;

/// A single-turn text completion call. Implementors own their own
/// provider wiring (or, for [`StubLlmClient`], none at all).
#[async_trait]
pub trait LlmCompletion: Send + Sync {
    /// Returns the provider's completion for `prompt`.
    async fn complete(&self, prompt: &str) -> SentinelResult<String>;
}

/// A deterministic stand-in for a real OpenAI/Anthropic completion
/// call, used for local/dev/test wiring so the pipeline runs
/// end-to-end without network access or API keys beyond the
/// configuration-validation step (§4.6).
///
/// Dispatches on the task tag each caller prefixes its prompt with
/// (`RELEVANCE_CHECK:`/`CATEGORY_CHECK:`/`ANOMALY_CHECK:`) and applies a
/// small keyword heuristic, never making an outbound call.
#[derive(Debug, Clone, Default)]
pub struct StubLlmClient;

impl StubLlmClient {
    /// Builds a new stub client.
    pub fn new() -> Self {
        Self
    }
}

const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("Cybersecurity", &["breach", "hack", "ransomware", "vulnerability", "exploit"]),
    ("Politics", &["election", "senate", "government", "policy", "president"]),
    ("Business", &["market", "earnings", "acquisition", "ipo", "stock"]),
    ("Technology", &["software", "ai", "chip", "startup", "release"]),
];

fn categorize(content: &str) -> String {
    let lower = content.to_lowercase();
    let matches: Vec<&str> = CATEGORY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(name, _)| *name)
        .collect();
    if matches.is_empty() {
        "Other".to_string()
    } else {
        matches.join(", ")
    }
}

#[async_trait]
impl LlmCompletion for StubLlmClient {
    async fn complete(&self, prompt: &str) -> SentinelResult<String> {
        if let Some(content) = prompt.strip_prefix("RELEVANCE_CHECK:\n") {
            let word_count = content.split_whitespace().count();
            // Deliberately not a "...RELEVANT" variant: callers match the
            // response by substring ("RELEVANT"/"POTENTIALLY_RELEVANT"),
            // so an irrelevant verdict must avoid that substring entirely.
            return Ok(if word_count >= 5 {
                "RELEVANT".to_string()
            } else {
                "OFF_TOPIC".to_string()
            });
        }
        if let Some(content) = prompt.strip_prefix("CATEGORY_CHECK:\n") {
            return Ok(categorize(content));
        }
        if let Some(content) = prompt.strip_prefix("ANOMALY_CHECK:\n") {
            let lower = content.to_lowercase();
            let anomalous = lower.contains("satire") || lower.contains("fabricated") || lower.contains("retracted");
            return Ok(if anomalous { "ANOMALY".to_string() } else { "OK".to_string() });
        }
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn relevance_check_requires_substantive_content() {
        let client = StubLlmClient::new();
        let short = client.complete("RELEVANCE_CHECK:\ntoo short").await.unwrap();
        assert_eq!(short, "OFF_TOPIC");

        let long = client
            .complete("RELEVANCE_CHECK:\na much longer article body with real substance")
            .await
            .unwrap();
        assert_eq!(long, "RELEVANT");
    }

    #[tokio::test]
    async fn category_check_falls_back_to_other() {
        let client = StubLlmClient::new();
        let response = client
            .complete("CATEGORY_CHECK:\nlocal bakery wins a ribbon at the county fair")
            .await
            .unwrap();
        assert_eq!(response, "Other");
    }

    #[tokio::test]
    async fn category_check_matches_known_keywords() {
        let client = StubLlmClient::new();
        let response = client
            .complete("CATEGORY_CHECK:\na ransomware gang breached the city's network")
            .await
            .unwrap();
        assert_eq!(response, "Cybersecurity");
    }

    #[tokio::test]
    async fn anomaly_check_flags_satire_markers() {
        let client = StubLlmClient::new();
        let response = client
            .complete("ANOMALY_CHECK:\nthis retracted story was satire all along")
            .await
            .unwrap();
        assert_eq!(response, "ANOMALY");
    }
}
