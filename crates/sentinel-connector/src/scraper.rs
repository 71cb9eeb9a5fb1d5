//! The connector's scrape capability, kept pluggable per §9's design
//! note on dynamic dispatch: the pipeline's contract is "returns a list
//! of `(title, href)` candidates" (§4.5 step 2); scraping HTML
//! heuristics are an explicit non-goal (§1), so the shipped HTTP
//! scraper is intentionally naive.

use async_trait::async_trait;
use sentinel_core::error::{SentinelError, SentinelResult};

use crate::dedup::Candidate;

/// Fetches a source's page and returns raw link candidates, before the
/// connector's length/scheme filtering (§4.5 step 2).
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Scrapes `url`, returning every `<a href="...">text</a>` pair
    /// found, in document order.
    async fn scrape(&self, url: &str) -> SentinelResult<Vec<Candidate>>;
}

/// A deterministic scraper for local/dev/test wiring: returns a fixed
/// set of candidates regardless of `url`, so the pipeline can be
/// exercised end-to-end without a live network fetch.
#[derive(Debug, Clone, Default)]
pub struct StubScraper {
    candidates: Vec<Candidate>,
}

impl StubScraper {
    /// A scraper that always returns `candidates`.
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl Scraper for StubScraper {
    async fn scrape(&self, _url: &str) -> SentinelResult<Vec<Candidate>> {
        Ok(self.candidates.clone())
    }
}

/// `reqwest`-backed scraper: fetches `url` and extracts `<a href="…">`
/// anchors with a deliberately naive parser — parsing HTML correctly is
/// out of this pipeline's scope (§1); the goal here is only to produce
/// `(title, href)` pairs for the dedup/filter steps downstream to work
/// with.
pub struct HttpScraper {
    client: reqwest::Client,
}

impl HttpScraper {
    /// Builds a scraper using `client` for the fetch (§5: 15s scrape
    /// timeout, configured on the client by the caller).
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Extracts `(title, href)` pairs from raw HTML by scanning for
    /// `<a ... href="...">...</a>` anchors. Case-insensitive on the tag
    /// name; does not handle malformed/nested markup, entity decoding,
    /// or single-quoted attributes — acceptable for a non-goal scraper.
    fn extract_anchors(html: &str) -> Vec<Candidate> {
        let lower = html.to_ascii_lowercase();
        let mut candidates = Vec::new();
        let mut search_from = 0usize;

        while let Some(tag_start) = lower[search_from..].find("<a ") {
            let tag_start = search_from + tag_start;
            let Some(tag_end) = lower[tag_start..].find('>') else {
                break;
            };
            let tag_end = tag_start + tag_end;
            let tag = &html[tag_start..=tag_end];

            let href = tag
                .find("href=\"")
                .and_then(|start| {
                    let rest = &tag[start + "href=\"".len()..];
                    rest.find('"').map(|end| rest[..end].to_string())
                });

            let Some(close_start) = lower[tag_end + 1..].find("</a>") else {
                search_from = tag_end + 1;
                continue;
            };
            let close_start = tag_end + 1 + close_start;
            let text = html[tag_end + 1..close_start].trim().to_string();

            if let Some(href) = href {
                if !text.is_empty() {
                    candidates.push(Candidate { title: text, href });
                }
            }

            search_from = close_start + "</a>".len();
        }

        candidates
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn scrape(&self, url: &str) -> SentinelResult<Vec<Candidate>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SentinelError::Dependency(format!("scrape fetch failed: {e}")))?;
        let html = response
            .text()
            .await
            .map_err(|e| SentinelError::Dependency(format!("scrape body read failed: {e}")))?;
        Ok(Self::extract_anchors(&html))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_simple_anchors() {
        let html = r#"<html><body>
            <a href="https://example.com/1">Breaking: outage at the plant</a>
            <a href="/relative">too short</a>
        </body></html>"#;
        let candidates = HttpScraper::extract_anchors(html);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].href, "https://example.com/1");
        assert_eq!(candidates[0].title, "Breaking: outage at the plant");
        assert_eq!(candidates[1].href, "/relative");
    }

    #[test]
    fn ignores_anchors_with_empty_text() {
        let html = r#"<a href="https://example.com/1"></a>"#;
        assert!(HttpScraper::extract_anchors(html).is_empty());
    }

    #[tokio::test]
    async fn stub_scraper_returns_fixed_candidates() {
        let scraper = StubScraper::new(vec![Candidate {
            title: "Breaking: outage at the plant".to_string(),
            href: "https://example.com/1".to_string(),
        }]);
        let candidates = scraper.scrape("https://example.com").await.unwrap();
        assert_eq!(candidates.len(), 1);
    }
}
