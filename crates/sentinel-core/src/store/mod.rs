//! Vector + payload store adapter, owning one logical collection.
//!
//! Grounded on `qdrant_logic.py`'s operation set, re-expressed as an
//! `async_trait` so `VectorStore` composes with the rest of the
//! workspace's `Send + Sync` trait objects (`Broker`, `SourceRepository`).

mod memory;

use async_trait::async_trait;

pub use memory::InMemoryVectorStore;

use crate::{domain::EventPayload, error::SentinelResult};

/// Owns one vector+payload collection, per §4.2.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotently ensures the collection exists with the correct
    /// vector dimension, cosine distance, and the `source`/`final_score`/
    /// `timestamp`/`content` payload indexes. Extra index failures are
    /// tolerated as a warning, never fatal.
    async fn initialize_collection(&self) -> SentinelResult<()>;

    /// Upserts `payload` per the three-way rule of §4.2: recompute the
    /// embedding when `content` is present, patch in place when it's
    /// absent and the record already exists, otherwise insert a
    /// zero-vector stub.
    async fn upsert_event(&self, payload: EventPayload) -> SentinelResult<()>;

    /// Looks up a record by its logical `original_id`.
    async fn retrieve_event_by_id(&self, original_id: &str) -> SentinelResult<Option<EventPayload>>;

    /// Most recent `limit` records by `timestamp`, descending.
    async fn list_all_events(&self, limit: usize) -> SentinelResult<Vec<EventPayload>>;

    /// Relevant, not-yet-ranked records, most recent first.
    async fn list_filtered_events(&self) -> SentinelResult<Vec<EventPayload>>;

    /// Ranked records, `final_score` descending, capped at `limit`.
    async fn list_ranked_events(&self, limit: usize) -> SentinelResult<Vec<EventPayload>>;

    /// Full-text match of `query` against `content` using the
    /// whitespace/case-fold/length-bounded tokeniser of §4.2.
    async fn search_events_by_keyword(
        &self,
        query: &str,
        limit: usize,
    ) -> SentinelResult<Vec<EventPayload>>;

    /// Best-effort batch delete by logical `original_id`.
    async fn delete_events(&self, ids: &[String]) -> SentinelResult<usize>;

    /// Total number of records in the collection (§10 supplemented
    /// feature, grounded on `qdrant_logic.py::count_events`).
    async fn count_events(&self) -> SentinelResult<usize>;
}

/// Whitespace-split, case-folded, length-bounded `[2, 20]` tokens, per
/// §4.2's content index definition.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| {
            word.to_lowercase()
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|token| (2..=20).contains(&token.len()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_drops_punctuation_and_short_tokens() {
        let tokens = tokenize("The Fed raised rates, a big I move.");
        assert_eq!(
            tokens,
            vec!["the", "fed", "raised", "rates", "big", "move"]
        );
    }
}
