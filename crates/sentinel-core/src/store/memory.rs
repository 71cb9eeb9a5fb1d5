//! In-process reference vector store. Backs every worker binary's
//! default configuration and the integration test suite.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::tokenize;
use crate::{domain::EventPayload, error::SentinelResult, ids::physical_key};

#[derive(Clone)]
struct Record {
    payload: EventPayload,
}

/// A `(physical_key -> EventPayload)` map protected by a single
/// `RwLock`, with a naive token-containment keyword scan standing in
/// for cosine similarity search (§4.2's contract only requires
/// full-text match against `content`, not semantic ranking, for
/// `search_events_by_keyword`).
pub struct InMemoryVectorStore {
    records: Arc<RwLock<HashMap<String, Record>>>,
}

impl InMemoryVectorStore {
    /// Creates an empty, uninitialized store.
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::VectorStore for InMemoryVectorStore {
    async fn initialize_collection(&self) -> SentinelResult<()> {
        // The in-memory backend has no schema to create; this is a
        // deliberate no-op that still satisfies idempotency.
        Ok(())
    }

    async fn upsert_event(&self, payload: EventPayload) -> SentinelResult<()> {
        let key = physical_key(&payload.original_id);
        let mut records = self.records.write().await;

        let has_content = payload
            .content
            .as_deref()
            .map(|c| !c.is_empty())
            .unwrap_or(false);

        if has_content {
            records.insert(key, Record { payload });
        } else if let Some(existing) = records.get_mut(&key) {
            existing.payload.merge(payload);
        } else {
            records.insert(key, Record { payload });
        }

        Ok(())
    }

    async fn retrieve_event_by_id(&self, original_id: &str) -> SentinelResult<Option<EventPayload>> {
        let key = physical_key(original_id);
        Ok(self
            .records
            .read()
            .await
            .get(&key)
            .map(|record| record.payload.clone()))
    }

    async fn list_all_events(&self, limit: usize) -> SentinelResult<Vec<EventPayload>> {
        let records = self.records.read().await;
        let mut events: Vec<EventPayload> = records.values().map(|r| r.payload.clone()).collect();
        events.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.original_id.cmp(&b.original_id))
        });
        events.truncate(limit);
        Ok(events)
    }

    async fn list_filtered_events(&self) -> SentinelResult<Vec<EventPayload>> {
        let records = self.records.read().await;
        let mut events: Vec<EventPayload> = records
            .values()
            .map(|r| r.payload.clone())
            .filter(EventPayload::is_filtered_only)
            .collect();
        events.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.original_id.cmp(&b.original_id))
        });
        Ok(events)
    }

    async fn list_ranked_events(&self, limit: usize) -> SentinelResult<Vec<EventPayload>> {
        let records = self.records.read().await;
        let mut events: Vec<EventPayload> = records
            .values()
            .map(|r| r.payload.clone())
            .filter(EventPayload::is_ranked)
            .collect();
        events.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.original_id.cmp(&b.original_id))
        });
        events.truncate(limit);
        Ok(events)
    }

    async fn search_events_by_keyword(
        &self,
        query: &str,
        limit: usize,
    ) -> SentinelResult<Vec<EventPayload>> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.records.read().await;
        let mut matches: Vec<EventPayload> = records
            .values()
            .filter(|record| {
                let Some(content) = record.payload.content.as_deref() else {
                    return false;
                };
                let content_tokens = tokenize(content);
                query_tokens.iter().any(|qt| content_tokens.contains(qt))
            })
            .map(|record| record.payload.clone())
            .collect();
        matches.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.original_id.cmp(&b.original_id))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn delete_events(&self, ids: &[String]) -> SentinelResult<usize> {
        let mut records = self.records.write().await;
        let mut deleted = 0;
        for id in ids {
            if records.remove(&physical_key(id)).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn count_events(&self) -> SentinelResult<usize> {
        Ok(self.records.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::VectorStore;

    fn sample(id: &str, timestamp: &str) -> EventPayload {
        EventPayload {
            original_id: id.to_string(),
            title: Some("Title".into()),
            content: Some("central bank raises interest rates".into()),
            timestamp: Some(timestamp.to_string()),
            source: Some("example.com".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_with_content_always_overwrites() {
        let store = InMemoryVectorStore::new();
        store.upsert_event(sample("e1", "2026-01-01T00:00:00Z")).await.unwrap();
        store.upsert_event(sample("e1", "2026-01-02T00:00:00Z")).await.unwrap();

        let retrieved = store.retrieve_event_by_id("e1").await.unwrap().unwrap();
        assert_eq!(retrieved.timestamp.as_deref(), Some("2026-01-02T00:00:00Z"));
        assert_eq!(store.count_events().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn patch_without_content_merges_onto_existing() {
        let store = InMemoryVectorStore::new();
        store.upsert_event(sample("e1", "2026-01-01T00:00:00Z")).await.unwrap();

        let patch = EventPayload {
            original_id: "e1".into(),
            final_score: Some(0.75),
            ..Default::default()
        };
        store.upsert_event(patch).await.unwrap();

        let retrieved = store.retrieve_event_by_id("e1").await.unwrap().unwrap();
        assert_eq!(retrieved.final_score, Some(0.75));
        assert_eq!(retrieved.title.as_deref(), Some("Title"));
    }

    #[tokio::test]
    async fn patch_without_existing_record_inserts_stub() {
        let store = InMemoryVectorStore::new();
        let patch = EventPayload {
            original_id: "e1".into(),
            is_relevant: Some(true),
            ..Default::default()
        };
        store.upsert_event(patch).await.unwrap();
        assert!(store.retrieve_event_by_id("e1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_ranked_events_sorts_by_final_score_desc() {
        let store = InMemoryVectorStore::new();
        for (id, score) in [("a", 0.2), ("b", 0.9), ("c", 0.5)] {
            let mut event = sample(id, "2026-01-01T00:00:00Z");
            event.final_score = Some(score);
            store.upsert_event(event).await.unwrap();
        }

        let ranked = store.list_ranked_events(10).await.unwrap();
        let scores: Vec<f64> = ranked.iter().map(|e| e.final_score.unwrap()).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.2]);
    }

    #[tokio::test]
    async fn list_ranked_events_breaks_ties_by_original_id() {
        let store = InMemoryVectorStore::new();
        for id in ["c", "a", "b"] {
            let mut event = sample(id, "2026-01-01T00:00:00Z");
            event.final_score = Some(0.5);
            store.upsert_event(event).await.unwrap();
        }

        let ranked = store.list_ranked_events(10).await.unwrap();
        let ids: Vec<&str> = ranked.iter().map(|e| e.original_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn search_by_keyword_matches_tokenized_content() {
        let store = InMemoryVectorStore::new();
        store.upsert_event(sample("e1", "2026-01-01T00:00:00Z")).await.unwrap();

        let results = store.search_events_by_keyword("interest rates", 10).await.unwrap();
        assert_eq!(results.len(), 1);

        let no_match = store.search_events_by_keyword("unrelated topic", 10).await.unwrap();
        assert!(no_match.is_empty());
    }

    #[tokio::test]
    async fn delete_events_is_idempotent_by_physical_key() {
        let store = InMemoryVectorStore::new();
        store.upsert_event(sample("e1", "2026-01-01T00:00:00Z")).await.unwrap();

        assert_eq!(store.delete_events(&["e1".to_string()]).await.unwrap(), 1);
        assert_eq!(store.delete_events(&["e1".to_string()]).await.unwrap(), 0);
    }
}
