//! Wire schemas and persistent domain types shared across every service.
//!
//! Wire messages are `serde`-derived and travel length-delimited-binary
//! encoded (see [`crate::codec`]) with a `message-type` header naming the
//! schema, so consumers dispatch without subject coupling (§6).

use serde::{Deserialize, Serialize};

/// A source of news, persisted in the relational registry store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    /// Monotonic primary key.
    pub id: i64,
    /// Unique human-readable name.
    pub name: String,
    /// Free-form source category (e.g. "rss", "html").
    #[serde(rename = "type")]
    pub source_type: String,
    /// Free-form configuration. `poll_interval_seconds` and `url` are the
    /// two keys the pipeline interprets; anything else passes through.
    pub config: serde_json::Value,
    /// Whether the scheduler should keep a polling job for this source.
    pub is_active: bool,
    /// Creation timestamp, RFC3339 UTC.
    pub created_at: String,
    /// Last-update timestamp, RFC3339 UTC.
    pub updated_at: String,
}

impl Source {
    /// `config.poll_interval_seconds`, if present and positive.
    pub fn poll_interval_seconds(&self) -> Option<u64> {
        self.config
            .get("poll_interval_seconds")
            .and_then(|v| v.as_u64())
            .filter(|secs| *secs > 0)
    }

    /// `config.url`, falling back to the source's name per §4.5 step 1.
    pub fn resolved_url(&self) -> String {
        self.config
            .get("url")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .unwrap_or_else(|| self.name.clone())
    }
}

/// Emitted by the registry when a source is created, or reactivated via
/// an `is_active` update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewSource {
    /// The source's id.
    pub id: i64,
    /// The source's name.
    pub name: String,
    /// The source's category.
    #[serde(rename = "type")]
    pub source_type: String,
    /// `config` serialised as a JSON string, per §4.3.
    pub config_json: String,
    /// Always true on this subject.
    pub is_active: bool,
}

/// Emitted by the registry when a source is deleted, or deactivated via
/// an `is_active` update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemovedSource {
    /// The source's id.
    pub id: i64,
}

/// Published by the scheduler on every tick, per §4.4.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollSource {
    /// The source's id.
    pub id: i64,
    /// The source's name.
    pub name: String,
    /// The source's category.
    #[serde(rename = "type")]
    pub source_type: String,
    /// `config` serialised as a JSON string.
    pub config_json: String,
    /// Whether the source was still active at publish time.
    pub is_active: bool,
}

/// Scraped from a source, before relevance filtering. Wire-only; never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEvent {
    /// Origin-assigned opaque unique id.
    pub id: String,
    /// The source's name.
    pub source: String,
    /// Truncated to 200 chars by the connector.
    pub title: String,
    /// Article body; the connector sets this equal to `title`.
    pub content: String,
    /// ISO-8601 UTC timestamp.
    pub timestamp: String,
}

/// Published by the filter worker once an event is classified relevant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilteredEvent {
    /// Matches [`RawEvent::id`].
    pub id: String,
    /// Matches [`RawEvent::title`].
    pub title: String,
    /// Matches [`RawEvent::timestamp`].
    pub timestamp: String,
    /// Matches [`RawEvent::source`].
    pub source: String,
    /// Trimmed, non-empty category labels, in classifier order.
    pub categories: Vec<String>,
    /// Always `true` on this subject — irrelevant events are dropped.
    pub is_relevant: bool,
}

/// Published by the ranker worker once scores are computed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedEvent {
    /// Matches [`FilteredEvent::id`].
    pub id: String,
    /// Matches [`FilteredEvent::title`].
    pub title: String,
    /// Matches [`FilteredEvent::timestamp`].
    pub timestamp: String,
    /// Matches [`FilteredEvent::source`].
    pub source: String,
    /// Matches [`FilteredEvent::categories`].
    pub categories: Vec<String>,
    /// Matches [`FilteredEvent::is_relevant`].
    pub is_relevant: bool,
    /// Sum of configured category weights.
    pub importance_score: f64,
    /// Exponential decay of age against the configured half-life.
    pub recency_score: f64,
    /// `w_i * importance_score + w_r * recency_score`.
    pub final_score: f64,
}

/// The persisted, mutable vector-store record for one logical event.
///
/// Deliberately schema-loose (backed by a `serde_json::Map` of passthrough
/// fields) because the original Qdrant payload tolerates arbitrary extra
/// keys — patch operations must not clobber fields they don't know about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EventPayload {
    /// The logical event id (`RawEvent::id`). Never absent on a real
    /// record.
    pub original_id: String,
    /// Article title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Article body; absent for a payload-only patch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// ISO-8601 UTC timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Source name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Category labels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    /// Set by the filter worker; `final_score` must not be present unless
    /// this is `Some(true)` (invariant 2).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_relevant: Option<bool>,
    /// Set by the ranker worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance_score: Option<f64>,
    /// Set by the ranker worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recency_score: Option<f64>,
    /// Set by the ranker worker; its presence is what makes a record
    /// "ranked" rather than merely "filtered" (§3 invariant 2).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_score: Option<f64>,
    /// Set by the inspector worker when a detector trips.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_anomaly: Option<bool>,
    /// Any other passthrough fields a future stage may add.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EventPayload {
    /// Merges `patch` onto `self`: `Some` fields in `patch` overwrite,
    /// `None` fields leave `self` untouched. This is the "last-writer-wins
    /// at the payload-field level" semantics required for concurrent
    /// patch/upsert races (§5).
    pub fn merge(&mut self, patch: EventPayload) {
        if !patch.original_id.is_empty() {
            self.original_id = patch.original_id;
        }
        if patch.title.is_some() {
            self.title = patch.title;
        }
        if patch.content.is_some() {
            self.content = patch.content;
        }
        if patch.timestamp.is_some() {
            self.timestamp = patch.timestamp;
        }
        if patch.source.is_some() {
            self.source = patch.source;
        }
        if patch.categories.is_some() {
            self.categories = patch.categories;
        }
        if patch.is_relevant.is_some() {
            self.is_relevant = patch.is_relevant;
        }
        if patch.importance_score.is_some() {
            self.importance_score = patch.importance_score;
        }
        if patch.recency_score.is_some() {
            self.recency_score = patch.recency_score;
        }
        if patch.final_score.is_some() {
            self.final_score = patch.final_score;
        }
        if patch.is_anomaly.is_some() {
            self.is_anomaly = patch.is_anomaly;
        }
        for (k, v) in patch.extra {
            self.extra.insert(k, v);
        }
    }

    /// `true` once the ranker has set `final_score` (§6 glossary: "scored
    /// vs filtered").
    pub fn is_ranked(&self) -> bool {
        self.final_score.is_some()
    }

    /// `true` when relevant but not yet scored.
    pub fn is_filtered_only(&self) -> bool {
        self.is_relevant == Some(true) && self.final_score.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_falls_back_to_name_without_url() {
        let source = Source {
            id: 1,
            name: "example.com".into(),
            source_type: "rss".into(),
            config: serde_json::json!({}),
            is_active: true,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        };
        assert_eq!(source.resolved_url(), "example.com");
    }

    #[test]
    fn source_prefers_configured_url() {
        let source = Source {
            id: 1,
            name: "example.com".into(),
            source_type: "rss".into(),
            config: serde_json::json!({"url": "https://example.com/feed"}),
            is_active: true,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        };
        assert_eq!(source.resolved_url(), "https://example.com/feed");
    }

    #[test]
    fn zero_poll_interval_is_ignored() {
        let source = Source {
            id: 1,
            name: "example.com".into(),
            source_type: "rss".into(),
            config: serde_json::json!({"poll_interval_seconds": 0}),
            is_active: true,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        };
        assert_eq!(source.poll_interval_seconds(), None);
    }

    #[test]
    fn merge_preserves_untouched_fields() {
        let mut stored = EventPayload {
            original_id: "e1".into(),
            title: Some("Title".into()),
            content: Some("Body".into()),
            is_relevant: Some(true),
            ..Default::default()
        };
        let patch = EventPayload {
            original_id: "e1".into(),
            final_score: Some(0.5),
            ..Default::default()
        };
        stored.merge(patch);
        assert_eq!(stored.title.as_deref(), Some("Title"));
        assert_eq!(stored.final_score, Some(0.5));
    }

    #[test]
    fn ranked_vs_filtered_classification() {
        let filtered = EventPayload {
            original_id: "e1".into(),
            is_relevant: Some(true),
            ..Default::default()
        };
        assert!(filtered.is_filtered_only());
        assert!(!filtered.is_ranked());

        let ranked = EventPayload {
            original_id: "e1".into(),
            is_relevant: Some(true),
            final_score: Some(0.9),
            ..Default::default()
        };
        assert!(!ranked.is_filtered_only());
        assert!(ranked.is_ranked());
    }
}
