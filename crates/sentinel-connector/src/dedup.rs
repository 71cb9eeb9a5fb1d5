//! The connector's dedup table: `ProcessedItem`, a unique
//! `(source_id, item_url)` pair, per §3/§4.5. Owned exclusively by the
//! connector (§5's "Shared resources" table).

use std::sync::Arc;

use rusqlite::{params, Connection};
use sentinel_core::error::{SentinelError, SentinelResult};
use tokio::sync::Mutex as AsyncMutex;

fn map_db_err(err: rusqlite::Error) -> SentinelError {
    SentinelError::Db(err.to_string())
}

/// One scraped `(title, href)` candidate before dedup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Link text.
    pub title: String,
    /// Target URL.
    pub href: String,
}

/// `rusqlite`-backed dedup table, grounded on the same
/// `spawn_blocking`-wrapped-connection posture as
/// `sentinel_core::registry::SqliteSourceRepository`.
#[derive(Clone)]
pub struct ProcessedItemStore {
    conn: Arc<AsyncMutex<Connection>>,
}

impl ProcessedItemStore {
    /// Opens (and migrates) the dedup database at `path`, or an
    /// in-memory database when `path` is `None`.
    pub async fn open(path: Option<&str>) -> SentinelResult<Self> {
        let path = path.map(str::to_string);
        let conn = tokio::task::spawn_blocking(move || -> rusqlite::Result<Connection> {
            let conn = match &path {
                Some(path) => Connection::open(path)?,
                None => Connection::open_in_memory()?,
            };
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS processed_items (
                    source_id INTEGER NOT NULL,
                    item_url TEXT NOT NULL,
                    UNIQUE(source_id, item_url)
                );",
            )?;
            Ok(conn)
        })
        .await
        .map_err(|e| SentinelError::Db(e.to_string()))?
        .map_err(map_db_err)?;

        Ok(Self {
            conn: Arc::new(AsyncMutex::new(conn)),
        })
    }

    /// Inserts every candidate not already seen for `source_id` in one
    /// batch commit (§4.5 step 3), returning only the ones that were
    /// newly inserted — i.e. never emitted as a `RawEvent` before,
    /// across connector restarts, so long as this database survives.
    pub async fn filter_unseen(
        &self,
        source_id: i64,
        candidates: Vec<Candidate>,
    ) -> SentinelResult<Vec<Candidate>> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> rusqlite::Result<Vec<Candidate>> {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;
            let mut unseen = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO processed_items (source_id, item_url) VALUES (?1, ?2)",
                )?;
                for candidate in candidates {
                    let changed = stmt.execute(params![source_id, candidate.href])?;
                    if changed > 0 {
                        unseen.push(candidate);
                    }
                }
            }
            tx.commit()?;
            Ok(unseen)
        })
        .await
        .map_err(|e| SentinelError::Db(e.to_string()))?
        .map_err(map_db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(href: &str) -> Candidate {
        Candidate {
            title: format!("Breaking: something happened at {href}"),
            href: href.to_string(),
        }
    }

    #[tokio::test]
    async fn unseen_candidates_pass_through_once() {
        let store = ProcessedItemStore::open(None).await.unwrap();
        let unseen = store
            .filter_unseen(1, vec![candidate("https://x/1"), candidate("https://x/2")])
            .await
            .unwrap();
        assert_eq!(unseen.len(), 2);
    }

    #[tokio::test]
    async fn already_seen_candidates_are_dropped() {
        let store = ProcessedItemStore::open(None).await.unwrap();
        store
            .filter_unseen(1, vec![candidate("https://x/1")])
            .await
            .unwrap();

        let unseen = store
            .filter_unseen(1, vec![candidate("https://x/1"), candidate("https://x/2")])
            .await
            .unwrap();
        assert_eq!(unseen.len(), 1);
        assert_eq!(unseen[0].href, "https://x/2");
    }

    #[tokio::test]
    async fn same_href_is_distinct_per_source() {
        let store = ProcessedItemStore::open(None).await.unwrap();
        store
            .filter_unseen(1, vec![candidate("https://x/1")])
            .await
            .unwrap();
        let unseen = store
            .filter_unseen(2, vec![candidate("https://x/1")])
            .await
            .unwrap();
        assert_eq!(unseen.len(), 1, "dedup key is (source_id, href)");
    }
}
