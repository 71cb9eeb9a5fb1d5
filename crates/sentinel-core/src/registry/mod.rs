//! Source registry: CRUD over the relational store plus lifecycle
//! emission, per §4.3.
//!
//! The storage half is grounded on AllFrame's `cqrs::sqlite_backend`
//! posture — a `rusqlite::Connection` behind `Arc<Mutex<_>>`, every
//! operation run through `tokio::task::spawn_blocking` since `rusqlite`
//! is synchronous.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex as AsyncMutex;

use crate::{
    domain::Source,
    error::{SentinelError, SentinelResult},
};

/// A new source's fields, as supplied by the CRUD API before the
/// registry assigns an id/timestamps.
#[derive(Debug, Clone)]
pub struct NewSourceInput {
    /// Unique human-readable name.
    pub name: String,
    /// Free-form source category.
    pub source_type: String,
    /// Free-form configuration, serialised to the `config` column.
    pub config: serde_json::Value,
    /// Whether the source starts active.
    pub is_active: bool,
}

/// Fields of a source that may be patched by an update.
#[derive(Debug, Clone, Default)]
pub struct SourceUpdate {
    /// New name, if changing.
    pub name: Option<String>,
    /// New config, if changing.
    pub config: Option<serde_json::Value>,
    /// New `is_active` state, if changing. Per §4.3, a transition here
    /// is what the caller uses to decide which lifecycle event to emit.
    pub is_active: Option<bool>,
}

/// Thin CRUD over the relational source store. Lifecycle event
/// emission is the caller's responsibility (the registry binary holds
/// the broker handle); this trait only owns persistence.
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Inserts a new source, returning the persisted row.
    async fn create(&self, input: NewSourceInput) -> SentinelResult<Source>;

    /// Looks up a source by id.
    async fn get(&self, id: i64) -> SentinelResult<Option<Source>>;

    /// Lists every source, active or not.
    async fn list(&self) -> SentinelResult<Vec<Source>>;

    /// Lists only active sources (used by the scheduler's bootstrap).
    async fn list_active(&self) -> SentinelResult<Vec<Source>>;

    /// Applies a partial update, returning the updated row.
    async fn update(&self, id: i64, patch: SourceUpdate) -> SentinelResult<Source>;

    /// Deletes a source by id. Returns whether a row was removed.
    async fn delete(&self, id: i64) -> SentinelResult<bool>;
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn map_db_err(err: rusqlite::Error) -> SentinelError {
    SentinelError::Db(err.to_string())
}

fn row_to_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<Source> {
    let config_json: String = row.get(3)?;
    Ok(Source {
        id: row.get(0)?,
        name: row.get(1)?,
        source_type: row.get(2)?,
        config: serde_json::from_str(&config_json).unwrap_or(serde_json::Value::Null),
        is_active: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// `rusqlite`-backed [`SourceRepository`], per §9's design note ("this
/// workspace targets `rusqlite` rather than requiring a live
/// Postgres").
#[derive(Clone)]
pub struct SqliteSourceRepository {
    conn: Arc<AsyncMutex<Connection>>,
}

impl SqliteSourceRepository {
    /// Opens (and migrates) the registry database at `database_url`'s
    /// resolved path, or an in-memory database when `path` is `None`.
    pub async fn open(path: Option<&str>) -> SentinelResult<Self> {
        let path = path.map(str::to_string);
        let conn = tokio::task::spawn_blocking(move || -> rusqlite::Result<Connection> {
            let conn = match &path {
                Some(path) => Connection::open(path)?,
                None => Connection::open_in_memory()?,
            };
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS sources (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    type TEXT NOT NULL,
                    config TEXT NOT NULL,
                    is_active INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
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
}

#[async_trait]
impl SourceRepository for SqliteSourceRepository {
    async fn create(&self, input: NewSourceInput) -> SentinelResult<Source> {
        let conn = Arc::clone(&self.conn);
        let now = now_rfc3339();
        let config_json = input.config.to_string();

        tokio::task::spawn_blocking(move || -> rusqlite::Result<Source> {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO sources (name, type, config, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    input.name,
                    input.source_type,
                    config_json,
                    input.is_active,
                    now
                ],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                "SELECT id, name, type, config, is_active, created_at, updated_at
                 FROM sources WHERE id = ?1",
                params![id],
                row_to_source,
            )
        })
        .await
        .map_err(|e| SentinelError::Db(e.to_string()))?
        .map_err(map_db_err)
    }

    async fn get(&self, id: i64) -> SentinelResult<Option<Source>> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> rusqlite::Result<Option<Source>> {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT id, name, type, config, is_active, created_at, updated_at
                 FROM sources WHERE id = ?1",
                params![id],
                row_to_source,
            )
            .optional()
        })
        .await
        .map_err(|e| SentinelError::Db(e.to_string()))?
        .map_err(map_db_err)
    }

    async fn list(&self) -> SentinelResult<Vec<Source>> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> rusqlite::Result<Vec<Source>> {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, name, type, config, is_active, created_at, updated_at
                 FROM sources ORDER BY id",
            )?;
            let rows = stmt.query_map([], row_to_source)?;
            rows.collect()
        })
        .await
        .map_err(|e| SentinelError::Db(e.to_string()))?
        .map_err(map_db_err)
    }

    async fn list_active(&self) -> SentinelResult<Vec<Source>> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> rusqlite::Result<Vec<Source>> {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT id, name, type, config, is_active, created_at, updated_at
                 FROM sources WHERE is_active = 1 ORDER BY id",
            )?;
            let rows = stmt.query_map([], row_to_source)?;
            rows.collect()
        })
        .await
        .map_err(|e| SentinelError::Db(e.to_string()))?
        .map_err(map_db_err)
    }

    async fn update(&self, id: i64, patch: SourceUpdate) -> SentinelResult<Source> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| SentinelError::NotFound(format!("source {id}")))?;

        let name = patch.name.unwrap_or(existing.name);
        let config = patch.config.unwrap_or(existing.config);
        let is_active = patch.is_active.unwrap_or(existing.is_active);
        let now = now_rfc3339();

        let conn = Arc::clone(&self.conn);
        let config_json = config.to_string();
        tokio::task::spawn_blocking(move || -> rusqlite::Result<Source> {
            let conn = conn.blocking_lock();
            conn.execute(
                "UPDATE sources SET name = ?1, config = ?2, is_active = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![name, config_json, is_active, now, id],
            )?;
            conn.query_row(
                "SELECT id, name, type, config, is_active, created_at, updated_at
                 FROM sources WHERE id = ?1",
                params![id],
                row_to_source,
            )
        })
        .await
        .map_err(|e| SentinelError::Db(e.to_string()))?
        .map_err(map_db_err)
    }

    async fn delete(&self, id: i64) -> SentinelResult<bool> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> rusqlite::Result<bool> {
            let conn = conn.blocking_lock();
            let changed = conn.execute("DELETE FROM sources WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
        .await
        .map_err(|e| SentinelError::Db(e.to_string()))?
        .map_err(map_db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str) -> NewSourceInput {
        NewSourceInput {
            name: name.to_string(),
            source_type: "rss".to_string(),
            config: serde_json::json!({"poll_interval_seconds": 60}),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let repo = SqliteSourceRepository::open(None).await.unwrap();
        let created = repo.create(input("example.com")).await.unwrap();

        let fetched = repo.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "example.com");
        assert!(fetched.is_active);
    }

    #[tokio::test]
    async fn list_active_excludes_deactivated_sources() {
        let repo = SqliteSourceRepository::open(None).await.unwrap();
        let a = repo.create(input("a.com")).await.unwrap();
        repo.create(input("b.com")).await.unwrap();

        repo.update(
            a.id,
            SourceUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let active = repo.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "b.com");
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let repo = SqliteSourceRepository::open(None).await.unwrap();
        let created = repo.create(input("example.com")).await.unwrap();

        assert!(repo.delete(created.id).await.unwrap());
        assert!(repo.get(created.id).await.unwrap().is_none());
        assert!(!repo.delete(created.id).await.unwrap());
    }

    #[tokio::test]
    async fn update_missing_source_is_not_found() {
        let repo = SqliteSourceRepository::open(None).await.unwrap();
        let err = repo.update(999, SourceUpdate::default()).await.unwrap_err();
        assert!(matches!(err, SentinelError::NotFound(_)));
    }
}
