//! Durable workspace layouts, keyed by principal
//!
//! Schema (created on [`SqliteWorkspaceStore::migrate`]):
//! ```sql
//! CREATE TABLE IF NOT EXISTS workspaces (
//!     principal  TEXT    PRIMARY KEY,
//!     revision   INTEGER NOT NULL,
//!     snapshot   TEXT    NOT NULL,   -- JSON list of persisted windows
//!     updated_at TEXT    NOT NULL    -- RFC 3339
//! );
//! ```
//!
//! Writes carry a revision; a write whose revision is not newer than the
//! stored one is ignored, so an out-of-order flush never overwrites a later
//! layout.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::WorkspaceSnapshot;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

#[derive(Debug, thiserror::Error, Clone)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// A stored layout with its bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct StoredWorkspace {
    pub revision: u64,
    pub snapshot: WorkspaceSnapshot,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait WorkspaceStore: Send + Sync + 'static {
    async fn load(&self, principal: &str) -> Result<Option<StoredWorkspace>, StoreError>;

    /// Write `snapshot` as `revision`. Returns `false` if a newer or equal
    /// revision is already stored.
    async fn save(
        &self,
        principal: &str,
        revision: u64,
        snapshot: &WorkspaceSnapshot,
    ) -> Result<bool, StoreError>;
}

// ============================================================================
// SQLite
// ============================================================================

#[derive(Debug, Clone)]
pub struct SqliteWorkspaceStore {
    pool: SqlitePool,
}

impl SqliteWorkspaceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `database_url` and migrate it.
    ///
    /// Accepts `sqlite:./path.db`, `sqlite:///abs/path.db` and bare paths;
    /// relative paths resolve against the current directory. `:memory:` and
    /// `sqlite::memory:` open a private in-memory database.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let file_path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);
        let file_path = file_path.split('?').next().unwrap_or(file_path);

        if file_path == ":memory:" {
            // One long-lived connection: each new connection would see an empty database
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
                .await?;
            let store = Self::new(pool);
            store.migrate().await?;
            tracing::info!("In-memory workspace store ready");
            return Ok(store);
        }

        let abs_path = std::env::current_dir()
            .map_err(|e| StoreError::Database(e.to_string()))?
            .join(file_path);
        if let Some(parent) = abs_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(&abs_path)
                .create_if_missing(true),
        )
        .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        tracing::info!(path = %abs_path.display(), "Workspace store ready");
        Ok(store)
    }

    /// Create the workspaces table if it does not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workspaces (
                principal  TEXT    PRIMARY KEY,
                revision   INTEGER NOT NULL,
                snapshot   TEXT    NOT NULL,
                updated_at TEXT    NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl WorkspaceStore for SqliteWorkspaceStore {
    async fn load(&self, principal: &str) -> Result<Option<StoredWorkspace>, StoreError> {
        let row: Option<(i64, String, String)> = sqlx::query_as(
            "SELECT revision, snapshot, updated_at FROM workspaces WHERE principal = ?",
        )
        .bind(principal)
        .fetch_optional(&self.pool)
        .await?;

        let Some((revision, snapshot_json, updated_at)) = row else {
            return Ok(None);
        };

        let snapshot = serde_json::from_str(&snapshot_json)?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| StoreError::Serialization(e.to_string()))?
            .with_timezone(&Utc);

        Ok(Some(StoredWorkspace {
            revision: u64::try_from(revision).unwrap_or_default(),
            snapshot,
            updated_at,
        }))
    }

    async fn save(
        &self,
        principal: &str,
        revision: u64,
        snapshot: &WorkspaceSnapshot,
    ) -> Result<bool, StoreError> {
        let snapshot_json = serde_json::to_string(snapshot)?;
        let revision = i64::try_from(revision)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let rows = sqlx::query(
            "INSERT INTO workspaces (principal, revision, snapshot, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(principal) DO UPDATE SET
                revision = excluded.revision,
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at
             WHERE excluded.revision > workspaces.revision",
        )
        .bind(principal)
        .bind(revision)
        .bind(&snapshot_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local store for sessions without durable storage, and for tests
#[derive(Debug, Default)]
pub struct InMemoryWorkspaceStore {
    workspaces: Mutex<HashMap<String, StoredWorkspace>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryWorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a layout for `principal`.
    pub fn with_workspace(principal: &str, snapshot: WorkspaceSnapshot) -> Self {
        let store = Self::new();
        store.lock().insert(
            principal.to_string(),
            StoredWorkspace {
                revision: 0,
                snapshot,
                updated_at: Utc::now(),
            },
        );
        store
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredWorkspace>> {
        self.workspaces
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every subsequent save fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Save calls that reached the store, failed ones included.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn get(&self, principal: &str) -> Option<StoredWorkspace> {
        self.lock().get(principal).cloned()
    }
}

#[async_trait]
impl WorkspaceStore for InMemoryWorkspaceStore {
    async fn load(&self, principal: &str) -> Result<Option<StoredWorkspace>, StoreError> {
        Ok(self.get(principal))
    }

    async fn save(
        &self,
        principal: &str,
        revision: u64,
        snapshot: &WorkspaceSnapshot,
    ) -> Result<bool, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database("writes disabled".to_string()));
        }

        let mut workspaces = self.lock();
        if let Some(existing) = workspaces.get(principal) {
            if existing.revision >= revision {
                return Ok(false);
            }
        }
        workspaces.insert(
            principal.to_string(),
            StoredWorkspace {
                revision,
                snapshot: snapshot.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{PersistedWindow, Position, Size, WindowId};

    fn snapshot(app_id: &str) -> WorkspaceSnapshot {
        WorkspaceSnapshot(vec![PersistedWindow {
            id: WindowId(1),
            app_id: app_id.to_string(),
            position: Position::new(100, 100),
            size: Size::new(800, 600),
            z_index: 1,
            is_minimized: false,
            is_maximized: false,
            previous_state: None,
        }])
    }

    #[tokio::test]
    async fn test_memory_store_ignores_stale_revision() {
        let store = InMemoryWorkspaceStore::new();
        assert!(store.save("alice", 2, &snapshot("editor")).await.unwrap());
        assert!(!store.save("alice", 1, &snapshot("terminal")).await.unwrap());

        let stored = store.load("alice").await.unwrap().unwrap();
        assert_eq!(stored.revision, 2);
        assert_eq!(stored.snapshot.records()[0].app_id, "editor");
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_failing_writes() {
        let store = InMemoryWorkspaceStore::new();
        store.set_fail_writes(true);
        assert!(store.save("alice", 1, &snapshot("editor")).await.is_err());
        assert!(store.load("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_is_per_principal() {
        let store = InMemoryWorkspaceStore::with_workspace("alice", snapshot("mail"));
        assert!(store.load("bob").await.unwrap().is_none());
        assert_eq!(store.get("alice").unwrap().snapshot.len(), 1);
    }
}
