//! SQLite ledger backend.
//!
//! Shared across processes through one database file. Create-if-absent is an
//! `INSERT ... ON CONFLICT DO NOTHING` against the `(context, path)` unique
//! key, so a lost race shows up as zero affected rows.

use std::path::Path;
use std::time::Duration;

use arbor_protocol::{is_lock_path, path_level, NodeCounts, NodeRecord, SessionId, LOCK_SEGMENT};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, info};

use crate::error::{LedgerError, Result};
use crate::query::{CountRange, CreateOutcome, LevelFilter, UnderfilledQuery};
use crate::store::LedgerStore;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS arbor_nodes (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        context TEXT NOT NULL,
        path TEXT NOT NULL,
        level INTEGER NOT NULL,
        node_id TEXT,
        folder_count INTEGER NOT NULL DEFAULT 0,
        file_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        UNIQUE (context, path)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_arbor_nodes_scan
        ON arbor_nodes (context, level, file_count, folder_count)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS arbor_sessions (
        id TEXT PRIMARY KEY,
        context TEXT NOT NULL,
        payload TEXT NOT NULL,
        started_at TEXT NOT NULL,
        ended_at TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_arbor_sessions_active
        ON arbor_sessions (context, ended_at)
    "#,
];

const NODE_COLUMNS: &str = "context, path, node_id, folder_count, file_count, created_at";

/// Ledger stored in a SQLite database file.
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open or create the database at `path`. Call [`LedgerStore::init`] before use.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "Ledger opened");
        Ok(Self { pool })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_i64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn node_from_row(row: &SqliteRow) -> Result<NodeRecord> {
    Ok(NodeRecord {
        context: row.try_get("context")?,
        path: row.try_get("path")?,
        id: row.try_get("node_id")?,
        folder_count: from_i64(row.try_get("folder_count")?),
        file_count: from_i64(row.try_get("file_count")?),
        created_at: row.try_get("created_at")?,
    })
}

fn push_range(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, range: &CountRange) {
    if range.min > 0 {
        qb.push(format!(" AND {column} >= "))
            .push_bind(to_i64(range.min));
    }
    if let Some(max) = range.max {
        qb.push(format!(" AND {column} < ")).push_bind(to_i64(max));
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, query: &UnderfilledQuery) {
    qb.push(" WHERE context = ").push_bind(query.context.clone());
    match query.level {
        LevelFilter::Any => {}
        LevelFilter::Exact(level) => {
            qb.push(" AND level = ").push_bind(i64::from(level));
        }
        LevelFilter::AtMost(level) => {
            qb.push(" AND level <= ").push_bind(i64::from(level));
        }
    }
    push_range(qb, "folder_count", &query.folder_count);
    push_range(qb, "file_count", &query.file_count);
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn find_underfilled(&self, query: &UnderfilledQuery) -> Result<Vec<NodeRecord>> {
        if query.limit == 0 || query.folder_count.is_empty() || query.file_count.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {NODE_COLUMNS} FROM arbor_nodes"));
        push_filters(&mut qb, query);
        qb.push(" ORDER BY seq ASC LIMIT ")
            .push_bind(i64::from(query.limit))
            .push(" OFFSET ")
            .push_bind(to_i64(query.offset));

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn count_underfilled(&self, query: &UnderfilledQuery) -> Result<u64> {
        if query.folder_count.is_empty() || query.file_count.is_empty() {
            return Ok(0);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM arbor_nodes");
        push_filters(&mut qb, query);
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(from_i64(count))
    }

    async fn get_node(&self, context: &str, path: &str) -> Result<Option<NodeRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM arbor_nodes WHERE context = ? AND path = ?"
        ))
        .bind(context)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(node_from_row).transpose()
    }

    async fn create_if_absent(&self, record: &NodeRecord) -> Result<CreateOutcome> {
        let rows_affected = sqlx::query(
            r#"
            INSERT INTO arbor_nodes (context, path, level, node_id, folder_count, file_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (context, path) DO NOTHING
            "#,
        )
        .bind(&record.context)
        .bind(&record.path)
        .bind(i64::from(path_level(&record.path)))
        .bind(&record.id)
        .bind(to_i64(record.folder_count))
        .bind(to_i64(record.file_count))
        .bind(record.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            debug!(path = %record.path, "Node already exists");
            return Ok(CreateOutcome::AlreadyExists);
        }
        Ok(CreateOutcome::Created)
    }

    async fn delete_node(&self, context: &str, path: &str) -> Result<bool> {
        let rows_affected = sqlx::query("DELETE FROM arbor_nodes WHERE context = ? AND path = ?")
            .bind(context)
            .bind(path)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected > 0)
    }

    async fn increment_counters(
        &self,
        context: &str,
        path: &str,
        folder_delta: u32,
        file_delta: u32,
    ) -> Result<NodeCounts> {
        if is_lock_path(path) {
            return Err(LedgerError::constraint(format!(
                "{path} is a lock marker, its counters are fixed"
            )));
        }
        let row = sqlx::query(
            r#"
            UPDATE arbor_nodes
            SET folder_count = folder_count + ?,
                file_count = file_count + ?
            WHERE context = ? AND path = ?
            RETURNING folder_count, file_count
            "#,
        )
        .bind(i64::from(folder_delta))
        .bind(i64::from(file_delta))
        .bind(context)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(LedgerError::not_found(format!(
                "node {path} in context '{context}'"
            )));
        };

        Ok(NodeCounts {
            folder_count: from_i64(row.try_get("folder_count")?),
            file_count: from_i64(row.try_get("file_count")?),
        })
    }

    async fn start_session(
        &self,
        context: &str,
        payload: &serde_json::Value,
    ) -> Result<SessionId> {
        let id = SessionId::new();
        let payload = serde_json::to_string(payload)?;
        sqlx::query(
            "INSERT INTO arbor_sessions (id, context, payload, started_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(context)
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn end_session(&self, id: &SessionId) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE arbor_sessions SET ended_at = ? WHERE id = ? AND ended_at IS NULL",
        )
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows_affected > 0)
    }

    async fn count_active_sessions(&self, context: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM arbor_sessions WHERE context = ? AND ended_at IS NULL",
        )
        .bind(context)
        .fetch_one(&self.pool)
        .await?;
        Ok(from_i64(count))
    }

    async fn list_locks(&self, context: &str) -> Result<Vec<NodeRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM arbor_nodes WHERE context = ? AND path LIKE ? ORDER BY seq ASC"
        ))
        .bind(context)
        .bind(format!("%/{LOCK_SEGMENT}"))
        .fetch_all(&self.pool)
        .await?;

        // LIKE is case-insensitive for ASCII
        let mut locks = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = node_from_row(row)?;
            if is_lock_path(&record.path) {
                locks.push(record);
            }
        }
        Ok(locks)
    }
}
