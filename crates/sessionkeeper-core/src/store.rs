//! Durable session storage.
//!
//! `SessionStore` is the only component that touches persistent state. It
//! wraps a shared `SqlitePool`; clones share the pool, so construct one store
//! at startup and hand clones to the scheduler, the rotation client, and any
//! consumer. The pool is opened by [`SessionStore::connect`] and released by
//! [`SessionStore::close`].

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::session::{short_id, Session, SessionRecord};

/// Maximum pooled connections for a file-backed store.
/// The workload is one sequential rotation loop plus occasional reads.
const MAX_CONNECTIONS: u32 = 4;

/// How long a writer waits on a locked database before failing
const BUSY_TIMEOUT_SECS: u64 = 5;

const CREATE_SESSIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS sessions (
        session_id   TEXT PRIMARY KEY,
        secret_token TEXT NOT NULL,
        updated_at   INTEGER NOT NULL,
        active       BOOLEAN NOT NULL DEFAULT 1
    )
"#;

// updated_at is Unix microseconds; MAX(..., previous + 1) keeps it strictly
// increasing even when two writes land inside one clock tick.
const UPSERT_SESSION: &str = r#"
    INSERT INTO sessions (session_id, secret_token, updated_at, active)
    VALUES (?, ?, ?, 1)
    ON CONFLICT(session_id) DO UPDATE SET
        secret_token = excluded.secret_token,
        updated_at   = MAX(excluded.updated_at, sessions.updated_at + 1),
        active       = 1
"#;

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    session_id: String,
    secret_token: String,
    active: bool,
    updated_at: i64,
}

impl TryFrom<SessionRow> for SessionRecord {
    type Error = StorageError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let updated_at = DateTime::<Utc>::from_timestamp_micros(row.updated_at).ok_or_else(|| {
            StorageError::Corrupt(format!(
                "session {} has out-of-range updated_at {}",
                short_id(&row.session_id),
                row.updated_at
            ))
        })?;
        Ok(SessionRecord {
            session_id: row.session_id,
            secret_token: row.secret_token,
            active: row.active,
            updated_at,
        })
    }
}

#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Open the store at a `sqlite:` URL, creating the file and schema if needed.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        if !database_url.starts_with("sqlite:") {
            return Err(StorageError::Config(format!(
                "unsupported database URL scheme (expected sqlite:): {}",
                database_url.split(':').next().unwrap_or_default()
            )));
        }

        let opts = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(BUSY_TIMEOUT_SECS));

        if let Some(parent) = opts.get_filename().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Config(format!(
                    "cannot create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(opts)
            .await
            .map_err(StorageError::Connect)?;

        let store = Self { pool };
        store.migrate().await?;
        info!("Connected to session store");
        Ok(store)
    }

    /// A private in-memory store backed by a single, never-recycled connection.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Config(e.to_string()))?;

        // The database lives only as long as its connection stays open, so keep
        // exactly one and never let the pool retire it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(StorageError::Connect)?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create the sessions table if it does not exist.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(CREATE_SESSIONS_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert a session or replace its secret, forcing it active again.
    pub async fn upsert_session(
        &self,
        session_id: &str,
        secret_token: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(UPSERT_SESSION)
            .bind(session_id)
            .bind(secret_token)
            .bind(Utc::now().timestamp_micros())
            .execute(&self.pool)
            .await?;

        debug!(session = %short_id(session_id), "Upserted session");
        Ok(())
    }

    /// The current secret, if the session exists and is active.
    pub async fn get_active_secret(&self, session_id: &str) -> Result<Option<String>, StorageError> {
        let secret = sqlx::query_scalar::<_, String>(
            "SELECT secret_token FROM sessions WHERE session_id = ? AND active = 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(secret)
    }

    /// All active sessions, in no particular order.
    pub async fn list_active_sessions(&self) -> Result<Vec<Session>, StorageError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT session_id, secret_token FROM sessions WHERE active = 1",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(session_id, secret_token)| Session {
                session_id,
                secret_token,
            })
            .collect())
    }

    /// Mark a session inactive. Returns `false` if it was already inactive or unknown.
    pub async fn deactivate_session(&self, session_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE sessions SET active = 0 WHERE session_id = ? AND active = 1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The most recently refreshed active session, if any.
    pub async fn pick_active_session(&self) -> Result<Option<Session>, StorageError> {
        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT session_id, secret_token FROM sessions WHERE active = 1 \
             ORDER BY updated_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(session_id, secret_token)| Session {
            session_id,
            secret_token,
        }))
    }

    /// Full row for a session, active or not.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StorageError> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT session_id, secret_token, active, updated_at FROM sessions WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SessionRecord::try_from).transpose()
    }

    /// Every stored row, ordered by id.
    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>, StorageError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT session_id, secret_token, active, updated_at FROM sessions ORDER BY session_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SessionRecord::try_from).collect()
    }

    /// Close the pool. Outstanding clones fail with `StorageError` afterwards.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Session store closed");
    }
}

// ============================================================================
// Tests
// ============================================================================
