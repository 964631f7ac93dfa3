//! SQLite-backed registry of pending operations.

use crate::{ConfirmationToken, Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Summary of a pending operation, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSummary {
    pub token: ConfirmationToken,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

/// Token-keyed store of suspended operations.
///
/// Records are opaque JSON to the store. [`take`](Self::take) removes and
/// returns a record in one statement, so each token is consumed at most
/// once no matter how many callers race for it.
pub struct PendingStore {
    conn: Mutex<Connection>,
    ttl: Option<Duration>,
}

impl PendingStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (single process only).
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pending (
                token TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pending_created
                ON pending(created_at);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            ttl: None,
        })
    }

    /// Expire records older than `ttl`.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Store a record under `token`. Fails if the token is already in use.
    pub fn insert<T: Serialize>(
        &self,
        token: ConfirmationToken,
        label: &str,
        record: &T,
    ) -> Result<()> {
        self.insert_at(token, label, record, Utc::now())
    }

    fn insert_at<T: Serialize>(
        &self,
        token: ConfirmationToken,
        label: &str,
        record: &T,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let data = serde_json::to_string(record)?;
        self.lock()?.execute(
            "INSERT INTO pending (token, label, created_at, data) VALUES (?1, ?2, ?3, ?4)",
            params![
                token.to_string(),
                label,
                created_at.timestamp_millis(),
                data
            ],
        )?;
        tracing::debug!(%token, label, "stored pending operation");
        Ok(())
    }

    /// Remove and return the record for `token`.
    ///
    /// Returns `None` if the token is unknown, was already taken, or has
    /// expired. A record that fails to decode is left in place and the
    /// error returned.
    pub fn take<T: DeserializeOwned>(&self, token: &ConfirmationToken) -> Result<Option<T>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let row: Option<(String, i64)> = tx
            .query_row(
                "DELETE FROM pending WHERE token = ?1 RETURNING data, created_at",
                [token.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((data, created_at)) = row else {
            return Ok(None);
        };

        if self.is_expired(created_at, Utc::now()) {
            tx.commit()?;
            tracing::info!(%token, "pending operation expired");
            return Ok(None);
        }

        let record = match serde_json::from_str(&data) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(%token, error = %e, "pending operation does not decode, keeping it");
                return Err(e.into());
            }
        };
        tx.commit()?;
        Ok(Some(record))
    }

    /// Whether a live record exists for `token`.
    pub fn contains(&self, token: &ConfirmationToken) -> Result<bool> {
        let created_at: Option<i64> = self
            .lock()?
            .query_row(
                "SELECT created_at FROM pending WHERE token = ?1",
                [token.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(created_at.is_some_and(|at| !self.is_expired(at, Utc::now())))
    }

    /// List live records, oldest first.
    pub fn list(&self) -> Result<Vec<PendingSummary>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT token, label, created_at FROM pending ORDER BY created_at")?;

        let rows = stmt
            .query_map([], |row| {
                let token: String = row.get(0)?;
                let label: String = row.get(1)?;
                let created_at: i64 = row.get(2)?;
                Ok((token, label, created_at))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let now = Utc::now();
        let mut summaries = Vec::with_capacity(rows.len());
        for (token, label, created_at) in rows {
            if self.is_expired(created_at, now) {
                continue;
            }
            let Some(created_at) = Utc.timestamp_millis_opt(created_at).single() else {
                continue;
            };
            summaries.push(PendingSummary {
                token: token.parse()?,
                label,
                created_at,
            });
        }

        Ok(summaries)
    }

    /// Delete expired records, returning how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let Some(cutoff) = self.cutoff(Utc::now()) else {
            return Ok(0);
        };
        let removed = self
            .lock()?
            .execute("DELETE FROM pending WHERE created_at < ?1", [cutoff])?;
        if removed > 0 {
            tracing::info!(removed, "purged expired pending operations");
        }
        Ok(removed)
    }

    fn cutoff(&self, now: DateTime<Utc>) -> Option<i64> {
        let ttl = i64::try_from(self.ttl?.as_millis()).unwrap_or(i64::MAX);
        Some(now.timestamp_millis().saturating_sub(ttl))
    }

    fn is_expired(&self, created_at: i64, now: DateTime<Utc>) -> bool {
        self.cutoff(now).is_some_and(|cutoff| created_at < cutoff)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::Poisoned)
    }
}
