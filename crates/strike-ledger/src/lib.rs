//! Strike Ledger - SQLite-backed strike storage
//!
//! Stores one row per member, keyed by the member's SHA-256 hash; raw
//! platform ids never reach the database.
//!
//! Increments are a single `INSERT .. ON CONFLICT DO UPDATE .. RETURNING`
//! statement, so concurrent increments from this process or from other
//! processes sharing the file are never lost.
//!
//! # Example
//!
//! ```rust,ignore
//! use strike_core::{MemberId, StrikeLedger};
//! use strike_ledger::SqliteLedger;
//!
//! # async fn example() -> Result<(), strike_core::PersistenceError> {
//! let ledger = SqliteLedger::open("strikes.db")?;
//! let record = ledger.increment(MemberId(42)).await?;
//! assert_eq!(record.strike_count, 1);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strike_core::{MemberHash, MemberId, PersistenceError, StrikeLedger, StrikeRecord};

/// How long a statement waits for another writer to release the file
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable ledger in a SQLite file
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteLedger {
    /// Open (creating if needed) the ledger at `path`
    ///
    /// # Errors
    /// `PersistenceError::Backend` if the file cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(PersistenceError::backend)?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(PersistenceError::backend)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(PersistenceError::backend)?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "strike ledger opened");

        Self::with_connection(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory ledger
    ///
    /// # Errors
    /// `PersistenceError::Backend` if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory().map_err(PersistenceError::backend)?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, PersistenceError> {
        migrate(&conn).map_err(PersistenceError::backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// File backing the ledger; `None` when in memory
    #[inline]
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of members with a record
    ///
    /// # Errors
    /// `PersistenceError` if the query fails.
    pub async fn member_count(&self) -> Result<u64, PersistenceError> {
        self.blocking(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM member_strikes", [], |row| row.get(0))
                    .map_err(PersistenceError::backend)?;
            u64::try_from(count).map_err(|_| PersistenceError::Corrupt(format!("negative row count {count}")))
        })
        .await
    }

    /// Record for a member hash, for tools that only hold the hash
    ///
    /// # Errors
    /// `PersistenceError` if the query fails or the row is corrupt.
    pub async fn get_by_hash(&self, member: MemberHash) -> Result<Option<StrikeRecord>, PersistenceError> {
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT member_hash, strikes, created_at, updated_at
                 FROM member_strikes WHERE member_hash = ?1",
                params![member.to_hex()],
                read_row,
            )
            .optional()
            .map_err(PersistenceError::backend)?
            .transpose()
        })
        .await
    }

    /// Run `op` against the connection on the blocking pool
    async fn blocking<T, F>(&self, op: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || op(&conn.lock()))
            .await
            .map_err(|e| PersistenceError::TaskAborted(e.to_string()))?
    }
}

#[async_trait]
impl StrikeLedger for SqliteLedger {
    async fn increment(&self, member: MemberId) -> Result<StrikeRecord, PersistenceError> {
        let hash = member.hashed();
        let record = self
            .blocking(move |conn| {
                let now = Utc::now().to_rfc3339();
                conn.query_row(
                    "INSERT INTO member_strikes (member_hash, strikes, created_at, updated_at)
                     VALUES (?1, 1, ?2, ?2)
                     ON CONFLICT(member_hash) DO UPDATE
                        SET strikes = strikes + 1, updated_at = excluded.updated_at
                     RETURNING member_hash, strikes, created_at, updated_at",
                    params![hash.to_hex(), now],
                    read_row,
                )
                .map_err(PersistenceError::backend)?
            })
            .await?;

        tracing::debug!(member = %hash.short(), strikes = record.strike_count, "strike recorded");
        Ok(record)
    }

    async fn get(&self, member: MemberId) -> Result<Option<StrikeRecord>, PersistenceError> {
        self.get_by_hash(member.hashed()).await
    }
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS member_strikes (
            member_hash TEXT PRIMARY KEY NOT NULL,
            strikes     INTEGER NOT NULL DEFAULT 0 CHECK (strikes >= 0),
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );",
    )
}

/// Decode a row; the outer error is SQLite's, the inner one a corrupt value
fn read_row(row: &Row<'_>) -> rusqlite::Result<Result<StrikeRecord, PersistenceError>> {
    let hash: String = row.get(0)?;
    let strikes: i64 = row.get(1)?;
    let created_at: String = row.get(2)?;
    let updated_at: String = row.get(3)?;

    Ok(decode(&hash, strikes, &created_at, &updated_at))
}

fn decode(
    hash: &str,
    strikes: i64,
    created_at: &str,
    updated_at: &str,
) -> Result<StrikeRecord, PersistenceError> {
    let member = hash
        .parse::<MemberHash>()
        .map_err(|e| PersistenceError::Corrupt(format!("member hash: {e}")))?;
    let strike_count = u32::try_from(strikes)
        .map_err(|_| PersistenceError::Corrupt(format!("strike count {strikes} out of range")))?;

    Ok(StrikeRecord {
        member,
        strike_count,
        created_at: parse_timestamp(created_at)?,
        updated_at: parse_timestamp(updated_at)?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| PersistenceError::Corrupt(format!("timestamp {value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn increment_creates_then_bumps() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let member = MemberId(1234);

        assert_eq!(ledger.get(member).await.unwrap(), None);

        let first = ledger.increment(member).await.unwrap();
        assert_eq!(first.strike_count, 1);
        assert_eq!(first.member, member.hashed());

        let second = ledger.increment(member).await.unwrap();
        assert_eq!(second.strike_count, 2);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);

        assert_eq!(ledger.get(member).await.unwrap(), Some(second));
        assert_eq!(ledger.member_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stores_only_the_hash() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.increment(MemberId(987_654_321)).await.unwrap();

        let conn = ledger.conn.lock();
        let stored: String = conn
            .query_row("SELECT member_hash FROM member_strikes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stored, MemberId(987_654_321).hashed().to_hex());
        assert!(!stored.contains("987654321"));
    }

    #[tokio::test]
    async fn lookup_by_hash() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.increment(MemberId(5)).await.unwrap();

        let record = ledger.get_by_hash(MemberId(5).hashed()).await.unwrap().unwrap();
        assert_eq!(record.strike_count, 1);
        assert_eq!(ledger.get_by_hash(MemberId(6).hashed()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_rows_are_reported() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger
            .conn
            .lock()
            .execute(
                "INSERT INTO member_strikes VALUES (?1, 1, 'yesterday', 'today')",
                params![MemberId(7).hashed().to_hex()],
            )
            .unwrap();

        let err = ledger.get(MemberId(7)).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt(_)));
    }

    #[test]
    fn decode_rejects_out_of_range_counts() {
        let hash = MemberId(1).hashed().to_hex();
        let now = Utc::now().to_rfc3339();
        assert!(matches!(
            decode(&hash, i64::from(u32::MAX) + 1, &now, &now),
            Err(PersistenceError::Corrupt(_))
        ));
        assert!(matches!(
            decode("not-hex", 1, &now, &now),
            Err(PersistenceError::Corrupt(_))
        ));
    }
}
