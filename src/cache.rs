//! Durable per-provider cache for reputation verdicts.
//!
//! Each provider owns its own database file (`<dir>/<namespace>-cache.db`)
//! so verdict semantics never cross-contaminate between services. A cached
//! verdict is served for 30 days from `last_checked`; after that the row
//! acts as a miss but stays stored until the next refresh overwrites it.

use chrono::{DateTime, Duration, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;

/// Days a verdict stays fresh.
pub const FRESHNESS_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One cached classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReputationRecord {
    pub is_vpn: bool,
    pub country: Option<String>,
    pub last_checked: DateTime<Utc>,
}

/// Durable keyed store, one row per address.
pub struct ReputationCache {
    pool: Pool<SqliteConnectionManager>,
    max_age: Duration,
}

impl ReputationCache {
    /// Open (creating directory, file and schema as needed) the cache for
    /// the given provider namespace.
    pub fn open(dir: &Path, namespace: &str) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{namespace}-cache.db"));
        Self::with_manager(SqliteConnectionManager::file(path), 4)
    }

    /// In-memory cache, used by tests. Pool size 1: every pooled `:memory:`
    /// connection would otherwise be its own empty database.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::with_manager(SqliteConnectionManager::memory(), 1)
    }

    fn with_manager(manager: SqliteConnectionManager, max_size: u32) -> Result<Self, CacheError> {
        // Schema init runs on every new connection; CREATE IF NOT EXISTS
        // keeps it idempotent. Pool construction checks one connection, so
        // open failures surface here.
        let manager = manager.with_init(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS reputation (
                    address      TEXT PRIMARY KEY,
                    is_vpn       INTEGER NOT NULL,
                    country      TEXT,
                    last_checked TEXT NOT NULL
                );
                ",
            )
        });
        let pool = Pool::builder().max_size(max_size).build(manager)?;

        Ok(Self {
            pool,
            max_age: Duration::days(FRESHNESS_WINDOW_DAYS),
        })
    }

    /// Look up a fresh verdict for an address.
    ///
    /// Returns `None` both for unknown addresses and for rows whose
    /// `last_checked` is older than the freshness window; stale rows are
    /// left in place for the next `store` to overwrite.
    pub fn lookup(&self, addr: &IpAddr) -> Result<Option<ReputationRecord>, CacheError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT is_vpn, country, last_checked FROM reputation WHERE address = ?1",
                params![addr.to_string()],
                |row| {
                    let is_vpn: i64 = row.get(0)?;
                    let country: Option<String> = row.get(1)?;
                    let last_checked: String = row.get(2)?;
                    Ok((is_vpn != 0, country, last_checked))
                },
            )
            .optional()?;

        let Some((is_vpn, country, last_checked)) = row else {
            return Ok(None);
        };

        let last_checked = match DateTime::parse_from_rfc3339(&last_checked) {
            Ok(t) => t.with_timezone(&Utc),
            // An unreadable timestamp acts as a miss; the refresh overwrites it.
            Err(_) => return Ok(None),
        };

        if Utc::now() - last_checked > self.max_age {
            return Ok(None);
        }

        Ok(Some(ReputationRecord {
            is_vpn,
            country,
            last_checked,
        }))
    }

    /// Upsert the verdict for an address.
    ///
    /// A single-statement `ON CONFLICT DO UPDATE`, so concurrent writers for
    /// the same address serialize at the database and the final row reflects
    /// exactly one writer, never a field-wise merge.
    pub fn store(
        &self,
        addr: &IpAddr,
        is_vpn: bool,
        country: Option<&str>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO reputation (address, is_vpn, country, last_checked)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(address) DO UPDATE SET
                 is_vpn = excluded.is_vpn,
                 country = excluded.country,
                 last_checked = excluded.last_checked",
            params![
                addr.to_string(),
                is_vpn as i64,
                country,
                checked_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Number of stored rows, stale ones included.
    pub fn len(&self) -> Result<usize, CacheError> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM reputation", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }
}
