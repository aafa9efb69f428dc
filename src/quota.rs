// 🧮 Quota Ledger - Monthly call ceiling shared by every run
//
// One counter row per calendar month ("YYYY-MM"):
//   call_count     monotonically non-decreasing within the period
//   limit_reached  set once call_count reaches the ceiling, then sticky
//
// Every external geocoding call is gated by check_reached() and, when it
// actually reached the provider, recorded by increment().

use crate::config::TableNames;
use crate::db::parse_timestamp;
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Period key for the month containing `at`
pub fn period_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

// ============================================================================
// QUOTA COUNTER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaCounter {
    pub period: String,
    pub call_count: i64,
    pub last_updated: DateTime<Utc>,
    pub limit_reached: bool,
}

impl QuotaCounter {
    pub fn remaining(&self, ceiling: i64) -> i64 {
        (ceiling - self.call_count).max(0)
    }
}

// ============================================================================
// QUOTA STORE (persistence seam)
// ============================================================================

pub trait QuotaStore {
    /// Read the counter row for a period
    fn load(&self, period: &str) -> Result<Option<QuotaCounter>>;

    /// Atomically add one call, creating the row on the period's first call
    fn increment(&self, period: &str, ceiling: i64, at: DateTime<Utc>) -> Result<QuotaCounter>;
}

pub struct SqliteQuotaStore<'c> {
    conn: &'c Connection,
    table: String,
}

impl<'c> SqliteQuotaStore<'c> {
    pub fn new(conn: &'c Connection, tables: &TableNames) -> Self {
        SqliteQuotaStore {
            conn,
            table: tables.quota.clone(),
        }
    }
}

fn counter_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QuotaCounter> {
    let last_updated: String = row.get(2)?;
    let limit_reached: i64 = row.get(3)?;

    Ok(QuotaCounter {
        period: row.get(0)?,
        call_count: row.get(1)?,
        last_updated: parse_timestamp(2, &last_updated)?,
        limit_reached: limit_reached != 0,
    })
}

impl QuotaStore for SqliteQuotaStore<'_> {
    fn load(&self, period: &str) -> Result<Option<QuotaCounter>> {
        let counter = self
            .conn
            .query_row(
                &format!(
                    "SELECT period, call_count, last_updated, limit_reached
                     FROM {} WHERE period = ?1",
                    self.table
                ),
                params![period],
                counter_from_row,
            )
            .optional()?;

        Ok(counter)
    }

    fn increment(&self, period: &str, ceiling: i64, at: DateTime<Utc>) -> Result<QuotaCounter> {
        // Single statement: overlapping runs cannot lose an update
        let counter = self.conn.query_row(
            &format!(
                "INSERT INTO {} (period, call_count, last_updated, limit_reached)
                 VALUES (?1, 1, ?2, CASE WHEN 1 >= ?3 THEN 1 ELSE 0 END)
                 ON CONFLICT(period) DO UPDATE SET
                    call_count = call_count + 1,
                    last_updated = excluded.last_updated,
                    limit_reached = CASE
                        WHEN call_count + 1 >= ?3 THEN 1
                        ELSE limit_reached
                    END
                 RETURNING period, call_count, last_updated, limit_reached",
                self.table
            ),
            params![period, at.to_rfc3339(), ceiling],
            counter_from_row,
        )?;

        Ok(counter)
    }
}

// ============================================================================
// QUOTA LEDGER
// ============================================================================

pub struct QuotaLedger<'a> {
    store: &'a dyn QuotaStore,
    ceiling: i64,
}

impl<'a> QuotaLedger<'a> {
    pub fn new(store: &'a dyn QuotaStore, ceiling: i64) -> Self {
        QuotaLedger { store, ceiling }
    }

    pub fn ceiling(&self) -> i64 {
        self.ceiling
    }

    /// Whether the period's quota is exhausted.
    ///
    /// Fails closed: an unreadable counter counts as exhausted. A missing
    /// row means no call was made yet this period. Both the stored flag and
    /// the stored count must agree before the quota is considered reached.
    pub fn check_reached(&self, period: &str) -> bool {
        match self.store.load(period) {
            Ok(Some(counter)) => counter.limit_reached && counter.call_count >= self.ceiling,
            Ok(None) => false,
            Err(e) => {
                warn!(period, error = %e, "quota counter unreadable, treating quota as reached");
                true
            }
        }
    }

    /// Record one call that reached the provider
    pub fn increment(&self, period: &str, at: DateTime<Utc>) -> Result<QuotaCounter> {
        let counter = self.store.increment(period, self.ceiling, at)?;
        debug!(
            period,
            call_count = counter.call_count,
            limit_reached = counter.limit_reached,
            "quota counter incremented"
        );
        Ok(counter)
    }

    pub fn status(&self, period: &str) -> Result<Option<QuotaCounter>> {
        self.store.load(period)
    }
}

// ============================================================================
// TESTS
// ============================================================================
