// 📍 Record Store - Enrichment side-table access
//
// One EnrichmentRecord per customer id. Writes are upserts: the latest
// attempt replaces the previous one and repeating a write never fails.
// Absent coordinates mean "attempted, not found".

use crate::config::TableNames;
use crate::db::parse_timestamp;
use crate::error::Result;
use crate::geocode::Coordinates;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub id: String,
    pub name: String,
    pub tax_id: String,
    pub coordinates: Option<Coordinates>,
    pub updated_at: DateTime<Utc>,
}

impl EnrichmentRecord {
    pub fn new(
        id: &str,
        name: &str,
        tax_id: &str,
        coordinates: Option<Coordinates>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        EnrichmentRecord {
            id: id.to_string(),
            name: name.to_string(),
            tax_id: tax_id.to_string(),
            coordinates,
            updated_at,
        }
    }

    pub fn is_located(&self) -> bool {
        self.coordinates.is_some()
    }

    /// Age in whole days at `now`
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated_at).num_days()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Inserted,
    Replaced,
}

// ============================================================================
// RECORD STORE
// ============================================================================

pub trait RecordStore {
    fn exists(&self, id: &str) -> Result<bool>;

    /// Insert or replace by id; latest attempt wins
    fn upsert(&self, record: &EnrichmentRecord) -> Result<UpsertAction>;

    fn get(&self, id: &str) -> Result<Option<EnrichmentRecord>>;

    fn count(&self) -> Result<i64>;

    /// Records whose last attempt is at least `staleness_days` old
    fn count_stale(&self, now: DateTime<Utc>, staleness_days: i64) -> Result<i64>;
}

pub struct SqliteRecordStore<'c> {
    conn: &'c Connection,
    table: String,
}

impl<'c> SqliteRecordStore<'c> {
    pub fn new(conn: &'c Connection, tables: &TableNames) -> Self {
        SqliteRecordStore {
            conn,
            table: tables.enrichment.clone(),
        }
    }
}

impl RecordStore for SqliteRecordStore<'_> {
    fn exists(&self, id: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE id = ?1", self.table),
                params![id],
                |_| Ok(()),
            )
            .optional()?;

        Ok(found.is_some())
    }

    fn upsert(&self, record: &EnrichmentRecord) -> Result<UpsertAction> {
        let action = if self.exists(&record.id)? {
            UpsertAction::Replaced
        } else {
            UpsertAction::Inserted
        };

        self.conn.execute(
            &format!(
                "INSERT INTO {} (id, name, tax_id, latitude, longitude, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    tax_id = excluded.tax_id,
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    updated_at = excluded.updated_at",
                self.table
            ),
            params![
                record.id,
                record.name,
                record.tax_id,
                record.coordinates.map(|c| c.latitude),
                record.coordinates.map(|c| c.longitude),
                record.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(action)
    }

    fn get(&self, id: &str) -> Result<Option<EnrichmentRecord>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT id, name, tax_id, latitude, longitude, updated_at
                     FROM {} WHERE id = ?1",
                    self.table
                ),
                params![id],
                |row| {
                    let latitude: Option<f64> = row.get(3)?;
                    let longitude: Option<f64> = row.get(4)?;
                    let updated_at: String = row.get(5)?;

                    Ok(EnrichmentRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        tax_id: row.get(2)?,
                        coordinates: latitude
                            .zip(longitude)
                            .map(|(latitude, longitude)| Coordinates { latitude, longitude }),
                        updated_at: parse_timestamp(5, &updated_at)?,
                    })
                },
            )
            .optional()?;

        Ok(record)
    }

    fn count(&self) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;

        Ok(count)
    }

    fn count_stale(&self, now: DateTime<Utc>, staleness_days: i64) -> Result<i64> {
        // RFC 3339 UTC strings order chronologically
        let cutoff = now - Duration::days(staleness_days);
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE updated_at <= ?1", self.table),
            params![cutoff.to_rfc3339()],
            |row| row.get(0),
        )?;

        Ok(count)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use chrono::TimeZone;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn, &TableNames::default()).unwrap();
        conn
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
    }

    fn located(lat: f64, lon: f64) -> Option<Coordinates> {
        Some(Coordinates {
            latitude: lat,
            longitude: lon,
        })
    }

    #[test]
    fn test_upsert_inserts_then_replaces() {
        let conn = memory_db();
        let store = SqliteRecordStore::new(&conn, &TableNames::default());

        assert!(!store.exists("000001").unwrap());

        let first = EnrichmentRecord::new("000001", "ACME LTDA", "123", None, at(1));
        assert_eq!(store.upsert(&first).unwrap(), UpsertAction::Inserted);
        assert!(store.exists("000001").unwrap());

        let second =
            EnrichmentRecord::new("000001", "ACME LTDA", "123", located(-23.55, -46.63), at(20));
        assert_eq!(store.upsert(&second).unwrap(), UpsertAction::Replaced);

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get("000001").unwrap(), Some(second));
    }

    #[test]
    fn test_repeated_upsert_in_same_run() {
        let conn = memory_db();
        let store = SqliteRecordStore::new(&conn, &TableNames::default());
        let record =
            EnrichmentRecord::new("000002", "BETA SA", "456", located(-22.9, -43.2), at(3));

        store.upsert(&record).unwrap();
        store.upsert(&record).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get("000002").unwrap(), Some(record));
    }

    #[test]
    fn test_not_found_keeps_null_coordinates() {
        let conn = memory_db();
        let store = SqliteRecordStore::new(&conn, &TableNames::default());

        store
            .upsert(&EnrichmentRecord::new("000003", "GAMMA ME", "789", None, at(4)))
            .unwrap();

        let stored = store.get("000003").unwrap().unwrap();
        assert!(!stored.is_located());

        let (lat, lon): (Option<f64>, Option<f64>) = conn
            .query_row(
                "SELECT latitude, longitude FROM geo_clients WHERE id = '000003'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!((lat, lon), (None, None));
    }

    #[test]
    fn test_get_missing() {
        let conn = memory_db();
        let store = SqliteRecordStore::new(&conn, &TableNames::default());
        assert_eq!(store.get("nope").unwrap(), None);
    }

    #[test]
    fn test_count_stale_and_age() {
        let conn = memory_db();
        let store = SqliteRecordStore::new(&conn, &TableNames::default());

        store
            .upsert(&EnrichmentRecord::new("a", "A", "", None, at(1)))
            .unwrap();
        store
            .upsert(&EnrichmentRecord::new("b", "B", "", None, at(20)))
            .unwrap();

        let now = at(25);
        assert_eq!(store.count_stale(now, 10).unwrap(), 1);
        assert_eq!(store.count_stale(now, 5).unwrap(), 2);
        assert_eq!(store.count_stale(now, 30).unwrap(), 0);

        let a = store.get("a").unwrap().unwrap();
        assert_eq!(a.age_days(now), 24);
    }

    #[test]
    fn test_store_failure_is_reported() {
        let conn = Connection::open_in_memory().unwrap();
        // No schema: every operation must surface the error
        let store = SqliteRecordStore::new(&conn, &TableNames::default());

        assert!(store.exists("x").is_err());
        assert!(store
            .upsert(&EnrichmentRecord::new("x", "X", "", None, at(1)))
            .is_err());
    }
}
