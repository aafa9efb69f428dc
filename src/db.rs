use crate::config::TableNames;
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How long a connection waits on a locked database before failing
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Customer master row (source side, read-only to the engine)
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CustomerRecord {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub tax_id: String,

    #[serde(default)]
    pub street: String,

    #[serde(default)]
    pub municipality: String,

    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub district: String,

    #[serde(default)]
    pub status: String,
}

/// Outcome of a customer import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub inserted: usize,
    pub updated: usize,
}

/// Open a database file with WAL and a busy timeout
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection, tables: &TableNames) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Customer master (normally fed by the upstream system or `import`)
    // ==========================================================================
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                tax_id TEXT NOT NULL DEFAULT '',
                street TEXT NOT NULL DEFAULT '',
                municipality TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL DEFAULT '',
                district TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT '',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            tables.customers
        ),
        [],
    )?;

    // ==========================================================================
    // Enrichment side-table: one row per customer, coordinates optional
    // ==========================================================================
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                tax_id TEXT NOT NULL,
                latitude REAL,
                longitude REAL,
                updated_at TEXT NOT NULL
            )",
            tables.enrichment
        ),
        [],
    )?;

    // ==========================================================================
    // Monthly quota counter: one row per "YYYY-MM" period
    // ==========================================================================
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                period TEXT PRIMARY KEY,
                call_count INTEGER NOT NULL,
                last_updated TEXT NOT NULL,
                limit_reached INTEGER NOT NULL DEFAULT 0
            )",
            tables.quota
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_updated_at ON {0}(updated_at)",
            tables.enrichment
        ),
        [],
    )?;

    Ok(())
}

pub fn load_csv(csv_path: &Path) -> Result<Vec<CustomerRecord>> {
    let mut rdr = csv::Reader::from_path(csv_path)?;

    let mut customers = Vec::new();
    for result in rdr.deserialize() {
        let customer: CustomerRecord = result?;
        customers.push(customer);
    }

    Ok(customers)
}

/// Insert or refresh customer master rows, keyed by id
pub fn insert_customers(
    conn: &mut Connection,
    tables: &TableNames,
    customers: &[CustomerRecord],
) -> Result<ImportStats> {
    let mut stats = ImportStats::default();
    let tx = conn.transaction()?;

    for customer in customers {
        let exists: bool = tx
            .query_row(
                &format!("SELECT 1 FROM {} WHERE id = ?1", tables.customers),
                params![customer.id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        tx.execute(
            &format!(
                "INSERT INTO {} (id, name, tax_id, street, municipality, state, district, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    tax_id = excluded.tax_id,
                    street = excluded.street,
                    municipality = excluded.municipality,
                    state = excluded.state,
                    district = excluded.district,
                    status = excluded.status",
                tables.customers
            ),
            params![
                customer.id,
                customer.name,
                customer.tax_id,
                customer.street,
                customer.municipality,
                customer.state,
                customer.district,
                customer.status,
            ],
        )?;

        if exists {
            stats.updated += 1;
        } else {
            stats.inserted += 1;
        }
    }

    tx.commit()?;
    Ok(stats)
}

pub fn count_customers(conn: &Connection, tables: &TableNames) -> Result<i64> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", tables.customers),
        [],
        |row| row.get(0),
    )?;

    Ok(count)
}

/// Parse an RFC 3339 column value, reporting the column on failure
pub(crate) fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
