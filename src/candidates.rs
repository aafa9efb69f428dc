// 🎯 Candidate Selection - who gets (re)geocoded, and in which order
//
// Eligible:
//   - never enriched                      (flag_exist = 0)
//   - enriched, last attempt too old      (flag_exist = 1 AND age >= threshold)
//
// Order:
//   never enriched first → oldest attempt first → newest timestamp first → id
//
// The order is a pure function of persisted state, so an interrupted run
// resumes where the previous one stopped.

use crate::config::{AddressField, Config, TableNames};
use crate::db::parse_timestamp;
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ============================================================================
// CANDIDATE ROW (customer ⋈ enrichment)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRow {
    pub id: String,
    pub name: String,
    pub tax_id: String,
    pub street: String,
    pub municipality: String,
    pub state: String,
    pub district: String,
    pub status: String,

    /// Whether an enrichment record exists (`flag_exist`)
    pub enriched: bool,

    /// Whole days since the last enrichment attempt; None when never enriched
    pub age_days: Option<i64>,

    /// Last enrichment attempt, or the query time when never enriched
    pub last_updated: DateTime<Utc>,
}

impl CandidateRow {
    pub fn flag_exist(&self) -> u8 {
        self.enriched as u8
    }

    pub fn fragment(&self, field: AddressField) -> &str {
        match field {
            AddressField::Street => &self.street,
            AddressField::Municipality => &self.municipality,
            AddressField::State => &self.state,
            AddressField::District => &self.district,
        }
    }
}

/// A selected record, ready for the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub tax_id: String,
    pub address: String,
    pub enriched: bool,
    pub age_days: Option<i64>,
}

/// Join the configured fragments and collapse all whitespace
pub fn normalize_address(row: &CandidateRow, fields: &[AddressField]) -> String {
    let joined = fields
        .iter()
        .map(|field| row.fragment(*field).trim())
        .filter(|fragment| !fragment.is_empty())
        .collect::<Vec<_>>()
        .join(", ");

    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// CANDIDATE SOURCE (read-only boundary)
// ============================================================================

pub trait CandidateSource {
    /// Every customer row joined with its enrichment state as of `now`
    fn fetch(&self, now: DateTime<Utc>) -> Result<Vec<CandidateRow>>;
}

pub struct SqliteCandidateSource<'c> {
    conn: &'c Connection,
    tables: TableNames,
}

impl<'c> SqliteCandidateSource<'c> {
    pub fn new(conn: &'c Connection, tables: &TableNames) -> Self {
        SqliteCandidateSource {
            conn,
            tables: tables.clone(),
        }
    }
}

impl CandidateSource for SqliteCandidateSource<'_> {
    fn fetch(&self, now: DateTime<Utc>) -> Result<Vec<CandidateRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT c.id, c.name, c.tax_id, c.street, c.municipality, c.state,
                    c.district, c.status, g.updated_at
             FROM {} c
             LEFT OUTER JOIN {} g ON c.id = g.id",
            self.tables.customers, self.tables.enrichment
        ))?;

        let rows = stmt
            .query_map([], |row| {
                let updated_at: Option<String> = row.get(8)?;
                let updated_at = match updated_at {
                    Some(value) => Some(parse_timestamp(8, &value)?),
                    None => None,
                };

                Ok(CandidateRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    tax_id: row.get(2)?,
                    street: row.get(3)?,
                    municipality: row.get(4)?,
                    state: row.get(5)?,
                    district: row.get(6)?,
                    status: row.get(7)?,
                    enriched: updated_at.is_some(),
                    age_days: updated_at.map(|ts| (now - ts).num_days()),
                    last_updated: updated_at.unwrap_or(now),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

// ============================================================================
// CANDIDATE SELECTOR
// ============================================================================

#[derive(Debug, Clone)]
pub struct CandidateSelector {
    pub staleness_days: i64,
    pub address_fields: Vec<AddressField>,
    pub status_whitelist: Vec<String>,
    pub regions: Vec<String>,
    pub id_prefixes: Vec<String>,
}

impl CandidateSelector {
    pub fn new(staleness_days: i64) -> Self {
        CandidateSelector {
            staleness_days,
            address_fields: AddressField::default_order(),
            status_whitelist: Vec::new(),
            regions: Vec::new(),
            id_prefixes: Vec::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        CandidateSelector {
            staleness_days: config.staleness_days,
            address_fields: config.address_fields.clone(),
            status_whitelist: config.status_whitelist.clone(),
            regions: config.regions.clone(),
            id_prefixes: config.id_prefixes.clone(),
        }
    }

    /// Never enriched, or enriched long enough ago
    pub fn is_eligible(&self, row: &CandidateRow) -> bool {
        if !row.enriched {
            return true;
        }
        matches!(row.age_days, Some(age) if age >= self.staleness_days)
    }

    /// Configured filters; an empty list lets everything through
    pub fn passes_filters(&self, row: &CandidateRow) -> bool {
        let status_ok = self.status_whitelist.is_empty()
            || self
                .status_whitelist
                .iter()
                .any(|s| s.trim() == row.status.trim());

        let region_ok = self.regions.is_empty()
            || self
                .regions
                .iter()
                .any(|r| r.trim().eq_ignore_ascii_case(row.state.trim()));

        let prefix_ok = self.id_prefixes.is_empty()
            || self.id_prefixes.iter().any(|p| row.id.starts_with(p.as_str()));

        status_ok && region_ok && prefix_ok
    }

    /// Deterministic processing order
    pub fn compare(a: &CandidateRow, b: &CandidateRow) -> Ordering {
        a.enriched
            .cmp(&b.enriched)
            .then_with(|| b.age_days.cmp(&a.age_days))
            .then_with(|| b.last_updated.cmp(&a.last_updated))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Filter and order raw rows into the candidate sequence
    pub fn select(&self, rows: Vec<CandidateRow>) -> Vec<Candidate> {
        let mut eligible: Vec<CandidateRow> = rows
            .into_iter()
            .filter(|row| self.is_eligible(row) && self.passes_filters(row))
            .collect();

        eligible.sort_by(CandidateSelector::compare);

        eligible
            .into_iter()
            .map(|row| Candidate {
                address: normalize_address(&row, &self.address_fields),
                id: row.id,
                name: row.name,
                tax_id: row.tax_id,
                enriched: row.enriched,
                age_days: row.age_days,
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
