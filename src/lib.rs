// Geo Reconcile - Core Library
// Quota-aware geocoding enrichment of a customer master table

pub mod config;
pub mod error;
pub mod db;
pub mod quota;
pub mod store;
pub mod geocode;
pub mod candidates;
pub mod reconciliation;

// Re-export commonly used types
pub use config::{AddressField, Config, ConfigFile, TableNames};
pub use error::{ReconcileError, Result};
pub use db::{
    CustomerRecord, ImportStats,
    open_database, setup_database, load_csv, insert_customers, count_customers,
};
pub use quota::{period_key, QuotaCounter, QuotaLedger, QuotaStore, SqliteQuotaStore};
pub use store::{EnrichmentRecord, RecordStore, SqliteRecordStore, UpsertAction};
pub use geocode::{Coordinates, GeocodeOutcome, Geocoder, MapboxClient};
pub use candidates::{
    Candidate, CandidateRow, CandidateSelector, CandidateSource, SqliteCandidateSource,
    normalize_address,
};
pub use reconciliation::{
    Clock, EngineState, HaltReason, ReconciliationEngine, RecordOutcome, RunReport, SystemClock,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
