// End-to-end runs over a file-backed database with a scripted geocoder

use chrono::{DateTime, Duration, TimeZone, Utc};
use geo_reconcile::{
    insert_customers, open_database, setup_database, CandidateSelector, Clock, Coordinates,
    CustomerRecord, GeocodeOutcome, Geocoder, HaltReason, QuotaLedger, QuotaStore,
    ReconciliationEngine, RecordStore, SqliteCandidateSource, SqliteQuotaStore,
    SqliteRecordStore, TableNames,
};
use rusqlite::Connection;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;

struct StepClock(Cell<DateTime<Utc>>);

impl StepClock {
    fn at(start: DateTime<Utc>) -> Self {
        StepClock(Cell::new(start))
    }

    fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by);
    }
}

impl Clock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        self.0.get()
    }
}

#[derive(Default)]
struct ScriptedGeocoder {
    script: RefCell<HashMap<String, GeocodeOutcome>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedGeocoder {
    fn set(&self, address: &str, outcome: GeocodeOutcome) {
        self.script.borrow_mut().insert(address.to_string(), outcome);
    }

    fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl Geocoder for ScriptedGeocoder {
    fn geocode(&self, address: &str) -> GeocodeOutcome {
        self.calls.borrow_mut().push(address.to_string());
        self.script
            .borrow()
            .get(address)
            .cloned()
            .unwrap_or(GeocodeOutcome::Found(Coordinates {
                latitude: -23.0,
                longitude: -46.0,
            }))
    }
}

fn customer(id: &str, street: &str) -> CustomerRecord {
    CustomerRecord {
        id: id.to_string(),
        name: format!("CLIENTE {}", id),
        tax_id: format!("{}/0001-00", id),
        street: street.to_string(),
        municipality: "Sao Paulo".to_string(),
        state: "SP".to_string(),
        district: "Centro".to_string(),
        status: "A".to_string(),
    }
}

fn prepare(path: &Path, customers: &[CustomerRecord]) -> Connection {
    let mut conn = open_database(path).unwrap();
    setup_database(&conn, &TableNames::default()).unwrap();
    insert_customers(&mut conn, &TableNames::default(), customers).unwrap();
    conn
}

fn run_once(
    conn: &Connection,
    geocoder: &ScriptedGeocoder,
    clock: &StepClock,
    ceiling: i64,
    staleness_days: i64,
) -> geo_reconcile::RunReport {
    let tables = TableNames::default();
    let source = SqliteCandidateSource::new(conn, &tables);
    let store = SqliteRecordStore::new(conn, &tables);
    let quota_store = SqliteQuotaStore::new(conn, &tables);

    let mut engine = ReconciliationEngine::new(
        &source,
        CandidateSelector::new(staleness_days),
        QuotaLedger::new(&quota_store, ceiling),
        geocoder,
        &store,
    )
    .with_clock(clock);

    engine.run().unwrap()
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 2, 6, 0, 0).unwrap()
}

#[test]
fn test_every_new_record_counted_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let conn = prepare(
        &dir.path().join("geo.db"),
        &[
            customer("000001", "Rua Um 1"),
            customer("000002", "Rua Dois 2"),
            customer("000003", "Rua Tres 3"),
        ],
    );
    let geocoder = ScriptedGeocoder::default();
    geocoder.set("Rua Dois 2, Sao Paulo, SP, Centro", GeocodeOutcome::NotFound);
    let clock = StepClock::at(start());

    let report = run_once(&conn, &geocoder, &clock, 100_000, 10);

    assert_eq!(report.processed(), 3);
    assert_eq!(report.calls_counted, 3);

    let tables = TableNames::default();
    let store = SqliteRecordStore::new(&conn, &tables);
    let quota = SqliteQuotaStore::new(&conn, &tables);
    assert_eq!(store.count().unwrap(), 3);
    assert_eq!(quota.load("2024-05").unwrap().unwrap().call_count, 3);
    assert!(store.get("000002").unwrap().unwrap().coordinates.is_none());
}

#[test]
fn test_transient_failure_retried_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let conn = prepare(&dir.path().join("geo.db"), &[customer("000001", "Rua Um 1")]);
    let geocoder = ScriptedGeocoder::default();
    let address = "Rua Um 1, Sao Paulo, SP, Centro";
    geocoder.set(address, GeocodeOutcome::TransientFailure("request timed out".to_string()));
    let clock = StepClock::at(start());

    let first = run_once(&conn, &geocoder, &clock, 100_000, 10);
    assert_eq!(first.transient, 1);
    assert_eq!(first.calls_counted, 0);

    let tables = TableNames::default();
    let store = SqliteRecordStore::new(&conn, &tables);
    let quota = SqliteQuotaStore::new(&conn, &tables);
    assert!(!store.exists("000001").unwrap());
    assert!(quota.load("2024-05").unwrap().is_none());

    // Provider recovers; the record is still a candidate
    geocoder.set(
        address,
        GeocodeOutcome::Found(Coordinates {
            latitude: -23.55,
            longitude: -46.63,
        }),
    );
    clock.advance(Duration::hours(1));
    let second = run_once(&conn, &geocoder, &clock, 100_000, 10);

    assert_eq!(second.candidates, 1);
    assert_eq!(second.geocoded, 1);
    assert_eq!(quota.load("2024-05").unwrap().unwrap().call_count, 1);
    assert!(store.get("000001").unwrap().unwrap().coordinates.is_some());
}

#[test]
fn test_quota_shared_across_runs_and_resumes_next_month() {
    let dir = tempfile::tempdir().unwrap();
    let customers: Vec<_> = (1..=5)
        .map(|i| customer(&format!("{:06}", i), &format!("Rua {}", i)))
        .collect();
    let conn = prepare(&dir.path().join("geo.db"), &customers);
    let geocoder = ScriptedGeocoder::default();
    let clock = StepClock::at(start());

    let first = run_once(&conn, &geocoder, &clock, 2, 10);
    assert_eq!(first.halt_reason, HaltReason::QuotaExhausted);
    assert_eq!(first.geocoded, 2);

    // Same month: nothing more may be spent
    clock.advance(Duration::days(1));
    let second = run_once(&conn, &geocoder, &clock, 2, 10);
    assert!(second.quota_halted());
    assert_eq!(second.candidates, 0);
    assert_eq!(geocoder.call_count(), 2);

    // New month, fresh counter: the run resumes with the remaining records
    clock.advance(Duration::days(30));
    let third = run_once(&conn, &geocoder, &clock, 2, 1000);
    assert_eq!(third.period, "2024-06");
    assert_eq!(third.candidates, 3);
    assert_eq!(third.geocoded, 2);
    assert!(third.quota_halted());

    let store = SqliteRecordStore::new(&conn, &TableNames::default());
    assert_eq!(store.count().unwrap(), 4);
    // Lowest ids were processed first
    assert!(store.exists("000004").unwrap());
    assert!(!store.exists("000005").unwrap());
}

#[test]
fn test_stale_records_refreshed_after_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let conn = prepare(
        &dir.path().join("geo.db"),
        &[customer("000001", "Rua Um 1"), customer("000002", "Rua Dois 2")],
    );
    let geocoder = ScriptedGeocoder::default();
    let clock = StepClock::at(start());

    run_once(&conn, &geocoder, &clock, 100_000, 10);
    assert_eq!(geocoder.call_count(), 2);

    // Within the threshold nothing is re-geocoded
    clock.advance(Duration::days(9));
    let quiet = run_once(&conn, &geocoder, &clock, 100_000, 10);
    assert_eq!(quiet.candidates, 0);

    // A new customer arrives while both old ones turn stale
    insert_customers(
        &mut open_database(&dir.path().join("geo.db")).unwrap(),
        &TableNames::default(),
        &[customer("000003", "Rua Tres 3")],
    )
    .unwrap();
    clock.advance(Duration::days(2));
    let refresh = run_once(&conn, &geocoder, &clock, 100_000, 10);

    assert_eq!(refresh.candidates, 3);
    let calls = geocoder.calls.borrow();
    // The never-enriched customer goes first
    assert_eq!(calls[2], "Rua Tres 3, Sao Paulo, SP, Centro");

    let store = SqliteRecordStore::new(&conn, &TableNames::default());
    assert_eq!(store.count().unwrap(), 3);
    assert_eq!(store.get("000001").unwrap().unwrap().updated_at, clock.now());
}
