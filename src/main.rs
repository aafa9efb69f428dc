use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use geo_reconcile::{
    count_customers, insert_customers, load_csv, open_database, period_key, setup_database,
    CandidateSelector, Config, MapboxClient, QuotaLedger, ReconciliationEngine, RecordStore,
    SqliteCandidateSource, SqliteQuotaStore, SqliteRecordStore,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load().context("Failed to load configuration")?;
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        None | Some("run") => run_reconciliation(&config),
        Some("status") => show_status(&config),
        Some("import") => match args.get(2) {
            Some(path) => run_import(&config, Path::new(path)),
            None => bail!("usage: geo-reconcile import <customers.csv>"),
        },
        Some(other) => bail!("unknown command '{}' (expected run, status or import)", other),
    }
}

fn run_reconciliation(config: &Config) -> Result<()> {
    let conn = open_database(&config.database)
        .with_context(|| format!("Cannot open database {:?}", config.database))?;
    setup_database(&conn, &config.tables).context("Failed to prepare database schema")?;

    let geocoder = MapboxClient::from_config(config)?;
    let source = SqliteCandidateSource::new(&conn, &config.tables);
    let store = SqliteRecordStore::new(&conn, &config.tables);
    let quota_store = SqliteQuotaStore::new(&conn, &config.tables);
    let ledger = QuotaLedger::new(&quota_store, config.monthly_ceiling);

    let mut engine = ReconciliationEngine::new(
        &source,
        CandidateSelector::from_config(config),
        ledger,
        &geocoder,
        &store,
    );

    let report = engine.run().context("Candidate query failed")?;
    println!("{}", report.summary());

    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    let conn = open_database(&config.database)
        .with_context(|| format!("Cannot open database {:?}", config.database))?;
    setup_database(&conn, &config.tables)?;

    let now = Utc::now();
    let period = period_key(now);
    let quota_store = SqliteQuotaStore::new(&conn, &config.tables);
    let ledger = QuotaLedger::new(&quota_store, config.monthly_ceiling);
    let store = SqliteRecordStore::new(&conn, &config.tables);

    match ledger.status(&period)? {
        Some(counter) => println!(
            "Quota {}: {} / {} calls ({} remaining){}",
            period,
            counter.call_count,
            ledger.ceiling(),
            counter.remaining(ledger.ceiling()),
            if ledger.check_reached(&period) { ", limit reached" } else { "" }
        ),
        None => println!("Quota {}: no calls yet (ceiling {})", period, ledger.ceiling()),
    }

    println!(
        "Customers: {}, enriched: {}, stale (>= {} days): {}",
        count_customers(&conn, &config.tables)?,
        store.count()?,
        config.staleness_days,
        store.count_stale(now, config.staleness_days)?
    );

    Ok(())
}

fn run_import(config: &Config, csv_path: &Path) -> Result<()> {
    let customers = load_csv(csv_path)
        .with_context(|| format!("Failed to load customers from {:?}", csv_path))?;

    let mut conn = open_database(&config.database)
        .with_context(|| format!("Cannot open database {:?}", config.database))?;
    setup_database(&conn, &config.tables)?;

    let stats = insert_customers(&mut conn, &config.tables, &customers)?;
    println!(
        "Imported {} customers ({} new, {} updated), {} in table",
        customers.len(),
        stats.inserted,
        stats.updated,
        count_customers(&conn, &config.tables)?
    );

    Ok(())
}
