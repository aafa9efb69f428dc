// ⚖️ Reconciliation Engine - quota-gated enrichment of stale customers
//
// Per candidate:
//
//   CheckingQuota ──reached──▶ Exhausted (halt the whole run)
//        │
//        ▼
//   Fetching ── Found ────────▶ count call, write coordinates
//            ── NotFound ─────▶ count call, write null coordinates
//            ── Transient ────▶ nothing counted, nothing written
//            ── Fatal ────────▶ isolate: best-effort null write
//        │
//        ▼
//   Writing ── store error ──▶ isolate: best-effort null write
//        │
//        ├── counter write failed ──▶ Exhausted (outcome already persisted)
//        ▼
//   NextRecord
//
// No run entity survives between invocations: resumption relies only on the
// quota counter and the enrichment table.

use crate::candidates::{Candidate, CandidateSelector, CandidateSource};
use crate::error::{ReconcileError, Result};
use crate::geocode::{Coordinates, GeocodeOutcome, Geocoder};
use crate::quota::{period_key, QuotaCounter, QuotaLedger};
use crate::store::{EnrichmentRecord, RecordStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

// ============================================================================
// CLOCK
// ============================================================================

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

static SYSTEM_CLOCK: SystemClock = SystemClock;

// ============================================================================
// STATES AND OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Idle,
    CheckingQuota,
    Exhausted,
    Fetching,
    Writing,
    NextRecord,
}

/// How one candidate ended
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Counted and persisted with coordinates
    Geocoded(Coordinates),
    /// Counted and persisted without coordinates
    NotFound,
    /// Not counted, not persisted; eligible again next run
    Transient(String),
    /// Isolated after an unexpected error
    Failed(String),
}

/// What happened to the quota counter for one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallAccounting {
    NotCalled,
    Counted,
    /// The provider answered but the counter could not be written
    Untracked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    Completed,
    QuotaExhausted,
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub period: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub candidates: usize,
    pub geocoded: usize,
    pub not_found: usize,
    pub transient: usize,
    pub failed: usize,
    /// Calls counted against the monthly quota during this run
    pub calls_counted: usize,
    pub halt_reason: HaltReason,
    pub quota: Option<QuotaCounter>,
}

impl RunReport {
    fn start(started_at: DateTime<Utc>) -> Self {
        RunReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            period: period_key(started_at),
            started_at,
            finished_at: None,
            candidates: 0,
            geocoded: 0,
            not_found: 0,
            transient: 0,
            failed: 0,
            calls_counted: 0,
            halt_reason: HaltReason::Completed,
            quota: None,
        }
    }

    fn tally(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Geocoded(_) => self.geocoded += 1,
            RecordOutcome::NotFound => self.not_found += 1,
            RecordOutcome::Transient(_) => self.transient += 1,
            RecordOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// Candidates that reached a persisted end state
    pub fn processed(&self) -> usize {
        self.geocoded + self.not_found
    }

    /// Candidates left untouched for a later run
    pub fn skipped(&self) -> usize {
        self.candidates - self.processed() - self.failed
    }

    pub fn quota_halted(&self) -> bool {
        self.halt_reason == HaltReason::QuotaExhausted
    }

    pub fn summary(&self) -> String {
        let quota = match &self.quota {
            Some(counter) => format!("{} calls this period", counter.call_count),
            None => "no calls this period".to_string(),
        };

        format!(
            "Run {} ({}): {} candidates, {} processed ({} geocoded, {} not found), {} skipped ({} transient), {} failed, {} calls counted, {}{}",
            self.run_id,
            self.period,
            self.candidates,
            self.processed(),
            self.geocoded,
            self.not_found,
            self.skipped(),
            self.transient,
            self.failed,
            self.calls_counted,
            quota,
            if self.quota_halted() { ", halted: monthly quota reached" } else { "" }
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine<'a> {
    source: &'a dyn CandidateSource,
    selector: CandidateSelector,
    ledger: QuotaLedger<'a>,
    geocoder: &'a dyn Geocoder,
    store: &'a dyn RecordStore,
    clock: &'a dyn Clock,
    state: EngineState,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(
        source: &'a dyn CandidateSource,
        selector: CandidateSelector,
        ledger: QuotaLedger<'a>,
        geocoder: &'a dyn Geocoder,
        store: &'a dyn RecordStore,
    ) -> Self {
        ReconciliationEngine {
            source,
            selector,
            ledger,
            geocoder,
            store,
            clock: &SYSTEM_CLOCK,
            state: EngineState::Idle,
        }
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Run once over the current candidate sequence.
    ///
    /// Errors only when the candidate query itself fails; every per-record
    /// problem is absorbed into the report.
    pub fn run(&mut self) -> Result<RunReport> {
        let mut report = RunReport::start(self.clock.now());
        info!(run_id = %report.run_id, period = %report.period, "starting reconciliation run");

        // Nothing is read when the month's quota is already spent
        self.state = EngineState::CheckingQuota;
        if self.ledger.check_reached(&report.period) {
            return Ok(self.halt(report, "monthly geocoding quota reached, halting run"));
        }

        self.state = EngineState::Idle;
        let rows = self.source.fetch(report.started_at)?;
        let candidates = self.selector.select(rows);
        report.candidates = candidates.len();
        info!(
            candidates = report.candidates,
            staleness_days = self.selector.staleness_days,
            "candidates selected"
        );

        for candidate in &candidates {
            let period = period_key(self.clock.now());

            self.state = EngineState::CheckingQuota;
            if self.ledger.check_reached(&period) {
                report.period = period;
                return Ok(self.halt(report, "monthly geocoding quota reached, halting run"));
            }

            let (outcome, accounting) = self.process(candidate, &period);
            report.tally(&outcome);
            report.period = period;

            match accounting {
                CallAccounting::Counted => report.calls_counted += 1,
                CallAccounting::Untracked => {
                    // Further calls could exceed the ceiling unseen
                    return Ok(self.halt(report, "quota counter cannot be updated, halting run"));
                }
                CallAccounting::NotCalled => {}
            }
            self.state = EngineState::NextRecord;
        }

        self.state = EngineState::Idle;
        report.quota = self.current_quota(&report.period);
        report.finished_at = Some(self.clock.now());
        info!("{}", report.summary());
        Ok(report)
    }

    fn halt(&mut self, mut report: RunReport, cause: &str) -> RunReport {
        self.state = EngineState::Exhausted;
        report.halt_reason = HaltReason::QuotaExhausted;
        report.quota = self.current_quota(&report.period);
        report.finished_at = Some(self.clock.now());
        warn!(
            period = %report.period,
            ceiling = self.ledger.ceiling(),
            "{}",
            cause
        );
        info!("{}", report.summary());
        report
    }

    fn current_quota(&self, period: &str) -> Option<QuotaCounter> {
        match self.ledger.status(period) {
            Ok(counter) => counter,
            Err(e) => {
                warn!(period, error = %e, "could not read quota counter for report");
                None
            }
        }
    }

    /// Fetch and write one candidate; never propagates an error
    fn process(&mut self, candidate: &Candidate, period: &str) -> (RecordOutcome, CallAccounting) {
        self.state = EngineState::Fetching;
        debug!(id = %candidate.id, address = %candidate.address, "geocoding candidate");

        match self.geocoder.geocode(&candidate.address) {
            GeocodeOutcome::Found(coordinates) => {
                let accounting = self.count_call(candidate, period);
                let outcome = match self.write(candidate, Some(coordinates)) {
                    Ok(()) => RecordOutcome::Geocoded(coordinates),
                    Err(e) => self.isolate(candidate, e),
                };
                (outcome, accounting)
            }
            GeocodeOutcome::NotFound => {
                let accounting = self.count_call(candidate, period);
                info!(id = %candidate.id, address = %candidate.address, "address not found");
                let outcome = match self.write(candidate, None) {
                    Ok(()) => RecordOutcome::NotFound,
                    Err(e) => self.isolate(candidate, e),
                };
                (outcome, accounting)
            }
            GeocodeOutcome::TransientFailure(reason) => {
                warn!(id = %candidate.id, reason = %reason, "geocoding failed, leaving record for a later run");
                (RecordOutcome::Transient(reason), CallAccounting::NotCalled)
            }
            GeocodeOutcome::Fatal(reason) => {
                let outcome = self.isolate(
                    candidate,
                    ReconcileError::UnexpectedRecord {
                        id: candidate.id.clone(),
                        reason,
                    },
                );
                (outcome, CallAccounting::NotCalled)
            }
        }
    }

    /// The provider answered, so the call counts even if writing fails later
    fn count_call(&self, candidate: &Candidate, period: &str) -> CallAccounting {
        match self.ledger.increment(period, self.clock.now()) {
            Ok(_) => CallAccounting::Counted,
            Err(e) => {
                error!(id = %candidate.id, period, error = %e, "failed to record geocoding call");
                CallAccounting::Untracked
            }
        }
    }

    fn write(&mut self, candidate: &Candidate, coordinates: Option<Coordinates>) -> Result<()> {
        self.state = EngineState::Writing;
        let record = EnrichmentRecord::new(
            &candidate.id,
            &candidate.name,
            &candidate.tax_id,
            coordinates,
            self.clock.now(),
        );

        let action = self.store.upsert(&record)?;
        debug!(id = %candidate.id, ?action, located = coordinates.is_some(), "enrichment written");
        Ok(())
    }

    /// Mark the record attempted so bad input is not retried every run
    fn isolate(&mut self, candidate: &Candidate, cause: ReconcileError) -> RecordOutcome {
        error!(id = %candidate.id, error = %cause, "record failed, marking as attempted");

        if let Err(e) = self.write(candidate, None) {
            error!(id = %candidate.id, error = %e, "best-effort write failed");
        }

        RecordOutcome::Failed(cause.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
