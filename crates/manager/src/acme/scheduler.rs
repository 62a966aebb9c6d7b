//! Background issuance scheduler
//!
//! Periodically scans domain records that are not yet `available` and moves
//! each one step forward through the lifecycle.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use certkeeper_config::{SchedulerConfig, MIN_INTERVAL_SECS};

use super::accounts::AccountStore;
use super::client::ProtocolAdapter;
use super::domains::DomainStore;
use super::lifecycle::{self, Step};
use super::records::{Account, CertificateArtifact, DomainRecord};
use super::storage::CertificateStorage;
use crate::error::ManagerError;
use crate::metrics::Metrics;

/// Counts for one processed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records selected by the scan
    pub selected: usize,
    /// `pending -> challenging`
    pub acquired: usize,
    /// `challenging -> available`
    pub issued: usize,
    /// `challenging -> pending`
    pub rolled_back: usize,
    /// Acquisition failures; the record stayed `pending`
    pub acquire_failed: usize,
    /// Records deleted while the batch was working on them
    pub dropped: usize,
    /// Records skipped because of a storage or state error
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Acquired,
    AcquireFailed,
    Issued,
    RolledBack,
    Dropped,
    Idle,
}

impl BatchReport {
    fn count(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Acquired => self.acquired += 1,
            Outcome::AcquireFailed => self.acquire_failed += 1,
            Outcome::Issued => self.issued += 1,
            Outcome::RolledBack => self.rolled_back += 1,
            Outcome::Dropped => self.dropped += 1,
            Outcome::Idle => {}
        }
    }
}

/// Background issuance scheduler
///
/// Batches are single-flight: the periodic loop and admin-forced ticks share
/// one lock, so a record is never advanced by two batches at once.
pub struct IssuanceScheduler {
    adapter: Arc<dyn ProtocolAdapter>,
    accounts: AccountStore,
    domains: DomainStore,
    certificates: Arc<CertificateStorage>,
    metrics: Metrics,
    config: SchedulerConfig,
    batch_guard: Mutex<()>,
}

impl IssuanceScheduler {
    /// Create a scheduler with the default configuration
    pub fn new(
        adapter: Arc<dyn ProtocolAdapter>,
        accounts: AccountStore,
        domains: DomainStore,
        certificates: Arc<CertificateStorage>,
        metrics: Metrics,
    ) -> Self {
        Self {
            adapter,
            accounts,
            domains,
            certificates,
            metrics,
            config: SchedulerConfig::default(),
            batch_guard: Mutex::new(()),
        }
    }

    /// Replace the scheduler configuration
    ///
    /// The interval is clamped to a minimum of one minute and the batch size
    /// to at least one record.
    pub fn with_config(mut self, mut config: SchedulerConfig) -> Self {
        config.interval_secs = config.interval_secs.max(MIN_INTERVAL_SECS);
        config.batch_size = config.batch_size.max(1);
        self.config = config;
        self
    }

    /// Run the scheduler loop
    ///
    /// This runs indefinitely. The first tick happens at the next occurrence
    /// of `start_at_hour` (local time) if configured, otherwise after the
    /// initial delay.
    pub async fn run(self: Arc<Self>) {
        let first_delay = match self.config.start_at_hour {
            Some(hour) => delay_until_hour(chrono::Local::now().naive_local(), hour),
            None => self.config.initial_delay(),
        };

        info!(
            interval_secs = self.config.interval_secs,
            batch_size = self.config.batch_size,
            first_tick_in_secs = first_delay.as_secs(),
            "Starting issuance scheduler"
        );

        tokio::time::sleep(first_delay).await;

        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            debug!("Running scheduled issuance batch");
            self.tick().await;
        }
    }

    /// Run one batch behind a panic boundary
    ///
    /// A panic anywhere in the batch is logged and reported as `None`; the
    /// scheduler keeps running.
    pub async fn tick(&self) -> Option<BatchReport> {
        match AssertUnwindSafe(self.process_batch()).catch_unwind().await {
            Ok(report) => Some(report),
            Err(panic) => {
                error!(panic = %panic_message(panic.as_ref()), "Issuance batch panicked");
                self.metrics.batch_panicked();
                None
            }
        }
    }

    /// Force an immediate batch and wait for it
    pub async fn trigger(&self) -> Option<BatchReport> {
        info!("Issuance batch triggered");
        self.tick().await
    }

    /// Process up to `batch_size` records that are not yet `available`
    ///
    /// Records are handled one after another in store key order. A failure
    /// on one record never stops the rest of the batch.
    pub async fn process_batch(&self) -> BatchReport {
        let _guard = self.batch_guard.lock().await;
        let mut report = BatchReport::default();

        let due = match self.domains.scan_due(self.config.batch_size) {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to scan domain records");
                report.errors += 1;
                return report;
            }
        };
        report.selected = due.len();

        for (record, key) in &due {
            match self.advance(record).await {
                Ok(outcome) => report.count(outcome),
                Err(e) => {
                    error!(
                        domain = %record.domain,
                        key = %key,
                        error = %e,
                        "Skipping domain record"
                    );
                    report.errors += 1;
                }
            }
        }

        self.metrics.batch_completed(&report);
        if report.selected > 0 {
            info!(
                selected = report.selected,
                acquired = report.acquired,
                issued = report.issued,
                rolled_back = report.rolled_back,
                acquire_failed = report.acquire_failed,
                errors = report.errors,
                "Issuance batch completed"
            );
        }
        report
    }

    async fn advance(&self, record: &DomainRecord) -> Result<Outcome, ManagerError> {
        match lifecycle::next_step(record) {
            Step::AcquireChallenge => self.acquire(record).await,
            Step::FinalizeChallenge => self.finalize(record).await,
            Step::Idle => Ok(Outcome::Idle),
        }
    }

    async fn acquire(&self, record: &DomainRecord) -> Result<Outcome, ManagerError> {
        let attempt = async {
            let account = self.session_for(&record.account_mail).await?;
            Ok::<_, ManagerError>(
                self.adapter
                    .acquire_challenge(&account, &record.domain)
                    .await?,
            )
        }
        .await;

        match attempt {
            Ok(acquired) => {
                let next = lifecycle::challenge_acquired(record, acquired)?;
                Ok(self.commit(record, &next, Outcome::Acquired)?)
            }
            Err(e) => {
                warn!(
                    domain = %record.domain,
                    error = %e,
                    "Challenge acquisition failed, will retry"
                );
                self.metrics.acquire_failed();
                let next = lifecycle::acquire_failed(record, &e.to_string())?;
                Ok(self.commit(record, &next, Outcome::AcquireFailed)?)
            }
        }
    }

    async fn finalize(&self, record: &DomainRecord) -> Result<Outcome, ManagerError> {
        let attempt = async {
            let (order, challenge) = lifecycle::challenge_state(record)?;
            let account = self.session_for(&record.account_mail).await?;
            let issued = self
                .adapter
                .finalize_challenge(&account, order, challenge, &record.domain)
                .await?;

            let now = Utc::now();
            let artifact = self.certificates.save(&record.domain, &issued, now)?;
            Ok::<(CertificateArtifact, _), ManagerError>((artifact, now))
        }
        .await;

        let (artifact, now) = match attempt {
            Ok(saved) => saved,
            Err(e) => {
                warn!(
                    domain = %record.domain,
                    error = %e,
                    "Finalization failed, rolling back to pending"
                );
                return self.roll_back(record, &e);
            }
        };

        // Files of an issuance that was never recorded are removed
        let next = match lifecycle::issued(record, artifact.clone(), now) {
            Ok(next) => next,
            Err(e) => {
                self.certificates.discard(&artifact);
                return Err(e.into());
            }
        };
        match self.commit(record, &next, Outcome::Issued) {
            Ok(Outcome::Issued) => {
                info!(domain = %record.domain, "Certificate issued");
                Ok(Outcome::Issued)
            }
            Ok(outcome) => {
                self.certificates.discard(&artifact);
                Ok(outcome)
            }
            Err(e) => {
                error!(
                    domain = %record.domain,
                    error = %e,
                    "Failed to record issued certificate, discarding it"
                );
                self.certificates.discard(&artifact);
                self.roll_back(record, &e)
            }
        }
    }

    /// Return a `challenging` record to `pending` after a failed finalization
    fn roll_back(
        &self,
        record: &DomainRecord,
        cause: &ManagerError,
    ) -> Result<Outcome, ManagerError> {
        self.metrics.finalize_failed();
        let next = lifecycle::rolled_back(record, &cause.to_string())?;
        self.commit(record, &next, Outcome::RolledBack)
    }

    /// Write `next` unless the record was deleted meanwhile
    fn commit(
        &self,
        current: &DomainRecord,
        next: &DomainRecord,
        outcome: Outcome,
    ) -> Result<Outcome, ManagerError> {
        if !self.domains.update_existing(next)? {
            info!(domain = %next.domain, "Domain record deleted during batch, result dropped");
            return Ok(Outcome::Dropped);
        }

        if current.status != next.status {
            self.metrics.transition(current.status, next.status);
            debug!(
                domain = %next.domain,
                from = %current.status,
                to = %next.status,
                "Committed transition"
            );
        }
        Ok(outcome)
    }

    /// Load the owning account and open its protocol session
    ///
    /// A changed account URL is written back to the account store.
    async fn session_for(&self, mail: &str) -> Result<Account, ManagerError> {
        let stored = self.accounts.get(mail)?;
        let loaded = self.adapter.load_account(&stored).await?;

        if loaded.account_url != stored.account_url {
            if let Err(e) = self.accounts.put(&loaded) {
                warn!(mail = %mail, error = %e, "Failed to persist refreshed account URL");
            }
        }
        Ok(loaded)
    }
}

impl std::fmt::Debug for IssuanceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuanceScheduler")
            .field("config", &self.config)
            .field("certificates", &self.certificates.base_path())
            .finish_non_exhaustive()
    }
}

/// Time from `now` until the next `hour:00:00`
///
/// An hour outside 0-23 yields no delay.
pub fn delay_until_hour(now: NaiveDateTime, hour: u32) -> Duration {
    let Some(today) = now.date().and_hms_opt(hour, 0, 0) else {
        return Duration::ZERO;
    };
    let target = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
