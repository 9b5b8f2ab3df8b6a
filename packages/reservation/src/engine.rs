//! The reservation engine: claim one job for one worker, atomically.

use std::time::Duration;

use chrono::Utc;
use job_core::transitions::{self, claim_update, failure_update, not_failed, still_held};
use job_core::{ConfigError, JobRecord, JobStore, ReserveConfig, SortOrder, StoreError};
use tracing::{debug, instrument, warn};

use crate::error::ReserveError;
use crate::housekeeping::{self, Housekeeping, HousekeepingReport};

/// Claims jobs from a shared [`JobStore`] on behalf of one worker.
///
/// Each worker owns its own `Reserver`; housekeeping pacing is tracked per
/// instance, so no state is shared between workers except the store.
#[derive(Debug)]
pub struct Reserver<S> {
    store: S,
    config: ReserveConfig,
    housekeeping: Housekeeping,
    last_report: Option<HousekeepingReport>,
}

impl<S: JobStore> Reserver<S> {
    /// Create an engine over `store`. Fails if `config` is invalid.
    pub fn new(store: S, config: ReserveConfig) -> Result<Self, ReserveError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            housekeeping: Housekeeping::default(),
            last_report: None,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ReserveConfig {
        &self.config
    }

    /// Result of the housekeeping pass run by the latest `reserve` call.
    pub fn last_housekeeping(&self) -> Option<&HousekeepingReport> {
        self.last_report.as_ref()
    }

    /// Claim the next ready job for `worker`.
    ///
    /// Housekeeping runs first. The claim itself is a single
    /// `find_and_modify` against the store, so two workers can never both
    /// succeed for the same record. Returns `Ok(None)` when nothing is
    /// claimable, including when another worker won the race.
    #[instrument(name = "reservation.reserve", skip(self))]
    pub async fn reserve(
        &mut self,
        worker: &str,
        max_run_time: Duration,
    ) -> Result<Option<JobRecord>, ReserveError> {
        if max_run_time.is_zero() {
            return Err(ConfigError::ZeroMaxRunTime.into());
        }

        let report = self
            .housekeeping
            .run(&self.store, &self.config, worker, max_run_time, Utc::now())
            .await?;
        debug!(?report, "Housekeeping done");
        self.last_report = Some(report);

        let filter = self.config.claimable();
        let update = claim_update(worker, Utc::now());

        match self
            .store
            .find_and_modify(&filter, &update, &SortOrder::claim_order())
            .await
        {
            Ok(Some(job)) => {
                debug!(job.id = %job.id, job.priority = job.priority, "Claimed job");
                Ok(Some(job))
            }
            Ok(None) => Ok(None),
            Err(StoreError::Conflict(reason)) => {
                debug!(%reason, "Lost claim race");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Claim the next job using the configured `max_run_time`.
    pub async fn reserve_next(&mut self, worker: &str) -> Result<Option<JobRecord>, ReserveError> {
        let max_run_time = self.config.max_run_time();
        self.reserve(worker, max_run_time).await
    }

    /// Release every job locked by `worker`.
    ///
    /// Workers call this on graceful shutdown so their claims do not wait
    /// out `max_run_time`.
    #[instrument(name = "reservation.clear_locks", skip(self))]
    pub async fn clear_locks(&self, worker: &str) -> Result<u64, ReserveError> {
        Ok(housekeeping::clear_locks(&self.store, worker).await?)
    }

    /// Run the promotion sweep now, regardless of pacing.
    pub async fn promote_due_jobs(&self) -> Result<u64, ReserveError> {
        Ok(housekeeping::promote_due(&self.store, Utc::now()).await?)
    }

    /// Run the stale-lock sweep now, regardless of pacing.
    pub async fn reclaim_stale_locks(&self, max_run_time: Duration) -> Result<u64, ReserveError> {
        if max_run_time.is_zero() {
            return Err(ConfigError::ZeroMaxRunTime.into());
        }
        Ok(housekeeping::reclaim_stale(&self.store, max_run_time, Utc::now()).await?)
    }

    /// Mark `job` as failed with `error`.
    ///
    /// Only the first report takes effect; later calls return `Ok(false)`
    /// and leave `failed_at` and `last_error` as they were. A report made
    /// under a lock that has since been reclaimed is ignored the same way.
    /// `job` is refreshed from the store.
    #[instrument(name = "reservation.record_failure", skip(self, job), fields(job.id = %job.id))]
    pub async fn record_failure(&self, job: &mut JobRecord, error: &str) -> Result<bool, ReserveError> {
        if job.failed_at.is_some() {
            return Ok(false);
        }

        let now = Utc::now();
        let stored = self
            .store
            .find_and_modify(&not_failed(job), &failure_update(error, now), &SortOrder::unordered())
            .await?;

        match stored {
            Some(stored) => {
                warn!(error, "Job failed");
                *job = stored;
                Ok(true)
            }
            None => {
                match self.store.get(job.id).await? {
                    Some(current) => *job = current,
                    None => debug!("Failed job no longer stored"),
                }
                Ok(false)
            }
        }
    }

    /// Remove a job that finished successfully.
    ///
    /// Returns `false` when the job is gone, or when its lock was reclaimed
    /// and another worker now holds it.
    pub async fn complete(&self, job: &JobRecord) -> Result<bool, ReserveError> {
        let removed = self.store.delete_many(&still_held(job)).await? > 0;
        if removed {
            debug!(job.id = %job.id, "Completed job");
        } else {
            warn!(job.id = %job.id, locked_by = ?job.locked_by, "Completed job was no longer held");
        }
        Ok(removed)
    }

    /// Store a new job, ready now or waiting for its `run_at`.
    pub async fn enqueue(&self, mut job: JobRecord) -> Result<JobRecord, ReserveError> {
        transitions::prepare_for_insert(&mut job, Utc::now());
        let stored = self.store.insert(&job).await?;
        debug!(job.id = %stored.id, state = ?stored.state(), "Enqueued job");
        Ok(stored)
    }
}
