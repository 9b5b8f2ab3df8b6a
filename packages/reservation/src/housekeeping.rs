//! Maintenance run ahead of every reservation: promote due jobs and reclaim
//! stale locks.
//!
//! All sweeps are bulk conditional updates whose end state is ready, so
//! several workers sweeping at once only cost redundant writes.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use job_core::transitions::ready_update;
use job_core::{Field, Filter, JobStore, ReserveConfig, StoreError};
use rand::Rng;
use tracing::{debug, warn};

/// What one housekeeping pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    /// Locks held under this worker's own name, cleared on the first pass
    /// made under that name.
    pub cleared: u64,
    /// Waiting jobs promoted to ready, `None` when the sweep was skipped.
    pub promoted: Option<u64>,
    /// Stale locks released, `None` when the sweep was skipped.
    pub reclaimed: Option<u64>,
    /// Records found both ready and locked, released to ready.
    pub repaired: u64,
}

/// Pacing state for one engine instance.
#[derive(Debug, Default)]
pub(crate) struct Housekeeping {
    /// Identity whose own locks were cleared on its first pass.
    booted: Option<String>,
    last_reclaim: Option<DateTime<Utc>>,
}

impl Housekeeping {
    pub(crate) async fn run<S: JobStore>(
        &mut self,
        store: &S,
        config: &ReserveConfig,
        worker: &str,
        max_run_time: Duration,
        now: DateTime<Utc>,
    ) -> Result<HousekeepingReport, StoreError> {
        let mut report = HousekeepingReport::default();

        if self.booted.as_deref() != Some(worker) {
            match clear_locks(store, worker).await {
                Ok(cleared) => {
                    report.cleared = cleared;
                    self.booted = Some(worker.to_string());
                }
                // Retried on the next pass.
                Err(StoreError::Conflict(reason)) => debug!(%reason, "Boot clear lost a write race"),
                Err(e) => return Err(e),
            }
        }

        if promotion_due(config) {
            report.promoted = Some(concede(promote_due(store, now).await)?);
        }

        if self.reclaim_due(config, max_run_time, now) {
            report.reclaimed = Some(concede(reclaim_stale(store, max_run_time, now).await)?);
            report.repaired = concede(repair_conflicting(store).await)?;
            self.last_reclaim = Some(now);
        }

        Ok(report)
    }

    fn reclaim_due(&self, config: &ReserveConfig, max_run_time: Duration, now: DateTime<Utc>) -> bool {
        if config.test_mode {
            return true;
        }
        match self.last_reclaim {
            None => true,
            Some(last) => now - last >= lease(max_run_time),
        }
    }
}

/// A sweep that collides with another worker's concurrent sweep changed
/// nothing; the other worker's write leaves the same end state.
fn concede(result: Result<u64, StoreError>) -> Result<u64, StoreError> {
    match result {
        Err(StoreError::Conflict(reason)) => {
            debug!(%reason, "Sweep lost a write race");
            Ok(0)
        }
        other => other,
    }
}

fn promotion_due(config: &ReserveConfig) -> bool {
    config.test_mode
        || config.promotion_one_in <= 1
        || rand::thread_rng().gen_ratio(1, config.promotion_one_in)
}

fn lease(max_run_time: Duration) -> TimeDelta {
    TimeDelta::from_std(max_run_time).unwrap_or(TimeDelta::MAX)
}

/// Release every job locked by `worker`.
pub async fn clear_locks<S: JobStore>(store: &S, worker: &str) -> Result<u64, StoreError> {
    let filter = Filter::new().eq(Field::LockedBy, worker);
    let cleared = store.update_many(&filter, &ready_update()).await?;
    if cleared > 0 {
        debug!(worker, cleared, "Cleared worker locks");
    }
    Ok(cleared)
}

/// Promote waiting jobs whose `run_at` has passed.
pub async fn promote_due<S: JobStore>(store: &S, now: DateTime<Utc>) -> Result<u64, StoreError> {
    let filter = Filter::new().absent(Field::IsReady).lt(Field::RunAt, now);
    let promoted = store.update_many(&filter, &ready_update()).await?;
    if promoted > 0 {
        debug!(promoted, "Promoted due jobs");
    }
    Ok(promoted)
}

/// Release locks taken more than `max_run_time` before `now`, whoever holds them.
pub async fn reclaim_stale<S: JobStore>(
    store: &S,
    max_run_time: Duration,
    now: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let Some(cutoff) = now.checked_sub_signed(lease(max_run_time)) else {
        return Ok(0);
    };
    let filter = Filter::new()
        .present(Field::LockedBy)
        .lt(Field::LockedAt, cutoff);
    let reclaimed = store.update_many(&filter, &ready_update()).await?;
    if reclaimed > 0 {
        debug!(reclaimed, %cutoff, "Reclaimed stale locks");
    }
    Ok(reclaimed)
}

/// Release records that are marked ready while still locked.
///
/// No transition produces this; it only shows up after out-of-band edits.
async fn repair_conflicting<S: JobStore>(store: &S) -> Result<u64, StoreError> {
    let filter = Filter::new()
        .eq(Field::IsReady, true)
        .present(Field::LockedBy);
    let repaired = store.update_many(&filter, &ready_update()).await?;
    if repaired > 0 {
        warn!(repaired, "Released jobs that were both ready and locked");
    }
    Ok(repaired)
}
