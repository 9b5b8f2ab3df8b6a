//! State transition rules.
//!
//! Every rule exists twice: as an [`Update`] that a store applies to the
//! persisted record, and as a function mutating an in-memory [`JobRecord`].
//! The record functions are implemented by applying the update, so both
//! paths always produce the same fields.

use chrono::{DateTime, Utc};

use crate::query::{Field, Filter, Update};
use crate::JobRecord;

/// Update releasing a job back to the ready state.
pub fn ready_update() -> Update {
    Update::new()
        .set(Field::IsReady, true)
        .clear(Field::LockedAt)
        .clear(Field::LockedBy)
        .clear(Field::RunAt)
}

/// Update claiming a job for `worker` at `now`.
pub fn claim_update(worker: &str, now: DateTime<Utc>) -> Update {
    Update::new()
        .set(Field::LockedAt, now)
        .set(Field::LockedBy, worker)
        .clear(Field::RunAt)
        .clear(Field::IsReady)
}

/// Update marking a job as failed at `now` with `error`.
pub fn failure_update(error: &str, now: DateTime<Utc>) -> Update {
    Update::new()
        .set(Field::FailedAt, now)
        .set(Field::LastError, error)
        .clear(Field::RunAt)
        .clear(Field::IsReady)
        .clear(Field::LockedAt)
        .clear(Field::LockedBy)
}

/// Filter selecting `job` only while the lock recorded on it still holds.
///
/// A copy taken while running carries `locked_by`; once that lock has been
/// reclaimed and the job claimed again, the filter no longer matches.
pub fn still_held(job: &JobRecord) -> Filter {
    let filter = Filter::new().eq(Field::Id, job.id);
    match &job.locked_by {
        Some(owner) => filter.eq(Field::LockedBy, owner.as_str()),
        None => filter,
    }
}

/// Filter selecting `job` while it has not failed and is still held.
///
/// Guards [`failure_update`] so that a second failure report, or one from a
/// worker whose lock was reclaimed, is a no-op.
pub fn not_failed(job: &JobRecord) -> Filter {
    still_held(job).absent(Field::FailedAt)
}

/// Promote a waiting job whose `run_at` has passed.
///
/// Returns whether the record changed. Future jobs stay waiting and records
/// with neither `run_at` nor `is_ready` are left inert.
pub fn promote_if_due(job: &mut JobRecord, now: DateTime<Utc>) -> bool {
    match job.run_at {
        Some(run_at) if run_at <= now => {
            job.is_ready = Some(true);
            job.run_at = None;
            true
        }
        _ => false,
    }
}

/// Clear scheduling and lock fields once `failed_at` first becomes set.
///
/// `failed_at_was` is the value before the current change. Returns whether
/// the rule fired.
pub fn on_failure_recorded(job: &mut JobRecord, failed_at_was: Option<DateTime<Utc>>) -> bool {
    if failed_at_was.is_some() || job.failed_at.is_none() {
        return false;
    }
    job.run_at = None;
    job.is_ready = None;
    job.locked_at = None;
    job.locked_by = None;
    true
}

/// Release a job to the ready state, dropping any lock.
pub fn release_to_ready(job: &mut JobRecord) {
    ready_update().apply(job);
}

/// Claim a job for `worker`.
pub fn claim(job: &mut JobRecord, worker: &str, now: DateTime<Utc>) {
    claim_update(worker, now).apply(job);
}

/// Record a terminal failure. Idempotent: returns `false` and leaves the
/// record untouched when it had already failed.
pub fn record_failure(job: &mut JobRecord, error: &str, now: DateTime<Utc>) -> bool {
    let failed_at_was = job.failed_at;
    if failed_at_was.is_some() {
        return false;
    }
    job.failed_at = Some(now);
    job.last_error = Some(error.to_string());
    on_failure_recorded(job, failed_at_was)
}

/// Normalize a freshly built record before it is first stored.
///
/// A record with neither `run_at` nor `is_ready` runs now; a record whose
/// `run_at` is already due is promoted straight to ready.
pub fn prepare_for_insert(job: &mut JobRecord, now: DateTime<Utc>) {
    let unscheduled = job.run_at.is_none() && job.is_ready.is_none();
    let pristine = job.failed_at.is_none() && !job.is_locked();
    if unscheduled && pristine {
        job.is_ready = Some(true);
        return;
    }
    promote_if_due(job, now);
}
