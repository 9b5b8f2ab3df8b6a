use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use futures_util::future::join_all;
use job_core::{
    Condition, ConfigError, Field, Filter, JobId, JobRecord, JobState, JobStore, MemoryStore,
    ReserveConfig, SortOrder, StoreError, Update,
};
use reservation::{ReserveError, Reserver};

type TestResult = Result<(), Box<dyn Error>>;

const MINUTE: Duration = Duration::from_secs(60);

fn test_config() -> ReserveConfig {
    ReserveConfig::new().with_test_mode(true)
}

fn waiting(run_at_offset: TimeDelta) -> JobRecord {
    JobRecord::new("waiting").with_run_at(Utc::now() + run_at_offset)
}

fn running(worker: &str, locked_for: TimeDelta) -> JobRecord {
    let mut job = JobRecord::new("running");
    job.locked_at = Some(Utc::now() - locked_for);
    job.locked_by = Some(worker.to_string());
    job
}

async fn state_of(store: &MemoryStore, id: JobId) -> Result<JobState, Box<dyn Error>> {
    let job = store.get(id).await?.ok_or("job missing")?;
    Ok(job.state()?)
}

fn assert_all_classified(store: &MemoryStore) -> TestResult {
    for job in store.all()? {
        job.state()?;
    }
    Ok(())
}

#[tokio::test]
async fn promote_claim_and_fail() -> TestResult {
    let store = MemoryStore::new();
    let mut reserver = Reserver::new(store.clone(), test_config())?;

    let job = store.insert(&waiting(TimeDelta::seconds(-1))).await?;
    assert_eq!(state_of(&store, job.id).await?, JobState::Waiting);

    assert_eq!(reserver.promote_due_jobs().await?, 1);
    assert_eq!(state_of(&store, job.id).await?, JobState::Ready);

    let mut claimed = reserver.reserve("w1", MINUTE).await?.ok_or("nothing claimed")?;
    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.state()?, JobState::Running);
    assert_eq!(claimed.locked_by.as_deref(), Some("w1"));

    assert!(reserver.record_failure(&mut claimed, "boom").await?);
    assert_eq!(claimed.state()?, JobState::Failed);
    assert_eq!(claimed.last_error.as_deref(), Some("boom"));
    assert!(claimed.run_at.is_none() && claimed.is_ready.is_none());
    assert!(claimed.locked_at.is_none() && claimed.locked_by.is_none());

    let stored = store.get(job.id).await?.ok_or("job missing")?;
    assert_eq!(stored, claimed);
    assert_all_classified(&store)
}

#[tokio::test]
async fn failure_is_recorded_once() -> TestResult {
    let store = MemoryStore::new();
    let mut reserver = Reserver::new(store.clone(), test_config())?;
    reserver.enqueue(JobRecord::new("job")).await?;

    let mut claimed = reserver.reserve("w1", MINUTE).await?.ok_or("nothing claimed")?;
    assert!(reserver.record_failure(&mut claimed, "first").await?);
    let failed_at = claimed.failed_at;

    assert!(!reserver.record_failure(&mut claimed, "second").await?);

    // A stale copy of the record must not overwrite the stored failure either.
    let mut stale = claimed.clone();
    stale.failed_at = None;
    assert!(!reserver.record_failure(&mut stale, "third").await?);

    let stored = store.get(claimed.id).await?.ok_or("job missing")?;
    assert_eq!(stored.failed_at, failed_at);
    assert_eq!(stored.last_error.as_deref(), Some("first"));
    assert_eq!(stale, stored);
    Ok(())
}

#[tokio::test]
async fn stale_lock_is_reclaimed_by_next_worker() -> TestResult {
    let store = MemoryStore::new();
    let mut first = Reserver::new(store.clone(), ReserveConfig::default())?;
    let mut second = Reserver::new(store.clone(), ReserveConfig::default())?;
    let job = first.enqueue(JobRecord::new("job")).await?;

    let claimed = first
        .reserve("w1", Duration::from_secs(1))
        .await?
        .ok_or("nothing claimed")?;
    assert_eq!(claimed.locked_by.as_deref(), Some("w1"));

    tokio::time::sleep(Duration::from_millis(2100)).await;

    let reclaimed = second
        .reserve("w2", Duration::from_secs(1))
        .await?
        .ok_or("nothing reclaimed")?;
    assert_eq!(reclaimed.id, job.id);
    assert_eq!(reclaimed.locked_by.as_deref(), Some("w2"));
    assert_eq!(second.last_housekeeping().and_then(|r| r.reclaimed), Some(1));
    Ok(())
}

#[tokio::test]
async fn reclaim_ignores_which_worker_holds_the_lock() -> TestResult {
    let store = MemoryStore::new();
    let reserver = Reserver::new(store.clone(), test_config())?;
    let old_a = store.insert(&running("a", TimeDelta::minutes(10))).await?;
    let old_b = store.insert(&running("b", TimeDelta::minutes(10))).await?;
    let fresh = store.insert(&running("c", TimeDelta::seconds(1))).await?;

    assert_eq!(reserver.reclaim_stale_locks(MINUTE).await?, 2);
    assert_eq!(state_of(&store, old_a.id).await?, JobState::Ready);
    assert_eq!(state_of(&store, old_b.id).await?, JobState::Ready);
    assert_eq!(state_of(&store, fresh.id).await?, JobState::Running);
    Ok(())
}

#[tokio::test]
async fn concurrent_workers_never_double_claim() -> TestResult {
    let store = MemoryStore::new();
    let seed = Reserver::new(store.clone(), test_config())?;
    let job = seed.enqueue(JobRecord::new("contended")).await?;

    let attempts = (0..16).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            let worker = format!("w{i}");
            let mut reserver = Reserver::new(store, test_config())?;
            reserver.reserve(&worker, MINUTE).await
        })
    });

    let mut winners = Vec::new();
    for result in join_all(attempts).await {
        if let Some(claimed) = result?? {
            winners.push(claimed);
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id, job.id);
    let stored = store.get(job.id).await?.ok_or("job missing")?;
    assert_eq!(stored.locked_by, winners[0].locked_by);
    Ok(())
}

#[tokio::test]
async fn due_jobs_are_only_promoted_by_the_sweep() -> TestResult {
    let store = MemoryStore::new();
    let never_sweeps = ReserveConfig::new().with_promotion_one_in(u32::MAX);
    let mut reserver = Reserver::new(store.clone(), never_sweeps)?;
    let job = store.insert(&waiting(TimeDelta::seconds(-5))).await?;

    // The claim filter only looks at is_ready, never at run_at.
    for _ in 0..5 {
        assert!(reserver.reserve("w1", MINUTE).await?.is_none());
    }
    assert_eq!(state_of(&store, job.id).await?, JobState::Waiting);

    let mut sweeping = Reserver::new(store.clone(), test_config())?;
    let claimed = sweeping.reserve("w1", MINUTE).await?.ok_or("nothing claimed")?;
    assert_eq!(claimed.id, job.id);
    assert_eq!(sweeping.last_housekeeping().and_then(|r| r.promoted), Some(1));
    Ok(())
}

#[tokio::test]
async fn future_and_inert_jobs_stay_put() -> TestResult {
    let store = MemoryStore::new();
    let mut reserver = Reserver::new(store.clone(), test_config())?;
    let future = store.insert(&waiting(TimeDelta::hours(1))).await?;
    let inert = store.insert(&JobRecord::new("inert")).await?;

    assert!(reserver.reserve("w1", MINUTE).await?.is_none());
    assert_eq!(state_of(&store, future.id).await?, JobState::Waiting);

    let stored = store.get(inert.id).await?.ok_or("job missing")?;
    assert!(stored.state().is_err());
    assert_eq!(stored.is_ready, None);
    Ok(())
}

#[tokio::test]
async fn clear_locks_only_touches_own_jobs() -> TestResult {
    let store = MemoryStore::new();
    let reserver = Reserver::new(store.clone(), test_config())?;
    let mine_a = store.insert(&running("w1", TimeDelta::seconds(1))).await?;
    let mine_b = store.insert(&running("w1", TimeDelta::seconds(2))).await?;
    let theirs = store.insert(&running("w2", TimeDelta::seconds(1))).await?;

    assert_eq!(reserver.clear_locks("w1").await?, 2);
    assert_eq!(state_of(&store, mine_a.id).await?, JobState::Ready);
    assert_eq!(state_of(&store, mine_b.id).await?, JobState::Ready);

    let other = store.get(theirs.id).await?.ok_or("job missing")?;
    assert_eq!(other.state()?, JobState::Running);
    assert_eq!(other.locked_by.as_deref(), Some("w2"));
    Ok(())
}

#[tokio::test]
async fn first_pass_releases_own_stranded_locks() -> TestResult {
    let store = MemoryStore::new();
    let stranded = store.insert(&running("w1", TimeDelta::seconds(1))).await?;

    let mut reserver = Reserver::new(store.clone(), ReserveConfig::default())?;
    let claimed = reserver.reserve("w1", MINUTE).await?.ok_or("nothing claimed")?;
    assert_eq!(claimed.id, stranded.id);
    assert_eq!(reserver.last_housekeeping().map(|r| r.cleared), Some(1));

    reserver.reserve("w1", MINUTE).await?;
    assert_eq!(reserver.last_housekeeping().map(|r| r.cleared), Some(0));
    Ok(())
}

#[tokio::test]
async fn lowest_priority_value_is_served_first() -> TestResult {
    let store = MemoryStore::new();
    let mut reserver = Reserver::new(store.clone(), test_config())?;
    let five = reserver.enqueue(JobRecord::new("five").with_priority(5)).await?;
    let one = reserver.enqueue(JobRecord::new("one").with_priority(1)).await?;

    let first = reserver.reserve("w1", MINUTE).await?.ok_or("nothing claimed")?;
    let second = reserver.reserve("w1", MINUTE).await?.ok_or("nothing claimed")?;
    assert_eq!(first.id, one.id);
    assert_eq!(second.id, five.id);
    assert!(reserver.reserve("w1", MINUTE).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn equal_priorities_are_served_in_enqueue_order() -> TestResult {
    let store = MemoryStore::new();
    let mut reserver = Reserver::new(store.clone(), test_config())?;
    let now = Utc::now();
    let mut ids = Vec::new();
    for offset in 0..3 {
        let mut job = JobRecord::new("fifo");
        job.created_at = now + TimeDelta::milliseconds(offset);
        ids.push(reserver.enqueue(job).await?.id);
    }

    for expected in ids {
        let claimed = reserver.reserve("w1", MINUTE).await?.ok_or("nothing claimed")?;
        assert_eq!(claimed.id, expected);
    }
    Ok(())
}

#[tokio::test]
async fn queue_filter_excludes_other_queues() -> TestResult {
    let store = MemoryStore::new();
    let mut mail_worker = Reserver::new(store.clone(), test_config().with_queues(["mail"]))?;
    let sms = mail_worker.enqueue(JobRecord::new("sms").with_queue("sms")).await?;
    let mail = mail_worker
        .enqueue(JobRecord::new("mail").with_queue("mail").with_priority(10))
        .await?;

    let claimed = mail_worker.reserve("w1", MINUTE).await?.ok_or("nothing claimed")?;
    assert_eq!(claimed.id, mail.id);
    assert!(mail_worker.reserve("w1", MINUTE).await?.is_none());
    assert_eq!(state_of(&store, sms.id).await?, JobState::Ready);
    Ok(())
}

#[tokio::test]
async fn priority_bounds_limit_claims() -> TestResult {
    let store = MemoryStore::new();
    let config = test_config().with_min_priority(2).with_max_priority(4);
    let mut reserver = Reserver::new(store.clone(), config)?;
    reserver.enqueue(JobRecord::new("too urgent").with_priority(1)).await?;
    reserver.enqueue(JobRecord::new("too lax").with_priority(5)).await?;
    let inside = reserver.enqueue(JobRecord::new("inside").with_priority(4)).await?;

    let claimed = reserver.reserve("w1", MINUTE).await?.ok_or("nothing claimed")?;
    assert_eq!(claimed.id, inside.id);
    assert!(reserver.reserve("w1", MINUTE).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn reclaim_sweep_is_rate_limited_outside_test_mode() -> TestResult {
    let store = MemoryStore::new();
    let mut paced = Reserver::new(store.clone(), ReserveConfig::default())?;
    paced.reserve("w1", MINUTE).await?;
    assert_eq!(paced.last_housekeeping().and_then(|r| r.reclaimed), Some(0));
    paced.reserve("w1", MINUTE).await?;
    assert_eq!(paced.last_housekeeping().and_then(|r| r.reclaimed), None);

    let mut unpaced = Reserver::new(store.clone(), test_config())?;
    unpaced.reserve("w1", MINUTE).await?;
    unpaced.reserve("w1", MINUTE).await?;
    assert_eq!(unpaced.last_housekeeping().and_then(|r| r.reclaimed), Some(0));
    assert_eq!(unpaced.last_housekeeping().and_then(|r| r.promoted), Some(0));
    Ok(())
}

#[tokio::test]
async fn ready_and_locked_records_are_repaired() -> TestResult {
    let store = MemoryStore::new();
    let mut broken = running("ghost", TimeDelta::seconds(1));
    broken.is_ready = Some(true);
    let broken = store.insert(&broken).await?;

    let mut reserver = Reserver::new(store.clone(), test_config())?;
    let claimed = reserver.reserve("w1", MINUTE).await?.ok_or("nothing claimed")?;
    assert_eq!(claimed.id, broken.id);
    assert_eq!(claimed.state()?, JobState::Running);
    assert_eq!(reserver.last_housekeeping().map(|r| r.repaired), Some(1));
    assert_all_classified(&store)
}

#[tokio::test]
async fn complete_removes_the_job() -> TestResult {
    let store = MemoryStore::new();
    let mut reserver = Reserver::new(store.clone(), test_config())?;
    reserver.enqueue(JobRecord::new("job")).await?;
    let claimed = reserver.reserve("w1", MINUTE).await?.ok_or("nothing claimed")?;

    assert!(reserver.complete(&claimed).await?);
    assert!(store.get(claimed.id).await?.is_none());
    assert!(!reserver.complete(&claimed).await?);
    Ok(())
}

#[tokio::test]
async fn reclaimed_job_ignores_its_previous_holder() -> TestResult {
    let store = MemoryStore::new();
    let stranded = store.insert(&running("w1", TimeDelta::minutes(10))).await?;
    let mut reserver = Reserver::new(store.clone(), test_config())?;

    let reclaimed = reserver.reserve("w2", MINUTE).await?.ok_or("nothing reclaimed")?;
    assert_eq!(reclaimed.id, stranded.id);

    // w1 still holds its copy from before the reclaim.
    let mut late = stranded.clone();
    assert!(!reserver.record_failure(&mut late, "late report").await?);
    assert_eq!(late.locked_by.as_deref(), Some("w2"));
    assert!(!reserver.complete(&stranded).await?);

    let stored = store.get(stranded.id).await?.ok_or("job missing")?;
    assert_eq!(stored.state()?, JobState::Running);
    assert_eq!(stored.locked_by.as_deref(), Some("w2"));
    assert!(stored.last_error.is_none());

    assert!(reserver.complete(&reclaimed).await?);
    assert!(store.get(stranded.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn zero_max_run_time_is_rejected() -> TestResult {
    let store = MemoryStore::new();
    let live = store.insert(&running("w1", TimeDelta::seconds(1))).await?;
    let mut reserver = Reserver::new(store.clone(), test_config())?;

    let err = reserver.reserve("w2", Duration::ZERO).await.err().ok_or("expected an error")?;
    assert!(matches!(err, ReserveError::Config(ConfigError::ZeroMaxRunTime)));
    assert!(!err.is_retryable());

    let err = reserver.reclaim_stale_locks(Duration::ZERO).await.err().ok_or("expected an error")?;
    assert!(matches!(err, ReserveError::Config(ConfigError::ZeroMaxRunTime)));

    assert_eq!(state_of(&store, live.id).await?, JobState::Running);
    Ok(())
}

#[tokio::test]
async fn boot_clear_runs_for_each_identity() -> TestResult {
    let store = MemoryStore::new();
    let mut reserver = Reserver::new(store.clone(), ReserveConfig::default())?;
    assert!(reserver.reserve("w1", MINUTE).await?.is_none());

    let stranded = store.insert(&running("w2", TimeDelta::seconds(1))).await?;
    let claimed = reserver.reserve("w2", MINUTE).await?.ok_or("nothing claimed")?;
    assert_eq!(claimed.id, stranded.id);
    assert_eq!(reserver.last_housekeeping().map(|r| r.cleared), Some(1));
    Ok(())
}

/// Memory store whose first stale-lock sweep fails.
struct FlakyReclaim {
    inner: MemoryStore,
    failed: AtomicBool,
}

impl FlakyReclaim {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            failed: AtomicBool::new(false),
        }
    }
}

impl JobStore for FlakyReclaim {
    async fn insert(&self, job: &JobRecord) -> Result<JobRecord, StoreError> {
        self.inner.insert(job).await
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }

    async fn find_and_modify(
        &self,
        filter: &Filter,
        update: &Update,
        sort: &SortOrder,
    ) -> Result<Option<JobRecord>, StoreError> {
        self.inner.find_and_modify(filter, update, sort).await
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.inner.delete_many(filter).await
    }

    async fn update_many(&self, filter: &Filter, update: &Update) -> Result<u64, StoreError> {
        let reclaim = filter
            .conditions()
            .iter()
            .any(|c| matches!(c, Condition::Lt(Field::LockedAt, _)));
        if reclaim && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("blip".into()));
        }
        self.inner.update_many(filter, update).await
    }
}

#[tokio::test]
async fn failed_reclaim_sweep_is_retried_on_the_next_call() -> TestResult {
    let store = MemoryStore::new();
    let mut reserver = Reserver::new(FlakyReclaim::new(store.clone()), ReserveConfig::default())?;

    let err = reserver.reserve("w1", MINUTE).await.err().ok_or("expected an error")?;
    assert!(matches!(err, ReserveError::Store(StoreError::Unavailable(_))));

    let stale = store.insert(&running("crashed", TimeDelta::minutes(10))).await?;
    let claimed = reserver.reserve("w1", MINUTE).await?.ok_or("nothing reclaimed")?;
    assert_eq!(claimed.id, stale.id);
    assert_eq!(reserver.last_housekeeping().and_then(|r| r.reclaimed), Some(1));
    Ok(())
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let config = ReserveConfig::new().with_min_priority(3).with_max_priority(1);
    let result = Reserver::new(MemoryStore::new(), config);
    assert!(matches!(result, Err(ReserveError::Config(_))));
}

/// Store whose every call fails with a fixed error.
struct BrokenStore {
    conflict: bool,
}

impl BrokenStore {
    fn error(&self) -> StoreError {
        if self.conflict {
            StoreError::Conflict("concurrent claim".into())
        } else {
            StoreError::Unavailable("connection refused".into())
        }
    }
}

impl JobStore for BrokenStore {
    async fn insert(&self, _job: &JobRecord) -> Result<JobRecord, StoreError> {
        Err(self.error())
    }

    async fn get(&self, _id: JobId) -> Result<Option<JobRecord>, StoreError> {
        Err(self.error())
    }

    async fn delete(&self, _id: JobId) -> Result<bool, StoreError> {
        Err(self.error())
    }

    async fn find_and_modify(
        &self,
        _filter: &Filter,
        _update: &Update,
        _sort: &SortOrder,
    ) -> Result<Option<JobRecord>, StoreError> {
        Err(self.error())
    }

    async fn delete_many(&self, _filter: &Filter) -> Result<u64, StoreError> {
        Err(self.error())
    }

    async fn update_many(&self, _filter: &Filter, _update: &Update) -> Result<u64, StoreError> {
        Err(self.error())
    }
}

#[tokio::test]
async fn store_outage_is_surfaced_as_retryable() -> TestResult {
    let mut reserver = Reserver::new(BrokenStore { conflict: false }, test_config())?;
    let err = reserver.reserve("w1", MINUTE).await.err().ok_or("expected an error")?;
    assert!(matches!(err, ReserveError::Store(StoreError::Unavailable(_))));
    assert!(err.is_retryable());
    Ok(())
}

#[tokio::test]
async fn lost_race_is_not_an_error() -> TestResult {
    let mut reserver = Reserver::new(BrokenStore { conflict: true }, test_config())?;
    assert!(reserver.reserve("w1", MINUTE).await?.is_none());

    // Sweeps that collide with another worker's sweep count as no-ops.
    let report = reserver.last_housekeeping().ok_or("no housekeeping report")?;
    assert_eq!(report.promoted, Some(0));
    assert_eq!(report.reclaimed, Some(0));
    Ok(())
}
