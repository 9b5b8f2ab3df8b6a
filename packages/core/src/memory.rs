//! In-process job store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::query::{Filter, SortOrder, Update};
use crate::store::{JobStore, StoreError};
use crate::{JobId, JobRecord};

/// A [`JobStore`] kept in memory behind a mutex.
///
/// Clones share the same records, so several workers in one process can poll
/// it concurrently. Every operation runs under a single lock acquisition,
/// which makes `find_and_modify` atomic.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    jobs: Arc<Mutex<HashMap<JobId, JobRecord>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<JobId, JobRecord>>, StoreError> {
        self.jobs
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    /// Snapshot of all records in claim order.
    pub fn all(&self) -> Result<Vec<JobRecord>, StoreError> {
        let jobs = self.lock()?;
        let order = SortOrder::claim_order();
        let mut all: Vec<JobRecord> = jobs.values().cloned().collect();
        all.sort_by(|a, b| order.compare(a, b));
        Ok(all)
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock()?.is_empty())
    }
}

impl JobStore for MemoryStore {
    async fn insert(&self, job: &JobRecord) -> Result<JobRecord, StoreError> {
        let mut jobs = self.lock()?;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        Ok(self.lock()?.remove(&id).is_some())
    }

    async fn find_and_modify(
        &self,
        filter: &Filter,
        update: &Update,
        sort: &SortOrder,
    ) -> Result<Option<JobRecord>, StoreError> {
        let mut jobs = self.lock()?;
        let selected = jobs
            .values()
            .filter(|job| filter.matches(job))
            .min_by(|a, b| sort.compare(a, b).then_with(|| a.id.cmp(&b.id)))
            .map(|job| job.id);

        let Some(id) = selected else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        update.apply(job);
        tracing::trace!(job.id = %id, "memory store modified job");
        Ok(Some(job.clone()))
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError> {
        let mut jobs = self.lock()?;
        let before = jobs.len();
        jobs.retain(|_, job| !filter.matches(job));
        Ok((before - jobs.len()) as u64)
    }

    async fn update_many(&self, filter: &Filter, update: &Update) -> Result<u64, StoreError> {
        let mut jobs = self.lock()?;
        let mut count = 0;
        for job in jobs.values_mut().filter(|job| filter.matches(job)) {
            update.apply(job);
            count += 1;
        }
        Ok(count)
    }
}
