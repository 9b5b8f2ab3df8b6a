//! Interface the reservation core needs from a durable job store.

use std::future::Future;

use thiserror::Error;

use crate::query::{Filter, SortOrder, Update};
use crate::{JobId, JobRecord};

/// Errors reported by a [`JobStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or failed to execute the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    /// A concurrent writer touched the same record; nothing was applied.
    #[error("Write conflict: {0}")]
    Conflict(String),
    #[error("Job already exists: {0}")]
    Duplicate(JobId),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Conflict(_))
    }
}

/// Durable collection of job records.
///
/// Implementations must make [`JobStore::find_and_modify`] a single
/// indivisible step: the selected record is re-checked against the filter and
/// mutated without any other writer observing or changing it in between.
/// [`JobStore::update_many`] only needs to be atomic per record.
pub trait JobStore: Send + Sync {
    /// Store a new record.
    fn insert(&self, job: &JobRecord) -> impl Future<Output = Result<JobRecord, StoreError>> + Send;

    /// Fetch a record by id.
    fn get(&self, id: JobId) -> impl Future<Output = Result<Option<JobRecord>, StoreError>> + Send;

    /// Remove a record. Returns whether it existed.
    fn delete(&self, id: JobId) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Atomically pick the first record matching `filter` under `sort`, apply
    /// `update` to it and return the updated record.
    fn find_and_modify(
        &self,
        filter: &Filter,
        update: &Update,
        sort: &SortOrder,
    ) -> impl Future<Output = Result<Option<JobRecord>, StoreError>> + Send;

    /// Remove every record matching `filter`. Returns the count.
    fn delete_many(&self, filter: &Filter) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Apply `update` to every record matching `filter`. Returns the count.
    fn update_many(
        &self,
        filter: &Filter,
        update: &Update,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;
}
