//! Job repository: the SurrealDB-backed job store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use job_core::{Filter, JobId, JobRecord, JobState, JobStore, SortOrder, StoreError, Update};
use serde::{Deserialize, Serialize};
use surrealdb::sql::{Datetime, Thing};

use super::surql::{self, Bindings};
use crate::schema::JOB_TABLE;
use crate::{Database, DbError};

/// Repository for job persistence operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct JobRow {
    id: Thing,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    attempts: i64,
    handler: String,
    #[serde(default)]
    run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    locked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    locked_by: Option<String>,
    #[serde(default)]
    failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_error: Option<String>,
    #[serde(default)]
    queue: Option<String>,
    #[serde(default)]
    is_ready: Option<bool>,
    created_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self) -> Result<JobRecord, DbError> {
        let raw = self.id.id.to_raw();
        let id = JobId::parse(&raw)
            .map_err(|e| DbError::Serialization(format!("Invalid job id {raw}: {e}")))?;
        let priority = i32::try_from(self.priority)
            .map_err(|_| DbError::Serialization(format!("Priority out of range: {}", self.priority)))?;
        let attempts = u32::try_from(self.attempts)
            .map_err(|_| DbError::Serialization(format!("Attempts out of range: {}", self.attempts)))?;

        Ok(JobRecord {
            id,
            priority,
            attempts,
            handler: self.handler,
            run_at: self.run_at,
            locked_at: self.locked_at,
            locked_by: self.locked_by,
            failed_at: self.failed_at,
            last_error: self.last_error,
            queue: self.queue,
            is_ready: self.is_ready,
            created_at: self.created_at,
        })
    }
}

/// Struct for creating jobs - datetimes go through the native datetime type.
#[derive(Debug, Serialize)]
struct JobCreate {
    priority: i64,
    attempts: i64,
    handler: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_at: Option<Datetime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    locked_at: Option<Datetime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    locked_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_at: Option<Datetime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_ready: Option<bool>,
    created_at: Datetime,
}

impl From<&JobRecord> for JobCreate {
    fn from(job: &JobRecord) -> Self {
        Self {
            priority: i64::from(job.priority),
            attempts: i64::from(job.attempts),
            handler: job.handler.clone(),
            run_at: job.run_at.map(Datetime::from),
            locked_at: job.locked_at.map(Datetime::from),
            locked_by: job.locked_by.clone(),
            failed_at: job.failed_at.map(Datetime::from),
            last_error: job.last_error.clone(),
            queue: job.queue.clone(),
            is_ready: job.is_ready,
            created_at: Datetime::from(job.created_at),
        }
    }
}

/// Only the record id, for counting updated rows.
#[derive(Debug, Deserialize)]
struct IdRow {
    #[allow(dead_code)]
    id: Thing,
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<JobRecord>, DbError> {
    rows.into_iter().map(JobRow::into_job).collect()
}

impl JobRepository {
    /// Create a repository over an open connection.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Underlying connection.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Create a new job in the database.
    pub async fn create(&self, job: &JobRecord) -> Result<JobRecord, DbError> {
        let record: Option<JobRow> = self
            .db
            .create((JOB_TABLE, job.id.to_string()))
            .content(JobCreate::from(job))
            .await?;

        record
            .ok_or_else(|| DbError::Query("Failed to create job".into()))?
            .into_job()
    }

    /// Get a job by ID.
    pub async fn find(&self, id: JobId) -> Result<Option<JobRecord>, DbError> {
        let record: Option<JobRow> = self.db.select((JOB_TABLE, id.to_string())).await?;
        record.map(JobRow::into_job).transpose()
    }

    /// Delete a job. Returns whether it existed.
    pub async fn remove(&self, id: JobId) -> Result<bool, DbError> {
        let record: Option<JobRow> = self.db.delete((JOB_TABLE, id.to_string())).await?;
        Ok(record.is_some())
    }

    /// List all jobs in claim order.
    pub async fn list(&self) -> Result<Vec<JobRecord>, DbError> {
        let sort = SortOrder::claim_order();
        let query = format!("SELECT * FROM {JOB_TABLE} {}", surql::order_clause(&sort));

        let mut response = self.db.query(query).await?;
        let rows: Vec<JobRow> = response.take(0)?;
        into_jobs(rows)
    }

    /// Count jobs per lifecycle state. Records that fit no state are
    /// counted under `None`.
    pub async fn count_by_state(&self) -> Result<HashMap<Option<JobState>, u64>, DbError> {
        let mut counts = HashMap::new();
        for job in self.list().await? {
            *counts.entry(job.state().ok()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Pick one matching record and update it in a single statement.
    ///
    /// SurrealDB runs each statement in its own transaction, so the candidate
    /// selection and the update commit together. The update repeats the
    /// filter, so a record changed by a concurrent writer is left alone.
    pub async fn claim_one(
        &self,
        filter: &Filter,
        update: &Update,
        sort: &SortOrder,
    ) -> Result<Option<JobRecord>, DbError> {
        let mut bindings = Bindings::default();
        let where_clause = surql::where_clause(filter, &mut bindings);
        let set_clause = surql::set_clause(update, &mut bindings);

        let query = format!(
            "UPDATE (SELECT VALUE id FROM (SELECT {projection} FROM {JOB_TABLE} {where_clause} {order} LIMIT 1)) \
             {set_clause} {where_clause} RETURN AFTER",
            projection = surql::projection(sort),
            order = surql::order_clause(sort),
        );

        let mut result = self.db.query(query);
        for binding in bindings.into_params() {
            result = result.bind(binding);
        }

        let mut response = result.await?;
        let rows: Vec<JobRow> = response.take(0)?;
        Ok(into_jobs(rows)?.into_iter().next())
    }

    /// Update every record matching `filter`. Returns how many changed.
    pub async fn update_where(&self, filter: &Filter, update: &Update) -> Result<u64, DbError> {
        let mut bindings = Bindings::default();
        let where_clause = surql::where_clause(filter, &mut bindings);
        let set_clause = surql::set_clause(update, &mut bindings);

        let query = format!("UPDATE {JOB_TABLE} {set_clause} {where_clause} RETURN id");

        let mut result = self.db.query(query);
        for binding in bindings.into_params() {
            result = result.bind(binding);
        }

        let mut response = result.await?;
        let rows: Vec<IdRow> = response.take(0)?;
        Ok(rows.len() as u64)
    }

    /// Delete every record matching `filter`. Returns how many were removed.
    pub async fn delete_where(&self, filter: &Filter) -> Result<u64, DbError> {
        let mut bindings = Bindings::default();
        let where_clause = surql::where_clause(filter, &mut bindings);

        let query = format!("DELETE {JOB_TABLE} {where_clause} RETURN BEFORE");

        let mut result = self.db.query(query);
        for binding in bindings.into_params() {
            result = result.bind(binding);
        }

        let mut response = result.await?;
        let rows: Vec<IdRow> = response.take(0)?;
        Ok(rows.len() as u64)
    }
}

impl JobStore for JobRepository {
    async fn insert(&self, job: &JobRecord) -> Result<JobRecord, StoreError> {
        match self.create(job).await {
            Ok(created) => Ok(created),
            Err(e) if e.is_duplicate() => Err(StoreError::Duplicate(job.id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.find(id).await?)
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        Ok(self.remove(id).await?)
    }

    async fn find_and_modify(
        &self,
        filter: &Filter,
        update: &Update,
        sort: &SortOrder,
    ) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.claim_one(filter, update, sort).await?)
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self.delete_where(filter).await?)
    }

    async fn update_many(&self, filter: &Filter, update: &Update) -> Result<u64, StoreError> {
        Ok(self.update_where(filter, update).await?)
    }
}
