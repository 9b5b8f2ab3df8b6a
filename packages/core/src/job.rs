//! Job record and the four lifecycle states encoded by its nullable fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job, derived from which of its fields are set.
///
/// | State   | is_ready | run_at | locked_at / locked_by | failed_at |
/// |---------|----------|--------|-----------------------|-----------|
/// | Waiting | absent   | set    | absent                | absent    |
/// | Ready   | true     | absent | absent                | absent    |
/// | Running | absent   | absent | both set              | absent    |
/// | Failed  | absent   | absent | absent                | set       |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Scheduled for `run_at`, not yet promoted.
    Waiting,
    /// Eligible to be claimed.
    Ready,
    /// Claimed by a worker.
    Running,
    /// Terminal failure.
    Failed,
}

impl JobState {
    /// Get a simple state string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Ready => "ready",
            JobState::Running => "running",
            JobState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record whose fields do not encode exactly one [`JobState`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateViolation {
    /// Neither `run_at`, `is_ready`, a lock nor `failed_at` is set.
    ///
    /// Such a record is never picked up automatically.
    #[error("job {0} is inert: no run_at, is_ready, lock or failed_at")]
    Inert(JobId),
    /// Fields belonging to more than one state are set.
    #[error("job {id} mixes fields of several states: {fields}")]
    Conflicting { id: JobId, fields: String },
}

/// A unit of work persisted in the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Lower values are served first.
    #[serde(default)]
    pub priority: i32,
    /// Retry counter, owned by the executing side.
    #[serde(default)]
    pub attempts: u32,
    /// Serialized job payload, opaque to the reservation core.
    pub handler: String,
    /// Earliest time the job may run. Only set while waiting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<DateTime<Utc>>,
    /// When a worker claimed the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    /// Identity of the claiming worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    /// Set once when the job fails for good.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    /// Diagnostic text from the last failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Logical queue name used for filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// `Some(true)` only while the job can be claimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ready: Option<bool>,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a job that should run as soon as a worker is free.
    ///
    /// Nothing but `created_at` is set until the record is enqueued; enqueueing
    /// marks it ready (see [`crate::transitions::prepare_for_insert`]).
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            priority: 0,
            attempts: 0,
            handler: handler.into(),
            run_at: None,
            locked_at: None,
            locked_by: None,
            failed_at: None,
            last_error: None,
            queue: None,
            is_ready: None,
            created_at: Utc::now(),
        }
    }

    /// Set the priority for this job.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Put this job on a named queue.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Schedule this job for a later time instead of running it immediately.
    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self.is_ready = None;
        self
    }

    /// Whether `is_ready` is set to true.
    pub fn is_ready(&self) -> bool {
        self.is_ready == Some(true)
    }

    /// Whether a worker holds the lock on this job.
    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some() || self.locked_by.is_some()
    }

    /// Classify this record into exactly one lifecycle state.
    pub fn state(&self) -> Result<JobState, StateViolation> {
        let mut set = Vec::new();
        if self.is_ready.is_some() {
            set.push("is_ready");
        }
        if self.run_at.is_some() {
            set.push("run_at");
        }
        if self.locked_at.is_some() {
            set.push("locked_at");
        }
        if self.locked_by.is_some() {
            set.push("locked_by");
        }
        if self.failed_at.is_some() {
            set.push("failed_at");
        }

        match set.as_slice() {
            [] => Err(StateViolation::Inert(self.id)),
            ["is_ready"] if self.is_ready() => Ok(JobState::Ready),
            ["run_at"] => Ok(JobState::Waiting),
            ["locked_at", "locked_by"] => Ok(JobState::Running),
            ["failed_at"] => Ok(JobState::Failed),
            fields => Err(StateViolation::Conflicting {
                id: self.id,
                fields: fields.join(", "),
            }),
        }
    }
}
