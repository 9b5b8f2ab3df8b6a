//! Store-neutral query model: filters, updates and sort orders over job fields.
//!
//! Store adapters either evaluate these directly (the in-memory store) or
//! translate them into their own query language.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::{JobId, JobRecord};

/// A queryable field of a [`JobRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    Priority,
    RunAt,
    LockedAt,
    LockedBy,
    FailedAt,
    LastError,
    Queue,
    IsReady,
    CreatedAt,
}

impl Field {
    /// Persisted name of the field.
    pub fn name(&self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Priority => "priority",
            Field::RunAt => "run_at",
            Field::LockedAt => "locked_at",
            Field::LockedBy => "locked_by",
            Field::FailedAt => "failed_at",
            Field::LastError => "last_error",
            Field::Queue => "queue",
            Field::IsReady => "is_ready",
            Field::CreatedAt => "created_at",
        }
    }

    /// Current value of this field on `job`, `None` when absent.
    pub fn read(&self, job: &JobRecord) -> Option<FieldValue> {
        match self {
            Field::Id => Some(FieldValue::Id(job.id)),
            Field::Priority => Some(FieldValue::Int(i64::from(job.priority))),
            Field::RunAt => job.run_at.map(FieldValue::Time),
            Field::LockedAt => job.locked_at.map(FieldValue::Time),
            Field::LockedBy => job.locked_by.clone().map(FieldValue::Text),
            Field::FailedAt => job.failed_at.map(FieldValue::Time),
            Field::LastError => job.last_error.clone().map(FieldValue::Text),
            Field::Queue => job.queue.clone().map(FieldValue::Text),
            Field::IsReady => job.is_ready.map(FieldValue::Bool),
            Field::CreatedAt => Some(FieldValue::Time(job.created_at)),
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A value compared against or assigned to a [`Field`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Id(JobId),
    Int(i64),
    Text(String),
    Bool(bool),
    Time(DateTime<Utc>),
}

impl FieldValue {
    /// Ordering between two values of the same kind; `None` across kinds.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Id(a), FieldValue::Id(b)) => Some(a.cmp(b)),
            (FieldValue::Int(a), FieldValue::Int(b)) => Some(a.cmp(b)),
            (FieldValue::Text(a), FieldValue::Text(b)) => Some(a.cmp(b)),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => Some(a.cmp(b)),
            (FieldValue::Time(a), FieldValue::Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Time(value)
    }
}

impl From<JobId> for FieldValue {
    fn from(value: JobId) -> Self {
        FieldValue::Id(value)
    }
}

/// One predicate of a [`Filter`].
///
/// Comparisons never match a record on which the field is absent.
/// `Ne` matches absent fields, like a document store's `$ne`.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Field, FieldValue),
    Ne(Field, FieldValue),
    Lt(Field, FieldValue),
    Lte(Field, FieldValue),
    Gt(Field, FieldValue),
    Gte(Field, FieldValue),
    In(Field, Vec<FieldValue>),
    Present(Field),
    Absent(Field),
}

impl Condition {
    /// Evaluate this predicate against a record.
    pub fn matches(&self, job: &JobRecord) -> bool {
        match self {
            Condition::Eq(field, value) => field.read(job).as_ref() == Some(value),
            Condition::Ne(field, value) => field.read(job).as_ref() != Some(value),
            Condition::Lt(field, value) => compare(job, *field, value, Ordering::is_lt),
            Condition::Lte(field, value) => compare(job, *field, value, Ordering::is_le),
            Condition::Gt(field, value) => compare(job, *field, value, Ordering::is_gt),
            Condition::Gte(field, value) => compare(job, *field, value, Ordering::is_ge),
            Condition::In(field, values) => field
                .read(job)
                .is_some_and(|current| values.contains(&current)),
            Condition::Present(field) => field.read(job).is_some(),
            Condition::Absent(field) => field.read(job).is_none(),
        }
    }
}

fn compare(job: &JobRecord, field: Field, value: &FieldValue, test: fn(Ordering) -> bool) -> bool {
    field
        .read(job)
        .and_then(|current| current.compare(value))
        .is_some_and(test)
}

/// A conjunction of [`Condition`]s. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an arbitrary condition.
    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn eq(self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.and(Condition::Eq(field, value.into()))
    }

    pub fn ne(self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.and(Condition::Ne(field, value.into()))
    }

    pub fn lt(self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.and(Condition::Lt(field, value.into()))
    }

    pub fn lte(self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.and(Condition::Lte(field, value.into()))
    }

    pub fn gt(self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.and(Condition::Gt(field, value.into()))
    }

    pub fn gte(self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.and(Condition::Gte(field, value.into()))
    }

    pub fn any_in<V: Into<FieldValue>>(self, field: Field, values: impl IntoIterator<Item = V>) -> Self {
        self.and(Condition::In(field, values.into_iter().map(Into::into).collect()))
    }

    pub fn present(self, field: Field) -> Self {
        self.and(Condition::Present(field))
    }

    pub fn absent(self, field: Field) -> Self {
        self.and(Condition::Absent(field))
    }

    /// The conditions in the order they were added.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Whether every condition holds for `job`.
    pub fn matches(&self, job: &JobRecord) -> bool {
        self.conditions.iter().all(|c| c.matches(job))
    }
}

/// Assignment of a value (or absence) to one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub field: Field,
    /// `None` clears the field.
    pub value: Option<FieldValue>,
}

/// A set of field assignments applied atomically to each matched record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    assignments: Vec<Assignment>,
}

impl Update {
    /// Create an update that changes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a value to a field.
    pub fn set(mut self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.assignments.push(Assignment {
            field,
            value: Some(value.into()),
        });
        self
    }

    /// Clear a field.
    pub fn clear(mut self, field: Field) -> Self {
        self.assignments.push(Assignment { field, value: None });
        self
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Apply every assignment to `job`.
    ///
    /// Assignments whose value kind does not fit the field are skipped, as are
    /// assignments to `id` and `created_at`, which are immutable.
    pub fn apply(&self, job: &mut JobRecord) {
        for Assignment { field, value } in &self.assignments {
            match (field, value) {
                (Field::Priority, Some(FieldValue::Int(v))) => {
                    job.priority = i32::try_from(*v).unwrap_or(job.priority);
                }
                (Field::RunAt, v) => job.run_at = as_time(v),
                (Field::LockedAt, v) => job.locked_at = as_time(v),
                (Field::FailedAt, v) => job.failed_at = as_time(v),
                (Field::LockedBy, v) => job.locked_by = as_text(v),
                (Field::LastError, v) => job.last_error = as_text(v),
                (Field::Queue, v) => job.queue = as_text(v),
                (Field::IsReady, Some(FieldValue::Bool(v))) => job.is_ready = Some(*v),
                (Field::IsReady, None) => job.is_ready = None,
                _ => {}
            }
        }
    }
}

fn as_time(value: &Option<FieldValue>) -> Option<DateTime<Utc>> {
    match value {
        Some(FieldValue::Time(t)) => Some(*t),
        _ => None,
    }
}

fn as_text(value: &Option<FieldValue>) -> Option<String> {
    match value {
        Some(FieldValue::Text(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Sort direction for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Ordering used to pick a single record among several matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOrder {
    keys: Vec<(Field, Direction)>,
}

impl SortOrder {
    /// Order with no keys; stores fall back to their natural order.
    pub fn unordered() -> Self {
        Self { keys: Vec::new() }
    }

    /// Claim order: lowest priority value first, then oldest, then by id.
    pub fn claim_order() -> Self {
        Self::unordered()
            .then(Field::Priority, Direction::Asc)
            .then(Field::CreatedAt, Direction::Asc)
            .then(Field::Id, Direction::Asc)
    }

    /// Append a sort key.
    pub fn then(mut self, field: Field, direction: Direction) -> Self {
        self.keys.push((field, direction));
        self
    }

    pub fn keys(&self) -> &[(Field, Direction)] {
        &self.keys
    }

    /// Compare two records under this order. Absent values sort first.
    pub fn compare(&self, a: &JobRecord, b: &JobRecord) -> Ordering {
        for (field, direction) in &self.keys {
            let ordering = match (field.read(a), field.read(b)) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => x.compare(&y).unwrap_or(Ordering::Equal),
            };
            let ordering = match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::claim_order()
    }
}
