//! Core domain types for the job reservation system.
//!
//! This crate contains the pieces shared by every store and worker:
//! - JobRecord and its four lifecycle states
//! - State transition rules, pure and I/O free
//! - The store query model and the JobStore adapter trait
//! - An in-memory store and the reservation config

mod config;
mod job;
mod memory;
pub mod query;
mod store;
pub mod transitions;

pub use config::{ConfigError, DEFAULT_MAX_RUN_TIME_SECS, DEFAULT_PROMOTION_ONE_IN, ReserveConfig};
pub use job::{JobId, JobRecord, JobState, StateViolation};
pub use memory::MemoryStore;
pub use query::{Condition, Direction, Field, FieldValue, Filter, SortOrder, Update};
pub use store::{JobStore, StoreError};
