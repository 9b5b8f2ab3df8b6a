//! Reservation engine for the job queue.
//!
//! Workers poll a shared store through a [`Reserver`]. Every call first runs
//! housekeeping (promote due jobs, reclaim stale locks), then claims at most
//! one ready job with a single atomic store operation.
//!
//! # Usage
//!
//! ```ignore
//! use job_core::{MemoryStore, ReserveConfig};
//! use reservation::Reserver;
//!
//! let mut reserver = Reserver::new(MemoryStore::new(), ReserveConfig::default())?;
//! if let Some(mut job) = reserver.reserve_next("host:pid").await? {
//!     match run(&job).await {
//!         Ok(()) => { reserver.complete(&job).await?; }
//!         Err(e) => { reserver.record_failure(&mut job, &e.to_string()).await?; }
//!     }
//! }
//! reserver.clear_locks("host:pid").await?;
//! ```

mod engine;
mod error;
pub mod housekeeping;

pub use engine::Reserver;
pub use error::ReserveError;
pub use housekeeping::HousekeepingReport;
