//! Repository implementations for database operations.

mod job_repo;
mod surql;

pub use job_repo::JobRepository;
