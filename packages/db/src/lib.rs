//! SurrealDB integration for the job reservation system.
//!
//! This crate provides database connectivity and a [`JobStore`] backed by
//! SurrealDB, so a `Reserver` can coordinate workers across processes.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage
//!
//! [`JobStore`]: job_core::JobStore

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use repositories::JobRepository;
pub use schema::{JOB_TABLE, init_schema};

/// Connect with the given configuration and make sure the schema exists.
pub async fn init(config: &DbConfig) -> Result<Database, DbError> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}

impl JobRepository {
    /// Connect, initialize the schema and wrap the connection.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        Ok(Self::new(init(config).await?))
    }
}
