use db::{DbConfig, DbError, JobRepository};

/// A fresh in-memory store. Each call opens its own instance, so tests do
/// not share records.
pub async fn setup_store() -> Result<JobRepository, DbError> {
    JobRepository::connect(&DbConfig::memory()).await
}
