//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Name of the table holding job records.
pub const JOB_TABLE: &str = "job";

/// Initialize the database schema.
///
/// This creates the job table, its fields, and the indexes the reservation
/// queries rely on.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
///
/// Absent values are stored as NONE, never NULL, so presence checks only
/// have to look for NONE.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS priority ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS attempts ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS handler ON job TYPE string;
DEFINE FIELD IF NOT EXISTS run_at ON job TYPE option<datetime>;
DEFINE FIELD IF NOT EXISTS locked_at ON job TYPE option<datetime>;
DEFINE FIELD IF NOT EXISTS locked_by ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS failed_at ON job TYPE option<datetime>;
DEFINE FIELD IF NOT EXISTS last_error ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS queue ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS is_ready ON job TYPE option<bool>;
DEFINE FIELD IF NOT EXISTS created_at ON job TYPE datetime DEFAULT time::now();

-- Clearing a worker's locks on start and shutdown
DEFINE INDEX IF NOT EXISTS job_locked_by ON job FIELDS locked_by;

-- Claiming: ready jobs by priority
DEFINE INDEX IF NOT EXISTS job_ready_priority ON job FIELDS is_ready, priority;

-- Promoting waiting jobs once run_at passes
DEFINE INDEX IF NOT EXISTS job_run_at ON job FIELDS run_at;
"#;
