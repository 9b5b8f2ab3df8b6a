//! Database connection management.

use job_core::StoreError;
use surrealdb::Surreal;
use surrealdb::error::Db;
use surrealdb::engine::any::{Any, connect as connect_any};
use surrealdb::opt::auth::Root;
use thiserror::Error;

/// Database connection handle. Cheap to clone; clones share the connection.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection mode: "mem://", "rocksdb://path" or a remote endpoint
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "jobqueue".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Create a config for a remote server, e.g. "ws://localhost:8000".
    pub fn remote(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DbError {
    fn engine_error(&self) -> Option<&Db> {
        match self {
            DbError::Connection(surrealdb::Error::Db(error)) => Some(error),
            _ => None,
        }
    }

    /// Whether the error comes from a transaction that lost a write race.
    pub fn is_conflict(&self) -> bool {
        matches!(self.engine_error(), Some(Db::TxRetryable))
    }

    /// Whether the error reports a record id that is already taken.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self.engine_error(),
            Some(Db::RecordExists { .. } | Db::TxKeyAlreadyExists)
        )
    }
}

impl From<DbError> for StoreError {
    fn from(error: DbError) -> Self {
        if error.is_conflict() {
            return StoreError::Conflict(error.to_string());
        }
        match error {
            DbError::Serialization(message) => StoreError::Serialization(message),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Open a connection and select the configured namespace and database.
pub async fn connect(config: &DbConfig) -> Result<Database, DbError> {
    tracing::info!("Connecting to database: {}", config.endpoint);

    let db = connect_any(&config.endpoint).await?;

    // Authenticate if credentials provided
    if let Some((username, password)) = &config.credentials {
        db.signin(Root { username, password }).await?;
    }

    db.use_ns(&config.namespace).use_db(&config.database).await?;

    tracing::info!(
        "Connected to database: {}/{}",
        config.namespace,
        config.database
    );

    Ok(db)
}
