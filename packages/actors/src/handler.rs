//! Job handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use job_core::JobRecord;

/// Result type for job handlers. The error message is stored as the job's
/// `last_error`.
pub type HandlerResult = Result<(), String>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Trait for job handlers.
///
/// A handler runs every job whose `handler` field matches its name.
pub trait JobHandler: Send + Sync + 'static {
    /// The handler name jobs refer to.
    fn name(&self) -> &str;

    /// Run a job.
    fn handle(&self, job: &JobRecord) -> HandlerFuture;
}

/// Registry for job handlers, keyed by name.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its name, replacing any previous one.
    pub fn register<H: JobHandler>(&mut self, handler: H) {
        let name = handler.name().to_string();
        self.handlers.insert(name, Arc::new(handler));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<H: JobHandler>(mut self, handler: H) -> Self {
        self.register(handler);
        self
    }

    /// Get the handler for a job.
    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Check if a handler exists.
    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// List all registered handler names.
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(&JobRecord) -> HandlerFuture + Send + Sync + 'static,
{
    name: String,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&JobRecord) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&JobRecord) -> HandlerFuture + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, job: &JobRecord) -> HandlerFuture {
        (self.handler)(job)
    }
}
