//! Actor-based workers for the job reservation system.
//!
//! A [`WorkerActor`] polls a shared [`JobStore`](job_core::JobStore)
//! through a `Reserver`, runs each claimed job with the handler named by
//! its `handler` field, then deletes it on success or records the failure.
//! Any number of workers, in any number of processes, can share one store.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use actors::{FnHandler, JobHandlerRegistry, WorkerArgs, WorkerMessage, start_worker};
//!
//! let handlers = JobHandlerRegistry::new()
//!     .with(FnHandler::new("send_mail", |job| Box::pin(async { Ok(()) })));
//!
//! let (worker, handle) = start_worker(WorkerArgs::new("host-1:42", store, Arc::new(handlers))).await?;
//!
//! // Stop polling and release any held locks
//! worker.send_message(WorkerMessage::Shutdown)?;
//! handle.await?;
//! ```

mod handler;
mod messages;
mod worker_actor;

pub use handler::{FnHandler, HandlerFuture, HandlerResult, JobHandler, JobHandlerRegistry};
pub use messages::{WorkerMessage, WorkerStats};
pub use worker_actor::{WorkerActor, WorkerActorState, WorkerArgs, WorkerConfig, start_worker};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort};
