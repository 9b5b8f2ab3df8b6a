//! Message types for actor communication.

use ractor::RpcReplyPort;

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Try to reserve and run one job.
    Poll,

    /// Report what the worker has done so far.
    GetStats { reply: RpcReplyPort<WorkerStats> },

    /// Stop polling and shut the worker down. Locks are released on stop.
    Shutdown,
}

/// Counters kept by a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Jobs reserved.
    pub claimed: u64,
    /// Jobs whose handler succeeded.
    pub completed: u64,
    /// Jobs recorded as failed, including timeouts and missing handlers.
    pub failed: u64,
}
