//! Worker actor that polls the store for jobs and runs them.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use job_core::{JobRecord, JobStore, ReserveConfig};
use ractor::{Actor, ActorProcessingErr, ActorRef, SpawnErr};
use reservation::Reserver;
use serde::{Deserialize, Serialize};

use crate::handler::JobHandlerRegistry;
use crate::messages::{WorkerMessage, WorkerStats};

/// Worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Delay between polls while the store has nothing to claim.
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
        }
    }
}

impl WorkerConfig {
    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// State for the worker actor.
pub struct WorkerActorState<S> {
    /// Name written into `locked_by` for every claim.
    pub worker_id: String,
    reserver: Reserver<S>,
    handlers: Arc<JobHandlerRegistry>,
    stats: WorkerStats,
    running: bool,
}

impl<S: JobStore> WorkerActorState<S> {
    /// Run one claimed job to completion or failure.
    async fn run(&mut self, mut job: JobRecord) -> Result<(), ActorProcessingErr> {
        self.stats.claimed += 1;

        let Some(handler) = self.handlers.get(&job.handler) else {
            let error = format!("No handler for job: {}", job.handler);
            return self.fail(&mut job, &error).await;
        };

        let timeout = self.reserver.config().max_run_time();
        match tokio::time::timeout(timeout, handler.handle(&job)).await {
            Ok(Ok(())) => {
                if self.reserver.complete(&job).await? {
                    self.stats.completed += 1;
                    tracing::debug!("Job {} completed by {}", job.id, self.worker_id);
                }
                Ok(())
            }
            Ok(Err(error)) => self.fail(&mut job, &error).await,
            Err(_) => self.fail(&mut job, "Job timed out").await,
        }
    }

    async fn fail(&mut self, job: &mut JobRecord, error: &str) -> Result<(), ActorProcessingErr> {
        if self.reserver.record_failure(job, error).await? {
            self.stats.failed += 1;
        }
        Ok(())
    }
}

/// Worker actor arguments.
pub struct WorkerArgs<S> {
    pub worker_id: String,
    pub store: S,
    pub reserve: ReserveConfig,
    pub handlers: Arc<JobHandlerRegistry>,
    pub config: WorkerConfig,
}

impl<S> WorkerArgs<S> {
    /// Arguments with default reservation and worker settings.
    pub fn new(worker_id: impl Into<String>, store: S, handlers: Arc<JobHandlerRegistry>) -> Self {
        Self {
            worker_id: worker_id.into(),
            store,
            reserve: ReserveConfig::default(),
            handlers,
            config: WorkerConfig::default(),
        }
    }

    /// Set the reservation settings.
    pub fn with_reserve_config(mut self, reserve: ReserveConfig) -> Self {
        self.reserve = reserve;
        self
    }

    /// Set the worker settings.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }
}

/// Worker actor that reserves jobs from a shared store and executes them.
pub struct WorkerActor<S> {
    store: PhantomData<fn() -> S>,
}

impl<S> Default for WorkerActor<S> {
    fn default() -> Self {
        Self { store: PhantomData }
    }
}

impl<S: JobStore + 'static> Actor for WorkerActor<S> {
    type Msg = WorkerMessage;
    type State = WorkerActorState<S>;
    type Arguments = WorkerArgs<S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        let reserver = Reserver::new(args.store, args.reserve)?;
        let state = WorkerActorState {
            worker_id: args.worker_id,
            reserver,
            handlers: args.handlers,
            stats: WorkerStats::default(),
            running: true,
        };

        // Start the poll loop
        let interval = args.config.poll_interval();
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            loop {
                if myself_clone.send_message(WorkerMessage::Poll).is_err() {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        });

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if !state.running {
                    return Ok(());
                }

                let worker = state.worker_id.clone();
                match state.reserver.reserve_next(&worker).await {
                    Ok(Some(job)) => {
                        state.run(job).await?;
                        // Keep draining while there is work
                        myself.send_message(WorkerMessage::Poll)?;
                    }
                    Ok(None) => {}
                    Err(e) if e.is_retryable() => {
                        tracing::warn!("Worker {} could not reserve: {}", worker, e);
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            WorkerMessage::GetStats { reply } => {
                let _ = reply.send(state.stats);
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.worker_id);
                state.running = false;
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let released = state.reserver.clear_locks(&state.worker_id).await?;
        tracing::info!("Worker {} stopped, released {} locks", state.worker_id, released);
        Ok(())
    }
}

/// Spawn a worker actor named after its worker id.
pub async fn start_worker<S: JobStore + 'static>(
    args: WorkerArgs<S>,
) -> Result<(ActorRef<WorkerMessage>, tokio::task::JoinHandle<()>), SpawnErr> {
    let name = format!("worker-{}", args.worker_id);
    Actor::spawn(Some(name), WorkerActor::default(), args).await
}
