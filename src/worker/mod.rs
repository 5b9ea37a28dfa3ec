//! # Execution Workers
//!
//! Long-running consumers of the job queue. Each worker leases a job,
//! drives the sandbox, persists the outcome, and publishes the result back
//! to the room through the [`ExecutionPublisher`] capability.
//!
//! Retry discipline: infrastructure faults (container runtime down, queue
//! hiccups) are nacked and redelivered with backoff; user-code outcomes —
//! timeouts, memory kills, compile and runtime errors — are terminal and
//! complete the job on the first delivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::models::{ExecutionResult, ExecutionStatus};
use crate::queue::{ExecutionJob, JobQueue, NackOutcome};
use crate::repository::Repository;
use crate::sandbox::{ExecutionRequest, Sandbox};

/// How long one dequeue call waits before polling again.
const POLL_WAIT: Duration = Duration::from_secs(2);

/// Sink for completed executions, implemented by the hub.
#[async_trait]
pub trait ExecutionPublisher: Send + Sync {
    async fn publish(&self, room_id: &str, execution_id: Uuid, result: ExecutionResult);
}

/// Pool of queue consumers with a fixed concurrency.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    sandbox: Arc<dyn Sandbox>,
    repository: Arc<dyn Repository>,
    publisher: Arc<dyn ExecutionPublisher>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        sandbox: Arc<dyn Sandbox>,
        repository: Arc<dyn Repository>,
        publisher: Arc<dyn ExecutionPublisher>,
        concurrency: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            sandbox,
            repository,
            publisher,
            concurrency: concurrency.max(1),
        })
    }

    /// Run the pool until `shutdown` flips. In-flight jobs finish before
    /// their workers exit.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut workers = JoinSet::new();
        for index in 0..self.concurrency {
            let pool = Arc::clone(&self);
            let mut shutdown = shutdown.clone();
            workers.spawn(async move {
                tracing::debug!(worker = index, "execution worker started");
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        leased = pool.queue.dequeue(POLL_WAIT) => match leased {
                            Ok(Some(job)) => pool.process(job).await,
                            Ok(None) => {}
                            Err(err) => {
                                tracing::error!(error = %err, "queue dequeue failed");
                                tokio::time::sleep(Duration::from_secs(1)).await;
                            }
                        },
                    }
                }
                tracing::debug!(worker = index, "execution worker stopped");
            });
        }
        while workers.join_next().await.is_some() {}
    }

    async fn process(&self, job: ExecutionJob) {
        tracing::info!(
            execution_id = %job.execution_id,
            room_id = %job.room_id,
            language = %job.language,
            attempt = job.attempt,
            "executing job"
        );

        if let Err(err) = self
            .repository
            .mark_execution_running(job.execution_id)
            .await
        {
            tracing::warn!(error = %err, "could not mark execution running");
        }

        let request = ExecutionRequest {
            execution_id: job.execution_id,
            language: job.language.clone(),
            code: job.code.clone(),
            stdin: job.stdin.clone(),
            timeout_ms: job.timeout_ms,
            memory_bytes: job.memory_bytes,
        };

        match self.sandbox.execute(request).await {
            Ok(result) => self.finish(&job, result).await,
            Err(err) if err.is_retryable() => {
                tracing::warn!(
                    execution_id = %job.execution_id,
                    error = %err,
                    "infrastructure failure, retrying"
                );
                match self.queue.nack(job.clone()).await {
                    Ok(NackOutcome::Requeued { delay }) => {
                        tracing::debug!(
                            execution_id = %job.execution_id,
                            delay_ms = delay.as_millis() as u64,
                            "job requeued"
                        );
                    }
                    Ok(NackOutcome::DeadLettered) => {
                        tracing::error!(
                            execution_id = %job.execution_id,
                            "retries exhausted, dead-lettering"
                        );
                        let result = ExecutionResult::rejected(
                            ExecutionStatus::Failed,
                            "execution infrastructure unavailable",
                        );
                        self.record_and_publish(&job, result).await;
                    }
                    Err(nack_err) => {
                        tracing::error!(error = %nack_err, "nack failed");
                    }
                }
            }
            Err(err) => {
                // Not retryable: surface as a failed execution and complete
                // the job.
                let result =
                    ExecutionResult::rejected(ExecutionStatus::Failed, err.to_string());
                self.finish(&job, result).await;
            }
        }
    }

    /// Persist, publish, and ack a terminal outcome.
    async fn finish(&self, job: &ExecutionJob, result: ExecutionResult) {
        self.record_and_publish(job, result).await;
        if let Err(err) = self.queue.ack(job).await {
            tracing::error!(error = %err, "ack failed");
        }
    }

    async fn record_and_publish(&self, job: &ExecutionJob, result: ExecutionResult) {
        if let Err(err) = self
            .repository
            .finish_execution(job.execution_id, &result)
            .await
        {
            tracing::error!(error = %err, "could not persist execution result");
        }
        self.publisher
            .publish(&job.room_id, job.execution_id, result)
            .await;
    }
}
