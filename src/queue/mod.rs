//! # Job Queue
//!
//! Durable FIFO queue for execution jobs with at-least-once delivery.
//! Dequeued jobs sit in a processing slot until acked; a nack either
//! requeues with exponential backoff or, once retries are exhausted, moves
//! the job into a bounded dead-letter ring.
//!
//! Backends: a Redis list pair (`queue`/`processing`/`dead`) shared across
//! instances, and an in-memory queue for tests and development.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Dead-letter ring capacity.
pub const DEAD_LETTER_CAPACITY: usize = 50;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const BACKOFF_MULTIPLIER: u32 = 2;

// ============================================================================
// Job Payload
// ============================================================================

/// One queued execution request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionJob {
    pub execution_id: Uuid,
    pub room_id: String,
    /// None when system-initiated.
    pub requester_id: Option<Uuid>,
    pub language: String,
    pub code: String,
    pub stdin: String,
    /// Wall-clock deadline for the run phase.
    pub timeout_ms: u64,
    pub memory_bytes: u64,
    /// Delivery attempt counter, starting at 0.
    #[serde(default)]
    pub attempt: u32,
}

impl ExecutionJob {
    /// Backoff before the next delivery of this job.
    pub fn backoff(&self) -> Duration {
        INITIAL_BACKOFF * BACKOFF_MULTIPLIER.saturating_pow(self.attempt)
    }
}

/// What happened to a nacked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Scheduled for redelivery after the given backoff.
    Requeued { delay: Duration },
    /// Retries exhausted; parked in the dead-letter ring.
    DeadLettered,
}

// ============================================================================
// Capability Interface
// ============================================================================

/// Multi-producer multi-consumer FIFO with at-least-once semantics.
/// Consumers must be idempotent.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: ExecutionJob) -> AppResult<()>;

    /// Pop the oldest job, waiting up to `wait`. The job stays leased until
    /// acked or nacked.
    async fn dequeue(&self, wait: Duration) -> AppResult<Option<ExecutionJob>>;

    /// Release a completed job.
    async fn ack(&self, job: &ExecutionJob) -> AppResult<()>;

    /// Report an infrastructural failure for a leased job.
    async fn nack(&self, job: ExecutionJob) -> AppResult<NackOutcome>;

    /// Snapshot of the dead-letter ring, newest first.
    async fn dead_letters(&self) -> AppResult<Vec<ExecutionJob>>;
}

// ============================================================================
// In-memory Backend
// ============================================================================

struct MemoryInner {
    ready: Mutex<VecDeque<ExecutionJob>>,
    processing: Mutex<HashMap<Uuid, ExecutionJob>>,
    dead: Mutex<VecDeque<ExecutionJob>>,
    notify: Notify,
    max_retries: u32,
}

/// Process-local queue with the same lease/ack discipline as the Redis
/// backend.
#[derive(Clone)]
pub struct MemoryJobQueue {
    inner: Arc<MemoryInner>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::with_max_retries(DEFAULT_MAX_RETRIES)
    }

    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                ready: Mutex::new(VecDeque::new()),
                processing: Mutex::new(HashMap::new()),
                dead: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                max_retries,
            }),
        }
    }

    /// Jobs currently leased to consumers.
    pub fn in_flight(&self) -> usize {
        self.inner.processing.lock().len()
    }

    /// Jobs waiting for delivery.
    pub fn depth(&self) -> usize {
        self.inner.ready.lock().len()
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: ExecutionJob) -> AppResult<()> {
        self.inner.ready.lock().push_back(job);
        self.inner.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> AppResult<Option<ExecutionJob>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(job) = self.inner.ready.lock().pop_front() {
                self.inner
                    .processing
                    .lock()
                    .insert(job.execution_id, job.clone());
                return Ok(Some(job));
            }

            let notified = self.inner.notify.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn ack(&self, job: &ExecutionJob) -> AppResult<()> {
        self.inner.processing.lock().remove(&job.execution_id);
        Ok(())
    }

    async fn nack(&self, mut job: ExecutionJob) -> AppResult<NackOutcome> {
        self.inner.processing.lock().remove(&job.execution_id);

        if job.attempt >= self.inner.max_retries {
            let mut dead = self.inner.dead.lock();
            dead.push_front(job);
            dead.truncate(DEAD_LETTER_CAPACITY);
            return Ok(NackOutcome::DeadLettered);
        }

        let delay = job.backoff();
        job.attempt += 1;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.ready.lock().push_back(job);
            inner.notify.notify_one();
        });

        Ok(NackOutcome::Requeued { delay })
    }

    async fn dead_letters(&self) -> AppResult<Vec<ExecutionJob>> {
        Ok(self.inner.dead.lock().iter().cloned().collect())
    }
}

// ============================================================================
// Redis Backend
// ============================================================================

const READY_KEY: &str = "jobs:exec:ready";
const PROCESSING_KEY: &str = "jobs:exec:processing";
const DEAD_KEY: &str = "jobs:exec:dead";

/// Redis-list backed queue. `BRPOPLPUSH` moves a job into the processing
/// list atomically, so a crashed consumer leaves the payload recoverable.
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
    max_retries: u32,
}

impl RedisJobQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    fn encode(job: &ExecutionJob) -> AppResult<String> {
        serde_json::to_string(job).map_err(AppError::internal)
    }

    fn decode(payload: &str) -> AppResult<ExecutionJob> {
        serde_json::from_str(payload).map_err(AppError::internal)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: ExecutionJob) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("LPUSH")
            .arg(READY_KEY)
            .arg(Self::encode(&job)?)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> AppResult<Option<ExecutionJob>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(READY_KEY)
            .arg(PROCESSING_KEY)
            .arg(wait.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        payload.as_deref().map(Self::decode).transpose()
    }

    async fn ack(&self, job: &ExecutionJob) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LREM")
            .arg(PROCESSING_KEY)
            .arg(1)
            .arg(Self::encode(job)?)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn nack(&self, mut job: ExecutionJob) -> AppResult<NackOutcome> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LREM")
            .arg(PROCESSING_KEY)
            .arg(1)
            .arg(Self::encode(&job)?)
            .query_async(&mut conn)
            .await?;

        if job.attempt >= self.max_retries {
            let _: () = redis::cmd("LPUSH")
                .arg(DEAD_KEY)
                .arg(Self::encode(&job)?)
                .query_async(&mut conn)
                .await?;
            let _: () = redis::cmd("LTRIM")
                .arg(DEAD_KEY)
                .arg(0)
                .arg((DEAD_LETTER_CAPACITY - 1) as i64)
                .query_async(&mut conn)
                .await?;
            return Ok(NackOutcome::DeadLettered);
        }

        let delay = job.backoff();
        job.attempt += 1;
        let payload = Self::encode(&job)?;
        let mut spawn_conn = self.conn.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result: Result<(), redis::RedisError> = redis::cmd("LPUSH")
                .arg(READY_KEY)
                .arg(payload)
                .query_async(&mut spawn_conn)
                .await;
            if let Err(err) = result {
                tracing::error!(error = %err, "failed to requeue job after backoff");
            }
        });

        Ok(NackOutcome::Requeued { delay })
    }

    async fn dead_letters(&self) -> AppResult<Vec<ExecutionJob>> {
        let mut conn = self.conn.clone();
        let payloads: Vec<String> = redis::cmd("LRANGE")
            .arg(DEAD_KEY)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        payloads.iter().map(|p| Self::decode(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(n: u8) -> ExecutionJob {
        ExecutionJob {
            execution_id: Uuid::from_bytes([n; 16]),
            room_id: "room".into(),
            requester_id: None,
            language: "python".into(),
            code: format!("print({n})"),
            stdin: String::new(),
            timeout_ms: 30_000,
            memory_bytes: 256 * 1024 * 1024,
            attempt: 0,
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(job(1)).await.unwrap();
        queue.enqueue(job(2)).await.unwrap();
        queue.enqueue(job(3)).await.unwrap();

        for n in 1..=3u8 {
            let got = queue
                .dequeue(Duration::from_millis(100))
                .await
                .unwrap()
                .expect("job ready");
            assert_eq!(got.execution_id, Uuid::from_bytes([n; 16]));
        }
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let queue = MemoryJobQueue::new();
        let got = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = MemoryJobQueue::new();
        let waiter = queue.clone();
        let handle =
            tokio::spawn(async move { waiter.dequeue(Duration::from_secs(5)).await.unwrap() });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(job(7)).await.unwrap();

        let got = handle.await.unwrap().expect("woken with job");
        assert_eq!(got.execution_id, Uuid::from_bytes([7; 16]));
    }

    #[tokio::test]
    async fn test_ack_releases_lease() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(job(1)).await.unwrap();
        let leased = queue
            .dequeue(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queue.in_flight(), 1);
        queue.ack(&leased).await.unwrap();
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nack_requeues_with_backoff() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(job(1)).await.unwrap();
        let leased = queue
            .dequeue(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();

        let outcome = queue.nack(leased).await.unwrap();
        assert!(matches!(outcome, NackOutcome::Requeued { .. }));

        let redelivered = queue
            .dequeue(Duration::from_secs(10))
            .await
            .unwrap()
            .expect("redelivered");
        assert_eq!(redelivered.attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhaust_into_dead_letters() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(job(1)).await.unwrap();

        for _ in 0..=DEFAULT_MAX_RETRIES {
            let leased = queue
                .dequeue(Duration::from_secs(30))
                .await
                .unwrap()
                .expect("delivery");
            queue.nack(leased).await.unwrap();
        }

        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempt, DEFAULT_MAX_RETRIES);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_dead_letter_ring_is_bounded() {
        let queue = MemoryJobQueue::with_max_retries(0);
        for n in 0..(DEAD_LETTER_CAPACITY + 10) {
            queue.enqueue(job((n % 256) as u8)).await.unwrap();
            let leased = queue
                .dequeue(Duration::from_millis(50))
                .await
                .unwrap()
                .unwrap();
            queue.nack(leased).await.unwrap();
        }
        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), DEAD_LETTER_CAPACITY);
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let mut j = job(1);
        let first = j.backoff();
        j.attempt = 1;
        let second = j.backoff();
        j.attempt = 2;
        let third = j.backoff();
        assert!(second > first);
        assert_eq!(third, first * 4);
    }

    #[test]
    fn test_job_round_trips_through_json() {
        let j = job(9);
        let encoded = RedisJobQueue::encode(&j).unwrap();
        let decoded = RedisJobQueue::decode(&encoded).unwrap();
        assert_eq!(decoded, j);
    }
}
