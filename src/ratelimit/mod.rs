//! # Rate Limiting
//!
//! Sliding-window request ceilings keyed by client IP or user id. Each
//! traffic class has its own window and maximum; the login bucket skips
//! successful attempts so only failures count against the ceiling.
//!
//! Two backends implement the [`RateLimiter`] capability: a Redis-backed
//! windowed counter shared across instances, and an in-memory sliding log
//! used by the test suite and single-node deployments.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

// ============================================================================
// Buckets
// ============================================================================

/// Traffic classes with their windows and ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// Any API request, keyed by client IP.
    General,
    /// Login attempts, keyed by client IP. Successful logins are forgiven.
    Login,
    /// Registrations, keyed by client IP.
    Register,
    /// Execution submissions, keyed by user id.
    Exec,
    /// WebSocket connection attempts, keyed by client IP.
    WsConnect,
    /// Room creation, keyed by user id.
    RoomCreate,
    /// Chat messages, keyed by user id.
    Chat,
}

impl Bucket {
    /// Window length for this class.
    pub fn window(&self) -> Duration {
        match self {
            Bucket::General => Duration::from_secs(15 * 60),
            Bucket::Login => Duration::from_secs(15 * 60),
            Bucket::Register => Duration::from_secs(60 * 60),
            Bucket::Exec => Duration::from_secs(60),
            Bucket::WsConnect => Duration::from_secs(60),
            Bucket::RoomCreate => Duration::from_secs(15 * 60),
            Bucket::Chat => Duration::from_secs(60),
        }
    }

    /// Maximum requests per window.
    pub fn limit(&self) -> u64 {
        match self {
            Bucket::General => 1000,
            Bucket::Login => 100,
            Bucket::Register => 10,
            Bucket::Exec => 30,
            Bucket::WsConnect => 10,
            Bucket::RoomCreate => 20,
            Bucket::Chat => 100,
        }
    }

    /// Whether successful requests are refunded.
    pub fn skips_successful(&self) -> bool {
        matches!(self, Bucket::Login)
    }

    fn prefix(&self) -> &'static str {
        match self {
            Bucket::General => "general",
            Bucket::Login => "login",
            Bucket::Register => "register",
            Bucket::Exec => "exec",
            Bucket::WsConnect => "ws",
            Bucket::RoomCreate => "room_create",
            Bucket::Chat => "chat",
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("rl:{}:{}", self.prefix(), key)
    }
}

// ============================================================================
// Decisions
// ============================================================================

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed {
        /// Capacity left in the current window.
        remaining: u64,
    },
    Denied {
        /// Seconds until a retry can succeed.
        retry_after: u64,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Turn a denial into the user-visible error.
    pub fn enforce(self) -> AppResult<()> {
        match self {
            Decision::Allowed { .. } => Ok(()),
            Decision::Denied { retry_after } => Err(AppError::RateLimited {
                retry_after_secs: retry_after,
            }),
        }
    }
}

// ============================================================================
// Capability Interface
// ============================================================================

/// Counter store with atomic increment and TTL semantics.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request against `bucket`/`key` and decide.
    async fn acquire(&self, bucket: Bucket, key: &str) -> AppResult<Decision>;

    /// Refund the most recent hit. Only meaningful for buckets where
    /// [`Bucket::skips_successful`] holds.
    async fn forgive(&self, bucket: Bucket, key: &str) -> AppResult<()>;
}

// ============================================================================
// Redis Backend
// ============================================================================

/// Windowed counter on Redis: INCR with a TTL equal to the window, shared by
/// every instance pointing at the same store. Denied requests in forgiving
/// buckets are refunded so they never consume quota.
pub struct RedisRateLimiter {
    conn: ConnectionManager,
}

impl RedisRateLimiter {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

const ACQUIRE_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn acquire(&self, bucket: Bucket, key: &str) -> AppResult<Decision> {
        let storage_key = bucket.storage_key(key);
        let mut conn = self.conn.clone();

        let (count, ttl_ms): (u64, i64) = redis::Script::new(ACQUIRE_SCRIPT)
            .key(&storage_key)
            .arg(bucket.window().as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;

        if count <= bucket.limit() {
            return Ok(Decision::Allowed {
                remaining: bucket.limit() - count,
            });
        }

        if bucket.skips_successful() {
            // Rejected attempts must not consume quota in forgiving buckets.
            let _: i64 = redis::cmd("DECR")
                .arg(&storage_key)
                .query_async(&mut conn)
                .await?;
        }

        Ok(Decision::Denied {
            retry_after: (ttl_ms.max(0) as u64 / 1000).max(1),
        })
    }

    async fn forgive(&self, bucket: Bucket, key: &str) -> AppResult<()> {
        if !bucket.skips_successful() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("DECR")
            .arg(bucket.storage_key(key))
            .query_async(&mut conn)
            .await?;
        if count < 0 {
            let _: () = redis::cmd("DEL")
                .arg(bucket.storage_key(key))
                .query_async(&mut conn)
                .await?;
        }
        Ok(())
    }
}

// ============================================================================
// In-memory Backend
// ============================================================================

/// Sliding-window log keeping one timestamp per hit. Precise, and cheap at
/// the ceilings in the bucket table.
#[derive(Default)]
pub struct MemoryRateLimiter {
    hits: DashMap<String, VecDeque<Instant>>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn acquire(&self, bucket: Bucket, key: &str) -> AppResult<Decision> {
        let now = Instant::now();
        let window = bucket.window();
        let mut log = self.hits.entry(bucket.storage_key(key)).or_default();

        while let Some(front) = log.front() {
            if now.duration_since(*front) >= window {
                log.pop_front();
            } else {
                break;
            }
        }

        if (log.len() as u64) < bucket.limit() {
            log.push_back(now);
            return Ok(Decision::Allowed {
                remaining: bucket.limit() - log.len() as u64,
            });
        }

        let oldest = *log.front().expect("non-empty at ceiling");
        let retry_after = window
            .saturating_sub(now.duration_since(oldest))
            .as_secs()
            .max(1);
        Ok(Decision::Denied { retry_after })
    }

    async fn forgive(&self, bucket: Bucket, key: &str) -> AppResult<()> {
        if !bucket.skips_successful() {
            return Ok(());
        }
        if let Some(mut log) = self.hits.get_mut(&bucket.storage_key(key)) {
            log.pop_back();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_up_to_limit() {
        let limiter = MemoryRateLimiter::new();
        for _ in 0..Bucket::WsConnect.limit() {
            let decision = limiter.acquire(Bucket::WsConnect, "1.2.3.4").await.unwrap();
            assert!(decision.is_allowed());
        }
        let decision = limiter.acquire(Bucket::WsConnect, "1.2.3.4").await.unwrap();
        assert!(!decision.is_allowed());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = MemoryRateLimiter::new();
        for _ in 0..Bucket::WsConnect.limit() {
            limiter.acquire(Bucket::WsConnect, "a").await.unwrap();
        }
        let decision = limiter.acquire(Bucket::WsConnect, "b").await.unwrap();
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_buckets_are_independent() {
        let limiter = MemoryRateLimiter::new();
        for _ in 0..Bucket::Register.limit() {
            limiter.acquire(Bucket::Register, "a").await.unwrap();
        }
        assert!(!limiter
            .acquire(Bucket::Register, "a")
            .await
            .unwrap()
            .is_allowed());
        assert!(limiter
            .acquire(Bucket::General, "a")
            .await
            .unwrap()
            .is_allowed());
    }

    #[tokio::test]
    async fn test_forgive_refunds_login_quota() {
        let limiter = MemoryRateLimiter::new();
        for _ in 0..Bucket::Login.limit() {
            limiter.acquire(Bucket::Login, "ip").await.unwrap();
            limiter.forgive(Bucket::Login, "ip").await.unwrap();
        }
        // Every attempt succeeded and was forgiven, so the ceiling is
        // untouched.
        let decision = limiter.acquire(Bucket::Login, "ip").await.unwrap();
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_forgive_ignores_counting_buckets() {
        let limiter = MemoryRateLimiter::new();
        for _ in 0..Bucket::Register.limit() {
            limiter.acquire(Bucket::Register, "ip").await.unwrap();
            limiter.forgive(Bucket::Register, "ip").await.unwrap();
        }
        let decision = limiter.acquire(Bucket::Register, "ip").await.unwrap();
        assert!(!decision.is_allowed());
    }

    #[tokio::test]
    async fn test_denied_carries_retry_hint() {
        let limiter = MemoryRateLimiter::new();
        for _ in 0..Bucket::Exec.limit() {
            limiter.acquire(Bucket::Exec, "u").await.unwrap();
        }
        match limiter.acquire(Bucket::Exec, "u").await.unwrap() {
            Decision::Denied { retry_after } => assert!(retry_after >= 1),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn test_bucket_table_matches_policy() {
        assert_eq!(Bucket::General.limit(), 1000);
        assert_eq!(Bucket::Login.limit(), 100);
        assert_eq!(Bucket::Register.limit(), 10);
        assert_eq!(Bucket::Exec.limit(), 30);
        assert_eq!(Bucket::WsConnect.limit(), 10);
        assert_eq!(Bucket::RoomCreate.limit(), 20);
        assert_eq!(Bucket::Chat.limit(), 100);
        assert!(Bucket::Login.skips_successful());
        assert!(!Bucket::Chat.skips_successful());
    }
}
