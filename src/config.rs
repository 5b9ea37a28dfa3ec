//! # Configuration
//!
//! Environment-driven configuration for the server binary. Every recognized
//! variable has a sensible default except the secrets, which are required in
//! non-test builds. Invalid configuration terminates the process with exit
//! code 2 before any subsystem starts.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Exit code used when configuration is invalid.
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Server configuration assembled from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP/WebSocket listener binds to.
    pub bind_addr: SocketAddr,

    /// Postgres DSN.
    pub database_url: String,

    /// Redis DSN used for rate limiting and the job queue.
    pub redis_url: String,

    /// HMAC secret used to sign bearer tokens.
    pub jwt_secret: String,

    /// Bearer token lifetime.
    pub token_ttl: Duration,

    /// Path to the docker binary used to drive sandbox containers.
    pub docker_binary: String,

    /// Optional DOCKER_HOST override passed through to the docker CLI.
    pub docker_host: Option<String>,

    /// Default wall-clock deadline for executions without a language default.
    pub default_timeout: Duration,

    /// Upper bound on any execution deadline.
    pub max_timeout: Duration,

    /// Default memory cap in bytes.
    pub default_memory_bytes: u64,

    /// Upper bound on any memory cap.
    pub max_memory_bytes: u64,

    /// Root directory for per-execution scratch workspaces.
    pub scratch_root: PathBuf,

    /// Whether the pre-flight security scan runs before executions.
    pub security_scan: bool,

    /// Extra comma-separated patterns treated as critical by the scanner.
    pub banned_keywords: Vec<String>,

    /// Number of concurrent sandbox containers.
    pub sandbox_concurrency: usize,

    /// Number of concurrent worker tasks consuming the job queue.
    pub worker_concurrency: usize,

    /// Log filter directive (RUST_LOG syntax).
    pub log_level: String,
}

impl Config {
    /// Assemble configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = parse(
            "BIND_ADDR",
            env_or("BIND_ADDR", "0.0.0.0:8080"),
        )?;

        let database_url = require("DATABASE_URL")?;
        let redis_url = env_or("REDIS_URL", "redis://127.0.0.1:6379");
        let jwt_secret = require("JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                name: "JWT_SECRET",
                reason: "must be at least 32 bytes".to_string(),
            });
        }

        let token_ttl = Duration::from_secs(parse(
            "TOKEN_TTL_SECS",
            env_or("TOKEN_TTL_SECS", "86400"),
        )?);

        let default_timeout = Duration::from_millis(parse(
            "EXEC_DEFAULT_TIMEOUT_MS",
            env_or("EXEC_DEFAULT_TIMEOUT_MS", "30000"),
        )?);
        let max_timeout = Duration::from_millis(parse(
            "EXEC_MAX_TIMEOUT_MS",
            env_or("EXEC_MAX_TIMEOUT_MS", "60000"),
        )?);
        if max_timeout < default_timeout {
            return Err(ConfigError::Invalid {
                name: "EXEC_MAX_TIMEOUT_MS",
                reason: "must be >= EXEC_DEFAULT_TIMEOUT_MS".to_string(),
            });
        }

        let default_memory_bytes = parse(
            "EXEC_DEFAULT_MEMORY_BYTES",
            env_or("EXEC_DEFAULT_MEMORY_BYTES", &(256u64 * 1024 * 1024).to_string()),
        )?;
        let max_memory_bytes = parse(
            "EXEC_MAX_MEMORY_BYTES",
            env_or("EXEC_MAX_MEMORY_BYTES", &(1024u64 * 1024 * 1024).to_string()),
        )?;
        if max_memory_bytes < default_memory_bytes {
            return Err(ConfigError::Invalid {
                name: "EXEC_MAX_MEMORY_BYTES",
                reason: "must be >= EXEC_DEFAULT_MEMORY_BYTES".to_string(),
            });
        }

        let sandbox_concurrency = parse(
            "SANDBOX_CONCURRENCY",
            env_or("SANDBOX_CONCURRENCY", "4"),
        )?;
        let worker_concurrency = parse(
            "WORKER_CONCURRENCY",
            env_or("WORKER_CONCURRENCY", "5"),
        )?;
        if sandbox_concurrency == 0 || worker_concurrency == 0 {
            return Err(ConfigError::Invalid {
                name: "WORKER_CONCURRENCY",
                reason: "concurrency must be at least 1".to_string(),
            });
        }

        let banned_keywords = std::env::var("BANNED_KEYWORDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            bind_addr,
            database_url,
            redis_url,
            jwt_secret,
            token_ttl,
            docker_binary: env_or("DOCKER_BINARY", "docker"),
            docker_host: std::env::var("DOCKER_HOST").ok(),
            default_timeout,
            max_timeout,
            default_memory_bytes,
            max_memory_bytes,
            scratch_root: PathBuf::from(env_or("SCRATCH_ROOT", "/tmp/codecollab")),
            security_scan: env_or("SECURITY_SCAN", "true") != "false",
            banned_keywords,
            sandbox_concurrency,
            worker_concurrency,
            log_level: std::env::var("LOG_LEVEL")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Defaults suitable for tests and local experimentation; production
/// configuration always comes from [`Config::from_env`].
impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            database_url: String::new(),
            redis_url: String::new(),
            jwt_secret: "test-secret-test-secret-test-secret!".to_string(),
            token_ttl: Duration::from_secs(3600),
            docker_binary: "docker".to_string(),
            docker_host: None,
            default_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(60),
            default_memory_bytes: 256 * 1024 * 1024,
            max_memory_bytes: 1024 * 1024 * 1024,
            scratch_root: std::env::temp_dir().join("codecollab-test"),
            security_scan: true,
            banned_keywords: Vec::new(),
            sandbox_concurrency: 2,
            worker_concurrency: 2,
            log_level: "debug".to_string(),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse<T: std::str::FromStr>(name: &'static str, raw: String) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_helper() {
        let n: u64 = parse("X", "42".to_string()).unwrap();
        assert_eq!(n, 42);
        assert!(parse::<u64>("X", "nope".to_string()).is_err());
    }

    #[test]
    fn test_default_config_is_consistent() {
        let cfg = Config::default();
        assert!(cfg.max_timeout >= cfg.default_timeout);
        assert!(cfg.max_memory_bytes >= cfg.default_memory_bytes);
        assert!(cfg.jwt_secret.len() >= 32);
    }
}
