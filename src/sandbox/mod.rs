//! # Sandboxed Execution
//!
//! Runs untrusted source inside isolated, resource-capped containers:
//!
//! - Pre-flight lexical security scan with per-language banned patterns
//! - Scratch workspace materialization (source file + optional stdin)
//! - Optional compile phase for compiled languages
//! - Run phase with no network, read-only root, dropped capabilities,
//!   CPU/memory/pids/nofile caps and a wall-clock deadline
//! - Stream capture, status classification, and teardown on every path
//!
//! User-code failures (timeout, OOM, compile or runtime errors) are
//! successful sandbox calls returning a structured [`ExecutionResult`];
//! [`SandboxError`] is reserved for infrastructure faults the worker may
//! retry.

mod docker;
pub mod languages;
pub mod security;
mod workspace;

pub use docker::DockerSandbox;
pub use languages::{language_config, supported_languages, LanguageConfig};
pub use security::{ScanOutcome, SecurityScanner};
pub use workspace::Workspace;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::ExecutionResult;

/// Exit code reported for killed-on-deadline runs.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Cap on each captured stream.
pub const MAX_STREAM_BYTES: usize = 64 * 1024;

/// Input to one sandbox run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub execution_id: Uuid,
    pub language: String,
    pub code: String,
    pub stdin: String,
    pub timeout_ms: u64,
    pub memory_bytes: u64,
}

/// Infrastructure failures. Anything user-code-related is expressed in the
/// returned [`ExecutionResult`] instead.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("workspace setup failed: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("container lifecycle failed: {0}")]
    Container(String),
}

impl SandboxError {
    /// Whether the worker should redeliver the job.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SandboxError::UnsupportedLanguage(_))
    }
}

/// Capability interface for executing untrusted code.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run one request to completion, enforcing all resource caps.
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, SandboxError>;

    /// Startup check that the container runtime answers. Failure here is
    /// fatal for the process.
    async fn preflight(&self) -> Result<(), SandboxError>;
}
