//! Execution logs and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    MemoryLimit,
    CompilationError,
    RuntimeError,
    SecurityBlock,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::MemoryLimit => "memory_limit",
            ExecutionStatus::CompilationError => "compilation_error",
            ExecutionStatus::RuntimeError => "runtime_error",
            ExecutionStatus::SecurityBlock => "security_block",
        }
    }

    /// Whether this status terminates the execution.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "timeout" => Ok(ExecutionStatus::Timeout),
            "memory_limit" => Ok(ExecutionStatus::MemoryLimit),
            "compilation_error" => Ok(ExecutionStatus::CompilationError),
            "runtime_error" => Ok(ExecutionStatus::RuntimeError),
            "security_block" => Ok(ExecutionStatus::SecurityBlock),
            other => Err(AppError::Validation(format!(
                "unknown execution status {other}"
            ))),
        }
    }
}

/// Structured outcome of one sandbox run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub execution_time_ms: u64,
    pub memory_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compilation_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compilation_output: Option<String>,
}

impl ExecutionResult {
    /// Result describing a run that never reached the container.
    pub fn rejected(status: ExecutionStatus, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: 1,
            execution_time_ms: 0,
            memory_bytes: 0,
            compilation_time_ms: None,
            compilation_output: None,
        }
    }
}

/// A persisted execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLog {
    pub id: Uuid,
    pub room_id: String,
    /// None when system-initiated.
    pub user_id: Option<Uuid>,
    pub language: String,
    pub code: String,
    pub stdin: String,
    pub stdout: String,
    pub stderr: String,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub execution_time_ms: Option<u64>,
    pub memory_bytes: Option<u64>,
    pub compilation_time_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a pending execution record.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub id: Uuid,
    pub room_id: String,
    pub user_id: Option<Uuid>,
    pub language: String,
    pub code: String,
    pub stdin: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Timeout,
            ExecutionStatus::MemoryLimit,
            ExecutionStatus::CompilationError,
        ] {
            let parsed: ExecutionStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Timeout.is_terminal());
        assert!(ExecutionStatus::SecurityBlock.is_terminal());
    }

    #[test]
    fn test_result_wire_shape() {
        let result = ExecutionResult::rejected(ExecutionStatus::SecurityBlock, "blocked");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "security_block");
        assert_eq!(json["exitCode"], 1);
        assert!(json.get("compilationTimeMs").is_none());
    }
}
