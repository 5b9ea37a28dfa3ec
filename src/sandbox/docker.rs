//! Container lifecycle driven through the docker CLI.
//!
//! Each phase runs in a fresh container that is force-removed afterwards,
//! whatever the outcome. The run phase gets no network, a read-only root
//! with only the workspace mounted writable, dropped capabilities, and
//! CPU/memory/pids/nofile caps. A wall-clock deadline kills the container
//! and classifies the run as a timeout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::languages::{language_config, LanguageConfig};
use super::security::{ScanOutcome, SecurityScanner};
use super::workspace::{expand_class, java_class_name, Workspace, INPUT_FILE};
use super::{ExecutionRequest, Sandbox, SandboxError, MAX_STREAM_BYTES, TIMEOUT_EXIT_CODE};
use crate::config::Config;
use crate::models::{ExecutionResult, ExecutionStatus};

/// Placeholder substituted for infrastructure paths in user-visible output.
const PATH_PLACEHOLDER: &str = "<sandbox>";

/// CPU quota for user code, in cores.
const CPU_LIMIT: &str = "0.5";
const PIDS_LIMIT: &str = "64";
const NOFILE_ULIMIT: &str = "nofile=1024:1024";

/// Sandbox implementation backed by the docker CLI.
pub struct DockerSandbox {
    binary: String,
    docker_host: Option<String>,
    scratch_root: PathBuf,
    scanner: SecurityScanner,
    permits: Semaphore,
    max_timeout: Duration,
    max_memory_bytes: u64,
}

impl DockerSandbox {
    pub fn new(config: &Config) -> Self {
        Self {
            binary: config.docker_binary.clone(),
            docker_host: config.docker_host.clone(),
            scratch_root: config.scratch_root.clone(),
            scanner: SecurityScanner::new(config.security_scan, config.banned_keywords.clone()),
            permits: Semaphore::new(config.sandbox_concurrency),
            max_timeout: config.max_timeout,
            max_memory_bytes: config.max_memory_bytes,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(host) = &self.docker_host {
            cmd.env("DOCKER_HOST", host);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    /// Arguments for one phase container. The compile phase keeps a
    /// writable root so toolchains can use their caches; the run phase
    /// locks the root down.
    fn phase_args(
        &self,
        name: &str,
        language: &LanguageConfig,
        workspace_dir: &str,
        memory_bytes: u64,
        shell_command: &str,
        read_only_root: bool,
    ) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--network".to_string(),
            "none".to_string(),
            "--cap-drop".to_string(),
            "ALL".to_string(),
            "--cap-add".to_string(),
            "SETUID".to_string(),
            "--cap-add".to_string(),
            "SETGID".to_string(),
            "--security-opt".to_string(),
            "no-new-privileges".to_string(),
            "--cpus".to_string(),
            CPU_LIMIT.to_string(),
            "--memory".to_string(),
            format!("{memory_bytes}b"),
            "--memory-swap".to_string(),
            format!("{memory_bytes}b"),
            "--pids-limit".to_string(),
            PIDS_LIMIT.to_string(),
            "--ulimit".to_string(),
            NOFILE_ULIMIT.to_string(),
            "--volume".to_string(),
            format!("{workspace_dir}:/workspace:rw"),
            "--workdir".to_string(),
            "/workspace".to_string(),
        ];
        if read_only_root {
            args.push("--read-only".to_string());
        }
        args.push(language.image.to_string());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(shell_command.to_string());
        args
    }

    /// Run one container to completion or deadline, then inspect and
    /// force-remove it. Returns infrastructure errors only; user-visible
    /// outcomes are in the returned output.
    async fn run_container(
        &self,
        name: &str,
        args: Vec<String>,
        deadline: Duration,
    ) -> Result<ContainerOutput, SandboxError> {
        let started = Instant::now();

        let mut child = self
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SandboxError::RuntimeUnavailable(e.to_string()))?;

        let stdout_task = read_capped(child.stdout.take());
        let stderr_task = read_capped(child.stderr.take());

        let timed_out = tokio::select! {
            status = child.wait() => match status {
                Ok(_) => false,
                Err(err) => {
                    // Teardown still runs on the error path.
                    self.remove_container(name).await;
                    return Err(SandboxError::Container(err.to_string()));
                }
            },
            _ = tokio::time::sleep(deadline) => {
                self.kill_container(name).await;
                // Reap the CLI process after the container dies.
                let _ = child.wait().await;
                true
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let duration_ms = started.elapsed().as_millis() as u64;

        let (oom_killed, exit_code) = self.inspect_container(name).await;
        self.remove_container(name).await;

        Ok(ContainerOutput {
            stdout,
            stderr,
            exit_code,
            oom_killed,
            timed_out,
            duration_ms,
        })
    }

    async fn kill_container(&self, name: &str) {
        let _ = self
            .command()
            .args(["kill", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }

    async fn remove_container(&self, name: &str) {
        let result = self
            .command()
            .args(["rm", "-f", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(err) = result {
            tracing::warn!(container = name, error = %err, "container removal failed");
        }
    }

    /// Read the OOM flag and exit code. Unreachable inspection falls back
    /// to a generic failure code.
    async fn inspect_container(&self, name: &str) -> (bool, i32) {
        let output = self
            .command()
            .args([
                "inspect",
                "--format",
                "{{.State.OOMKilled}}:{{.State.ExitCode}}",
                name,
            ])
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                let text = String::from_utf8_lossy(&out.stdout);
                let mut parts = text.trim().split(':');
                let oom = parts.next() == Some("true");
                let exit = parts
                    .next()
                    .and_then(|s| s.parse::<i32>().ok())
                    .unwrap_or(-1);
                (oom, exit)
            }
            _ => (false, -1),
        }
    }

    fn sanitize(&self, text: &str, workspace_dir: &str) -> String {
        let mut out = text.replace(workspace_dir, PATH_PLACEHOLDER);
        if let Some(root) = self.scratch_root.to_str() {
            out = out.replace(root, PATH_PLACEHOLDER);
        }
        out
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        let language = language_config(&request.language)
            .ok_or_else(|| SandboxError::UnsupportedLanguage(request.language.clone()))?;

        if let ScanOutcome::Blocked(reason) = self.scanner.scan(language.tag, &request.code) {
            tracing::warn!(
                execution_id = %request.execution_id,
                language = language.tag,
                %reason,
                "security scan rejected submission"
            );
            return Ok(ExecutionResult::rejected(
                ExecutionStatus::SecurityBlock,
                format!("submission rejected by security scan: {reason}"),
            ));
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| SandboxError::Container(e.to_string()))?;

        let deadline = Duration::from_millis(request.timeout_ms).min(self.max_timeout);
        let memory = request.memory_bytes.min(self.max_memory_bytes);

        let workspace = Workspace::materialize(
            &self.scratch_root,
            request.execution_id,
            language,
            &request.code,
            &request.stdin,
        )
        .await?;

        let result = self
            .run_phases(&request, language, &workspace, deadline, memory)
            .await;

        workspace.cleanup().await;
        result
    }

    async fn preflight(&self) -> Result<(), SandboxError> {
        let probe = self
            .command()
            .args(["version", "--format", "{{.Server.Version}}"])
            .output();

        match tokio::time::timeout(Duration::from_secs(5), probe).await {
            Ok(Ok(out)) if out.status.success() => {
                tracing::info!(
                    version = %String::from_utf8_lossy(&out.stdout).trim(),
                    "container runtime reachable"
                );
                Ok(())
            }
            Ok(Ok(out)) => Err(SandboxError::RuntimeUnavailable(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            )),
            Ok(Err(err)) => Err(SandboxError::RuntimeUnavailable(err.to_string())),
            Err(_) => Err(SandboxError::RuntimeUnavailable(
                "docker version probe timed out".to_string(),
            )),
        }
    }
}

impl DockerSandbox {
    async fn run_phases(
        &self,
        request: &ExecutionRequest,
        language: &LanguageConfig,
        workspace: &Workspace,
        deadline: Duration,
        memory: u64,
    ) -> Result<ExecutionResult, SandboxError> {
        let workspace_dir = workspace.dir().to_string_lossy().to_string();
        let class = java_class_name(&request.code);

        // Compile phase, for languages that have one.
        let mut compilation_time_ms = None;
        if let Some(compile_template) = language.compile_command {
            let compile_cmd = expand_class(compile_template, class);
            let name = format!("cc-compile-{}", request.execution_id);
            let args =
                self.phase_args(&name, language, &workspace_dir, memory, &compile_cmd, false);

            let out = self.run_container(&name, args, deadline).await?;
            compilation_time_ms = Some(out.duration_ms);

            if out.timed_out {
                return Ok(ExecutionResult {
                    status: ExecutionStatus::Timeout,
                    stdout: String::new(),
                    stderr: "compilation exceeded the time limit".to_string(),
                    exit_code: TIMEOUT_EXIT_CODE,
                    execution_time_ms: 0,
                    memory_bytes: 0,
                    compilation_time_ms,
                    compilation_output: None,
                });
            }
            if out.exit_code != 0 {
                let stderr = self.sanitize(&out.stderr, &workspace_dir);
                return Ok(ExecutionResult {
                    status: ExecutionStatus::CompilationError,
                    stdout: String::new(),
                    stderr: stderr.clone(),
                    exit_code: out.exit_code,
                    execution_time_ms: 0,
                    memory_bytes: 0,
                    compilation_time_ms,
                    compilation_output: Some(stderr),
                });
            }
        }

        // Run phase.
        let run_cmd = expand_class(language.run_command, class);
        let shell_command = if workspace.has_stdin() {
            format!("{run_cmd} < {INPUT_FILE}")
        } else {
            run_cmd
        };
        let name = format!("cc-run-{}", request.execution_id);
        let args = self.phase_args(&name, language, &workspace_dir, memory, &shell_command, true);

        let out = self.run_container(&name, args, deadline).await?;

        let status = classify(&out);
        let exit_code = match status {
            ExecutionStatus::Timeout => TIMEOUT_EXIT_CODE,
            _ => out.exit_code,
        };

        Ok(ExecutionResult {
            status,
            stdout: self.sanitize(&out.stdout, &workspace_dir),
            stderr: self.sanitize(&out.stderr, &workspace_dir),
            exit_code,
            execution_time_ms: out.duration_ms,
            memory_bytes: if out.oom_killed { memory } else { 0 },
            compilation_time_ms,
            compilation_output: None,
        })
    }
}

/// Raw outcome of one container run.
#[derive(Debug, Clone)]
struct ContainerOutput {
    stdout: String,
    stderr: String,
    exit_code: i32,
    oom_killed: bool,
    timed_out: bool,
    duration_ms: u64,
}

/// Deadline beats OOM beats exit-code classification.
fn classify(out: &ContainerOutput) -> ExecutionStatus {
    if out.timed_out {
        ExecutionStatus::Timeout
    } else if out.oom_killed {
        ExecutionStatus::MemoryLimit
    } else if out.exit_code == 0 {
        ExecutionStatus::Completed
    } else {
        ExecutionStatus::RuntimeError
    }
}

/// Drain a stream into a string, truncating at [`MAX_STREAM_BYTES`].
fn read_capped<R>(reader: Option<R>) -> tokio::task::JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return String::new();
        };
        let mut buf = Vec::with_capacity(4096);
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = MAX_STREAM_BYTES.saturating_sub(buf.len());
                    buf.extend_from_slice(&chunk[..n.min(room)]);
                    if room <= n {
                        // Keep draining so the child never blocks on a full
                        // pipe, but discard the excess.
                        while let Ok(n) = reader.read(&mut chunk).await {
                            if n == 0 {
                                break;
                            }
                        }
                        break;
                    }
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}
