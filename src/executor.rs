//! Command execution orchestrator.
//!
//! Turns `{command, repository_id}` into a unified [`ExecutionResult`].
//! Classification is dispatched exhaustively; every failure class (spawn,
//! timeout, validation, guard) is converted into a well-formed failed
//! result at this boundary. Nothing escapes as an unhandled fault.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::classify::{self, CommandClass, ServerKind};
use crate::config::HostConfig;
use crate::errors::HostError;
use crate::ports;
use crate::supervisor::{ProcessRole, ProcessSupervisor, signal_group};
use crate::workdir::{DEFAULT_REPOSITORY, WorkdirRegistry};

/// Head and tail window kept when truncating install output.
const TRUNCATE_WINDOW: usize = 2000;

/// Unified result returned by every execution, synchronous or background.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub exit_code: i32,
    pub working_dir: String,
    #[serde(rename = "repository")]
    pub repository_id: String,
    pub exposed_ports: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
    #[serde(rename = "executionTime")]
    pub execution_time_ms: u64,
}

/// Output of one synchronous child process run.
struct RunOutput {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

/// Orchestrates classification, directory state, process supervision, and
/// port discovery for one host session.
pub struct CommandExecutor {
    config: HostConfig,
    workdirs: Arc<WorkdirRegistry>,
    supervisor: Arc<ProcessSupervisor>,
}

impl CommandExecutor {
    pub fn new(
        config: HostConfig,
        workdirs: Arc<WorkdirRegistry>,
        supervisor: Arc<ProcessSupervisor>,
    ) -> Self {
        Self {
            config,
            workdirs,
            supervisor,
        }
    }

    pub fn workdirs(&self) -> &Arc<WorkdirRegistry> {
        &self.workdirs
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Execute a command for a repository. Never returns an error; all
    /// failures become an `ExecutionResult` with `success=false`.
    pub async fn execute(&self, command: &str, repository_id: &str) -> ExecutionResult {
        let started = tokio::time::Instant::now();
        let command = command.trim();
        let repository_id = if repository_id.trim().is_empty() {
            DEFAULT_REPOSITORY
        } else {
            repository_id.trim()
        };

        if command.is_empty() {
            return self.failure(
                HostError::Validation("command must not be empty".into()),
                repository_id,
                String::new(),
                started,
            );
        }

        // A fresh clone replaces the repository contents wholesale; drop the
        // cached directory so it is re-synthesized under the project root.
        if classify::is_repository_reset(command) {
            tracing::info!(repository = repository_id, "repository reset marker, evicting context");
            self.workdirs.evict(repository_id);
        }

        let working_dir = match self.workdirs.resolve(repository_id) {
            Ok(dir) => dir,
            Err(err) => return self.failure(err, repository_id, String::new(), started),
        };

        let outcome = match classify::classify(command) {
            CommandClass::ChangeDirectory { target } => {
                self.change_directory(repository_id, &working_dir, &target)
            }
            CommandClass::DependencyInstall => {
                self.dependency_install(command, repository_id, &working_dir)
                    .await
            }
            CommandClass::ServerLaunch { port, kind } => {
                self.server_launch(command, repository_id, &working_dir, port, kind)
                    .await
            }
            CommandClass::Plain => self.plain(command, repository_id, &working_dir).await,
        };

        match outcome {
            Ok(mut result) => {
                result.execution_time_ms = started.elapsed().as_millis() as u64;
                result
            }
            Err(err) => self.failure(err, repository_id, working_dir.display().to_string(), started),
        }
    }

    // ── ChangeDirectory ───────────────────────────────────────────────

    fn change_directory(
        &self,
        repository_id: &str,
        current: &Path,
        target: &str,
    ) -> Result<ExecutionResult, HostError> {
        let candidate: PathBuf = if target.is_empty() {
            // Bare `cd` returns to the repository default directory.
            self.workdirs.default_dir(repository_id)
        } else if target == ".." {
            current
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| HostError::Path {
                    path: target.to_string(),
                })?
        } else if Path::new(target).is_absolute() {
            PathBuf::from(target)
        } else {
            current.join(target)
        };

        let resolved = candidate.canonicalize().map_err(|_| HostError::Path {
            path: target.to_string(),
        })?;
        if !resolved.is_dir() {
            return Err(HostError::Path {
                path: target.to_string(),
            });
        }

        self.workdirs.set(repository_id, &resolved)?;
        Ok(ExecutionResult {
            success: true,
            output: String::new(),
            error: String::new(),
            exit_code: 0,
            working_dir: resolved.display().to_string(),
            repository_id: repository_id.to_string(),
            exposed_ports: Vec::new(),
            web_url: None,
            execution_time_ms: 0,
        })
    }

    // ── DependencyInstall ─────────────────────────────────────────────

    async fn dependency_install(
        &self,
        command: &str,
        repository_id: &str,
        working_dir: &Path,
    ) -> Result<ExecutionResult, HostError> {
        let mut result = self.plain(command, repository_id, working_dir).await?;
        // Install logs can run to megabytes; keep bounded head/tail windows
        // so the diagnostic text still reaches the client.
        result.output = truncate_head_tail(&result.output, TRUNCATE_WINDOW);
        result.error = truncate_head_tail(&result.error, TRUNCATE_WINDOW);
        Ok(result)
    }

    // ── ServerLaunch ──────────────────────────────────────────────────

    async fn server_launch(
        &self,
        command: &str,
        repository_id: &str,
        working_dir: &Path,
        port: Option<u16>,
        kind: ServerKind,
    ) -> Result<ExecutionResult, HostError> {
        if repository_id == DEFAULT_REPOSITORY {
            return Err(HostError::GuardRejection(
                "no repository selected; clone or select a repository first".into(),
            ));
        }
        if directory_is_empty(working_dir) {
            return Err(HostError::GuardRejection(format!(
                "repository '{repository_id}' has an empty working directory; clone it first"
            )));
        }

        let role = match kind {
            ServerKind::Static => ProcessRole::StaticServer,
            ServerKind::Node | ServerKind::Python => ProcessRole::DevServer,
        };
        let port = port.unwrap_or_else(|| kind.default_port());

        if let Some(existing) = self.supervisor.get(repository_id, role) {
            if existing.working_dir == working_dir {
                // Idempotent: same repository, same directory, same role.
                let exposed = ports::scan_listening_ports();
                return Ok(ExecutionResult {
                    success: true,
                    output: format!(
                        "Server already running on port {} (pid {})",
                        existing.port, existing.pid
                    ),
                    error: String::new(),
                    exit_code: 0,
                    working_dir: working_dir.display().to_string(),
                    repository_id: repository_id.to_string(),
                    exposed_ports: exposed.into_iter().collect(),
                    web_url: Some(self.config.proxy_url(existing.port)),
                    execution_time_ms: 0,
                });
            }
            // Directory changed; the supervisor stops the old process before
            // the replacement starts.
            tracing::info!(
                repository = repository_id,
                old_dir = %existing.working_dir.display(),
                new_dir = %working_dir.display(),
                "server directory changed, restarting"
            );
        }

        let managed = self
            .supervisor
            .start(repository_id, role, command, working_dir, port)
            .await?;

        // Bounded readiness poll: scan every 250ms until the port shows up
        // or the startup window elapses. Servers that take longer still get
        // an optimistic success with their proxy URL.
        let mut exposed = ports::scan_listening_ports();
        let deadline = tokio::time::Instant::now() + self.config.startup_window;
        while !exposed.contains(&managed.port) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(250)).await;
            exposed = ports::scan_listening_ports();
        }

        let ready = exposed.contains(&managed.port);
        tracing::info!(
            repository = repository_id,
            port = managed.port,
            ready,
            "server launch complete"
        );

        Ok(ExecutionResult {
            success: true,
            output: if ready {
                format!("Server listening on port {}", managed.port)
            } else {
                format!(
                    "Server starting on port {} (not yet accepting connections)",
                    managed.port
                )
            },
            error: String::new(),
            exit_code: 0,
            working_dir: working_dir.display().to_string(),
            repository_id: repository_id.to_string(),
            exposed_ports: exposed.into_iter().collect(),
            web_url: Some(self.config.proxy_url(managed.port)),
            execution_time_ms: 0,
        })
    }

    // ── Plain ─────────────────────────────────────────────────────────

    async fn plain(
        &self,
        command: &str,
        repository_id: &str,
        working_dir: &Path,
    ) -> Result<ExecutionResult, HostError> {
        let run = self.run_shell(command, working_dir).await?;

        // A plain command may have started a background server the pattern
        // matcher did not recognize; always scan afterwards.
        let exposed = ports::scan_listening_ports();
        let web_url = exposed
            .iter()
            .next()
            .map(|&port| self.config.proxy_url(port));

        Ok(ExecutionResult {
            success: run.exit_code == 0,
            output: run.stdout,
            error: run.stderr,
            exit_code: run.exit_code,
            working_dir: working_dir.display().to_string(),
            repository_id: repository_id.to_string(),
            exposed_ports: exposed.into_iter().collect(),
            web_url,
            execution_time_ms: 0,
        })
    }

    /// Run a command under `sh -c`, bounded by the configured wall-clock
    /// cap. On timeout the child's process group is force-killed.
    async fn run_shell(&self, command: &str, working_dir: &Path) -> Result<RunOutput, HostError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(HostError::Spawn)?;
        let pid = child.id();

        match timeout(self.config.command_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(RunOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
            }),
            Ok(Err(e)) => Err(HostError::Other(anyhow::anyhow!(
                "Failed to collect command output: {e}"
            ))),
            Err(_) => {
                if let Some(pid) = pid {
                    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
                }
                Err(HostError::Timeout {
                    secs: self.config.command_timeout.as_secs(),
                })
            }
        }
    }

    fn failure(
        &self,
        err: HostError,
        repository_id: &str,
        working_dir: String,
        started: tokio::time::Instant,
    ) -> ExecutionResult {
        let working_dir = if working_dir.is_empty() {
            self.workdirs
                .current(repository_id)
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        } else {
            working_dir
        };
        tracing::debug!(repository = repository_id, error = %err, "execution failed");
        ExecutionResult {
            success: false,
            output: String::new(),
            error: err.to_string(),
            exit_code: err.exit_code(),
            working_dir,
            repository_id: repository_id.to_string(),
            exposed_ports: Vec::new(),
            web_url: None,
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

fn directory_is_empty(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

/// Keep the first and last `window` characters, replacing the middle with a
/// marker. No-op when the text already fits.
fn truncate_head_tail(text: &str, window: usize) -> String {
    if text.chars().count() <= window * 2 {
        return text.to_string();
    }
    let head: String = text.chars().take(window).collect();
    let tail: String = text
        .chars()
        .rev()
        .take(window)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let omitted = text.chars().count() - window * 2;
    format!("{head}\n... [{omitted} characters truncated] ...\n{tail}")
}
