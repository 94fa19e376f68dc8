//! Process supervisor: registry of long-running child processes.
//!
//! At most one live entry exists per `(repository_id, role)`. Starting onto
//! an occupied key signals the existing process first, waits (bounded) for
//! it to exit, then launches the replacement — this serializes "start
//! server" operations per key without an explicit lock.
//!
//! Exit-driven cleanup is delivered as an explicit `ExitEvent` over an mpsc
//! channel to a reaper task instead of mutating the table inside the spawn
//! callback, which avoids races between "check if running" and "exit just
//! fired". The reaper only removes an entry when the recorded pid matches
//! the event, so a replacement started in the meantime survives.
//!
//! Readiness is delegated to the port scanner rather than output-banner
//! parsing; frameworks emit inconsistent "ready" messages.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::errors::HostError;

/// Role a managed process plays for its repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    /// Framework dev server (vite, next, flask, ...).
    DevServer,
    /// Plain static file server.
    StaticServer,
}

impl ProcessRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessRole::DevServer => "dev-server",
            ProcessRole::StaticServer => "static-server",
        }
    }
}

impl std::fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A supervised, named, long-running child process.
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    pub repository_id: String,
    pub role: ProcessRole,
    pub pid: u32,
    pub port: u16,
    pub started_at: DateTime<Utc>,
    pub command_line: String,
    pub working_dir: PathBuf,
}

/// Delivered by the per-child exit observer to the reaper task.
#[derive(Debug)]
struct ExitEvent {
    repository_id: String,
    role: ProcessRole,
    pid: u32,
}

type ProcessTable = Arc<Mutex<HashMap<(String, ProcessRole), ManagedProcess>>>;

/// Registry of repository-id → running child process.
#[derive(Debug)]
pub struct ProcessSupervisor {
    table: ProcessTable,
    exit_tx: mpsc::UnboundedSender<ExitEvent>,
    stop_grace: Duration,
}

impl ProcessSupervisor {
    /// Create the supervisor and spawn its reaper task.
    pub fn new(stop_grace: Duration) -> Self {
        let table: ProcessTable = Arc::new(Mutex::new(HashMap::new()));
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<ExitEvent>();

        let reaper_table = table.clone();
        tokio::spawn(async move {
            while let Some(event) = exit_rx.recv().await {
                let key = (event.repository_id.clone(), event.role);
                let mut table = reaper_table.lock().expect("process table lock");
                match table.get(&key) {
                    Some(entry) if entry.pid == event.pid => {
                        table.remove(&key);
                        tracing::info!(
                            repository = event.repository_id,
                            role = %event.role,
                            pid = event.pid,
                            "managed process exited, entry removed"
                        );
                    }
                    // A replacement with a different pid already owns the
                    // key, or the entry was removed by an explicit stop.
                    _ => {}
                }
            }
        });

        Self {
            table,
            exit_tx,
            stop_grace,
        }
    }

    /// Start a managed process, replacing any existing holder of the key.
    pub async fn start(
        &self,
        repository_id: &str,
        role: ProcessRole,
        command_line: &str,
        working_dir: &Path,
        port: u16,
    ) -> Result<ManagedProcess, HostError> {
        if self.get(repository_id, role).is_some() {
            tracing::info!(
                repository = repository_id,
                role = %role,
                "replacing existing managed process"
            );
            self.stop(repository_id, role).await;
        }

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(command_line)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .env("PORT", port.to_string())
            .kill_on_drop(false);
        // Own process group so SIGTERM reaches forked grandchildren that
        // may hold the actual listening socket.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(HostError::Spawn)?;
        let pid = child
            .id()
            .ok_or_else(|| HostError::Other(anyhow::anyhow!("spawned process has no pid")))?;

        let managed = ManagedProcess {
            repository_id: repository_id.to_string(),
            role,
            pid,
            port,
            started_at: Utc::now(),
            command_line: command_line.to_string(),
            working_dir: working_dir.to_path_buf(),
        };

        self.table
            .lock()
            .expect("process table lock")
            .insert((repository_id.to_string(), role), managed.clone());

        tracing::info!(
            repository = repository_id,
            role = %role,
            pid,
            port,
            command = command_line,
            "started managed process"
        );

        // Exit observer: report through the channel regardless of exit code
        // so a crashed process is never mistaken for running.
        let exit_tx = self.exit_tx.clone();
        let repo = repository_id.to_string();
        tokio::spawn(async move {
            let status = child.wait().await;
            tracing::debug!(repository = repo, pid, ?status, "managed process wait returned");
            let _ = exit_tx.send(ExitEvent {
                repository_id: repo,
                role,
                pid,
            });
        });

        Ok(managed)
    }

    /// Stop a managed process: graceful signal, bounded wait, forced kill.
    /// Returns the stopped entry, or `None` if the key was vacant.
    pub async fn stop(&self, repository_id: &str, role: ProcessRole) -> Option<ManagedProcess> {
        let key = (repository_id.to_string(), role);
        let entry = self
            .table
            .lock()
            .expect("process table lock")
            .get(&key)
            .cloned()?;

        signal_group(entry.pid, nix::sys::signal::Signal::SIGTERM);

        // Give the reaper a chance to observe the exit before escalating.
        let deadline = tokio::time::Instant::now() + self.stop_grace;
        loop {
            if self.get(repository_id, role).map(|p| p.pid) != Some(entry.pid) {
                return Some(entry);
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        tracing::warn!(
            repository = repository_id,
            role = %role,
            pid = entry.pid,
            "graceful stop timed out, sending SIGKILL"
        );
        signal_group(entry.pid, nix::sys::signal::Signal::SIGKILL);

        // The exit observer will deliver the event shortly; drop the entry
        // now so callers see a vacant key immediately.
        self.table.lock().expect("process table lock").remove(&key);
        Some(entry)
    }

    /// Look up the live entry for a key.
    pub fn get(&self, repository_id: &str, role: ProcessRole) -> Option<ManagedProcess> {
        self.table
            .lock()
            .expect("process table lock")
            .get(&(repository_id.to_string(), role))
            .cloned()
    }

    /// Snapshot of all live entries, ordered by repository id.
    pub fn list(&self) -> Vec<ManagedProcess> {
        let mut entries: Vec<ManagedProcess> = self
            .table
            .lock()
            .expect("process table lock")
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.repository_id.cmp(&b.repository_id));
        entries
    }
}

/// Signal the whole process group; falls back to the single pid if the
/// group is already gone.
pub(crate) fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::unistd::Pid;
    let target = Pid::from_raw(pid as i32);
    if nix::sys::signal::killpg(target, signal).is_err() {
        let _ = nix::sys::signal::kill(target, signal);
    }
}
