//! Runtime configuration for the host.
//!
//! Settings merge in precedence order: built-in defaults, then an optional
//! `outpost.toml` next to the project root, then `OUTPOST_*` environment
//! variables, then CLI flags. `.env` files are loaded by `main` before this
//! module reads the environment.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default wall-clock cap for a synchronous command (30 minutes).
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30 * 60;
/// Default inactivity window before the host terminates itself (10 minutes).
const DEFAULT_IDLE_WINDOW_SECS: u64 = 10 * 60;
/// Default time to wait for a freshly launched server to open its port.
const DEFAULT_STARTUP_WINDOW_SECS: u64 = 5;
/// Default grace between SIGTERM and SIGKILL when stopping a server.
const DEFAULT_STOP_GRACE_SECS: u64 = 5;

/// Optional `outpost.toml` overrides. All keys optional.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    project_root: Option<PathBuf>,
    gateway_base: Option<String>,
    command_timeout_secs: Option<u64>,
    idle_window_secs: Option<u64>,
    startup_window_secs: Option<u64>,
    stop_grace_secs: Option<u64>,
}

/// Resolved host configuration shared across subsystems.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Root directory under which every repository working tree lives.
    pub project_root: PathBuf,
    /// Public base URL the mobile client can reach this host on; proxy URLs
    /// are minted as `{gateway_base}/proxy/{port}`.
    pub gateway_base: String,
    /// Wall-clock cap for synchronous command execution.
    pub command_timeout: Duration,
    /// Inactivity window before the idle governor shuts the host down.
    pub idle_window: Duration,
    /// How long to keep polling the port scanner after a server launch.
    pub startup_window: Duration,
    /// Grace period between graceful and forced kill of a managed process.
    pub stop_grace: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            gateway_base: "http://localhost:8080".to_string(),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            idle_window: Duration::from_secs(DEFAULT_IDLE_WINDOW_SECS),
            startup_window: Duration::from_secs(DEFAULT_STARTUP_WINDOW_SECS),
            stop_grace: Duration::from_secs(DEFAULT_STOP_GRACE_SECS),
        }
    }
}

fn default_project_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("workspaces")
}

impl HostConfig {
    /// Load configuration, applying file and environment overrides on top of
    /// the defaults. CLI flags are applied by the caller afterwards.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let file_path = std::env::var("OUTPOST_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("outpost.toml"));
        if file_path.exists() {
            let raw = std::fs::read_to_string(&file_path)
                .with_context(|| format!("Failed to read {}", file_path.display()))?;
            let file: FileConfig = toml::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", file_path.display()))?;
            config.apply_file(file);
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(root) = file.project_root {
            self.project_root = root;
        }
        if let Some(base) = file.gateway_base {
            self.gateway_base = base;
        }
        if let Some(secs) = file.command_timeout_secs {
            self.command_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.idle_window_secs {
            self.idle_window = Duration::from_secs(secs);
        }
        if let Some(secs) = file.startup_window_secs {
            self.startup_window = Duration::from_secs(secs);
        }
        if let Some(secs) = file.stop_grace_secs {
            self.stop_grace = Duration::from_secs(secs);
        }
    }

    fn apply_env(&mut self) {
        if let Ok(root) = std::env::var("OUTPOST_PROJECT_ROOT") {
            self.project_root = PathBuf::from(root);
        }
        if let Ok(base) = std::env::var("OUTPOST_GATEWAY_BASE") {
            self.gateway_base = base;
        }
        if let Some(secs) = env_secs("OUTPOST_COMMAND_TIMEOUT_SECS") {
            self.command_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs("OUTPOST_IDLE_WINDOW_SECS") {
            self.idle_window = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs("OUTPOST_STARTUP_WINDOW_SECS") {
            self.startup_window = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs("OUTPOST_STOP_GRACE_SECS") {
            self.stop_grace = Duration::from_secs(secs);
        }
    }

    /// Proxy URL the client should use for a discovered port.
    pub fn proxy_url(&self, port: u16) -> String {
        format!("{}/proxy/{}", self.gateway_base.trim_end_matches('/'), port)
    }

    /// Ensure the project root exists so repositories can be created under it.
    pub fn ensure_project_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.project_root).with_context(|| {
            format!(
                "Failed to create project root {}",
                self.project_root.display()
            )
        })
    }
}

fn env_secs(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}
