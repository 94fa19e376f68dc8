//! Working-directory registry: `cd` continuity across stateless requests.
//!
//! Each repository id maps to a current working directory under the host
//! project root. The registry is deliberately not durable; the host is
//! ephemeral and torn down by the idle governor, so loss on restart is
//! acceptable.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::errors::HostError;

/// Repository id used when the client did not select one.
pub const DEFAULT_REPOSITORY: &str = "default";

/// Working-directory state for one cloned project on the host.
#[derive(Debug, Clone)]
pub struct RepoContext {
    pub repository_id: String,
    pub working_dir: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Maps repository id to its current working directory.
#[derive(Debug)]
pub struct WorkdirRegistry {
    project_root: PathBuf,
    entries: Mutex<HashMap<String, RepoContext>>,
}

impl WorkdirRegistry {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Resolve the working directory for a repository, synthesizing and
    /// creating a default directory under the project root on first
    /// reference. An entry whose directory vanished is evicted and recreated.
    pub fn resolve(&self, repository_id: &str) -> Result<PathBuf, HostError> {
        let mut entries = self.entries.lock().expect("workdir registry lock");

        if let Some(ctx) = entries.get(repository_id) {
            if ctx.working_dir.is_dir() {
                return Ok(ctx.working_dir.clone());
            }
            tracing::warn!(
                repository = repository_id,
                dir = %ctx.working_dir.display(),
                "working directory vanished, evicting entry"
            );
            entries.remove(repository_id);
        }

        let dir = self.project_root.join(sanitize_id(repository_id));
        std::fs::create_dir_all(&dir).map_err(|e| {
            HostError::Other(anyhow::anyhow!(
                "Failed to create working directory {}: {e}",
                dir.display()
            ))
        })?;

        entries.insert(
            repository_id.to_string(),
            RepoContext {
                repository_id: repository_id.to_string(),
                working_dir: dir.clone(),
                created_at: Utc::now(),
            },
        );
        tracing::debug!(repository = repository_id, dir = %dir.display(), "registered working directory");
        Ok(dir)
    }

    /// Persist a new working directory for a repository. The target must be
    /// an existing directory; the stored entry is untouched on failure.
    pub fn set(&self, repository_id: &str, path: &Path) -> Result<(), HostError> {
        if !path.is_dir() {
            return Err(HostError::Path {
                path: path.display().to_string(),
            });
        }
        let mut entries = self.entries.lock().expect("workdir registry lock");
        entries
            .entry(repository_id.to_string())
            .and_modify(|ctx| ctx.working_dir = path.to_path_buf())
            .or_insert_with(|| RepoContext {
                repository_id: repository_id.to_string(),
                working_dir: path.to_path_buf(),
                created_at: Utc::now(),
            });
        Ok(())
    }

    /// The synthesized default directory for a repository id, whether or
    /// not it exists yet.
    pub fn default_dir(&self, repository_id: &str) -> PathBuf {
        self.project_root.join(sanitize_id(repository_id))
    }

    /// Current directory for a repository without creating one.
    pub fn current(&self, repository_id: &str) -> Option<PathBuf> {
        self.entries
            .lock()
            .expect("workdir registry lock")
            .get(repository_id)
            .map(|ctx| ctx.working_dir.clone())
    }

    /// Drop the entry for a repository (fresh clone or host teardown).
    pub fn evict(&self, repository_id: &str) {
        let removed = self
            .entries
            .lock()
            .expect("workdir registry lock")
            .remove(repository_id);
        if removed.is_some() {
            tracing::debug!(repository = repository_id, "evicted working directory entry");
        }
    }
}

/// Keep repository ids filesystem-safe: no separators, no parent escapes.
fn sanitize_id(repository_id: &str) -> String {
    let cleaned: String = repository_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        DEFAULT_REPOSITORY.to_string()
    } else {
        cleaned
    }
}
