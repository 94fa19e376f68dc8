//! Full-preview build-and-deploy pipeline, consumed via its interface.
//!
//! Heavier previews go through a managed build service and a managed
//! container-revision service: submit a source archive, poll the build to
//! completion, then create or update a revision serving the built image.
//! The concrete cloud backends live outside this crate; only the traits and
//! the linear submit/poll orchestration are defined here.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

/// Opaque identifier handed back by the build service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildId(pub String);

/// Build progress as reported by `poll`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Queued,
    Building,
    Succeeded { image: String },
    Failed { reason: String },
}

/// Resource limits requested for a preview revision.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    pub cpu_millis: u32,
    pub memory_mb: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_millis: 1000,
            memory_mb: 512,
        }
    }
}

/// Image-build service: `submit_build(sourceArchive) -> buildId`,
/// `poll(buildId) -> status`.
#[async_trait]
pub trait BuildService: Send + Sync {
    async fn submit_build(&self, source_archive: &Path) -> Result<BuildId>;
    async fn poll(&self, id: &BuildId) -> Result<BuildStatus>;
}

/// Managed container-revision service:
/// `create_or_update_revision(image, port, limits) -> serviceUrl`.
#[async_trait]
pub trait RevisionService: Send + Sync {
    async fn create_or_update_revision(
        &self,
        image: &str,
        port: u16,
        limits: &ResourceLimits,
    ) -> Result<String>;
}

/// How the deploy driver paces and bounds its poll loop.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub poll_interval: Duration,
    pub build_timeout: Duration,
    pub port: u16,
    pub limits: ResourceLimits,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            build_timeout: Duration::from_secs(15 * 60),
            port: 8080,
            limits: ResourceLimits::default(),
        }
    }
}

/// Linear submit → poll → revision orchestration producing a durable
/// public URL for the built preview.
pub async fn deploy_preview(
    builds: &dyn BuildService,
    revisions: &dyn RevisionService,
    source_archive: &Path,
    options: &DeployOptions,
) -> Result<String> {
    let build_id = builds.submit_build(source_archive).await?;
    tracing::info!(build = %build_id.0, "submitted preview build");

    let deadline = tokio::time::Instant::now() + options.build_timeout;
    let image = loop {
        match builds.poll(&build_id).await? {
            BuildStatus::Succeeded { image } => break image,
            BuildStatus::Failed { reason } => bail!("Preview build failed: {reason}"),
            BuildStatus::Queued | BuildStatus::Building => {
                if tokio::time::Instant::now() >= deadline {
                    bail!(
                        "Preview build {} did not finish within {}s",
                        build_id.0,
                        options.build_timeout.as_secs()
                    );
                }
                tokio::time::sleep(options.poll_interval).await;
            }
        }
    };

    let url = revisions
        .create_or_update_revision(&image, options.port, &options.limits)
        .await?;
    tracing::info!(build = %build_id.0, url, "preview revision deployed");
    Ok(url)
}

/// Collect the files that belong in a source archive for the build service.
/// Dependency trees, VCS metadata, and hidden files are the build's job to
/// reproduce, not ours to upload.
pub fn collect_source_files(source_dir: &Path) -> Result<Vec<PathBuf>> {
    if !source_dir.is_dir() {
        return Err(anyhow!(
            "Source directory {} does not exist",
            source_dir.display()
        ));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(source_dir)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded(e.file_name().to_string_lossy().as_ref()))
    {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

fn is_excluded(name: &str) -> bool {
    name == "node_modules" || name == "target" || name.starts_with('.')
}
