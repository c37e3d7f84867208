//! Request-facing operations: start, inspect, list and delete jobs.
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::Config;
use crate::download;
use crate::engine::DownloadEngine;
use crate::error::JobError;
use crate::models::{Job, JobList};
use crate::runner::JobRunner;
use crate::store::JobStore;
use crate::validate;

/// LEARNING: Everything here is behind `Arc`, so cloning the service for
/// each request (axum does this for `State`) only bumps reference counts.
#[derive(Clone)]
pub struct JobService {
    store: Arc<JobStore>,
    engine: Arc<dyn DownloadEngine>,
    config: Arc<Config>,
    permits: Option<Arc<Semaphore>>,
}

impl JobService {
    pub fn new(config: Config, engine: Arc<dyn DownloadEngine>) -> Self {
        let permits = config
            .max_concurrent
            .map(|n| Arc::new(Semaphore::new(n)));
        Self {
            store: Arc::new(JobStore::new()),
            engine,
            config: Arc::new(config),
            permits,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Validates `url`, records a queued job and starts its runner in the
    /// background. Returns without waiting for any network I/O.
    pub fn start_download(&self, url: &str) -> Result<Job, JobError> {
        if !validate::is_valid_url(url) {
            return Err(JobError::InvalidUrl);
        }

        let id = self.store.create();
        let job = self.store.get(id)?;

        JobRunner::new(
            id,
            url.to_string(),
            Arc::clone(&self.store),
            Arc::clone(&self.engine),
            self.config.data_dir.clone(),
            self.config.remux_timeout,
        )
        .spawn(self.permits.clone());

        info!("Started download job {} for URL: {}", id, url);
        Ok(job)
    }

    pub fn get_status(&self, id: Uuid) -> Result<Job, JobError> {
        self.store.get(id)
    }

    pub fn list_jobs(&self) -> JobList {
        let jobs = self.store.list();
        JobList {
            total: jobs.len(),
            jobs,
        }
    }

    /// Removes the job record, then its files.
    ///
    /// The two steps are not transactional: once the record is gone it stays
    /// gone, even if a file can't be removed. Failures there are only logged.
    pub async fn delete_job(&self, id: Uuid) -> Result<Job, JobError> {
        let job = self.store.delete(id)?;

        if let Some(filename) = &job.filename {
            let path = self.artifact_path(filename);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => info!("Deleted file for job {}: {}", id, filename),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete file for job {}: {}", id, e),
            }
        }
        // Leftovers from a failed or interrupted conversion.
        download::remove_job_files(&self.config.data_dir, &id.to_string()).await;

        info!("Deleted job {}", id);
        Ok(job)
    }

    pub fn active_jobs(&self) -> usize {
        self.store.active_count()
    }

    /// Confirms the data directory is writable by creating and removing a file.
    pub async fn check_storage(&self) -> std::io::Result<()> {
        let probe = self.config.data_dir.join(".health_check");
        tokio::fs::write(&probe, b"").await?;
        tokio::fs::remove_file(&probe).await
    }

    /// Stored filenames are bare names; anything with a path component is
    /// reduced to its last segment so it can't escape the data directory.
    fn artifact_path(&self, filename: &str) -> PathBuf {
        let name = Path::new(filename)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_default();
        self.config.data_dir.join(name)
    }
}
