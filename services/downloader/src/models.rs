//! Job records and the JSON bodies of the HTTP API.
//!
//! LEARNING: Serde's derive macros auto-generate JSON serialization code.
//! #[derive(Deserialize)] → can parse from JSON
//! #[derive(Serialize)]   → can convert to JSON
//! #[serde(rename_all = "lowercase")] → `JobStatus::Queued` becomes "queued"
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Highest progress a job may report before it has actually completed.
pub const MAX_IN_FLIGHT_PROGRESS: f64 = 99.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("cannot move job from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One download job. Also the body of `GET /api/status/{job_id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    #[serde(rename = "job_id")]
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: f64,
    pub filename: Option<String>,
    pub error: Option<String>,
}

/// LEARNING: Each transition is a method taking `&mut self`. The store hands
/// the runner a `&mut Job` only while it holds the write lock, so every call
/// below is applied atomically from a reader's point of view.
impl Job {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            progress: 0.0,
            filename: None,
            error: None,
        }
    }

    fn check(&self, to: JobStatus) -> Result<(), InvalidTransition> {
        let allowed = match (self.status, to) {
            (JobStatus::Queued, JobStatus::Downloading) => true,
            (JobStatus::Downloading, JobStatus::Completed) => true,
            (JobStatus::Downloading, JobStatus::Failed) => true,
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.status,
                to,
            })
        }
    }

    /// Queued → Downloading, progress reset to 0.
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.check(JobStatus::Downloading)?;
        self.status = JobStatus::Downloading;
        self.progress = 0.0;
        Ok(())
    }

    /// Records an in-flight percentage. Values are capped at 99.9 and never
    /// move backwards; anything outside `Downloading` is ignored.
    /// Returns whether the stored value changed.
    pub fn record_progress(&mut self, percent: f64) -> bool {
        if self.status != JobStatus::Downloading || !percent.is_finite() {
            return false;
        }
        let clamped = percent.clamp(0.0, MAX_IN_FLIGHT_PROGRESS);
        if clamped > self.progress {
            self.progress = clamped;
            true
        } else {
            false
        }
    }

    /// Downloading → Completed. Sets progress to 100 and the filename in one step.
    pub fn complete(&mut self, filename: impl Into<String>) -> Result<(), InvalidTransition> {
        self.check(JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.progress = 100.0;
        self.filename = Some(filename.into());
        Ok(())
    }

    /// Downloading → Failed, recording the cause.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        self.check(JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        Ok(())
    }
}

/// Body of `POST /api/download`.
#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct JobList {
    pub jobs: Vec<Job>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub data_directory: String,
    pub data_directory_writable: bool,
    pub active_jobs: usize,
}
