//! Drives one job from `Queued` to a terminal state on a background task.
//!
//! LEARNING: The runner never holds a `Job`. It only talks to the store
//! through `update`, one closure per transition, so a reader polling
//! `/api/status` can never see e.g. a filename without `completed`.
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use uuid::Uuid;

use crate::download::{self, TARGET_EXTENSION};
use crate::engine::DownloadEngine;
use crate::error::{DownloadError, JobError};
use crate::models::{InvalidTransition, Job, JobStatus};
use crate::store::JobStore;

/// Why a run stopped before reaching `Completed`.
#[derive(Debug)]
enum Stop {
    /// Recorded on the job as its `error`.
    Failed(DownloadError),
    /// The job disappeared from the store (deleted while running).
    Deleted,
    /// The store refused a transition.
    Store(String),
}

impl From<DownloadError> for Stop {
    fn from(e: DownloadError) -> Self {
        Stop::Failed(e)
    }
}

impl From<JobError> for Stop {
    fn from(e: JobError) -> Self {
        match e {
            JobError::NotFound(_) => Stop::Deleted,
            other => Stop::Store(other.to_string()),
        }
    }
}

impl From<InvalidTransition> for Stop {
    fn from(e: InvalidTransition) -> Self {
        Stop::Store(e.to_string())
    }
}

pub struct JobRunner {
    job_id: Uuid,
    url: String,
    store: Arc<JobStore>,
    engine: Arc<dyn DownloadEngine>,
    data_dir: PathBuf,
    remux_timeout: Duration,
}

impl JobRunner {
    pub fn new(
        job_id: Uuid,
        url: String,
        store: Arc<JobStore>,
        engine: Arc<dyn DownloadEngine>,
        data_dir: PathBuf,
        remux_timeout: Duration,
    ) -> Self {
        Self {
            job_id,
            url,
            store,
            engine,
            data_dir,
            remux_timeout,
        }
    }

    /// Spawns the run on the tokio runtime and returns immediately.
    ///
    /// LEARNING: The run itself goes in an inner task. If it panics, awaiting
    /// its `JoinHandle` gives us an `Err` instead of tearing anything down,
    /// and we still get to mark the job as failed.
    pub fn spawn(self, permits: Option<Arc<Semaphore>>) -> tokio::task::JoinHandle<()> {
        let job_id = self.job_id;
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            // LEARNING: The permit is released when `_permit` is dropped (RAII).
            let _permit: Option<OwnedSemaphorePermit> = match permits {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };

            if let Err(e) = tokio::spawn(self.run()).await {
                error!("Runner for job {} crashed: {}", job_id, e);
                let cause = DownloadError::Unexpected(e.to_string()).to_string();
                let _ = store.update(job_id, |job| {
                    // Failed is only reachable from Downloading.
                    if job.status == JobStatus::Queued {
                        job.start()?;
                    }
                    job.fail(cause)
                });
            }
        })
    }

    pub async fn run(self) {
        match self.execute().await {
            Ok(filename) => {
                info!("Download completed successfully for job {}: {}", self.job_id, filename);
            }
            Err(Stop::Failed(cause)) => {
                error!("Job {} failed: {}", self.job_id, cause);
                let message = cause.to_string();
                match self.store.update(self.job_id, |job| job.fail(message)) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Could not mark job {} failed: {}", self.job_id, e),
                    Err(JobError::NotFound(_)) => self.abandon().await,
                    Err(e) => error!("Could not mark job {} failed: {}", self.job_id, e),
                }
            }
            Err(Stop::Deleted) => self.abandon().await,
            Err(Stop::Store(e)) => error!("Job {} stopped: {}", self.job_id, e),
        }
    }

    /// Runs every step and returns the artifact's filename.
    ///
    /// The job leaves `Queued` before any engine call, so a job deleted while
    /// waiting for a permit stops here without touching the network.
    async fn execute(&self) -> Result<String, Stop> {
        self.transition(Job::start)?;

        let info = self
            .engine
            .probe(&self.url)
            .await
            .map_err(|e| DownloadError::Extraction(e.to_string()))?;
        info!(
            "Video info extracted for job {}: {}",
            self.job_id,
            info.title.as_deref().unwrap_or("Unknown")
        );
        if !info.has_viable_format() {
            return Err(DownloadError::NoViableFormat.into());
        }

        self.fetch().await?;

        let artifact = download::find_artifact(&self.data_dir, &self.stem())
            .ok_or(DownloadError::ArtifactMissing)?;
        let artifact = self.ensure_target_container(artifact).await;
        let filename = artifact
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or(DownloadError::ArtifactMissing)?;

        let name = filename.clone();
        self.transition(move |job| job.complete(name))?;
        Ok(filename)
    }

    /// Runs the engine's fetch while applying its progress reports as they
    /// arrive.
    async fn fetch(&self) -> Result<(), Stop> {
        let stem = self.stem();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fetch = self.engine.fetch(&self.url, &self.data_dir, &stem, tx);
        tokio::pin!(fetch);

        // LEARNING: `select!` waits on whichever branch is ready first. Returning
        // early from here (job deleted) drops `fetch`, which kills yt-dlp.
        let outcome = loop {
            tokio::select! {
                result = &mut fetch => break result,
                Some(report) = rx.recv() => {
                    // Unknown totals leave progress where it was.
                    if let Some(percent) = report.percent() {
                        self.store.update(self.job_id, |job| job.record_progress(percent))?;
                    }
                }
            }
        };

        outcome.map_err(|e| DownloadError::Download(e.to_string()).into())
    }

    /// Remuxes a non-mp4 artifact into `<id>.mp4`. Any failure keeps the
    /// original file.
    async fn ensure_target_container(&self, artifact: PathBuf) -> PathBuf {
        if artifact.extension().is_some_and(|ext| ext == TARGET_EXTENSION) {
            return artifact;
        }
        let target = download::artifact_path(&self.data_dir, &self.stem(), TARGET_EXTENSION);

        match self.remux(&artifact, &target).await {
            Ok(()) => {
                if let Err(e) = tokio::fs::remove_file(&artifact).await {
                    warn!("Failed to remove {}: {}", artifact.display(), e);
                }
                target
            }
            Err(e) => {
                error!("FFmpeg conversion failed for job {}: {}", self.job_id, e);
                artifact
            }
        }
    }

    async fn remux(&self, input: &Path, output: &Path) -> Result<(), DownloadError> {
        match timeout(self.remux_timeout, self.engine.remux(input, output)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(DownloadError::Conversion(e.to_string())),
            Err(_) => {
                return Err(DownloadError::Conversion(format!(
                    "timed out after {}s",
                    self.remux_timeout.as_secs()
                )))
            }
        }
        match download::get_file_size(output) {
            Ok(size) if size > 0 => Ok(()),
            _ => Err(DownloadError::Conversion(
                "FFmpeg conversion failed or produced empty file".into(),
            )),
        }
    }

    /// Applies one state transition as a single store update.
    fn transition<F>(&self, apply: F) -> Result<(), Stop>
    where
        F: FnOnce(&mut Job) -> Result<(), InvalidTransition>,
    {
        self.store.update(self.job_id, apply)??;
        Ok(())
    }

    /// The job was deleted under us: nothing will ever report on it, so
    /// remove whatever it left on disk.
    async fn abandon(&self) {
        let removed = download::remove_job_files(&self.data_dir, &self.stem()).await;
        info!(
            "Job {} was deleted while running; removed {} leftover file(s)",
            self.job_id, removed
        );
    }

    fn stem(&self) -> String {
        self.job_id.to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::{FetchProgress, FormatInfo, ProbeInfo};
    use crate::models::MAX_IN_FLIGHT_PROGRESS;
    use anyhow::{anyhow, bail, Result};
    use futures::future::{BoxFuture, FutureExt};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Scripted stand-in for yt-dlp/ffmpeg.
    pub(crate) struct FakeEngine {
        /// When set, probe waits here before answering.
        pub probe_gate: Option<Arc<Notify>>,
        pub probe_calls: Mutex<u32>,
        pub probe_error: Option<String>,
        pub formats: Vec<FormatInfo>,
        pub progress: Vec<FetchProgress>,
        /// When set, fetch sends its progress and then waits here.
        pub fetch_gate: Option<Arc<Notify>>,
        pub fetch_error: Option<String>,
        /// Extension of the file fetch writes; `None` writes nothing.
        pub output_ext: Option<&'static str>,
        pub remux_ok: bool,
        pub remux_delay: Option<Duration>,
        pub remux_calls: Mutex<u32>,
        pub panic_in_probe: bool,
    }

    impl Default for FakeEngine {
        fn default() -> Self {
            Self {
                probe_gate: None,
                probe_calls: Mutex::new(0),
                probe_error: None,
                formats: vec![FormatInfo {
                    format_id: Some("18".into()),
                    ext: Some("mp4".into()),
                    vcodec: Some("avc1".into()),
                    acodec: Some("mp4a".into()),
                }],
                progress: Vec::new(),
                fetch_gate: None,
                fetch_error: None,
                output_ext: Some("mp4"),
                remux_ok: true,
                remux_delay: None,
                remux_calls: Mutex::new(0),
                panic_in_probe: false,
            }
        }
    }

    impl FakeEngine {
        async fn fake_probe(&self) -> Result<ProbeInfo> {
            *self.probe_calls.lock().unwrap() += 1;
            if let Some(gate) = &self.probe_gate {
                gate.notified().await;
            }
            if self.panic_in_probe {
                panic!("extractor blew up");
            }
            if let Some(e) = &self.probe_error {
                return Err(anyhow!(e.clone()));
            }
            Ok(ProbeInfo {
                title: Some("Test video".into()),
                formats: self.formats.clone(),
            })
        }

        async fn fake_fetch(
            &self,
            dir: &Path,
            stem: &str,
            progress: mpsc::UnboundedSender<FetchProgress>,
        ) -> Result<()> {
            for report in &self.progress {
                let _ = progress.send(*report);
            }
            if let Some(gate) = &self.fetch_gate {
                gate.notified().await;
            }
            if let Some(e) = &self.fetch_error {
                bail!("{}", e);
            }
            if let Some(ext) = self.output_ext {
                tokio::fs::write(dir.join(format!("{}.{}", stem, ext)), b"video").await?;
            }
            Ok(())
        }

        async fn fake_remux(&self, output: &Path) -> Result<()> {
            *self.remux_calls.lock().unwrap() += 1;
            if let Some(delay) = self.remux_delay {
                tokio::time::sleep(delay).await;
            }
            if !self.remux_ok {
                bail!("ffmpeg exited with: invalid data");
            }
            tokio::fs::write(output, b"remuxed").await?;
            Ok(())
        }
    }

    impl DownloadEngine for FakeEngine {
        fn probe<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<ProbeInfo>> {
            self.fake_probe().boxed()
        }

        fn fetch<'a>(
            &'a self,
            _url: &'a str,
            dir: &'a Path,
            stem: &'a str,
            progress: mpsc::UnboundedSender<FetchProgress>,
        ) -> BoxFuture<'a, Result<()>> {
            self.fake_fetch(dir, stem, progress).boxed()
        }

        fn remux<'a>(&'a self, _input: &'a Path, output: &'a Path) -> BoxFuture<'a, Result<()>> {
            self.fake_remux(output).boxed()
        }
    }

    fn runner(store: &Arc<JobStore>, engine: Arc<FakeEngine>, dir: &Path) -> (Uuid, JobRunner) {
        let id = store.create();
        let runner = JobRunner::new(
            id,
            "https://youtu.be/dQw4w9WgXcQ".into(),
            Arc::clone(store),
            engine,
            dir.to_path_buf(),
            Duration::from_millis(200),
        );
        (id, runner)
    }

    async fn wait_for<F: Fn(&Job) -> bool>(store: &JobStore, id: Uuid, cond: F) -> Job {
        for _ in 0..500 {
            if let Ok(job) = store.get(id) {
                if cond(&job) {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never reached for job {}", id);
    }

    #[tokio::test]
    async fn test_successful_run_completes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new());
        let (id, runner) = runner(&store, Arc::new(FakeEngine::default()), dir.path());

        runner.run().await;

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100.0);
        assert_eq!(job.filename, Some(format!("{}.mp4", id)));
        assert!(job.error.is_none());
        assert!(dir.path().join(format!("{}.mp4", id)).exists());
    }

    #[tokio::test]
    async fn test_no_viable_format_fails_without_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new());
        let engine = FakeEngine {
            formats: vec![FormatInfo {
                vcodec: Some("none".into()),
                acodec: Some("opus".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let (id, runner) = runner(&store, Arc::new(engine), dir.path());

        runner.run().await;

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("No video formats available for this URL"));
        assert!(job.filename.is_none());
        assert!(download::find_artifact(dir.path(), &id.to_string()).is_none());
    }

    #[tokio::test]
    async fn test_probe_error_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new());
        let engine = FakeEngine {
            probe_error: Some("Video unavailable".into()),
            ..Default::default()
        };
        let (id, runner) = runner(&store, Arc::new(engine), dir.path());

        runner.run().await;

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error.as_deref(),
            Some("Could not extract video info: Video unavailable")
        );
    }

    #[tokio::test]
    async fn test_failed_extraction_passes_through_downloading() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new());
        let gate = Arc::new(Notify::new());
        let engine = FakeEngine {
            probe_gate: Some(Arc::clone(&gate)),
            probe_error: Some("Private video".into()),
            ..Default::default()
        };
        let (id, runner) = runner(&store, Arc::new(engine), dir.path());
        let mut seen = vec![store.get(id).unwrap().status];

        let handle = tokio::spawn(runner.run());
        let job = wait_for(&store, id, |job| job.status != JobStatus::Queued).await;
        seen.push(job.status);
        assert_eq!(job.progress, 0.0);

        gate.notify_one();
        handle.await.unwrap();
        let job = store.get(id).unwrap();
        seen.push(job.status);

        assert_eq!(
            seen,
            vec![JobStatus::Queued, JobStatus::Downloading, JobStatus::Failed]
        );
        assert_eq!(
            job.error.as_deref(),
            Some("Could not extract video info: Private video")
        );
    }

    #[tokio::test]
    async fn test_deleted_before_start_never_calls_engine() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new());
        let engine = Arc::new(FakeEngine::default());
        let (id, runner) = runner(&store, Arc::clone(&engine), dir.path());

        store.delete(id).unwrap();
        runner.run().await;

        assert_eq!(*engine.probe_calls.lock().unwrap(), 0);
        assert!(store.get(id).is_err());
        assert!(download::find_artifact(dir.path(), &id.to_string()).is_none());
    }

    #[tokio::test]
    async fn test_fetch_error_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new());
        let engine = FakeEngine {
            fetch_error: Some("HTTP Error 403: Forbidden".into()),
            ..Default::default()
        };
        let (id, runner) = runner(&store, Arc::new(engine), dir.path());

        runner.run().await;

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().starts_with("YouTube download error:"));
        assert!(job.filename.is_none());
    }

    #[tokio::test]
    async fn test_missing_artifact_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new());
        let engine = FakeEngine {
            output_ext: None,
            ..Default::default()
        };
        let (id, runner) = runner(&store, Arc::new(engine), dir.path());

        runner.run().await;

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("no video file found"));
    }

    #[tokio::test]
    async fn test_webm_is_remuxed_to_mp4() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new());
        let engine = Arc::new(FakeEngine {
            output_ext: Some("webm"),
            ..Default::default()
        });
        let (id, runner) = runner(&store, Arc::clone(&engine), dir.path());

        runner.run().await;

        let job = store.get(id).unwrap();
        assert_eq!(job.filename, Some(format!("{}.mp4", id)));
        assert_eq!(*engine.remux_calls.lock().unwrap(), 1);
        assert!(!dir.path().join(format!("{}.webm", id)).exists());
    }

    #[tokio::test]
    async fn test_failed_remux_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new());
        let engine = FakeEngine {
            output_ext: Some("mkv"),
            remux_ok: false,
            ..Default::default()
        };
        let (id, runner) = runner(&store, Arc::new(engine), dir.path());

        runner.run().await;

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.filename, Some(format!("{}.mkv", id)));
        assert!(dir.path().join(format!("{}.mkv", id)).exists());
    }

    #[tokio::test]
    async fn test_slow_remux_times_out_and_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new());
        let engine = FakeEngine {
            output_ext: Some("webm"),
            remux_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let (id, runner) = runner(&store, Arc::new(engine), dir.path());

        runner.run().await;

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.filename, Some(format!("{}.webm", id)));
    }

    #[tokio::test]
    async fn test_progress_is_capped_and_never_decreases() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new());
        let gate = Arc::new(Notify::new());
        let report = |downloaded, total| FetchProgress {
            downloaded_bytes: downloaded,
            total_bytes: total,
        };
        let engine = FakeEngine {
            progress: vec![
                report(40, Some(100)),
                report(20, Some(100)),
                report(90, None),
                report(100, Some(100)),
            ],
            fetch_gate: Some(Arc::clone(&gate)),
            ..Default::default()
        };
        let (id, runner) = runner(&store, Arc::new(engine), dir.path());
        let handle = tokio::spawn(runner.run());

        let job = wait_for(&store, id, |job| job.progress >= MAX_IN_FLIGHT_PROGRESS).await;
        assert_eq!(job.status, JobStatus::Downloading);
        assert_eq!(job.progress, MAX_IN_FLIGHT_PROGRESS);

        gate.notify_one();
        handle.await.unwrap();
        assert_eq!(store.get(id).unwrap().progress, 100.0);
    }

    #[tokio::test]
    async fn test_delete_while_downloading_abandons_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new());
        let gate = Arc::new(Notify::new());
        let engine = FakeEngine {
            fetch_gate: Some(Arc::clone(&gate)),
            ..Default::default()
        };
        let (id, runner) = runner(&store, Arc::new(engine), dir.path());
        let handle = tokio::spawn(runner.run());

        wait_for(&store, id, |job| job.status == JobStatus::Downloading).await;
        store.delete(id).unwrap();
        gate.notify_one();
        handle.await.unwrap();

        assert!(store.get(id).is_err());
        assert!(download::find_artifact(dir.path(), &id.to_string()).is_none());
    }

    #[tokio::test]
    async fn test_panicking_engine_still_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new());
        let engine = FakeEngine {
            panic_in_probe: true,
            ..Default::default()
        };
        let (id, runner) = runner(&store, Arc::new(engine), dir.path());

        runner.spawn(None).await.unwrap();

        let job = store.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job
            .error
            .unwrap()
            .starts_with("Unexpected error during download:"));
    }
}
