//! Video downloading via yt-dlp and ffmpeg subprocesses.
//!
//! LEARNING: tokio::process::Command is the async version of std::process::Command.
//! It spawns a child process without blocking the async runtime, so other
//! downloads (and HTTP requests) keep being served while yt-dlp runs.
use anyhow::{bail, Context, Result};
use futures::future::{BoxFuture, FutureExt};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::engine::{DownloadEngine, FetchProgress, ProbeInfo};

/// Extensions the runner looks for after a fetch, most preferred first.
pub const ARTIFACT_EXTENSIONS: [&str; 5] = ["mp4", "webm", "mkv", "m4a", "mp3"];

/// Container every finished artifact should end up in.
pub const TARGET_EXTENSION: &str = "mp4";

const FORMAT_SELECTOR: &str = "best[ext=mp4]/best[ext=webm]/best[ext=mkv]/best";

/// Marker prefixed to every progress line so it can't be confused with
/// yt-dlp's other stdout chatter.
const PROGRESS_MARKER: &str = "[job-progress]";

/// `download:` restricts the template to the downloading phase.
const PROGRESS_TEMPLATE: &str = "download:[job-progress] %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s";

pub struct YtDlpEngine {
    ytdlp_path: String,
    ffmpeg_path: String,
    cookies_path: PathBuf,
    max_file_size_mb: Option<u64>,
}

impl YtDlpEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            ytdlp_path: config.ytdlp_path.clone(),
            ffmpeg_path: config.ffmpeg_path.clone(),
            cookies_path: config.cookies_path.clone(),
            max_file_size_mb: config.max_file_size_mb,
        }
    }

    /// Arguments shared by probe and fetch.
    fn common_args(&self) -> Vec<String> {
        let mut args = vec!["--no-playlist".to_string()];
        // Pass cookies directly — mounted read-write so yt-dlp can update rotated cookies
        if self.cookies_path.exists() {
            args.push("--cookies".to_string());
            args.push(self.cookies_path.to_string_lossy().to_string());
        }
        args
    }

    fn fetch_args(&self, url: &str, dir: &Path, stem: &str) -> Vec<String> {
        let output_template = dir.join(format!("{}.%(ext)s", stem));

        // LEARNING: `let mut` declares a mutable variable. By default, all
        // variables in Rust are immutable (like `val` in Kotlin or `let` in Swift).
        let mut args = vec![
            "-f".to_string(),
            FORMAT_SELECTOR.to_string(),
            "--merge-output-format".to_string(),
            TARGET_EXTENSION.to_string(),
            "--recode-video".to_string(),
            TARGET_EXTENSION.to_string(),
            "-o".to_string(),
            output_template.to_string_lossy().to_string(),
            "--newline".to_string(),
            "--progress-template".to_string(),
            PROGRESS_TEMPLATE.to_string(),
        ];
        args.extend(self.common_args());

        if let Some(mb) = self.max_file_size_mb {
            args.push("--max-filesize".to_string());
            args.push(format!("{}M", mb));
        }

        args.push(url.to_string());
        args
    }

    async fn probe_impl(&self, url: &str) -> Result<ProbeInfo> {
        let mut args = vec!["-J".to_string()];
        args.extend(self.common_args());
        args.push(url.to_string());

        let output = Command::new(&self.ytdlp_path)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to spawn yt-dlp")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("yt-dlp exited with: {}", truncate(&stderr));
        }

        serde_json::from_slice(&output.stdout).context("Failed to parse yt-dlp JSON output")
    }

    async fn fetch_impl(
        &self,
        url: &str,
        dir: &Path,
        stem: &str,
        progress: mpsc::UnboundedSender<FetchProgress>,
    ) -> Result<()> {
        let args = self.fetch_args(url, dir, stem);
        info!("Downloading {} with yt-dlp...", stem);

        // LEARNING: kill_on_drop means that if this future is dropped (the job
        // was deleted mid-download), the yt-dlp process is killed with it.
        let mut child = Command::new(&self.ytdlp_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn yt-dlp")?;

        let stdout = child.stdout.take().context("yt-dlp stdout not captured")?;
        let mut stderr = child.stderr.take().context("yt-dlp stderr not captured")?;

        let read_progress = forward_progress(stdout, &progress, stem);
        let read_stderr = async {
            let mut buf = Vec::new();
            if let Err(e) = stderr.read_to_end(&mut buf).await {
                warn!("Failed reading yt-dlp stderr for {}: {}", stem, e);
            }
            String::from_utf8_lossy(&buf).into_owned()
        };

        // LEARNING: tokio::join! drives both futures at once on this task.
        // Reading stdout and stderr concurrently keeps either pipe from filling
        // up and stalling the child.
        let ((), stderr_text) = tokio::join!(read_progress, read_stderr);
        let status = child.wait().await.context("Failed to wait for yt-dlp")?;

        if !status.success() {
            error!("yt-dlp failed for {}: {}", stem, stderr_text);
            bail!("yt-dlp exited with: {}", truncate(&stderr_text));
        }
        Ok(())
    }

    async fn remux_impl(&self, input: &Path, output: &Path) -> Result<()> {
        let result = Command::new(&self.ffmpeg_path)
            .arg("-i")
            .arg(input)
            .args(["-c:v", "copy", "-c:a", "copy"])
            .arg(output)
            .arg("-y")
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to spawn ffmpeg")?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            bail!("ffmpeg exited with: {}", truncate(&stderr));
        }
        Ok(())
    }
}

impl DownloadEngine for YtDlpEngine {
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ProbeInfo>> {
        self.probe_impl(url).boxed()
    }

    fn fetch<'a>(
        &'a self,
        url: &'a str,
        dir: &'a Path,
        stem: &'a str,
        progress: mpsc::UnboundedSender<FetchProgress>,
    ) -> BoxFuture<'a, Result<()>> {
        self.fetch_impl(url, dir, stem, progress).boxed()
    }

    fn remux<'a>(&'a self, input: &'a Path, output: &'a Path) -> BoxFuture<'a, Result<()>> {
        self.remux_impl(input, output).boxed()
    }
}

/// Keeps error strings short enough to show in a status response.
fn truncate(text: &str) -> String {
    text.trim().chars().take(200).collect()
}

/// Reads yt-dlp's stdout to the end, sending every progress line on.
///
/// Lines are decoded lossily: titles and paths in yt-dlp's chatter are not
/// always valid UTF-8, and stopping early would close the pipe under it.
async fn forward_progress<R>(
    reader: R,
    progress: &mpsc::UnboundedSender<FetchProgress>,
    stem: &str,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Failed reading yt-dlp output for {}: {}", stem, e);
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end();
        match parse_progress_line(line) {
            // A closed receiver just means nobody is listening any more.
            Some(report) => {
                let _ = progress.send(report);
            }
            None => debug!("yt-dlp [{}]: {}", stem, line),
        }
    }
}

/// Parses one line written through `PROGRESS_TEMPLATE`. yt-dlp prints `NA`
/// for unknown fields; the estimate is used when the exact total is missing.
pub fn parse_progress_line(line: &str) -> Option<FetchProgress> {
    let rest = line.trim().strip_prefix(PROGRESS_MARKER)?;
    let mut fields = rest.split_whitespace().map(parse_bytes);

    let downloaded_bytes = fields.next()??;
    let total = fields.next().flatten();
    let estimate = fields.next().flatten();

    Some(FetchProgress {
        downloaded_bytes,
        total_bytes: total.or(estimate),
    })
}

/// yt-dlp reports estimates as floats ("1234.5") and unknowns as "NA".
fn parse_bytes(field: &str) -> Option<u64> {
    let value: f64 = field.parse().ok()?;
    (value.is_finite() && value >= 0.0).then(|| value as u64)
}

/// Path a job's artifact would have with the given extension.
pub fn artifact_path(dir: &Path, job_id: &str, ext: &str) -> PathBuf {
    dir.join(format!("{}.{}", job_id, ext))
}

/// Find the file that yt-dlp created (we don't know the extension ahead of time).
pub fn find_artifact(dir: &Path, job_id: &str) -> Option<PathBuf> {
    ARTIFACT_EXTENSIONS
        .iter()
        .map(|ext| artifact_path(dir, job_id, ext))
        .find(|path| path.is_file())
}

/// Get a file's size without reading it.
pub fn get_file_size(path: &Path) -> Result<u64> {
    let metadata = std::fs::metadata(path).context("Failed to read file metadata")?;
    Ok(metadata.len())
}

/// Removes every `<job_id>.*` file in `dir` (finished artifact, partial
/// downloads, half-written conversions). Returns how many were removed.
///
/// LEARNING: `std::fs::read_dir` returns an iterator of Result<DirEntry>.
/// We use `.filter_map(|e| e.ok())` to skip any errors and unwrap the Ok values.
pub async fn remove_job_files(dir: &Path, job_id: &str) -> usize {
    let prefix = format!("{}.", job_id);
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(&prefix) {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove {}: {}", entry.path().display(), e),
        }
    }
    removed
}
