//! The seam between job runners and whatever actually fetches media.
//!
//! LEARNING: Trait objects (`Arc<dyn DownloadEngine>`) can't have plain
//! `async fn` methods, so each method returns a `BoxFuture` — a heap-allocated,
//! type-erased future. `YtDlpEngine` in download.rs is the real implementation;
//! tests plug in scripted engines.
use anyhow::Result;
use futures::future::BoxFuture;
use serde::Deserialize;
use std::path::Path;
use tokio::sync::mpsc;

/// What the engine learned about a URL without downloading it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeInfo {
    pub title: Option<String>,
    #[serde(default)]
    pub formats: Vec<FormatInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormatInfo {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
}

impl FormatInfo {
    /// A format carrying both a video and an audio stream. A codec the
    /// extractor didn't report counts as present.
    pub fn has_video_and_audio(&self) -> bool {
        self.vcodec.as_deref() != Some("none") && self.acodec.as_deref() != Some("none")
    }
}

impl ProbeInfo {
    pub fn has_viable_format(&self) -> bool {
        self.formats.iter().any(FormatInfo::has_video_and_audio)
    }
}

/// One byte-progress report from a running fetch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchProgress {
    pub downloaded_bytes: u64,
    /// Exact or estimated total; `None` when the source doesn't say.
    pub total_bytes: Option<u64>,
}

impl FetchProgress {
    /// Percentage downloaded, or `None` if the total is unknown.
    pub fn percent(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => Some(self.downloaded_bytes as f64 / total as f64 * 100.0),
            _ => None,
        }
    }
}

pub trait DownloadEngine: Send + Sync {
    /// Resolves metadata and available formats for `url` without downloading.
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ProbeInfo>>;

    /// Downloads `url` into `dir` as `<stem>.<ext>`, sending progress reports
    /// on `progress` as they arrive.
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        dir: &'a Path,
        stem: &'a str,
        progress: mpsc::UnboundedSender<FetchProgress>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Copies the streams of `input` into the container implied by `output`.
    fn remux<'a>(&'a self, input: &'a Path, output: &'a Path) -> BoxFuture<'a, Result<()>>;
}
