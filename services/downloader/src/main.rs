//! Downloader API — takes download requests over HTTP and runs each one
//! through yt-dlp on a background task. Clients poll for progress.
//!
//! POST   /api/download        → {job_id, status, message}
//! GET    /api/status/{job_id} → {job_id, status, progress, filename, error}
//! GET    /api/jobs            → {jobs, total}
//! DELETE /api/jobs/{job_id}   → {message}
//! GET    /health
//! GET    /files/{filename}
use anyhow::{Context, Result};
use log::info;
use std::sync::Arc;

use downloader_api::config::Config;
use downloader_api::download::YtDlpEngine;
use downloader_api::server;
use downloader_api::service::JobService;

/// LEARNING: #[tokio::main] transforms main() into an async function.
/// Tokio is the async runtime — it manages the event loop, like asyncio in Python.
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = Config::from_env();
    info!("Starting downloader service");

    // Create download directory
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

    let engine = Arc::new(YtDlpEngine::new(&config));
    let addr = config.bind_addr();
    match config.max_concurrent {
        Some(n) => info!("At most {} downloads will run at once", n),
        None => info!("Concurrent downloads are not capped"),
    }

    let service = JobService::new(config, engine);
    server::serve(service, &addr).await
}
