//! Downloader API — accepts a YouTube URL, downloads it in the background
//! with yt-dlp, and lets clients poll the job until the file is ready.
//!
//! Request path: server → service → store (+ spawn runner).
//! Background path: runner → engine (yt-dlp/ffmpeg) → store.
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod models;
pub mod runner;
pub mod server;
pub mod service;
pub mod store;
pub mod validate;
