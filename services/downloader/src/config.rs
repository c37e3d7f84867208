//! Configuration loaded from environment variables.
//!
//! LEARNING: In Rust, a struct is like a class without methods (data only).
//! Methods are added separately in `impl` blocks. This separation is a key
//! Rust design pattern.
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub cookies_path: PathBuf,
    /// `None` means no cap: every job gets its own task immediately.
    pub max_concurrent: Option<usize>,
    pub max_file_size_mb: Option<u64>,
    pub remux_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/data"),
            host: "0.0.0.0".into(),
            port: 8000,
            ytdlp_path: "yt-dlp".into(),
            ffmpeg_path: "ffmpeg".into(),
            cookies_path: PathBuf::from("/app/cookies.txt"),
            max_concurrent: None,
            max_file_size_mb: None,
            remux_timeout: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// LEARNING: `Self` refers to the type being implemented (Config).
    /// This is a constructor pattern — Rust has no `new` keyword,
    /// just functions that return Self.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            host: env::var("HOST").unwrap_or(defaults.host),
            port: parse_var("PORT").unwrap_or(defaults.port),
            ytdlp_path: env::var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            cookies_path: env::var("COOKIES_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.cookies_path),
            // Zero is treated like "unset" rather than a semaphore nobody can pass.
            max_concurrent: parse_var("MAX_CONCURRENT_DOWNLOADS").filter(|n: &usize| *n > 0),
            max_file_size_mb: parse_var("MAX_FILE_SIZE_MB"),
            remux_timeout: parse_var("REMUX_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.remux_timeout),
        }
    }

    /// Defaults pointed at a specific storage directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// LEARNING: Generic over any `T` that can be parsed from a string.
/// `.ok()?` turns a Result into an Option and returns early on None.
fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok()?.trim().parse().ok()
}
