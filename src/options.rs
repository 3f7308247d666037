use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

#[derive(Debug, Clone)]
pub struct Options {
    /// Byte ceiling above which the merged file is split.
    pub max_file_size: u64,
    /// Headroom subtracted from the ceiling when computing the part count.
    pub safety_margin: u64,
    /// Write buffer size used while streaming a segment to disk.
    pub chunk_size: usize,
    /// Overall timeout of the shared HTTP client.
    pub download_timeout: Duration,
    /// Timeout of a single segment attempt.
    pub segment_timeout: Duration,
    pub segment_retry_limit: u32,
    pub retry_backoff: Duration,
    pub max_parallel_downloads: usize,
    /// Duration assumed when the probe cannot read the merged file.
    pub fallback_duration: f64,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    /// Parent of per-run workspaces; the system temp dir when `None`.
    pub work_dir: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_file_size: 2 * GIB,
            safety_margin: 10 * MIB,
            chunk_size: MIB as usize,
            download_timeout: Duration::from_secs(300),
            segment_timeout: Duration::from_secs(30),
            segment_retry_limit: 3,
            retry_backoff: Duration::from_secs(1),
            max_parallel_downloads: 4,
            fallback_duration: 3600.0,
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            work_dir: None,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<()> {
        if self.segment_retry_limit == 0 {
            return Err(Error::Config("segment retry limit must be at least 1".into()));
        }
        if self.max_parallel_downloads == 0 {
            return Err(Error::Config("parallel downloads must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk size must be positive".into()));
        }
        if self.max_file_size <= self.safety_margin {
            return Err(Error::Config(format!(
                "max file size ({} bytes) must exceed the safety margin ({} bytes)",
                self.max_file_size, self.safety_margin
            )));
        }
        if self.fallback_duration.is_nan() || self.fallback_duration <= 0.0 {
            return Err(Error::Config("fallback duration must be positive".into()));
        }
        Ok(())
    }
}
