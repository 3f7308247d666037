use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::error::Error;
use crate::process::{ProcessRunner, ToolCommand};

/// Why the container duration could not be read. Never fatal.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("ffprobe could not run: {0}")]
    Run(#[from] Error),
    #[error("ffprobe exited with {exit_code:?}: {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("unparsable duration {0:?}")]
    Unparsable(String),
}

pub struct DurationProbe {
    runner: Arc<dyn ProcessRunner>,
    ffprobe: PathBuf,
}

impl DurationProbe {
    pub fn new(runner: Arc<dyn ProcessRunner>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            ffprobe: ffprobe.into(),
        }
    }

    /// Total duration of the container in seconds.
    pub async fn duration(&self, path: &Path) -> Result<f64, ProbeError> {
        let command = ToolCommand::new(&self.ffprobe)
            .args([
                "-v",
                "quiet",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .path_arg(path);

        let output = self.runner.run(&command).await?;
        if !output.success() {
            return Err(ProbeError::Failed {
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        parse_duration(&output.stdout)
    }

    /// Like [`duration`](Self::duration) but degrades to `fallback`.
    pub async fn duration_or(&self, path: &Path, fallback: f64) -> f64 {
        match self.duration(path).await {
            Ok(duration) => duration,
            Err(err) => {
                warn!("Could not get video duration, using default {}s: {}", fallback, err);
                fallback
            }
        }
    }
}

fn parse_duration(stdout: &str) -> Result<f64, ProbeError> {
    let text = stdout.trim();
    match text.parse::<f64>() {
        Ok(duration) if duration.is_finite() && duration > 0.0 => Ok(duration),
        _ => Err(ProbeError::Unparsable(text.to_string())),
    }
}
