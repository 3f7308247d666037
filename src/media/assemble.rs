use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info};

use crate::artifact::MergedFile;
use crate::download::segment::SegmentFile;
use crate::error::{Error, Result};
use crate::process::{ProcessRunner, ToolCommand};

/// Concatenates ordered segments into one container with ffmpeg's concat
/// demuxer. Streams are copied, never re-encoded.
pub struct Assembler {
    runner: Arc<dyn ProcessRunner>,
    ffmpeg: PathBuf,
}

impl Assembler {
    pub fn new(runner: Arc<dyn ProcessRunner>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Writes the manifest at `manifest` and merges `segments`, in the given
    /// order, into `output`.
    ///
    /// The result is only returned when ffmpeg exits 0 and the output exists.
    pub async fn assemble(
        &self,
        segments: &[SegmentFile],
        manifest: &Path,
        output: &Path,
    ) -> Result<MergedFile> {
        if segments.is_empty() {
            return Err(Error::InvalidInput("no segments to assemble".into()));
        }

        let mut lines = String::new();
        for segment in segments {
            let path = tokio::fs::canonicalize(&segment.path).await?;
            lines.push_str(&manifest_line(&path));
            lines.push('\n');
        }
        tokio::fs::write(manifest, lines).await?;
        let manifest = tokio::fs::canonicalize(manifest).await?;

        let command = ToolCommand::new(&self.ffmpeg)
            .args(["-hide_banner", "-f", "concat", "-safe", "0", "-i"])
            .path_arg(&manifest)
            .args(["-c", "copy", "-bsf:a", "aac_adtstoasc", "-y"])
            .path_arg(output);

        let result = self.runner.run(&command).await?;
        if !result.success() {
            error!("FFmpeg concat failed: {}", result.stderr.trim());
            return Err(Error::Assembly {
                exit_code: result.exit_code,
                diagnostics: result.stderr.trim().to_string(),
            });
        }

        let size = match tokio::fs::metadata(output).await {
            Ok(metadata) => metadata.len(),
            Err(err) => {
                return Err(Error::Assembly {
                    exit_code: result.exit_code,
                    diagnostics: format!("output {} missing: {err}", output.display()),
                });
            }
        };

        info!("Successfully merged video: {}", output.display());
        Ok(MergedFile {
            path: output.to_path_buf(),
            size,
            duration: segments.iter().map(|segment| segment.segment.duration).sum(),
        })
    }
}

/// One concat-demuxer entry; single quotes are escaped as `'\''`.
fn manifest_line(path: &Path) -> String {
    format!("file '{}'", path.to_string_lossy().replace('\'', "'\\''"))
}
