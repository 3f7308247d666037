//! Duration-proportional splitting of an oversized merged file.
//!
//! The part count comes from the byte size, the cut points from the
//! container duration: `count = ceil(size / (ceiling - margin))` and each
//! part covers `duration / count` seconds, extracted with stream copy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::artifact::{Artifact, MergedFile, PartFile};
use crate::error::{Error, Result};
use crate::media::probe::DurationProbe;
use crate::naming::part_file_name;
use crate::process::{ProcessRunner, ToolCommand};
use crate::progress::{format_file_size, ProgressEvent, ProgressSink};

/// Number of parts needed so each stays under `ceiling - margin` bytes.
pub fn part_count(size: u64, ceiling: u64, margin: u64) -> Result<usize> {
    if ceiling <= margin {
        return Err(Error::Config(format!(
            "ceiling ({ceiling} bytes) must exceed the safety margin ({margin} bytes)"
        )));
    }
    let count = size.div_ceil(ceiling - margin).max(1);
    usize::try_from(count).map_err(|_| Error::Split(format!("{count} parts is not addressable")))
}

pub struct SizeBoundSplitter {
    runner: Arc<dyn ProcessRunner>,
    ffmpeg: PathBuf,
    probe: DurationProbe,
    ceiling: u64,
    margin: u64,
    fallback_duration: f64,
}

impl SizeBoundSplitter {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        ffmpeg: impl Into<PathBuf>,
        ffprobe: impl Into<PathBuf>,
        ceiling: u64,
        margin: u64,
        fallback_duration: f64,
    ) -> Self {
        Self {
            probe: DurationProbe::new(Arc::clone(&runner), ffprobe),
            runner,
            ffmpeg: ffmpeg.into(),
            ceiling,
            margin,
            fallback_duration,
        }
    }

    pub fn needs_split(&self, size: u64) -> bool {
        size > self.ceiling
    }

    /// Returns the merged file untouched when it fits, otherwise the parts
    /// written next to it as `<base_name>_partNN.mp4`.
    ///
    /// A part whose extraction fails or leaves no file is dropped and
    /// logged; the caller sees it through [`Artifact::is_degraded`]. Only a
    /// split that yields no part at all is an error.
    pub async fn split(
        &self,
        merged: &MergedFile,
        base_name: &str,
        sink: &dyn ProgressSink,
    ) -> Result<Artifact> {
        if !self.needs_split(merged.size) {
            return Ok(Artifact::Single(merged.clone()));
        }

        let count = part_count(merged.size, self.ceiling, self.margin)?;
        sink.report(ProgressEvent::new(format!(
            "File too large ({}), splitting into {} parts...",
            format_file_size(merged.size),
            count
        )));

        let duration = self
            .probe
            .duration_or(&merged.path, self.fallback_duration)
            .await;
        let part_duration = duration / count as f64;
        let folder = merged.path.parent().unwrap_or_else(|| Path::new("."));

        let mut parts = Vec::with_capacity(count);
        for i in 0..count {
            let index = i + 1;
            let path = folder.join(part_file_name(base_name, index));
            let start = i as f64 * part_duration;

            match self.extract(&merged.path, &path, start, part_duration).await {
                Ok(size) => {
                    if size > self.ceiling {
                        warn!(
                            "Part {} is {} bytes, above the {} byte ceiling",
                            index, size, self.ceiling
                        );
                    }
                    info!("Created part {}/{}: {}", index, count, path.display());
                    sink.report(ProgressEvent::new(format!(
                        "Created part {}/{} ({})",
                        index,
                        count,
                        format_file_size(size)
                    )));
                    parts.push(PartFile { path, size, index });
                }
                Err(err) => {
                    warn!("Dropping part {}/{}: {}", index, count, err);
                }
            }
        }

        if parts.is_empty() {
            return Err(Error::Split(format!(
                "none of the {} parts of {} could be produced",
                count,
                merged.path.display()
            )));
        }
        if parts.len() < count {
            sink.report(ProgressEvent::new(format!(
                "Warning: only {} of {} parts were produced",
                parts.len(),
                count
            )));
        }

        Ok(Artifact::Parts {
            parts,
            expected: count,
        })
    }

    async fn extract(&self, source: &Path, output: &Path, start: f64, length: f64) -> Result<u64> {
        let command = ToolCommand::new(&self.ffmpeg)
            .args(["-hide_banner", "-i"])
            .path_arg(source)
            .args([
                "-ss".to_string(),
                format!("{start:.3}"),
                "-t".to_string(),
                format!("{length:.3}"),
                "-c".to_string(),
                "copy".to_string(),
                "-avoid_negative_ts".to_string(),
                "make_zero".to_string(),
                "-y".to_string(),
            ])
            .path_arg(output);

        let result = self.runner.run(&command).await?;
        if !result.success() {
            return Err(Error::Split(format!(
                "ffmpeg exited with {:?}: {}",
                result.exit_code,
                result.stderr.trim()
            )));
        }

        let metadata = tokio::fs::metadata(output)
            .await
            .map_err(|err| Error::Split(format!("{} missing: {err}", output.display())))?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::testing::FakeRunner;
    use crate::options::MIB;
    use crate::progress::RecordingSink;

    fn merged_file(dir: &Path, size: u64) -> MergedFile {
        let path = dir.join("clip.mp4");
        let bytes: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, bytes).unwrap();
        MergedFile {
            path,
            size,
            duration: 60.0,
        }
    }

    fn splitter(runner: Arc<FakeRunner>, ceiling: u64, margin: u64) -> SizeBoundSplitter {
        SizeBoundSplitter::new(runner, "ffmpeg", "ffprobe", ceiling, margin, 3600.0)
    }

    #[test]
    fn part_count_rounds_up() {
        assert_eq!(part_count(6 * MIB, 4 * MIB, MIB).unwrap(), 2);
        assert_eq!(part_count(6 * MIB + 1, 4 * MIB, 3 * MIB).unwrap(), 7);
        assert_eq!(part_count(9 * MIB, 4 * MIB, MIB).unwrap(), 3);
        assert!(part_count(10, 4, 4).is_err());
    }

    #[test]
    fn parts_fit_under_ceiling_by_construction() {
        let (ceiling, margin) = (4 * MIB, MIB);
        for size in [ceiling + 1, 6 * MIB, 7 * MIB + 3, 100 * MIB - 1] {
            let count = part_count(size, ceiling, margin).unwrap() as u64;
            assert!(size.div_ceil(count) <= ceiling - margin, "size {size}");
            assert!((count - 1) * (ceiling - margin) < size);
        }
    }

    #[tokio::test]
    async fn small_file_is_returned_without_running_anything() {
        let dir = tempfile::tempdir().unwrap();
        let merged = merged_file(dir.path(), 1024);
        let runner = Arc::new(FakeRunner::with_duration(60.0));

        let artifact = splitter(runner.clone(), 1024, 10)
            .split(&merged, "clip", &RecordingSink::default())
            .await
            .unwrap();

        assert_eq!(artifact, Artifact::Single(merged));
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn splits_into_named_parts() {
        let dir = tempfile::tempdir().unwrap();
        let merged = merged_file(dir.path(), 6 * MIB);
        let runner = Arc::new(FakeRunner::with_duration(60.0));
        let sink = RecordingSink::default();

        let artifact = splitter(runner.clone(), 4 * MIB, MIB)
            .split(&merged, "clip", &sink)
            .await
            .unwrap();

        let Artifact::Parts { parts, expected } = artifact else {
            panic!("expected parts");
        };
        assert_eq!(expected, 2);
        let names: Vec<_> = parts
            .iter()
            .map(|p| p.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, ["clip_part01.mp4", "clip_part02.mp4"]);
        assert_eq!(parts[0].index, 1);
        assert!(parts.iter().all(|p| p.size <= 4 * MIB));
        assert_eq!(parts.iter().map(|p| p.size).sum::<u64>(), 6 * MIB);

        let commands = runner.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].program_name(), "ffprobe");
        let second = commands[2].get_args();
        let ss = second.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(second[ss + 1], "30.000");
        assert!(sink.events()[0].as_str().contains("splitting into 2 parts"));
    }

    #[tokio::test]
    async fn failed_part_is_dropped_and_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let merged = merged_file(dir.path(), 9 * MIB);
        let mut runner = FakeRunner::with_duration(90.0);
        runner.failing_outputs.insert("clip_part02.mp4".to_string());
        let sink = RecordingSink::default();

        let artifact = splitter(Arc::new(runner), 4 * MIB, MIB)
            .split(&merged, "clip", &sink)
            .await
            .unwrap();

        assert!(artifact.is_degraded());
        let Artifact::Parts { parts, expected } = artifact else {
            panic!("expected parts");
        };
        assert_eq!(expected, 3);
        assert_eq!(parts.iter().map(|p| p.index).collect::<Vec<_>>(), [1, 3]);
        assert!(sink
            .events()
            .iter()
            .any(|e| e.as_str().contains("only 2 of 3 parts")));
    }

    #[tokio::test]
    async fn no_parts_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let merged = merged_file(dir.path(), 6 * MIB);
        let mut runner = FakeRunner::with_duration(60.0);
        runner.failing_outputs.insert("clip_part01.mp4".to_string());
        runner.failing_outputs.insert("clip_part02.mp4".to_string());

        let err = splitter(Arc::new(runner), 4 * MIB, MIB)
            .split(&merged, "clip", &RecordingSink::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "SplitError");
    }

    #[tokio::test]
    async fn probe_failure_uses_fallback_duration() {
        let dir = tempfile::tempdir().unwrap();
        let merged = merged_file(dir.path(), 6 * MIB);
        let runner = Arc::new(FakeRunner::default());

        let artifact = splitter(runner.clone(), 4 * MIB, MIB)
            .split(&merged, "clip", &RecordingSink::default())
            .await
            .unwrap();

        assert!(!artifact.is_degraded());
        let commands = runner.commands();
        let last = commands.last().unwrap().get_args();
        let t = last.iter().position(|a| a == "-t").unwrap();
        assert_eq!(last[t + 1], "1800.000");
    }
}
