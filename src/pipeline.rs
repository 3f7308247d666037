//! One download → assemble → size-bound run.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::artifact::{Artifact, Deliverable};
use crate::download::playlist::fetch_playlist;
use crate::download::segment::{download_segments, FetchPolicy, SegmentFetcher};
use crate::error::{Error, Result};
use crate::media::{Assembler, SizeBoundSplitter};
use crate::naming::Request;
use crate::options::Options;
use crate::process::ProcessRunner;
use crate::progress::{format_duration, format_file_size, ProgressEvent, ProgressSink};
use crate::workspace::Workspace;

pub struct Pipeline {
    options: Options,
    runner: Arc<dyn ProcessRunner>,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(options: Options, runner: Arc<dyn ProcessRunner>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            options,
            runner,
            sink,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `cancel` instead of the pipeline's own token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the run: no new segment download starts and the
    /// workspace is torn down without assembling.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn report(&self, text: impl Into<String>) {
        self.sink.report(ProgressEvent::new(text));
    }

    /// Runs the pipeline for `request` and hands the artifact to `consume`
    /// while its files still exist.
    ///
    /// The workspace is released after `consume` returns, or right away when
    /// the run fails; in both cases exactly once. Delivery is part of the
    /// run: an error from `consume` is reported as the run's failure and no
    /// completion is reported.
    pub async fn run<F, Fut, T>(&self, request: &Request, consume: F) -> Result<T>
    where
        F: FnOnce(Artifact) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.options.validate()?;

        let workspace = Workspace::acquire(&self.options)?;
        let outcome = match self.process(&workspace, request).await {
            Ok(artifact) => consume(artifact).await,
            Err(err) => Err(err),
        };

        if let Err(err) = workspace.release() {
            warn!("Workspace cleanup failed: {}", err);
        }

        match outcome {
            Ok(value) => {
                self.report(format!(
                    "Video processing completed successfully! File: {}",
                    request.file_name
                ));
                Ok(value)
            }
            Err(err) => {
                error!(kind = err.kind(), "Error processing {}: {}", request.url, err);
                self.report(format!("Error processing video ({}): {}", err.kind(), err));
                Err(err)
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!("Run cancelled");
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    async fn process(&self, workspace: &Workspace, request: &Request) -> Result<Artifact> {
        let playlist = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            playlist = fetch_playlist(workspace.client(), &request.url) => playlist?,
        };
        self.report(format!(
            "Found {} segments ({}) for {}",
            playlist.len(),
            format_duration(playlist.total_duration),
            request.file_name
        ));

        let fetcher = SegmentFetcher::new(
            workspace.client().clone(),
            FetchPolicy {
                timeout: self.options.segment_timeout,
                retry_limit: self.options.segment_retry_limit,
                backoff: self.options.retry_backoff,
                chunk_size: self.options.chunk_size,
            },
        );
        let segments = download_segments(
            &fetcher,
            &playlist,
            workspace.dir(),
            self.options.max_parallel_downloads,
            Arc::clone(&self.sink),
            &self.cancel,
        )
        .await?;
        info!("Successfully downloaded {} segments", segments.len());
        self.check_cancelled()?;

        self.report(format!("Merging {} segments...", segments.len()));
        let assembler = Assembler::new(Arc::clone(&self.runner), &self.options.ffmpeg);
        let merged = assembler
            .assemble(
                &segments,
                &workspace.manifest(),
                &workspace.file(&request.file_name),
            )
            .await?;
        self.report(format!(
            "Video merging completed! Size: {}",
            format_file_size(merged.size)
        ));
        self.check_cancelled()?;

        let splitter = SizeBoundSplitter::new(
            Arc::clone(&self.runner),
            &self.options.ffmpeg,
            &self.options.ffprobe,
            self.options.max_file_size,
            self.options.safety_margin,
            self.options.fallback_duration,
        );
        splitter
            .split(&merged, request.base_name(), self.sink.as_ref())
            .await
    }
}

/// Copies every deliverable into `dir`, keeping file names. Used as the
/// local delivery channel.
///
/// Existing files are never overwritten: if any destination is taken the
/// copy fails with [`Error::InvalidInput`] before anything is written.
pub async fn copy_deliverables(deliverables: &[Deliverable], dir: &Path) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;

    let mut destinations = Vec::with_capacity(deliverables.len());
    for deliverable in deliverables {
        let name = deliverable.path.file_name().ok_or_else(|| {
            Error::InvalidInput(format!("{} has no file name", deliverable.path.display()))
        })?;
        let destination = dir.join(name);
        if tokio::fs::try_exists(&destination).await? {
            return Err(already_exists(&destination));
        }
        destinations.push(destination);
    }

    let mut copied = Vec::with_capacity(deliverables.len());
    for (deliverable, destination) in deliverables.iter().zip(destinations) {
        copy_new(&deliverable.path, &destination).await?;
        info!(
            "{} -> {} ({})",
            deliverable.caption,
            destination.display(),
            format_file_size(deliverable.size)
        );
        copied.push(destination);
    }

    Ok(copied)
}

fn already_exists(path: &Path) -> Error {
    Error::InvalidInput(format!("{} already exists, not overwriting it", path.display()))
}

/// Copies `source` to a file that must not exist yet.
async fn copy_new(source: &Path, destination: &Path) -> Result<()> {
    let mut reader = tokio::fs::File::open(source).await?;
    let mut writer = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)
        .await
    {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(already_exists(destination));
        }
        Err(err) => return Err(err.into()),
    };
    tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await?;
    Ok(())
}
