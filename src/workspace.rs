//! Scoped working directory of one pipeline run.
//!
//! A [`Workspace`] owns a fresh temporary directory and the HTTP client used
//! by the run. Every path the pipeline produces lives under it. Call
//! [`Workspace::release`] on every exit path; dropping an unreleased
//! workspace still removes the directory, but silently.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::download::DownloadClient;
use crate::error::{Error, Result};
use crate::options::Options;

pub const MANIFEST_NAME: &str = "input_list.txt";

pub struct Workspace {
    temp_dir: TempDir,
    client: DownloadClient,
}

impl Workspace {
    /// Creates an exclusive temporary directory and the run's HTTP client.
    pub fn acquire(options: &Options) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("m3u8_merge_");
        let temp_dir = match &options.work_dir {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|err| Error::Workspace(format!("failed to create temp dir: {err}")))?;
        let client = DownloadClient::new(options.download_timeout)?;

        debug!("Acquired workspace {}", temp_dir.path().display());
        Ok(Self { temp_dir, client })
    }

    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn client(&self) -> &DownloadClient {
        &self.client
    }

    /// Path of a file inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    pub fn manifest(&self) -> PathBuf {
        self.file(MANIFEST_NAME)
    }

    /// Recursively removes the directory and closes the HTTP client.
    pub fn release(self) -> Result<()> {
        let Self { temp_dir, client } = self;
        drop(client);

        let path = temp_dir.path().to_path_buf();
        temp_dir.close().map_err(|err| {
            warn!("Failed to remove workspace {}: {}", path.display(), err);
            Error::Workspace(format!("failed to remove {}: {err}", path.display()))
        })?;

        debug!("Released workspace {}", path.display());
        Ok(())
    }
}
