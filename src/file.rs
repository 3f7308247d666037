use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::naming::{parse_request, part_file_name, Request, OUTPUT_EXTENSION};
use crate::pipeline::{copy_deliverables, Pipeline};

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct DownloadEntity {
    url: String,
    #[serde(default)]
    name: Option<String>,
}

impl DownloadEntity {
    fn request(&self) -> Result<Request> {
        match &self.name {
            Some(name) => parse_request(&format!("{}|{}", self.url, name)),
            None => parse_request(&self.url),
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Named entries whose output already existed.
    pub skipped: usize,
    pub outputs: Vec<PathBuf>,
}

/// True when `request` would land on a file already in `output_dir`, either
/// whole or as its first part.
fn output_exists(request: &Request, output_dir: &Path) -> bool {
    output_dir.join(&request.file_name).exists()
        || output_dir
            .join(part_file_name(request.base_name(), 1))
            .exists()
}

/// First `<base>_<n>.mp4` variant of `request` that is free in `output_dir`.
fn next_free(request: &Request, output_dir: &Path) -> Request {
    let base = request.base_name();
    (1..)
        .map(|n| Request {
            url: request.url.clone(),
            file_name: format!("{base}_{n}.{OUTPUT_EXTENSION}"),
        })
        .find(|candidate| !output_exists(candidate, output_dir))
        .unwrap_or_else(|| request.clone())
}

fn read_jobs(file: &Path) -> Result<Vec<DownloadEntity>> {
    let content = std::fs::read_to_string(file)?;
    serde_json::from_str(&content)
        .map_err(|err| Error::InvalidInput(format!("{}: {err}", file.display())))
}

/// Runs every entry of a JSON job file one after another. A failed entry is
/// logged and counted; the rest of the batch still runs.
///
/// A named entry whose output is already in `output_dir` is skipped. An
/// unnamed entry gets a numbered name instead, since timestamp names only
/// have one-second resolution.
pub async fn download_file(file: &Path, pipeline: &Pipeline, output_dir: &Path) -> Result<BatchSummary> {
    let jobs = read_jobs(file)?;
    info!("Read {} downloads from {}", jobs.len(), file.display());

    let mut summary = BatchSummary::default();
    for job in jobs {
        if pipeline.cancellation_token().is_cancelled() {
            break;
        }

        let mut request = match job.request() {
            Ok(request) => request,
            Err(err) => {
                error!("Skipping {}: {}", job.url, err);
                summary.failed += 1;
                continue;
            }
        };
        if output_exists(&request, output_dir) {
            if job.name.is_some() {
                info!(
                    "File {} already exists, therefore skipping download",
                    output_dir.join(&request.file_name).display()
                );
                summary.skipped += 1;
                continue;
            }
            request = next_free(&request, output_dir);
        }

        let display_name = request.file_name.clone();
        let result = pipeline
            .run(&request, |artifact| async move {
                copy_deliverables(&artifact.deliverables(&display_name), output_dir).await
            })
            .await;

        match result {
            Ok(copied) => {
                summary.succeeded += 1;
                summary.outputs.extend(copied);
            }
            Err(err) => {
                error!("Error downloading {}: {}", job.url, err);
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
