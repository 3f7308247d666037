//! Segment retrieval: one segment with bounded retry, and the worker pool
//! that fetches a whole playlist without reordering it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

use crate::download::playlist::{Playlist, SegmentRef};
use crate::download::DownloadClient;
use crate::error::{Error, Result};
use crate::progress::{format_duration, ProgressEvent, ProgressSink};

pub const SEGMENT_EXTENSION: &str = "ts";

/// One segment persisted on local storage.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentFile {
    pub path: PathBuf,
    pub segment: SegmentRef,
    pub size: u64,
}

/// Deterministic on-disk name; sorts in playlist order.
pub fn segment_file_name(index: usize) -> String {
    format!("segment_{:04}.{}", index, SEGMENT_EXTENSION)
}

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub retry_limit: u32,
    pub backoff: Duration,
    pub chunk_size: usize,
}

/// Why a single attempt failed. All of these are retried.
#[derive(Debug, thiserror::Error)]
enum FetchFault {
    #[error("request timed out")]
    Timeout,
    #[error("HTTP status {0}")]
    Status(StatusCode),
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    #[error("expected {expected} bytes but received {actual}")]
    LengthMismatch { expected: u64, actual: u64 },
}

impl From<reqwest::Error> for FetchFault {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchFault::Timeout
        } else if let Some(status) = err.status() {
            FetchFault::Status(status)
        } else {
            FetchFault::Transport(err)
        }
    }
}

/// Attempt outcome: a retryable fault or a local failure that ends the run.
enum AttemptError {
    Fault(FetchFault),
    Local(Error),
}

impl From<FetchFault> for AttemptError {
    fn from(fault: FetchFault) -> Self {
        AttemptError::Fault(fault)
    }
}

impl From<reqwest::Error> for AttemptError {
    fn from(err: reqwest::Error) -> Self {
        AttemptError::Fault(err.into())
    }
}

impl From<std::io::Error> for AttemptError {
    fn from(err: std::io::Error) -> Self {
        AttemptError::Local(Error::Io(err))
    }
}

fn check_length(expected: Option<u64>, actual: u64) -> std::result::Result<(), FetchFault> {
    match expected {
        Some(expected) if expected != actual => Err(FetchFault::LengthMismatch { expected, actual }),
        _ => Ok(()),
    }
}

fn temp_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

#[derive(Debug, Clone)]
pub struct SegmentFetcher {
    client: DownloadClient,
    policy: FetchPolicy,
}

impl SegmentFetcher {
    pub fn new(client: DownloadClient, policy: FetchPolicy) -> Self {
        Self { client, policy }
    }

    /// Downloads `segment` to `destination`, retrying transient failures.
    ///
    /// The body is written to a sibling `.part` file and renamed into place,
    /// so `destination` only ever exists complete. A cancellation observed
    /// during a backoff ends the loop early with [`Error::Cancelled`].
    pub async fn fetch(
        &self,
        segment: &SegmentRef,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<SegmentFile> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let fault = match self.attempt(&segment.uri, destination).await {
                Ok(size) => {
                    debug!("Downloaded {} bytes from {}", size, segment.uri);
                    return Ok(SegmentFile {
                        path: destination.to_path_buf(),
                        segment: segment.clone(),
                        size,
                    });
                }
                Err(AttemptError::Local(err)) => return Err(err),
                Err(AttemptError::Fault(fault)) => fault,
            };

            if attempts >= self.policy.retry_limit {
                error!(
                    "Failed to download segment {} after {} attempts: {}",
                    segment.uri, attempts, fault
                );
                return Err(Error::SegmentDownload {
                    uri: segment.uri.clone(),
                    attempts,
                    last_cause: fault.to_string(),
                });
            }

            warn!(
                "Retry {}/{} for segment {}: {}",
                attempts, self.policy.retry_limit, segment.uri, fault
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.policy.backoff) => {}
            }
        }
    }

    async fn attempt(&self, uri: &Url, destination: &Path) -> std::result::Result<u64, AttemptError> {
        let partial = temp_path(destination);
        let result = self.stream_to(uri, &partial).await;

        match result {
            Ok(size) => {
                tokio::fs::rename(&partial, destination).await?;
                Ok(size)
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(err)
            }
        }
    }

    async fn stream_to(&self, uri: &Url, partial: &Path) -> std::result::Result<u64, AttemptError> {
        let mut response = self.client.get(uri, Some(self.policy.timeout)).await?;
        let expected = response.content_length();

        let file = File::create(partial).await?;
        let mut writer = BufWriter::with_capacity(self.policy.chunk_size, file);
        let mut written: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            written += write_chunk(&mut writer, &chunk).await?;
        }
        writer.flush().await?;
        writer.into_inner().sync_all().await?;

        check_length(expected, written)?;
        Ok(written)
    }
}

async fn write_chunk(writer: &mut BufWriter<File>, chunk: &Bytes) -> std::io::Result<u64> {
    writer.write_all(chunk).await?;
    Ok(chunk.len() as u64)
}

struct SegmentDownloadArgs {
    downloaded_duration: Arc<Mutex<f64>>,
    total_duration: f64,
    downloaded_segments: Arc<Mutex<usize>>,
    total_segments: usize,
    sink: Arc<dyn ProgressSink>,
}

impl Clone for SegmentDownloadArgs {
    fn clone(&self) -> Self {
        Self {
            downloaded_duration: Arc::clone(&self.downloaded_duration),
            total_duration: self.total_duration,
            downloaded_segments: Arc::clone(&self.downloaded_segments),
            total_segments: self.total_segments,
            sink: Arc::clone(&self.sink),
        }
    }
}

impl SegmentDownloadArgs {
    async fn finished(&self, segment: &SegmentRef) {
        let mut downloaded_duration = self.downloaded_duration.lock().await;
        let mut downloaded_segments = self.downloaded_segments.lock().await;
        *downloaded_segments += 1;
        *downloaded_duration += segment.duration;

        let percent = *downloaded_segments as f64 / self.total_segments as f64 * 100.0;
        self.sink.report(ProgressEvent::new(format!(
            "Downloaded segment {}/{} ({:.1}%) [{} / {}]",
            *downloaded_segments,
            self.total_segments,
            percent,
            format_duration(*downloaded_duration),
            format_duration(self.total_duration),
        )));
    }
}

/// Downloads every segment of `playlist` into `folder` with at most
/// `parallel` transfers in flight.
///
/// The returned files are in playlist order regardless of completion order.
/// Once `cancel` fires (or a segment fails for good) no new transfer starts;
/// in-flight transfers are awaited before returning.
pub async fn download_segments(
    fetcher: &SegmentFetcher,
    playlist: &Playlist,
    folder: &Path,
    parallel: usize,
    sink: Arc<dyn ProgressSink>,
    cancel: &CancellationToken,
) -> Result<Vec<SegmentFile>> {
    let semaphore = Arc::new(Semaphore::new(parallel.max(1)));
    let abort = cancel.child_token();

    let args = SegmentDownloadArgs {
        downloaded_duration: Arc::new(Mutex::new(0.0)),
        total_duration: playlist.total_duration,
        downloaded_segments: Arc::new(Mutex::new(0)),
        total_segments: playlist.len(),
        sink,
    };

    let tasks = playlist
        .segments
        .iter()
        .cloned()
        .map(|segment| {
            let fetcher = fetcher.clone();
            let semaphore = Arc::clone(&semaphore);
            let abort = abort.clone();
            let args = args.clone();
            let destination = folder.join(segment_file_name(segment.index));

            tokio::spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = abort.cancelled() => return Ok(None),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return Ok(None),
                    },
                };
                if abort.is_cancelled() {
                    return Ok(None);
                }

                match fetcher.fetch(&segment, &destination, &abort).await {
                    Ok(file) => {
                        args.finished(&segment).await;
                        Ok(Some(file))
                    }
                    Err(err) => {
                        abort.cancel();
                        Err(err)
                    }
                }
            })
        })
        .collect::<Vec<_>>();

    let mut files = Vec::with_capacity(tasks.len());
    let mut failure: Option<Error> = None;

    for task in tasks {
        match task.await {
            Ok(Ok(Some(file))) => files.push(file),
            Ok(Ok(None)) => {}
            Ok(Err(Error::Cancelled)) => {}
            Ok(Err(err)) => {
                failure.get_or_insert(err);
            }
            Err(err) => {
                abort.cancel();
                failure.get_or_insert(Error::Download(format!("download task failed: {err}")));
            }
        }
    }

    if let Some(err) = failure {
        return Err(err);
    }
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    if files.len() != playlist.len() {
        return Err(Error::Download(format!(
            "downloaded {} of {} segments",
            files.len(),
            playlist.len()
        )));
    }

    files.sort_by_key(|file| file.segment.index);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::RecordingSink;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn policy() -> FetchPolicy {
        FetchPolicy {
            timeout: Duration::from_secs(5),
            retry_limit: 3,
            backoff: Duration::from_millis(10),
            chunk_size: 1024,
        }
    }

    fn fetcher() -> SegmentFetcher {
        SegmentFetcher::new(DownloadClient::new(Duration::from_secs(10)).unwrap(), policy())
    }

    fn segment(server: &MockServer, index: usize) -> SegmentRef {
        SegmentRef {
            index,
            uri: Url::parse(&format!("{}/seg_{}.ts", server.uri(), index)).unwrap(),
            duration: 2.0,
        }
    }

    fn playlist(server: &MockServer, count: usize) -> Playlist {
        let segments: Vec<_> = (0..count).map(|i| segment(server, i)).collect();
        Playlist {
            total_duration: segments.iter().map(|s| s.duration).sum(),
            segments,
        }
    }

    async fn requests_to(server: &MockServer, route: &str) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == route)
            .count()
    }

    #[test]
    fn segment_names_sort_in_playlist_order() {
        assert_eq!(segment_file_name(7), "segment_0007.ts");
        let mut names: Vec<_> = [10, 2, 0, 1].iter().map(|i| segment_file_name(*i)).collect();
        names.sort();
        assert_eq!(names[0], "segment_0000.ts");
        assert_eq!(names[3], "segment_0010.ts");
    }

    #[test]
    fn length_mismatch_is_a_fault() {
        assert!(check_length(None, 10).is_ok());
        assert!(check_length(Some(10), 10).is_ok());
        assert!(matches!(
            check_length(Some(10), 4),
            Err(FetchFault::LengthMismatch { expected: 10, actual: 4 })
        ));
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/seg_0.ts"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/seg_0.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join(segment_file_name(0));
        let file = fetcher()
            .fetch(&segment(&server, 0), &destination, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(file.size, 4096);
        assert_eq!(std::fs::read(&destination).unwrap(), vec![7u8; 4096]);
        assert!(!temp_path(&destination).exists());
        assert_eq!(requests_to(&server, "/seg_0.ts").await, 3);
    }

    #[tokio::test]
    async fn exhausts_retry_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/seg_0.ts"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join(segment_file_name(0));
        let err = fetcher()
            .fetch(&segment(&server, 0), &destination, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::SegmentDownload {
                attempts,
                last_cause,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert!(last_cause.contains("500"), "unexpected cause: {last_cause}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(requests_to(&server, "/seg_0.ts").await, 3);
        assert!(!destination.exists());
        assert!(!temp_path(&destination).exists());
    }

    #[tokio::test]
    async fn slow_response_times_out_and_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/seg_0.ts"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8; 16])
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let fetcher = SegmentFetcher::new(
            DownloadClient::new(Duration::from_secs(10)).unwrap(),
            FetchPolicy {
                timeout: Duration::from_millis(50),
                retry_limit: 2,
                ..policy()
            },
        );
        let dir = tempfile::tempdir().unwrap();
        let err = fetcher
            .fetch(
                &segment(&server, 0),
                &dir.path().join("segment_0000.ts"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timed out"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn downloads_in_playlist_order_with_concurrency() {
        let server = MockServer::start().await;
        for i in 0..6u64 {
            // Earlier segments answer later so completion order is reversed.
            Mock::given(method("GET"))
                .and(path(format!("/seg_{i}.ts")))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_bytes(vec![i as u8; 128])
                        .set_delay(Duration::from_millis(60 - i * 10)),
                )
                .mount(&server)
                .await;
        }

        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let files = download_segments(
            &fetcher(),
            &playlist(&server, 6),
            dir.path(),
            4,
            sink.clone(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(files.len(), 6);
        for (i, file) in files.iter().enumerate() {
            assert_eq!(file.segment.index, i);
            assert_eq!(file.path, dir.path().join(segment_file_name(i)));
            assert_eq!(std::fs::read(&file.path).unwrap(), vec![i as u8; 128]);
        }

        let events = sink.events();
        assert_eq!(events.len(), 6);
        assert!(events[5].as_str().starts_with("Downloaded segment 6/6 (100.0%)"));
    }

    #[tokio::test]
    async fn failed_segment_fails_the_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/seg_0.ts"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 8]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/seg_1.ts"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = download_segments(
            &fetcher(),
            &playlist(&server, 2),
            dir.path(),
            2,
            Arc::new(RecordingSink::default()),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), "SegmentDownloadError");
    }

    #[tokio::test]
    async fn cancelled_before_start_downloads_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 8]))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let dir = tempfile::tempdir().unwrap();
        let err = download_segments(
            &fetcher(),
            &playlist(&server, 3),
            dir.path(),
            2,
            Arc::new(RecordingSink::default()),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }
}
