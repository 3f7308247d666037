use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use m3u8_merge::error::{Error, Result};
use m3u8_merge::file;
use m3u8_merge::naming::{parse_request, Request};
use m3u8_merge::options::{Options, MIB};
use m3u8_merge::pipeline::{copy_deliverables, Pipeline};
use m3u8_merge::process::{require_tool, SystemRunner};
use m3u8_merge::progress::{format_file_size, LogSink};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[clap(subcommand)]
    subcmd: SubCmd,

    #[clap(short, long, default_value = "4", env = "PARALLEL_DOWNLOADS")]
    /// set the maximum number of parallel segment downloads
    parallel: usize,

    #[clap(short, long, default_value = "3", env = "SEGMENT_RETRIES")]
    /// set the number of attempts per segment
    retries: u32,

    #[clap(long, default_value = "1", env = "RETRY_BACKOFF")]
    /// seconds to wait between attempts
    retry_backoff: u64,

    #[clap(long, default_value = "2147483648", env = "MAX_FILE_SIZE")]
    /// split outputs larger than this many bytes
    max_file_size: u64,

    #[clap(long, default_value = "10", env = "SAFETY_MARGIN_MB")]
    /// headroom in mebibytes kept below the size ceiling
    safety_margin_mb: u64,

    #[clap(long, default_value = "1048576", env = "CHUNK_SIZE")]
    /// write buffer in bytes used while streaming segments
    chunk_size: usize,

    #[clap(long, default_value = "300", env = "DOWNLOAD_TIMEOUT")]
    /// overall HTTP timeout in seconds
    download_timeout: u64,

    #[clap(long, default_value = "30", env = "SEGMENT_TIMEOUT")]
    /// timeout in seconds of a single segment attempt
    segment_timeout: u64,

    #[clap(long, default_value = "ffmpeg", env = "FFMPEG_PATH")]
    ffmpeg: PathBuf,

    #[clap(long, default_value = "ffprobe", env = "FFPROBE_PATH")]
    ffprobe: PathBuf,

    #[clap(long, env = "WORK_DIR")]
    /// directory in which per-run temporary workspaces are created
    work_dir: Option<PathBuf>,

    #[clap(long, default_value = "info", env = "LOG_LEVEL")]
    /// log level, overridden by RUST_LOG
    log_level: String,
}

#[derive(Subcommand, Debug)]
#[command(version, about)]
enum SubCmd {
    /// Download several playlists listed in a json file
    File {
        #[clap(default_value = "download.json")]
        /// json array of { "url": ..., "name": ... } entries
        file: PathBuf,

        #[clap(short, long, default_value = ".")]
        /// directory receiving the outputs
        output_dir: PathBuf,
    },
    /// Download a single playlist
    Download {
        #[clap(value_parser = request_parser)]
        /// playlist url, optionally followed by `|custom name`
        input: Request,

        #[clap(short, long, default_value = ".")]
        /// directory receiving the outputs
        output_dir: PathBuf,
    },
}

fn request_parser(input: &str) -> std::result::Result<Request, String> {
    parse_request(input).map_err(|err| err.to_string())
}

impl Args {
    fn options(&self) -> Options {
        Options {
            max_file_size: self.max_file_size,
            safety_margin: self.safety_margin_mb * MIB,
            chunk_size: self.chunk_size,
            download_timeout: Duration::from_secs(self.download_timeout),
            segment_timeout: Duration::from_secs(self.segment_timeout),
            segment_retry_limit: self.retries,
            retry_backoff: Duration::from_secs(self.retry_backoff),
            max_parallel_downloads: self.parallel,
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
            work_dir: self.work_dir.clone(),
            ..Options::default()
        }
    }
}

/// Cancels `cancel` on the first interrupt and resolves to `true` on the
/// second one. Resolves to `false` if the signal can no longer be awaited.
async fn watch_interrupts<F, Fut>(mut interrupt: F, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if interrupt().await.is_err() {
        return false;
    }
    warn!("Interrupted, stopping after in-flight downloads; press Ctrl-C again to quit");
    cancel.cancel();

    interrupt().await.is_ok()
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    if let Err(err) = bootstrap() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let options = args.options();
    options.validate()?;
    info!("Options: {:?}", options);

    require_tool(&options.ffmpeg)?;
    if let Err(err) = require_tool(&options.ffprobe) {
        warn!("{}; oversized outputs will be split using the default duration", err);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if watch_interrupts(tokio::signal::ctrl_c, on_interrupt).await {
            warn!("Interrupted again, exiting");
            std::process::exit(130);
        }
    });

    let pipeline = Pipeline::new(options, Arc::new(SystemRunner), Arc::new(LogSink))
        .with_cancellation(cancel);

    match args.subcmd {
        SubCmd::File { file, output_dir } => {
            let summary = file::download_file(&file, &pipeline, &output_dir).await?;
            info!(
                "Finished reading file {}: {} succeeded, {} failed, {} skipped",
                file.display(),
                summary.succeeded,
                summary.failed,
                summary.skipped
            );
            for path in &summary.outputs {
                println!("{}", path.display());
            }
            if summary.failed > 0 {
                return Err(Error::InvalidInput(format!(
                    "{} of {} downloads failed",
                    summary.failed,
                    summary.failed + summary.succeeded
                )));
            }
        }
        SubCmd::Download { input, output_dir } => {
            let display_name = input.file_name.clone();
            let copied = pipeline
                .run(&input, |artifact| async move {
                    if artifact.is_degraded() {
                        warn!("Some parts could not be produced");
                    }
                    info!(
                        "Delivering {} to {}",
                        format_file_size(artifact.total_size()),
                        output_dir.display()
                    );
                    copy_deliverables(&artifact.deliverables(&display_name), &output_dir).await
                })
                .await?;

            for path in copied {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}
