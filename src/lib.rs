//! Fetches an HLS media playlist, downloads its segments, stream-copies them
//! into one MP4 and splits the result into duration-proportional parts when
//! it exceeds a size ceiling.

pub mod artifact;
pub mod download;
pub mod error;
pub mod file;
pub mod media;
pub mod naming;
pub mod options;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod workspace;

pub use artifact::{Artifact, Deliverable, MergedFile, PartFile};
pub use error::{Error, Result};
pub use naming::{parse_request, Request};
pub use options::Options;
pub use pipeline::Pipeline;
pub use process::{ProcessRunner, SystemRunner, ToolCommand, ToolOutput};
pub use progress::{ProgressEvent, ProgressSink};
