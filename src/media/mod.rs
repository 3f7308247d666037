//! Stream-copy operations on the downloaded media, all done by shelling
//! out to ffmpeg/ffprobe through a [`ProcessRunner`](crate::process::ProcessRunner).

pub mod assemble;
pub mod probe;
pub mod split;

pub use assemble::Assembler;
pub use probe::DurationProbe;
pub use split::SizeBoundSplitter;
