//! Error kinds surfaced by a pipeline run.

use url::Url;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The playlist was unreachable, malformed or empty. Never retried.
    #[error("playlist error for {url}: {reason}")]
    Playlist { url: String, reason: String },

    /// A segment exhausted its retry budget.
    #[error("failed to download segment {uri} after {attempts} attempts: {last_cause}")]
    SegmentDownload {
        uri: Url,
        attempts: u32,
        last_cause: String,
    },

    /// The concatenation tool terminated unsuccessfully.
    #[error("assembly failed ({}): {diagnostics}", describe_exit(.exit_code))]
    Assembly {
        exit_code: Option<i32>,
        diagnostics: String,
    },

    /// No part could be produced while splitting.
    #[error("split failed: {0}")]
    Split(String),

    /// The segment fan-out broke down outside a single fetch: a task
    /// panicked or segments went missing.
    #[error("download failed: {0}")]
    Download(String),

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// The process runner could not start or wait for a program.
    #[error("failed to run {program}: {message}")]
    Process { program: String, message: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn playlist(url: impl ToString, reason: impl Into<String>) -> Self {
        Self::Playlist {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn process(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Process {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Stable name of the error kind, used in failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Playlist { .. } => "PlaylistError",
            Error::SegmentDownload { .. } => "SegmentDownloadError",
            Error::Assembly { .. } => "AssemblyError",
            Error::Split(_) => "SplitError",
            Error::Download(_) => "DownloadError",
            Error::Workspace(_) => "WorkspaceError",
            Error::ToolNotFound { .. } => "ToolNotFound",
            Error::Process { .. } => "ProcessError",
            Error::InvalidInput(_) => "InvalidInput",
            Error::Config(_) => "ConfigError",
            Error::Io(_) => "IoError",
            Error::Cancelled => "Cancelled",
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembly_error_carries_diagnostics() {
        let err = Error::Assembly {
            exit_code: Some(1),
            diagnostics: "Invalid data found when processing input".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("exit code 1"));
        assert!(text.contains("Invalid data found"));
        assert_eq!(err.kind(), "AssemblyError");
    }

    #[test]
    fn signal_termination_is_described() {
        let err = Error::Assembly {
            exit_code: None,
            diagnostics: String::new(),
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn segment_error_names_uri() {
        let err = Error::SegmentDownload {
            uri: Url::parse("https://h/seg_1.ts").unwrap(),
            attempts: 3,
            last_cause: "HTTP status 503".to_string(),
        };
        assert_eq!(err.kind(), "SegmentDownloadError");
        assert!(err.to_string().contains("https://h/seg_1.ts"));
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn broken_fan_out_is_a_download_error() {
        let err = Error::Download("download task failed: panicked".to_string());
        assert_eq!(err.kind(), "DownloadError");
        assert!(err.to_string().starts_with("download failed"));
    }
}
