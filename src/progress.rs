//! Status reporting between the pipeline and whoever drives it.
//!
//! The pipeline only knows the [`ProgressSink`] capability. Delivery is
//! best-effort: a sink that fails to deliver logs the failure itself and
//! returns, the pipeline never observes it.

use std::fmt;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{info, warn};

/// An immutable, human-readable status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent(String);

impl ProgressEvent {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ProgressEvent {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for ProgressEvent {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Writes every event to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn report(&self, event: ProgressEvent) {
        info!(target: "progress", "{}", event);
    }
}

/// Forwards events to a channel, e.g. the task that edits a chat status
/// message. A closed receiver is logged and otherwise ignored.
#[derive(Debug)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelSink {
    fn report(&self, event: ProgressEvent) {
        if let Err(err) = self.sender.send(event) {
            warn!("Failed to deliver progress update: {}", err);
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProgressSink for RecordingSink {
    fn report(&self, event: ProgressEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

pub fn format_file_size(size: u64) -> String {
    const KB: f64 = 1024.0;
    let bytes = size as f64;
    if bytes < KB {
        format!("{size} B")
    } else if bytes < KB * KB {
        format!("{:.1} KB", bytes / KB)
    } else if bytes < KB * KB * KB {
        format!("{:.1} MB", bytes / (KB * KB))
    } else {
        format!("{:.1} GB", bytes / (KB * KB * KB))
    }
}

pub fn format_duration(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let seconds = seconds % 60;

    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sizes() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(6 * 1024 * 1024), "6.0 MB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(0.0), "00:00:00");
        assert_eq!(format_duration(3725.9), "01:02:05");
        assert_eq!(format_duration(-4.0), "00:00:00");
    }

    #[tokio::test]
    async fn channel_sink_survives_closed_receiver() {
        let (sink, mut receiver) = ChannelSink::new();
        sink.report("first".into());
        assert_eq!(receiver.recv().await, Some(ProgressEvent::new("first")));

        drop(receiver);
        sink.report("second".into());
    }

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingSink::default();
        sink.report("a".into());
        sink.report("b".into());
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].as_str(), "b");
    }
}
