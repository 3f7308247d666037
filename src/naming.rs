//! Parsing of `url|name` requests and derivation of output file names.

use chrono::{DateTime, Local};
use url::Url;

use crate::error::{Error, Result};

pub const OUTPUT_EXTENSION: &str = "mp4";

const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// A validated playlist URL and the file name its output will carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: Url,
    /// Output file name including the container extension.
    pub file_name: String,
}

impl Request {
    /// File name without the container extension, used to name parts.
    pub fn base_name(&self) -> &str {
        strip_extension(&self.file_name)
    }
}

pub fn parse_request(text: &str) -> Result<Request> {
    parse_request_at(text, Local::now())
}

pub fn parse_request_at(text: &str, now: DateTime<Local>) -> Result<Request> {
    let (url, name) = match text.split_once('|') {
        Some((url, name)) => (url.trim(), Some(name.trim())),
        None => (text.trim(), None),
    };

    let file_name = match name {
        Some(name) if !name.is_empty() => output_file_name(name),
        _ => timestamp_file_name(now),
    };

    Ok(Request {
        url: validate_url(url)?,
        file_name,
    })
}

pub fn validate_url(url: &str) -> Result<Url> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::InvalidInput(format!("not an HTTP/HTTPS URL: {url}")));
    }
    if !url.contains("m3u8") {
        return Err(Error::InvalidInput(format!("not an M3U8 playlist URL: {url}")));
    }

    Url::parse(url).map_err(|err| Error::InvalidInput(format!("{url}: {err}")))
}

/// Replaces filesystem-unsafe characters and appends the container extension.
pub fn output_file_name(name: &str) -> String {
    let mut cleaned = sanitize(name);
    let suffix = format!(".{OUTPUT_EXTENSION}");
    if !cleaned.to_lowercase().ends_with(&suffix) {
        cleaned.push_str(&suffix);
    }
    cleaned
}

pub fn timestamp_file_name(now: DateTime<Local>) -> String {
    format!("video_{}.{}", now.format("%Y%m%d_%H%M%S"), OUTPUT_EXTENSION)
}

pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// `<base>_part<NN>.<ext>` with a 1-based, zero-padded index.
pub fn part_file_name(base_name: &str, index: usize) -> String {
    format!("{}_part{:02}.{}", base_name, index, OUTPUT_EXTENSION)
}

fn strip_extension(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    }
}
