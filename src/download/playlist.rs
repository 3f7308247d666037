//! Resolution of a media playlist into ordered segment references.

use m3u8_rs::Playlist as M3u8Playlist;
use tracing::info;
use url::Url;

use crate::download::DownloadClient;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRef {
    /// Position in the playlist, starting at 0.
    pub index: usize,
    pub uri: Url,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    pub total_duration: f64,
    pub segments: Vec<SegmentRef>,
}

impl Playlist {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Fetches and parses the playlist. No retry: a bad playlist is not transient.
pub async fn fetch_playlist(client: &DownloadClient, playlist_url: &Url) -> Result<Playlist> {
    let content = client
        .download_text(playlist_url)
        .await
        .map_err(|err| Error::playlist(playlist_url, format!("unreachable: {err}")))?;

    let playlist = parse_playlist(&content, playlist_url)?;
    info!(
        "Found {} segments to download in {}",
        playlist.len(),
        playlist_url
    );

    Ok(playlist)
}

pub fn parse_playlist(content: &str, playlist_url: &Url) -> Result<Playlist> {
    let media = match m3u8_rs::parse_playlist_res(content.as_bytes()) {
        Ok(M3u8Playlist::MediaPlaylist(media)) => media,
        Ok(M3u8Playlist::MasterPlaylist(_)) => {
            return Err(Error::playlist(
                playlist_url,
                "master playlists with variant streams are not supported",
            ));
        }
        Err(err) => {
            return Err(Error::playlist(playlist_url, format!("malformed playlist: {err:?}")));
        }
    };

    let segments = media
        .segments
        .iter()
        .enumerate()
        .map(|(index, segment)| {
            let uri = playlist_url.join(segment.uri.trim()).map_err(|err| {
                Error::playlist(
                    playlist_url,
                    format!("invalid segment URI {}: {}", segment.uri, err),
                )
            })?;

            Ok(SegmentRef {
                index,
                uri,
                duration: f64::from(segment.duration),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if segments.is_empty() {
        return Err(Error::playlist(playlist_url, "no segments found"));
    }

    Ok(Playlist {
        total_duration: segments.iter().map(|segment| segment.duration).sum(),
        segments,
    })
}
