use std::fmt;

use thiserror::Error;
use url::Url;

const WATCH_URL_MARKER: &str = "youtube.com/watch?v=";
const SHORT_URL_MARKER: &str = "youtu.be/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadKind {
    Video,
    Audio,
}

impl DownloadKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::Audio => "mp3",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            Self::Video => "video/mp4",
            Self::Audio => "audio/mpeg",
        }
    }
}

impl fmt::Display for DownloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Video => "MP4",
            Self::Audio => "MP3",
        })
    }
}

/// A download request whose URL already passed the canonical-form check.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    url: String,
    kind: DownloadKind,
}

impl DownloadRequest {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> DownloadKind {
        self.kind
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid YouTube URL format")]
pub struct InvalidUrl;

/// Syntactic pre-filter. Says nothing about whether the video exists or is
/// public; the resolver finds that out. The input must also be an absolute
/// http(s) URL, so it can never be read as a command-line option downstream.
pub fn validate_request(url: &str, kind: DownloadKind) -> Result<DownloadRequest, InvalidUrl> {
    let url = url.trim();
    if url.is_empty() || !(url.contains(WATCH_URL_MARKER) || url.contains(SHORT_URL_MARKER)) {
        return Err(InvalidUrl);
    }

    let parsed = Url::parse(url).map_err(|_| InvalidUrl)?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(InvalidUrl);
    }

    Ok(DownloadRequest {
        url: url.to_string(),
        kind,
    })
}
