use std::{
    collections::HashMap,
    future::Future,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::timeout;

/// Where the bytes of one stream live, as reported by the resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSource {
    pub format_id: String,
    pub url: String,
    pub http_headers: HashMap<String, String>,
}

/// One encoded variant of a video, without its bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    pub container: String,
    /// Frame height in pixels. Only set for streams carrying video.
    pub height: Option<u32>,
    /// Audio and video multiplexed into a single file.
    pub is_progressive: bool,
    pub is_audio_only: bool,
    pub bitrate_kbps: Option<f32>,
    pub source: StreamSource,
}

#[derive(Debug, Clone)]
pub struct ResolvedVideo {
    pub title: String,
    pub video_id: String,
    /// Kept in the order the resolver listed them.
    pub streams: Vec<StreamDescriptor>,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("stream resolution timed out after {0}s")]
    Timeout(u64),
    #[error("yt-dlp is not installed on this system")]
    ToolMissing,
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Failed(String),
    #[error("could not parse stream metadata: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("stream fetch timed out after {0}s")]
    Timeout(u64),
    #[error("stream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream answered with HTTP status {0}")]
    Status(u16),
    #[error("could not write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Upstream metadata protocol client: lists streams and fetches one of them.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, url: &str) -> Result<ResolvedVideo, ResolveError>;

    /// Writes the stream's bytes to `destination` and returns how many were written.
    async fn fetch(
        &self,
        stream: &StreamDescriptor,
        destination: &Path,
    ) -> Result<u64, FetchError>;
}

/// Bounds a resolver call, turning an elapsed deadline into the stage's timeout error.
pub async fn with_timeout<T, E, F>(limit: Duration, on_elapsed: fn(u64) -> E, call: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(on_elapsed(limit.as_secs())))
}
