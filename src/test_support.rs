use std::{
    collections::HashMap,
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;

use crate::resolver::{
    FetchError, ResolveError, ResolvedVideo, StreamDescriptor, StreamResolver, StreamSource,
};

fn descriptor(
    format_id: &str,
    container: &str,
    height: Option<u32>,
    is_progressive: bool,
    is_audio_only: bool,
    bitrate_kbps: Option<f32>,
) -> StreamDescriptor {
    StreamDescriptor {
        container: container.to_string(),
        height,
        is_progressive,
        is_audio_only,
        bitrate_kbps,
        source: StreamSource {
            format_id: format_id.to_string(),
            url: format!("https://media.example.test/{format_id}"),
            http_headers: HashMap::new(),
        },
    }
}

pub fn progressive_stream(format_id: &str, container: &str, height: Option<u32>) -> StreamDescriptor {
    descriptor(format_id, container, height, true, false, None)
}

pub fn video_only_stream(format_id: &str, container: &str, height: Option<u32>) -> StreamDescriptor {
    descriptor(format_id, container, height, false, false, None)
}

pub fn audio_stream(format_id: &str, container: &str, bitrate_kbps: Option<f32>) -> StreamDescriptor {
    descriptor(format_id, container, None, false, true, bitrate_kbps)
}

pub fn resolved_video(title: &str, video_id: &str, streams: Vec<StreamDescriptor>) -> ResolveOutcome {
    ResolveOutcome::Video(ResolvedVideo {
        title: title.to_string(),
        video_id: video_id.to_string(),
        streams,
    })
}

pub enum ResolveOutcome {
    Video(ResolvedVideo),
    Unavailable(&'static str),
    Failed(&'static str),
}

pub enum FetchOutcome {
    Write(Vec<u8>),
    /// Reports success without creating the file.
    Vanish,
    WriteEmpty,
    Fail,
}

/// In-memory resolver that never touches the network and counts its calls.
pub struct StubResolver {
    resolve: ResolveOutcome,
    fetch: FetchOutcome,
    resolve_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl StubResolver {
    pub fn new(resolve: ResolveOutcome, fetch: FetchOutcome) -> Self {
        Self {
            resolve,
            fetch,
            resolve_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_streams(title: &str, video_id: &str, streams: Vec<StreamDescriptor>) -> Self {
        Self::new(
            resolved_video(title, video_id, streams),
            FetchOutcome::Write(b"media-bytes".to_vec()),
        )
    }

    pub fn resolve_count(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamResolver for StubResolver {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn resolve(&self, _url: &str) -> Result<ResolvedVideo, ResolveError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        match &self.resolve {
            ResolveOutcome::Video(video) => Ok(video.clone()),
            ResolveOutcome::Unavailable(message) => {
                Err(ResolveError::Unavailable(message.to_string()))
            }
            ResolveOutcome::Failed(message) => Err(ResolveError::Failed(message.to_string())),
        }
    }

    async fn fetch(
        &self,
        _stream: &StreamDescriptor,
        destination: &Path,
    ) -> Result<u64, FetchError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let io_error = |source: std::io::Error| FetchError::Io {
            path: destination.to_path_buf(),
            source,
        };

        match &self.fetch {
            FetchOutcome::Write(bytes) => {
                tokio::fs::write(destination, bytes).await.map_err(io_error)?;
                Ok(bytes.len() as u64)
            }
            FetchOutcome::Vanish => Ok(0),
            FetchOutcome::WriteEmpty => {
                tokio::fs::write(destination, b"").await.map_err(io_error)?;
                Ok(0)
            }
            FetchOutcome::Fail => Err(FetchError::Status(403)),
        }
    }
}
