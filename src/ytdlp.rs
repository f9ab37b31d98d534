use std::{collections::HashMap, io::ErrorKind, path::Path, time::Duration};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, instrument, warn};

use crate::resolver::{
    FetchError, ResolveError, ResolvedVideo, StreamDescriptor, StreamResolver, StreamSource,
};

const CONNECT_TIMEOUT_SECONDS: u64 = 15;

/// Phrases in yt-dlp's last stderr line meaning the video itself cannot be served.
const UNAVAILABLE_MARKERS: [&str; 8] = [
    "private video",
    "video unavailable",
    "has been removed",
    "not available in your country",
    "blocked it in your country",
    "unsupported url",
    "sign in to confirm your age",
    "members-only",
];

#[derive(Debug, Deserialize)]
struct YtDlpVideoInfo {
    id: String,
    title: Option<String>,
    #[serde(default)]
    formats: Vec<YtDlpFormat>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    format_id: String,
    url: Option<String>,
    ext: Option<String>,
    protocol: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
    abr: Option<f32>,
    tbr: Option<f32>,
    #[serde(default)]
    http_headers: HashMap<String, String>,
}

/// Resolves streams by asking yt-dlp for the video's JSON metadata and fetches
/// them straight from the direct URLs it reports.
pub struct YtDlpResolver {
    binary: String,
    http_client: reqwest::Client,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECONDS))
            .build()?;

        Ok(Self {
            binary: binary.into(),
            http_client,
        })
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, ResolveError> {
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    ResolveError::ToolMissing
                } else {
                    ResolveError::Failed(format!("could not run yt-dlp: {error}"))
                }
            })?;

        if !output.status.success() {
            return Err(classify_failure(&output.stderr));
        }

        Ok(output)
    }
}

#[async_trait]
impl StreamResolver for YtDlpResolver {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    #[instrument(skip(self))]
    async fn resolve(&self, url: &str) -> Result<ResolvedVideo, ResolveError> {
        let output = self.run(&metadata_args(url)).await?;
        let info: YtDlpVideoInfo = serde_json::from_slice(&output.stdout)?;
        debug!(formats = info.formats.len(), "yt-dlp metadata parsed");

        Ok(into_resolved_video(info))
    }

    #[instrument(skip(self, stream), fields(format_id = %stream.source.format_id))]
    async fn fetch(
        &self,
        stream: &StreamDescriptor,
        destination: &Path,
    ) -> Result<u64, FetchError> {
        let mut request = self.http_client.get(&stream.source.url);
        for (name, value) in &stream.source.http_headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let io_error = |source: std::io::Error| FetchError::Io {
            path: destination.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(io_error)?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_error)?;

        Ok(written)
    }
}

/// `--` ends option parsing, so the URL is always taken as a positional.
fn metadata_args(url: &str) -> [&str; 5] {
    ["-J", "--no-playlist", "--no-warnings", "--", url]
}

fn into_resolved_video(info: YtDlpVideoInfo) -> ResolvedVideo {
    let streams = info
        .formats
        .into_iter()
        .filter_map(into_descriptor)
        .collect();

    ResolvedVideo {
        title: info
            .title
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| info.id.clone()),
        video_id: info.id,
        streams,
    }
}

fn into_descriptor(format: YtDlpFormat) -> Option<StreamDescriptor> {
    let is_direct = matches!(format.protocol.as_deref(), Some("http" | "https"));
    let url = format.url.clone().filter(|_| is_direct)?;
    let video = has_video(&format);
    let audio = has_audio(&format);

    if !video && !audio {
        return None;
    }

    Some(StreamDescriptor {
        container: format
            .ext
            .clone()
            .unwrap_or_default()
            .to_ascii_lowercase(),
        height: format.height.filter(|_| video),
        is_progressive: video && audio,
        is_audio_only: audio && !video,
        bitrate_kbps: format.abr.or(format.tbr),
        source: StreamSource {
            format_id: format.format_id,
            url,
            http_headers: format.http_headers,
        },
    })
}

fn has_video(format: &YtDlpFormat) -> bool {
    matches!(format.vcodec.as_deref(), Some(value) if value != "none")
}

fn has_audio(format: &YtDlpFormat) -> bool {
    matches!(format.acodec.as_deref(), Some(value) if value != "none")
}

fn classify_failure(stderr: &[u8]) -> ResolveError {
    let message = String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the operation")
        .to_string();
    let lower = message.to_ascii_lowercase();

    if UNAVAILABLE_MARKERS.iter().any(|marker| lower.contains(marker)) {
        warn!("upstream reports the video as unavailable: {message}");
        ResolveError::Unavailable(message)
    } else {
        ResolveError::Failed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_passed_after_the_option_terminator() {
        let args = metadata_args("--foo#youtu.be/");
        assert_eq!(args, ["-J", "--no-playlist", "--no-warnings", "--", "--foo#youtu.be/"]);
    }

    const SAMPLE_INFO: &str = r#"{
        "id": "abc123",
        "title": "Test Video",
        "formats": [
            {"format_id": "sb0", "ext": "mhtml", "protocol": "mhtml", "vcodec": "none", "acodec": "none",
             "url": "https://i.ytimg.com/sb/abc123/storyboard3_L0/default.jpg"},
            {"format_id": "233", "ext": "mp4", "protocol": "m3u8_native", "vcodec": "none", "acodec": "unknown",
             "url": "https://manifest.googlevideo.com/api/manifest/hls_playlist"},
            {"format_id": "140", "ext": "m4a", "protocol": "https", "vcodec": "none", "acodec": "mp4a.40.2",
             "abr": 129.5, "tbr": 130.1, "url": "https://rr1.googlevideo.com/videoplayback?itag=140",
             "http_headers": {"User-Agent": "Mozilla/5.0"}},
            {"format_id": "136", "ext": "mp4", "protocol": "https", "vcodec": "avc1.4d401f", "acodec": "none",
             "height": 720, "tbr": 1500.0, "url": "https://rr1.googlevideo.com/videoplayback?itag=136"},
            {"format_id": "18", "ext": "mp4", "protocol": "https", "vcodec": "avc1.42001E", "acodec": "mp4a.40.2",
             "height": 360, "tbr": 500.0, "url": "https://rr1.googlevideo.com/videoplayback?itag=18"}
        ]
    }"#;

    #[test]
    fn maps_direct_formats_into_descriptors_in_order() {
        let info: YtDlpVideoInfo = serde_json::from_str(SAMPLE_INFO).unwrap();
        let video = into_resolved_video(info);

        assert_eq!(video.title, "Test Video");
        assert_eq!(video.video_id, "abc123");
        let ids: Vec<&str> = video
            .streams
            .iter()
            .map(|stream| stream.source.format_id.as_str())
            .collect();
        assert_eq!(ids, vec!["140", "136", "18"]);

        let audio = &video.streams[0];
        assert!(audio.is_audio_only);
        assert!(!audio.is_progressive);
        assert_eq!(audio.height, None);
        assert_eq!(audio.bitrate_kbps, Some(129.5));
        assert_eq!(audio.container, "m4a");
        assert_eq!(
            audio.source.http_headers.get("User-Agent").map(String::as_str),
            Some("Mozilla/5.0")
        );

        let video_only = &video.streams[1];
        assert!(!video_only.is_progressive);
        assert!(!video_only.is_audio_only);
        assert_eq!(video_only.height, Some(720));

        let progressive = &video.streams[2];
        assert!(progressive.is_progressive);
        assert_eq!(progressive.height, Some(360));
        assert_eq!(progressive.bitrate_kbps, Some(500.0));
    }

    #[test]
    fn blank_title_falls_back_to_video_id() {
        let info: YtDlpVideoInfo =
            serde_json::from_str(r#"{"id": "xyz", "title": "  ", "formats": []}"#).unwrap();
        let video = into_resolved_video(info);
        assert_eq!(video.title, "xyz");
        assert!(video.streams.is_empty());
    }

    #[test]
    fn classifies_unreachable_videos() {
        let stderr = b"WARNING: something\nERROR: [youtube] abc123: Private video. Sign in if you've been granted access\n";
        assert!(matches!(
            classify_failure(stderr),
            ResolveError::Unavailable(message) if message.contains("Private video")
        ));

        assert!(matches!(
            classify_failure(b"ERROR: [youtube] abc123: Video unavailable"),
            ResolveError::Unavailable(_)
        ));
    }

    #[test]
    fn other_failures_keep_the_last_stderr_line() {
        assert!(matches!(
            classify_failure(b"ERROR: unable to download webpage: HTTP Error 503\n\n"),
            ResolveError::Failed(message) if message == "ERROR: unable to download webpage: HTTP Error 503"
        ));
        assert!(matches!(
            classify_failure(b""),
            ResolveError::Failed(message) if message == "yt-dlp could not complete the operation"
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_reported_as_tool_missing() {
        let resolver = YtDlpResolver::new("/nonexistent/yt-dlp-binary").unwrap();
        let error = resolver
            .resolve("https://youtube.com/watch?v=abc123")
            .await
            .unwrap_err();
        assert!(matches!(error, ResolveError::ToolMissing));
    }
}
