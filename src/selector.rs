//! Picks the stream to download out of everything the resolver listed.
//!
//! Rules run in a fixed order and the first one that yields a stream wins:
//!
//! - video: progressive stream in the target container at the preferred
//!   height, else the tallest progressive stream in the target container;
//! - audio: the first audio-only stream, or the one with the highest bitrate
//!   when [`AudioPolicy::HighestBitrate`] is configured.
//!
//! Ties always go to the stream the resolver listed first.

use std::{fmt, str::FromStr};

use crate::{resolver::StreamDescriptor, validate::DownloadKind};

pub const DEFAULT_CONTAINER: &str = "mp4";
pub const DEFAULT_PREFERRED_HEIGHT: u32 = 720;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioPolicy {
    #[default]
    FirstListed,
    HighestBitrate,
}

impl FromStr for AudioPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "first" | "first_listed" => Ok(Self::FirstListed),
            "bitrate" | "highest_bitrate" => Ok(Self::HighestBitrate),
            other => Err(format!(
                "unknown audio selection policy {other:?}, expected \"first\" or \"bitrate\""
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionPolicy {
    pub container: String,
    pub preferred_height: u32,
    pub audio: AudioPolicy,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            container: DEFAULT_CONTAINER.to_string(),
            preferred_height: DEFAULT_PREFERRED_HEIGHT,
            audio: AudioPolicy::default(),
        }
    }
}

/// Which rule produced a [`Selection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionRule {
    PreferredHeight,
    TallestProgressive,
    FirstAudioOnly,
    HighestBitrateAudio,
}

impl fmt::Display for SelectionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PreferredHeight => "preferred height",
            Self::TallestProgressive => "tallest progressive fallback",
            Self::FirstAudioOnly => "first audio-only",
            Self::HighestBitrateAudio => "highest bitrate audio-only",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection<'a> {
    pub stream: &'a StreamDescriptor,
    pub rule: SelectionRule,
}

pub fn select_stream<'a>(
    streams: &'a [StreamDescriptor],
    kind: DownloadKind,
    policy: &SelectionPolicy,
) -> Option<Selection<'a>> {
    match kind {
        DownloadKind::Video => select_video(streams, policy),
        DownloadKind::Audio => select_audio(streams, policy.audio),
    }
}

fn select_video<'a>(
    streams: &'a [StreamDescriptor],
    policy: &SelectionPolicy,
) -> Option<Selection<'a>> {
    let candidates = streams
        .iter()
        .filter(|stream| stream.is_progressive && stream.container.eq_ignore_ascii_case(&policy.container));

    if let Some(stream) = candidates
        .clone()
        .find(|stream| stream.height == Some(policy.preferred_height))
    {
        return Some(Selection {
            stream,
            rule: SelectionRule::PreferredHeight,
        });
    }

    // `None` heights order below every known height.
    candidates
        .fold(None, |best: Option<&StreamDescriptor>, stream| match best {
            Some(current) if current.height >= stream.height => Some(current),
            _ => Some(stream),
        })
        .map(|stream| Selection {
            stream,
            rule: SelectionRule::TallestProgressive,
        })
}

fn select_audio(streams: &[StreamDescriptor], policy: AudioPolicy) -> Option<Selection<'_>> {
    let mut candidates = streams.iter().filter(|stream| stream.is_audio_only);

    match policy {
        AudioPolicy::FirstListed => candidates.next().map(|stream| Selection {
            stream,
            rule: SelectionRule::FirstAudioOnly,
        }),
        AudioPolicy::HighestBitrate => candidates
            .fold(None, |best: Option<&StreamDescriptor>, stream| match best {
                Some(current) if bitrate_rank(current) >= bitrate_rank(stream) => Some(current),
                _ => Some(stream),
            })
            .map(|stream| Selection {
                stream,
                rule: SelectionRule::HighestBitrateAudio,
            }),
    }
}

fn bitrate_rank(stream: &StreamDescriptor) -> f32 {
    stream
        .bitrate_kbps
        .filter(|value| value.is_finite())
        .unwrap_or(-1.0)
}
