use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::selector::{AudioPolicy, DEFAULT_CONTAINER, DEFAULT_PREFERRED_HEIGHT, SelectionPolicy};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 1] = ["https://easyytdownloader.netlify.app"];
pub const DEFAULT_YT_DLP_BIN: &str = "yt-dlp";
const DEFAULT_RESOLVE_TIMEOUT_SECONDS: u64 = 180;
const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 10 * 60;
const DEFAULT_STALE_SCRATCH_SECONDS: u64 = 2 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid origin in ALLOWED_ORIGINS: {0}. Use values like https://domain.com")]
    InvalidOrigin(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub allowed_origins: Vec<String>,
    pub scratch_dir: PathBuf,
    pub yt_dlp_bin: String,
    pub resolve_timeout: Duration,
    pub fetch_timeout: Duration,
    /// Scratch entries older than this are reaped; zero disables the reaper.
    pub stale_scratch_after: Duration,
    pub selection: SelectionPolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any `name -> value` source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string))
        };

        let allowed_origins = var("ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(|| {
                DEFAULT_ALLOWED_ORIGINS
                    .iter()
                    .map(ToString::to_string)
                    .collect()
            });

        let selection = SelectionPolicy {
            container: var("TARGET_CONTAINER")
                .map(|value| value.to_ascii_lowercase())
                .unwrap_or_else(|| DEFAULT_CONTAINER.to_string()),
            preferred_height: parse_var(&var, "PREFERRED_HEIGHT")?
                .unwrap_or(DEFAULT_PREFERRED_HEIGHT),
            audio: match var("AUDIO_SELECTION") {
                Some(value) => value.parse::<AudioPolicy>().map_err(|reason| {
                    ConfigError::Invalid {
                        name: "AUDIO_SELECTION",
                        value,
                        reason,
                    }
                })?,
                None => AudioPolicy::default(),
            },
        };

        Ok(Self {
            bind_addr: resolve_bind_addr(&var)?,
            allowed_origins,
            scratch_dir: var("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("yt-proxy")),
            yt_dlp_bin: var("YT_DLP_BIN").unwrap_or_else(|| DEFAULT_YT_DLP_BIN.to_string()),
            resolve_timeout: Duration::from_secs(
                positive_secs(&var, "RESOLVE_TIMEOUT_SECONDS")?
                    .unwrap_or(DEFAULT_RESOLVE_TIMEOUT_SECONDS),
            ),
            fetch_timeout: Duration::from_secs(
                positive_secs(&var, "FETCH_TIMEOUT_SECONDS")?
                    .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECONDS),
            ),
            stale_scratch_after: Duration::from_secs(
                parse_var(&var, "STALE_SCRATCH_SECONDS")?.unwrap_or(DEFAULT_STALE_SCRATCH_SECONDS),
            ),
            selection,
        })
    }
}

fn resolve_bind_addr(var: &impl Fn(&str) -> Option<String>) -> Result<String, ConfigError> {
    if let Some(configured) = var("APP_ADDR") {
        return Ok(configured);
    }

    if let Some(port) = parse_var::<u16>(var, "PORT")? {
        return Ok(format!("0.0.0.0:{port}"));
    }

    Ok(DEFAULT_BIND_ADDR.to_string())
}

fn parse_var<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|value| {
            value.parse::<T>().map_err(|error| ConfigError::Invalid {
                name,
                reason: error.to_string(),
                value,
            })
        })
        .transpose()
}

fn positive_secs(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match parse_var::<u64>(var, name)? {
        Some(0) => Err(ConfigError::Invalid {
            name,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        other => Ok(other),
    }
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|name| values.get(name).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.allowed_origins, vec!["https://easyytdownloader.netlify.app"]);
        assert_eq!(config.scratch_dir, std::env::temp_dir().join("yt-proxy"));
        assert_eq!(config.yt_dlp_bin, "yt-dlp");
        assert_eq!(config.resolve_timeout, Duration::from_secs(180));
        assert_eq!(config.fetch_timeout, Duration::from_secs(600));
        assert_eq!(config.stale_scratch_after, Duration::from_secs(7200));
        assert_eq!(config.selection, SelectionPolicy::default());
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("PORT", "9000"),
            ("ALLOWED_ORIGINS", " https://a.example , ,http://localhost:5173 "),
            ("SCRATCH_DIR", "/var/tmp/scratch"),
            ("YT_DLP_BIN", "/opt/yt-dlp"),
            ("RESOLVE_TIMEOUT_SECONDS", "30"),
            ("FETCH_TIMEOUT_SECONDS", "90"),
            ("STALE_SCRATCH_SECONDS", "0"),
            ("TARGET_CONTAINER", "WEBM"),
            ("PREFERRED_HEIGHT", "1080"),
            ("AUDIO_SELECTION", "bitrate"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example", "http://localhost:5173"]
        );
        assert_eq!(config.scratch_dir, PathBuf::from("/var/tmp/scratch"));
        assert_eq!(config.yt_dlp_bin, "/opt/yt-dlp");
        assert_eq!(config.resolve_timeout, Duration::from_secs(30));
        assert_eq!(config.fetch_timeout, Duration::from_secs(90));
        assert_eq!(config.stale_scratch_after, Duration::ZERO);
        assert_eq!(config.selection.container, "webm");
        assert_eq!(config.selection.preferred_height, 1080);
        assert_eq!(config.selection.audio, AudioPolicy::HighestBitrate);
    }

    #[test]
    fn app_addr_wins_over_port() {
        let config = config_from(&[("APP_ADDR", "0.0.0.0:1234"), ("PORT", "9000")]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:1234");
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(config_from(&[("PORT", "http")]).is_err());
        assert!(config_from(&[("PREFERRED_HEIGHT", "720p")]).is_err());
        assert!(config_from(&[("RESOLVE_TIMEOUT_SECONDS", "0")]).is_err());
        assert!(config_from(&[("AUDIO_SELECTION", "loudest")]).is_err());
    }
}
