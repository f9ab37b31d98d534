//! Fetches the selected stream into scratch storage and streams it back.
//!
//! Every request gets its own job directory under the scratch root, so two
//! concurrent requests for the same video never write to the same path and each
//! one serves only the bytes it fetched. The directory is owned by a
//! [`ScratchJob`] guard that travels with the response body and removes the
//! directory once the body is dropped, whether it finished streaming or the
//! client went away. [`ScratchSpace::reap_stale`] sweeps anything a crash left
//! behind and never touches a job that is still held.

use std::{
    collections::HashSet,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, SystemTime},
};

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderName, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::DownloadError,
    resolver::{FetchError, StreamDescriptor, StreamResolver, with_timeout},
    sanitize::{build_content_disposition, sanitize_ascii_filename},
    validate::DownloadKind,
};

pub const DOWNLOAD_FILENAME_HEADER: &str = "x-download-filename";

type LiveJobs = Arc<Mutex<HashSet<PathBuf>>>;

/// The scratch root plus the set of job directories currently held by a request.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
    live: LiveJobs,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            live: Arc::default(),
        }
    }

    /// Registers and creates a fresh job directory.
    pub async fn create_job(&self) -> Result<ScratchJob, DownloadError> {
        let dir = self.root.join(Uuid::new_v4().to_string());
        lock(&self.live).insert(dir.clone());
        let job = ScratchJob {
            dir,
            live: Arc::clone(&self.live),
        };

        tokio::fs::create_dir_all(&job.dir)
            .await
            .map_err(|source| DownloadError::Scratch {
                path: job.dir.clone(),
                source,
            })?;

        Ok(job)
    }

    fn is_live(&self, path: &Path) -> bool {
        lock(&self.live).contains(path)
    }

    /// Removes entries last modified more than `older_than` ago, skipping job
    /// directories that are still held. A zero duration disables the sweep.
    pub async fn reap_stale(&self, older_than: Duration) {
        if older_than.is_zero() {
            return;
        }

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(error) => {
                if error.kind() != ErrorKind::NotFound {
                    warn!("could not open scratch directory for cleanup: {error}");
                }
                return;
            }
        };

        let now = SystemTime::now();

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) => {
                    warn!("could not iterate scratch directory for cleanup: {error}");
                    break;
                }
            };

            let path = entry.path();
            if self.is_live(&path) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(error) => {
                    warn!("could not read metadata of {:?}: {error}", path);
                    continue;
                }
            };

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified_at| now.duration_since(modified_at).ok())
                .unwrap_or_default();
            if age < older_than {
                continue;
            }

            let removal = if metadata.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match removal {
                Ok(()) => debug!("reaped stale scratch entry {:?}", path),
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => warn!("could not remove stale scratch entry {:?}: {error}", path),
            }
        }
    }
}

fn lock(live: &Mutex<HashSet<PathBuf>>) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
    live.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A request-private directory under the scratch root, removed on drop.
#[derive(Debug)]
pub struct ScratchJob {
    dir: PathBuf,
    live: LiveJobs,
}

impl ScratchJob {
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for ScratchJob {
    fn drop(&mut self) {
        let dir = std::mem::take(&mut self.dir);
        lock(&self.live).remove(&dir);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { cleanup_download_job(&dir).await });
            }
            Err(_) => {
                if let Err(error) = std::fs::remove_dir_all(&dir)
                    && error.kind() != ErrorKind::NotFound
                {
                    warn!("could not remove scratch directory {:?}: {error}", dir);
                }
            }
        }
    }
}

/// Bytes of one stream sitting in scratch storage, owned by a single request.
#[derive(Debug)]
pub struct DownloadedArtifact {
    pub path: PathBuf,
    pub filename: String,
    pub media_type: &'static str,
    pub len: u64,
    job: ScratchJob,
}

impl DownloadedArtifact {
    /// Streams the file as the response body. The scratch job is released when
    /// the body is dropped.
    pub async fn respond(self) -> Result<Response, DownloadError> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|source| DownloadError::Scratch {
                path: self.path.clone(),
                source,
            })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.media_type));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(self.len));
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_str(&build_content_disposition(&self.filename))?,
        );
        headers.insert(
            HeaderName::from_static(DOWNLOAD_FILENAME_HEADER),
            HeaderValue::from_str(&sanitize_ascii_filename(&self.filename))?,
        );

        let job = self.job;
        let stream = ReaderStream::new(file).map(move |chunk| {
            let _held = &job;
            chunk
        });

        Ok((headers, Body::from_stream(stream)).into_response())
    }
}

/// Fetches `stream` into a fresh scratch job and checks the file really landed.
pub async fn download_artifact(
    resolver: &dyn StreamResolver,
    stream: &StreamDescriptor,
    filename: &str,
    kind: DownloadKind,
    scratch: &ScratchSpace,
    fetch_timeout: Duration,
) -> Result<DownloadedArtifact, DownloadError> {
    let job = scratch.create_job().await?;
    let path = job.dir().join(filename);

    info!("Attempting to download {kind} to: {}", path.display());
    let written = with_timeout(
        fetch_timeout,
        FetchError::Timeout,
        resolver.fetch(stream, &path),
    )
    .await?;
    debug!(bytes = written, "{} reported fetch completion", resolver.name());

    let len = match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() && metadata.len() > 0 => metadata.len(),
        Ok(_) => {
            warn!("Downloaded file is empty or not a regular file: {}", path.display());
            return Err(DownloadError::ArtifactMissing { path });
        }
        Err(error) if error.kind() == ErrorKind::NotFound => {
            warn!("File not found after {kind} download attempt: {}", path.display());
            return Err(DownloadError::ArtifactMissing { path });
        }
        Err(source) => return Err(DownloadError::Scratch { path, source }),
    };
    info!(bytes = len, "{kind} download completed");

    Ok(DownloadedArtifact {
        path,
        filename: filename.to_string(),
        media_type: kind.media_type(),
        len,
        job,
    })
}

pub async fn fetch_and_serve(
    resolver: &dyn StreamResolver,
    stream: &StreamDescriptor,
    filename: &str,
    kind: DownloadKind,
    scratch: &ScratchSpace,
    fetch_timeout: Duration,
) -> Result<Response, DownloadError> {
    download_artifact(resolver, stream, filename, kind, scratch, fetch_timeout)
        .await?
        .respond()
        .await
}

async fn cleanup_download_job(job_dir: &Path) {
    if let Err(error) = tokio::fs::remove_dir_all(job_dir).await
        && error.kind() != ErrorKind::NotFound
    {
        warn!("could not remove scratch directory {:?}: {error}", job_dir);
    }
}
